//! Admin CLI: a blocking `stdin`-loop menu in the same shape as this
//! codebase's own monitoring-system `run_cli`, issuing control commands over
//! a `ControlHandle` instead of reading CSV logs off disk.

use std::io::{stdin, stdout, Write};

use atsc_core::adapter::test_support::SimVehicleWorld;
use atsc_core::config::Config;
use atsc_core::control_loop::ControlLoop;
use atsc_core::types::{ManualCommand, Mode};

#[tokio::main]
async fn main() {
    env_logger::init();
    let config = Config::default();
    let (join_handle, handle) = ControlLoop::spawn(SimVehicleWorld::new(), config);
    handle.start().await;

    loop {
        println!("\nAdaptive Signal Control Admin CLI");
        println!("1. Show current status");
        println!("2. Show mode");
        println!("3. Set mode (AUTO/MANUAL)");
        println!("4. Apply manual override");
        println!("5. Cancel manual override");
        println!("6. Stop control loop");
        println!("7. Exit");
        print!("Enter your choice: ");
        stdout().flush().ok();

        let mut input = String::new();
        if stdin().read_line(&mut input).is_err() {
            break;
        }
        let choice: u32 = input.trim().parse().unwrap_or(0);

        match choice {
            1 => {
                let snapshot = handle.get_status();
                println!("{}", serde_json::to_string_pretty(&snapshot).unwrap_or_default());
            }
            2 => {
                if let Some(mode) = handle.get_mode().await {
                    println!("{mode:?}");
                } else {
                    println!("control loop did not respond");
                }
            }
            3 => {
                print!("Enter mode (auto/manual): ");
                stdout().flush().ok();
                let mut mode_input = String::new();
                stdin().read_line(&mut mode_input).ok();
                let mode = match mode_input.trim().to_lowercase().as_str() {
                    "manual" => Mode::Manual,
                    _ => Mode::Auto,
                };
                match handle.set_mode(mode).await {
                    Ok(()) => println!("mode set"),
                    Err(e) => println!("rejected: {e}"),
                }
            }
            4 => {
                print!("Enter command (ns_green/ew_green/all_red): ");
                stdout().flush().ok();
                let mut cmd_input = String::new();
                stdin().read_line(&mut cmd_input).ok();
                let command = match cmd_input.trim().to_lowercase().as_str() {
                    "ns_green" => ManualCommand::NsGreen,
                    "ew_green" => ManualCommand::EwGreen,
                    "all_red" => ManualCommand::AllRed,
                    _ => {
                        println!("unrecognized command");
                        continue;
                    }
                };
                print!("Enter duration seconds (10-120): ");
                stdout().flush().ok();
                let mut dur_input = String::new();
                stdin().read_line(&mut dur_input).ok();
                let duration = dur_input.trim().parse::<u64>().unwrap_or(0);
                match handle.apply_manual(command, duration).await {
                    Ok(()) => println!("manual override applied"),
                    Err(e) => println!("rejected: {e}"),
                }
            }
            5 => {
                handle.cancel_manual().await;
                println!("manual override cancelled");
            }
            6 => {
                handle.stop().await;
                println!("control loop stopped");
            }
            7 => {
                handle.stop().await;
                break;
            }
            _ => println!("unrecognized choice"),
        }
    }

    join_handle.abort();
}
