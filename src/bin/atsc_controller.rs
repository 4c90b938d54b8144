//! Live controller binary: wires a simulator link into the control loop and
//! lets it run, mirroring this codebase's `tokio::main` + `tokio::select!`
//! wiring in its original simulation entry point.

use std::error::Error;

use atsc_core::adapter::test_support::SimVehicleWorld;
use atsc_core::config::Config;
use atsc_core::control_loop::ControlLoop;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    // A real deployment plugs a `RawSimulatorLink` binding to the external
    // simulator here; `SimVehicleWorld` stands in for local demos the same
    // way this codebase's own `SimulationEngine` used to drive its bins.
    let world = SimVehicleWorld::new();
    let (join_handle, handle) = ControlLoop::spawn(world, config);

    handle.start().await;
    log::info!("control loop started");

    tokio::signal::ctrl_c().await?;
    log::info!("shutdown requested, stopping control loop");
    handle.stop().await;

    join_handle.abort();
    Ok(())
}
