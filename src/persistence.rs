//! Event log persistence: one JSON object per line, appended the
//! same way the experience store is (`OpenOptions` append + create).

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;

use crate::error::AtscError;

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub timestamp: String,
    pub simulation_time: u64,
    pub kind: String,
    pub payload: Value,
}

impl EventRecord {
    pub fn new(simulation_time: u64, kind: impl Into<String>, payload: Value) -> Self {
        EventRecord {
            timestamp: Utc::now().to_rfc3339(),
            simulation_time,
            kind: kind.into(),
            payload,
        }
    }
}

pub fn append_event(path: impl AsRef<Path>, event: &EventRecord) -> Result<(), AtscError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path.as_ref())
        .map_err(|e| AtscError::PersistenceFailure(format!("opening event log: {e}")))?;
    let line = serde_json::to_string(event)
        .map_err(|e| AtscError::PersistenceFailure(format!("serializing event: {e}")))?;
    writeln!(file, "{line}").map_err(|e| AtscError::PersistenceFailure(format!("writing event: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn append_event_writes_one_json_line() {
        let dir = std::env::temp_dir().join(format!("atsc_test_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("event_log.jsonl");
        let event = EventRecord::new(42, "decision", serde_json::json!({"method": "fallback"}));
        append_event(&path, &event).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 1);
        let parsed: Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(parsed["simulation_time"], 42);
        fs::remove_dir_all(&dir).ok();
    }
}
