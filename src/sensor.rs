//! Sensor identity.

use std::path::Path;

const MACHINE_ID_PATH: &str = "/etc/machine-id";

/// Derive the process-wide sensor identifier.
///
/// Prefers the host machine-id; falls back to the hostname when the file is
/// absent or unreadable. Computed once at startup and treated as a
/// configuration constant thereafter.
pub fn sensor_id() -> String {
    sensor_id_from(Path::new(MACHINE_ID_PATH))
}

fn sensor_id_from(machine_id_path: &Path) -> String {
    match std::fs::read_to_string(machine_id_path) {
        Ok(contents) => {
            let trimmed = contents.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
            fallback_hostname()
        }
        Err(_) => fallback_hostname(),
    }
}

fn fallback_hostname() -> String {
    hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-sensor".to_string())
}
