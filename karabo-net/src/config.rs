//! Reconfigurable runtime properties of a [`crate::SignalSlotable`]:
//! heartbeat cadence, default request timeout, and instance-tracking
//! tolerances. Loaded as TOML on disk, falling back to built-in defaults
//! when absent.

use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,

    /// How many missed heartbeats before an instance is declared gone.
    /// Karabo's own devices default to treating three consecutive misses
    /// as departure; we keep that ratio rather than inventing a new one.
    #[serde(default = "default_heartbeat_miss_factor")]
    pub heartbeat_miss_factor: u32,

    #[serde(default = "default_request_timeout_ms")]
    pub default_request_timeout_ms: u64,

    #[serde(default = "default_topology_check_interval_secs")]
    pub topology_check_interval_secs: u64,

    #[serde(default = "default_topology_check_tolerance_secs")]
    pub topology_check_tolerance_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            heartbeat_miss_factor: default_heartbeat_miss_factor(),
            default_request_timeout_ms: default_request_timeout_ms(),
            topology_check_interval_secs: default_topology_check_interval_secs(),
            topology_check_tolerance_secs: default_topology_check_tolerance_secs(),
        }
    }
}

impl Config {
    /// Load from a TOML file, falling back to defaults if missing or
    /// unparsable -- a missing config is a normal, expected case for a
    /// library embedded into a larger daemon.
    pub fn load(path: impl AsRef<Path>) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }
}

fn default_heartbeat_interval_secs() -> u64 {
    10
}
fn default_heartbeat_miss_factor() -> u32 {
    3
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_topology_check_interval_secs() -> u64 {
    300
}
fn default_topology_check_tolerance_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.heartbeat_interval_secs, 10);
        assert!(cfg.heartbeat_miss_factor >= 2, "a miss factor under 2 would flap on a single dropped beat");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/path/karabo-net.toml");
        assert_eq!(cfg.default_request_timeout_ms, 5_000);
    }

    #[test]
    fn parses_partial_overrides() {
        let dir = std::env::temp_dir().join(format!("karabo-net-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        fs::write(&path, "heartbeat_interval_secs = 5\n").unwrap();
        let cfg = Config::load(&path);
        assert_eq!(cfg.heartbeat_interval_secs, 5);
        assert_eq!(cfg.default_request_timeout_ms, 5_000);
        let _ = fs::remove_dir_all(&dir);
    }
}
