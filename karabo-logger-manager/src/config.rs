//! Reconfigurable properties of the logger manager: persistence paths,
//! the periodic sanity-check cadence, and how much drift between a
//! logger's last write and the live device it's logging is tolerated.
//! Loaded the same way as `karabo-net::Config`: TOML on disk, defaults
//! when absent. Field names mirror the control surface exposed by the
//! manager: `flushInterval`, `topologyCheck.interval`,
//! `topologyCheck.toleranceLogged`, `topologyCheck.toleranceDiff`.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_loggermap_path")]
    pub loggermap_path: PathBuf,

    #[serde(default = "default_blocklist_path")]
    pub blocklist_path: PathBuf,

    /// `flushInterval`: how often a logger is asked to flush and report
    /// its per-device last-write timestamps.
    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// `topologyCheck.interval`: cadence of the periodic sanity check.
    #[serde(default = "default_topology_check_interval_secs")]
    pub topology_check_interval_secs: u64,

    /// `topologyCheck.toleranceLogged`: how stale a logger's reported
    /// last-update may be before the manager bothers querying the
    /// device's own live configuration to compare.
    #[serde(default = "default_tolerance_logged_secs")]
    pub tolerance_logged_secs: u64,

    /// `topologyCheck.toleranceDiff`: how far behind the device's own
    /// most recent timestamp a logger's last-update may lag, once
    /// compared, before the manager forces a stop+start.
    #[serde(default = "default_tolerance_diff_secs")]
    pub tolerance_diff_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            loggermap_path: default_loggermap_path(),
            blocklist_path: default_blocklist_path(),
            flush_interval_secs: default_flush_interval_secs(),
            topology_check_interval_secs: default_topology_check_interval_secs(),
            tolerance_logged_secs: default_tolerance_logged_secs(),
            tolerance_diff_secs: default_tolerance_diff_secs(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_default(),
            Err(_) => Config::default(),
        }
    }

    /// The threshold actually used to force a stop+start once a logger's
    /// row has been compared against the device's live configuration:
    /// `max(toleranceDiff, flushInterval)`, per the manager's sanity-check
    /// rule -- a logger can never be judged behind by less than one of
    /// its own flush cycles.
    pub fn lag_tolerance_secs(&self) -> u64 {
        self.tolerance_diff_secs.max(self.flush_interval_secs)
    }
}

fn default_loggermap_path() -> PathBuf {
    PathBuf::from("loggermap.xml")
}
fn default_blocklist_path() -> PathBuf {
    PathBuf::from("blocklist.xml")
}
fn default_flush_interval_secs() -> u64 {
    40
}
fn default_topology_check_interval_secs() -> u64 {
    300
}
fn default_tolerance_logged_secs() -> u64 {
    60
}
fn default_tolerance_diff_secs() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lag_tolerance_takes_the_larger_of_the_two() {
        let mut cfg = Config { flush_interval_secs: 120, ..Config::default() };
        cfg.tolerance_diff_secs = 60;
        assert_eq!(cfg.lag_tolerance_secs(), 120);
        cfg.tolerance_diff_secs = 200;
        assert_eq!(cfg.lag_tolerance_secs(), 200);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = Config::load("/nonexistent/karabo-logger-manager.toml");
        assert_eq!(cfg.flush_interval_secs, 40);
    }

    #[test]
    fn lag_tolerance_falls_back_to_flush_interval_when_larger() {
        let cfg = Config { tolerance_logged_secs: 60, tolerance_diff_secs: 30, flush_interval_secs: 40, ..Config::default() };
        assert_eq!(cfg.lag_tolerance_secs(), 40);
    }
}
