//! Persistence for the two files the manager survives a restart with.
//! Both keep their historical `.xml` extension for continuity with the
//! wire-level naming, but their content is JSON via `serde_json` -- the
//! text-codec component that would normally produce real XML is out of
//! scope, and the rest of this corpus always reaches for `serde` rather
//! than hand-rolling a format.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{LoggerManagerError, LoggerManagerResult};

/// `loggermap.xml` content: `DataLogger-<deviceId>` -> `serverId`, matching
/// the structure named for the original text serializer.
#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct LoggerMap(pub BTreeMap<String, String>);

impl LoggerMap {
    pub fn key_for(device_id: &str) -> String {
        format!("DataLogger-{device_id}")
    }

    pub fn assign(&mut self, device_id: &str, server_id: &str) {
        self.0.insert(Self::key_for(device_id), server_id.to_string());
    }

    pub fn server_for(&self, device_id: &str) -> Option<&str> {
        self.0.get(&Self::key_for(device_id)).map(String::as_str)
    }

    pub fn remove(&mut self, device_id: &str) {
        self.0.remove(&Self::key_for(device_id));
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone, PartialEq)]
pub struct Blocklist {
    pub device_ids: BTreeSet<String>,
    pub class_ids: BTreeSet<String>,
}

pub fn load_logger_map(path: &Path) -> LoggerManagerResult<LoggerMap> {
    load_json(path, "loggermap")
}

pub fn save_logger_map(path: &Path, map: &LoggerMap) -> LoggerManagerResult<()> {
    save_json(path, "loggermap", map)
}

pub fn load_blocklist(path: &Path) -> LoggerManagerResult<Blocklist> {
    load_json(path, "blocklist")
}

pub fn save_blocklist(path: &Path, list: &Blocklist) -> LoggerManagerResult<()> {
    save_json(path, "blocklist", list)
}

fn load_json<T: Default + for<'de> Deserialize<'de>>(path: &Path, what: &'static str) -> LoggerManagerResult<T> {
    match std::fs::read_to_string(path) {
        Ok(contents) => serde_json::from_str(&contents)
            .map_err(|source| LoggerManagerError::Decode { what, path: path.display().to_string(), source }),
        Err(_) => Ok(T::default()),
    }
}

fn save_json<T: Serialize>(path: &Path, what: &'static str, value: &T) -> LoggerManagerResult<()> {
    let contents = serde_json::to_string_pretty(value).expect("in-memory state is always serializable");
    std::fs::write(path, contents).map_err(|source| LoggerManagerError::Persistence { what, path: path.display().to_string(), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logger_map_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("loggermap.xml");

        let mut map = LoggerMap::default();
        map.assign("d1", "S1");
        map.assign("d2", "S2");
        save_logger_map(&path, &map).unwrap();

        let loaded = load_logger_map(&path).unwrap();
        assert_eq!(loaded.server_for("d1"), Some("S1"));
        assert_eq!(loaded, map);
    }

    #[test]
    fn missing_logger_map_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("does-not-exist.xml");
        let loaded = load_logger_map(&path).unwrap();
        assert!(loaded.0.is_empty());
    }

    #[test]
    fn blocklist_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("blocklist.xml");
        let mut list = Blocklist::default();
        list.device_ids.insert("d1".into());
        list.class_ids.insert("NoisyClass".into());
        save_blocklist(&path, &list).unwrap();
        assert_eq!(load_blocklist(&path).unwrap(), list);
    }
}
