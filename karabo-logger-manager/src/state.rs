//! One [`ServerState`] per logger server, holding the three disjoint
//! device sets the manager moves devices between: `backlog` (assigned,
//! not yet confirmed logging), `being_added` (an `addDevicesToBeLogged`
//! call is in flight for these), and `devices` (confirmed logging).

use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerPhase {
    Offline,
    Instantiating,
    Running,
}

#[derive(Debug, Clone)]
pub struct ServerState {
    pub server_id: String,
    pub phase: ServerPhase,
    pub backlog: BTreeSet<String>,
    pub being_added: BTreeSet<String>,
    pub devices: BTreeSet<String>,
}

impl ServerState {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self { server_id: server_id.into(), phase: ServerPhase::Offline, backlog: BTreeSet::new(), being_added: BTreeSet::new(), devices: BTreeSet::new() }
    }

    /// The three device sets are pairwise disjoint after every mutation;
    /// this is the invariant every manager transition must preserve.
    pub fn sets_are_disjoint(&self) -> bool {
        self.backlog.is_disjoint(&self.being_added)
            && self.backlog.is_disjoint(&self.devices)
            && self.being_added.is_disjoint(&self.devices)
    }

    pub fn total_tracked(&self) -> usize {
        self.backlog.len() + self.being_added.len() + self.devices.len()
    }

    pub fn contains(&self, device_id: &str) -> bool {
        self.backlog.contains(device_id) || self.being_added.contains(device_id) || self.devices.contains(device_id)
    }

    pub fn remove_everywhere(&mut self, device_id: &str) {
        self.backlog.remove(device_id);
        self.being_added.remove(device_id);
        self.devices.remove(device_id);
    }

    /// Move every tracked device back to `backlog`, used when a logger
    /// or its server disappears and re-instantiation is about to start.
    pub fn collapse_to_backlog(&mut self) {
        let moved: Vec<String> = self.devices.iter().chain(self.being_added.iter()).cloned().collect();
        self.devices.clear();
        self.being_added.clear();
        self.backlog.extend(moved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_moves_devices_and_being_added_into_backlog() {
        let mut s = ServerState::new("S1");
        s.devices.insert("d1".into());
        s.being_added.insert("d2".into());
        s.backlog.insert("d3".into());
        s.collapse_to_backlog();
        assert_eq!(s.backlog, BTreeSet::from(["d1".to_string(), "d2".to_string(), "d3".to_string()]));
        assert!(s.devices.is_empty());
        assert!(s.being_added.is_empty());
        assert!(s.sets_are_disjoint());
    }

    #[test]
    fn remove_everywhere_clears_all_three_sets() {
        let mut s = ServerState::new("S1");
        s.devices.insert("d1".into());
        s.backlog.insert("d1".into());
        s.remove_everywhere("d1");
        assert!(!s.contains("d1"));
    }
}
