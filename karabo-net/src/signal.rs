//! The outgoing side of signal/slot RPC. A [`Signal`] tracks which
//! `(instanceId, slotName)` pairs are currently subscribed, and emitting
//! it delivers to every subscriber: in-process via [`crate::registry`]
//! when possible, over the broker otherwise.

use std::collections::HashSet;
use std::sync::RwLock;

#[derive(Default)]
pub struct Signal {
    pub name: String,
    subscribers: RwLock<HashSet<(String, String)>>,
}

impl Signal {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), subscribers: RwLock::new(HashSet::new()) }
    }

    pub fn connect(&self, instance_id: &str, slot_name: &str) {
        self.subscribers.write().unwrap().insert((instance_id.to_string(), slot_name.to_string()));
    }

    pub fn disconnect(&self, instance_id: &str, slot_name: &str) {
        self.subscribers.write().unwrap().remove(&(instance_id.to_string(), slot_name.to_string()));
    }

    pub fn disconnect_all_for(&self, instance_id: &str) {
        self.subscribers.write().unwrap().retain(|(id, _)| id != instance_id);
    }

    pub fn subscribers(&self) -> Vec<(String, String)> {
        self.subscribers.read().unwrap().iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_disconnect() {
        let sig = Signal::new("signalStateChanged");
        sig.connect("deviceA", "slotStateChanged");
        assert_eq!(sig.subscribers().len(), 1);
        sig.disconnect("deviceA", "slotStateChanged");
        assert!(sig.is_empty());
    }

    #[test]
    fn disconnect_all_for_instance() {
        let sig = Signal::new("signalStateChanged");
        sig.connect("deviceA", "slotOne");
        sig.connect("deviceA", "slotTwo");
        sig.connect("deviceB", "slotOne");
        sig.disconnect_all_for("deviceA");
        assert_eq!(sig.subscribers(), vec![("deviceB".to_string(), "slotOne".to_string())]);
    }
}
