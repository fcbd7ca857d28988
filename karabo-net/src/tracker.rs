//! Heartbeat-based topology tracking. Every [`crate::SignalSlotable`]
//! periodically broadcasts a heartbeat; the [`Tracker`] on each instance
//! watches those beats and declares an instance gone once it has missed
//! `heartbeat_miss_factor` consecutive intervals, emitting `instanceNew`
//! and `instanceGone` events the rest of the runtime (and the
//! logger-manager) react to.

use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;

use karabo_data::{Clock, SystemClock, Timestamp};

use crate::config::Config;

#[derive(Debug, Clone)]
pub struct TrackedInstance {
    pub instance_id: String,
    pub instance_type: String,
    pub last_seen: Timestamp,
}

#[derive(Debug, Clone)]
pub enum TopologyEvent {
    InstanceNew(TrackedInstance),
    InstanceGone(String),
}

pub struct Tracker {
    instances: DashMap<String, TrackedInstance>,
    events_tx: broadcast::Sender<TopologyEvent>,
    heartbeat_interval_secs: u64,
    heartbeat_miss_factor: u32,
    clock: Box<dyn Clock + Send + Sync>,
}

impl Tracker {
    pub fn new(config: &Config) -> Self {
        let (events_tx, _rx) = broadcast::channel(256);
        Self {
            instances: DashMap::new(),
            events_tx,
            heartbeat_interval_secs: config.heartbeat_interval_secs,
            heartbeat_miss_factor: config.heartbeat_miss_factor,
            clock: Box::new(SystemClock),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events_tx.subscribe()
    }

    /// Record a heartbeat (or first sighting) from `instance_id`. Emits
    /// `instanceNew` the first time an id is seen.
    pub fn beat(&self, instance_id: &str, instance_type: &str) {
        let now = self.clock.now();
        let is_new = !self.instances.contains_key(instance_id);
        self.instances.insert(
            instance_id.to_string(),
            TrackedInstance { instance_id: instance_id.to_string(), instance_type: instance_type.to_string(), last_seen: now },
        );
        if is_new {
            let _ = self.events_tx.send(TopologyEvent::InstanceNew(TrackedInstance {
                instance_id: instance_id.to_string(),
                instance_type: instance_type.to_string(),
                last_seen: now,
            }));
        }
    }

    /// Duration an instance may go silent before it's declared gone.
    fn expiry_window(&self) -> f64 {
        self.heartbeat_interval_secs as f64 * self.heartbeat_miss_factor as f64
    }

    /// Sweep for instances that have exceeded the expiry window, removing
    /// them and emitting `instanceGone`. Intended to be called from a
    /// periodic timer inside `SignalSlotable`'s own run loop.
    pub fn sweep_expired(&self) {
        let now = self.clock.now();
        let window = self.expiry_window();
        let expired: Vec<String> = self
            .instances
            .iter()
            .filter(|entry| now.elapsed_since(&entry.last_seen) > window)
            .map(|entry| entry.instance_id.clone())
            .collect();
        for id in expired {
            self.instances.remove(&id);
            let _ = self.events_tx.send(TopologyEvent::InstanceGone(id));
        }
    }

    pub fn is_known(&self, instance_id: &str) -> bool {
        self.instances.contains_key(instance_id)
    }

    pub fn known_instances(&self) -> Vec<TrackedInstance> {
        self.instances.iter().map(|e| e.value().clone()).collect()
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(interval: u64, factor: u32) -> Config {
        let mut c = Config::default();
        c.heartbeat_interval_secs = interval;
        c.heartbeat_miss_factor = factor;
        c
    }

    #[test]
    fn first_beat_emits_instance_new() {
        let tracker = Tracker::new(&Config::default());
        let mut rx = tracker.subscribe();
        tracker.beat("deviceA", "Motor");
        match rx.try_recv().unwrap() {
            TopologyEvent::InstanceNew(inst) => assert_eq!(inst.instance_id, "deviceA"),
            other => panic!("expected InstanceNew, got {other:?}"),
        }
    }

    #[test]
    fn repeated_beat_does_not_re_emit_new() {
        let tracker = Tracker::new(&Config::default());
        let mut rx = tracker.subscribe();
        tracker.beat("deviceA", "Motor");
        rx.try_recv().unwrap();
        tracker.beat("deviceA", "Motor");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stale_instance_is_swept_as_gone() {
        let tracker = Tracker::new(&config_with(0, 1));
        let mut rx = tracker.subscribe();
        tracker.beat("deviceA", "Motor");
        rx.try_recv().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        tracker.sweep_expired();
        match rx.try_recv().unwrap() {
            TopologyEvent::InstanceGone(id) => assert_eq!(id, "deviceA"),
            other => panic!("expected InstanceGone, got {other:?}"),
        }
        assert!(!tracker.is_known("deviceA"));
    }

    #[test]
    fn fresh_instance_is_not_swept() {
        let tracker = Tracker::new(&config_with(100, 3));
        tracker.beat("deviceA", "Motor");
        tracker.sweep_expired();
        assert!(tracker.is_known("deviceA"));
    }
}
