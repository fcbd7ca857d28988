//! A process-wide directory of every live [`crate::SignalSlotable`], keyed
//! by instance id. Lets two instances in the same process exchange
//! messages directly instead of round-tripping through the broker --
//! "short-circuit" delivery -- while falling back to the broker for
//! anything the registry doesn't know about (a different process, or an
//! instance that hasn't registered yet).

use std::sync::{Arc, Weak};

use dashmap::DashMap;
use once_cell::sync::Lazy;

use crate::signalslotable::SignalSlotable;

static REGISTRY: Lazy<DashMap<String, Weak<SignalSlotable>>> = Lazy::new(DashMap::new);

/// Register an instance so other in-process instances can reach it
/// directly. Overwrites any stale entry for the same id -- a duplicate
/// live registration is caught earlier, at `SignalSlotable::start`.
pub fn register(instance_id: &str, instance: &Arc<SignalSlotable>) {
    REGISTRY.insert(instance_id.to_string(), Arc::downgrade(instance));
}

pub fn unregister(instance_id: &str) {
    REGISTRY.remove(instance_id);
}

/// Look up a live in-process instance. Returns `None` both when no such
/// id was ever registered and when it was registered but has since been
/// dropped -- callers can't tell the difference and don't need to: both
/// cases mean "fall back to the broker".
pub fn lookup(instance_id: &str) -> Option<Arc<SignalSlotable>> {
    REGISTRY.get(instance_id).and_then(|weak| weak.upgrade())
}

pub fn is_local(instance_id: &str) -> bool {
    lookup(instance_id).is_some()
}
