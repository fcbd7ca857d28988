//! Integration coverage for the device-to-server assignment state
//! machine: devices round-robin across a pool of logger servers as
//! they're discovered, queue in backlog while their assigned server
//! isn't running yet, and flush once it comes up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use karabo_data::Value;
use karabo_logger_manager::{logger_instance_id, Config, LoggerManager, ServerPhase, LOGGER_INSTANCE_TYPE, SERVER_INSTANCE_TYPE};
use karabo_net::{BrokerDriver, CallContext, InProcessBroker, NetResult, SignalSlotable, SlotHandler};

fn fast_net_config() -> karabo_net::Config {
    karabo_net::Config { heartbeat_interval_secs: 1, heartbeat_miss_factor: 3, default_request_timeout_ms: 150, ..Default::default() }
}

struct AlwaysStarted;
#[async_trait]
impl SlotHandler for AlwaysStarted {
    async fn call(&self, _ctx: CallContext, _args: Vec<Value>) -> NetResult<Option<Vec<Value>>> {
        Ok(Some(vec![Value::String("started".into())]))
    }
}

struct AckAddDevices(Arc<AtomicUsize>);
#[async_trait]
impl SlotHandler for AckAddDevices {
    async fn call(&self, _ctx: CallContext, args: Vec<Value>) -> NetResult<Option<Vec<Value>>> {
        if let Some(Value::VectorString(ids)) = args.first() {
            self.0.fetch_add(ids.len(), Ordering::SeqCst);
        }
        Ok(Some(vec![Value::VectorString(vec![])]))
    }
}

async fn spawn_server(broker: Arc<dyn BrokerDriver>, server_id: &str) -> Arc<SignalSlotable> {
    let s = SignalSlotable::new(server_id, SERVER_INSTANCE_TYPE, broker, fast_net_config());
    s.register_slot("slotInstantiateLogger", Arc::new(AlwaysStarted));
    s.start().await.unwrap();
    s
}

async fn spawn_logger(broker: Arc<dyn BrokerDriver>, server_id: &str, counter: Arc<AtomicUsize>) -> Arc<SignalSlotable> {
    let l = SignalSlotable::new(logger_instance_id(server_id), LOGGER_INSTANCE_TYPE, broker, fast_net_config());
    l.register_slot("slotAddDevicesToBeLogged", Arc::new(AckAddDevices(counter)));
    l.register_slot("slotTagDeviceDiscontinued", Arc::new(AlwaysStarted));
    l.start().await.unwrap();
    l
}

#[tokio::test]
async fn devices_round_robin_and_flush_once_their_server_is_running() {
    let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
    let dir = tempdir().unwrap();

    let owner = SignalSlotable::new("logger-manager", "DataLoggerManager", broker.clone(), fast_net_config());
    owner.start().await.unwrap();

    let config = Config { loggermap_path: dir.path().join("loggermap.xml"), blocklist_path: dir.path().join("blocklist.xml"), ..Config::default() };
    let manager = LoggerManager::new(owner.clone(), config).unwrap();
    manager.start();

    let s1_logged = Arc::new(AtomicUsize::new(0));
    let s2_logged = Arc::new(AtomicUsize::new(0));

    // S1 comes up fully (server + its logger). S2 advertises itself as a
    // pool member but never answers the instantiate request -- its
    // logger process never starts -- so it stays stuck INSTANTIATING.
    let _s1 = spawn_server(broker.clone(), "S1").await;
    let _s1_logger = spawn_logger(broker.clone(), "S1", s1_logged.clone()).await;
    let _s2 = SignalSlotable::new("S2", SERVER_INSTANCE_TYPE, broker.clone(), fast_net_config());
    _s2.start().await.unwrap();

    // Give the heartbeat-driven topology watcher time to see both
    // servers and settle S1 into RUNNING.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(manager.server_phase("S1"), Some(ServerPhase::Running));
    assert_eq!(manager.server_phase("S2"), Some(ServerPhase::Instantiating));

    // d1, d2, d3 arrive in order as devices announcing themselves.
    for device_id in ["d1", "d2", "d3"] {
        let device = SignalSlotable::new(device_id, "Motor", broker.clone(), fast_net_config());
        device.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    let s1 = manager.server_state_snapshot("S1").unwrap();
    let s2 = manager.server_state_snapshot("S2").unwrap();
    assert!(s1.devices.contains("d1"), "d1 should have been logged by S1: {s1:?}");
    assert!(s1.devices.contains("d3"), "d3 should have been logged by S1: {s1:?}");
    assert!(s2.backlog.contains("d2"), "d2 should be queued in S2's backlog while S2 isn't running: {s2:?}");
    assert_eq!(s1_logged.load(Ordering::SeqCst), 2);
    assert_eq!(s2_logged.load(Ordering::SeqCst), 0);

    // Now S2's logger comes online; its backlog should flush.
    let _s2_logger = spawn_logger(broker.clone(), "S2", s2_logged.clone()).await;
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(manager.server_phase("S2"), Some(ServerPhase::Running));
    let s2 = manager.server_state_snapshot("S2").unwrap();
    assert!(s2.devices.contains("d2"), "d2 should have moved from backlog to devices: {s2:?}");
    assert_eq!(s2_logged.load(Ordering::SeqCst), 1);

    let persisted = manager.get_logger_map();
    assert_eq!(persisted.server_for("d1"), Some("S1"));
    assert_eq!(persisted.server_for("d2"), Some("S2"));
    assert_eq!(persisted.server_for("d3"), Some("S1"));
}
