use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use karabo_data::Value;
use karabo_net::{BrokerDriver, CallContext, Config, InProcessBroker, NetError, SignalSlotable, SlotHandler};

struct Adder;

#[async_trait]
impl SlotHandler for Adder {
    async fn call(&self, _ctx: CallContext, args: Vec<Value>) -> karabo_net::NetResult<Option<Vec<Value>>> {
        let sum: i64 = args.iter().filter_map(Value::as_i64).sum();
        Ok(Some(vec![Value::Int64(sum)]))
    }
}

#[tokio::test]
async fn client_gets_the_reply_from_a_remote_slot() {
    let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());

    let server = SignalSlotable::new("calc-server", "Device", broker.clone(), Config::default());
    server.register_slot("slotAdd", Arc::new(Adder));
    server.start().await.unwrap();

    let client = SignalSlotable::new("calc-client", "Device", broker, Config::default());
    client.start().await.unwrap();

    let reply = client
        .request("calc-server", "slotAdd")
        .timeout(Duration::from_secs(2))
        .request(vec![Value::Int32(3), Value::Int32(4), Value::Int32(5)])
        .await
        .unwrap();

    assert_eq!(reply, vec![Value::Int64(12)]);
}

#[tokio::test]
async fn a_request_that_nobody_answers_times_out() {
    let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
    let client = SignalSlotable::new("impatient-client", "Device", broker, Config::default());
    client.start().await.unwrap();

    let err = client
        .request("nowhere", "slotNothing")
        .timeout(Duration::from_millis(80))
        .request(vec![])
        .await
        .unwrap_err();

    match err {
        NetError::Timeout { instance_id, slot, .. } => {
            assert_eq!(instance_id, "nowhere");
            assert_eq!(slot, "slotNothing");
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
}

struct AlwaysFails;

#[async_trait]
impl SlotHandler for AlwaysFails {
    async fn call(&self, _ctx: CallContext, _args: Vec<Value>) -> karabo_net::NetResult<Option<Vec<Value>>> {
        Err(NetError::SignalSlot("deliberately broken handler".into()))
    }
}

#[tokio::test]
async fn remote_handler_error_surfaces_to_the_caller() {
    let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
    let server = SignalSlotable::new("flaky-server", "Device", broker.clone(), Config::default());
    server.register_slot("slotBroken", Arc::new(AlwaysFails));
    server.start().await.unwrap();

    let client = SignalSlotable::new("flaky-client", "Device", broker, Config::default());
    client.start().await.unwrap();

    let err = client
        .request("flaky-server", "slotBroken")
        .timeout(Duration::from_secs(1))
        .request(vec![])
        .await
        .unwrap_err();

    assert!(matches!(err, NetError::Remote { .. }));
}
