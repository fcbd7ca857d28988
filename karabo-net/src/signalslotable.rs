//! The composition root of the RPC runtime: one [`SignalSlotable`] per
//! device/server instance, owning its slots, signals, broker connection,
//! topology tracker and strand pool. Everything else in this crate
//! (`Signal::emit`, `Requestor`, `AsyncReply`) is a thin handle back into
//! this struct.

use std::sync::{Arc, RwLock, Weak};

use dashmap::DashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use karabo_data::binary;
use karabo_data::{Container, Value};

use crate::broker::{BrokerDriver, WireMessage};
use crate::config::Config;
use crate::error::{NetError, NetResult};
use crate::header::Header;
use crate::registry;
use crate::requestor::Requestor;
use crate::signal::Signal;
use crate::slot::{AsyncReply, CallContext, Slot, SlotHandler};
use crate::strand::{Strand, StrandPool};
use crate::tracker::{Tracker, TopologyEvent};

/// Every instance publishes its heartbeats here and subscribes to it for
/// discovery, independent of its own private RPC topic.
const HEARTBEAT_TOPIC: &str = "karabo.heartbeats";

struct PendingReconnect {
    signal_name: String,
    slot_function: String,
}

pub struct SignalSlotable {
    instance_id: String,
    instance_type: String,
    broker: Arc<dyn BrokerDriver>,
    config: Config,
    tracker: Arc<Tracker>,
    strand_pool: Arc<StrandPool>,
    slots: DashMap<String, Arc<dyn SlotHandler>>,
    signals: DashMap<String, Arc<Signal>>,
    pending_replies: DashMap<String, oneshot::Sender<NetResult<Vec<Value>>>>,
    pending_reconnects: DashMap<String, Vec<PendingReconnect>>,
    self_weak: RwLock<Weak<SignalSlotable>>,
}

impl SignalSlotable {
    pub fn new(instance_id: impl Into<String>, instance_type: impl Into<String>, broker: Arc<dyn BrokerDriver>, config: Config) -> Arc<Self> {
        let tracker = Arc::new(Tracker::new(&config));
        let this = Arc::new(Self {
            instance_id: instance_id.into(),
            instance_type: instance_type.into(),
            broker,
            config,
            tracker,
            strand_pool: Arc::new(StrandPool::new()),
            slots: DashMap::new(),
            signals: DashMap::new(),
            pending_replies: DashMap::new(),
            pending_reconnects: DashMap::new(),
            self_weak: RwLock::new(Weak::new()),
        });
        *this.self_weak.write().unwrap() = Arc::downgrade(&this);
        this
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broadcast_strand(&self) -> Arc<Strand> {
        self.strand_pool.broadcast_strand()
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    pub fn strand_pool_len(&self) -> usize {
        self.strand_pool.len()
    }

    pub fn register_slot(&self, name: impl Into<String>, handler: Arc<dyn SlotHandler>) {
        let slot = Slot::new(name, handler);
        self.slots.insert(slot.name.clone(), slot.handler);
    }

    pub fn register_signal(&self, name: impl Into<String>) {
        let name = name.into();
        self.signals.entry(name.clone()).or_insert_with(|| Arc::new(Signal::new(name)));
    }

    /// Register with the process-wide instance registry, start the
    /// heartbeat loop and start listening on this instance's own topic.
    /// Returns an error if another live in-process instance already
    /// holds this id.
    pub async fn start(self: &Arc<Self>) -> NetResult<()> {
        if registry::is_local(&self.instance_id) {
            return Err(NetError::DuplicateInstanceId(self.instance_id.clone()));
        }
        registry::register(&self.instance_id, self);

        let own_rx = self.broker.subscribe(&self.instance_id).await?;
        let beats_rx = self.broker.subscribe(HEARTBEAT_TOPIC).await?;
        self.tracker.beat(&self.instance_id, &self.instance_type);

        spawn_receive_loop(Arc::downgrade(self), own_rx);
        spawn_heartbeat_listener(Arc::downgrade(self), beats_rx);
        spawn_heartbeat_emitter(Arc::downgrade(self));
        spawn_topology_watcher(Arc::downgrade(self));

        Ok(())
    }

    pub fn stop(&self) {
        registry::unregister(&self.instance_id);
    }

    /// Begin a request to `target_instance_id::slot_function`.
    pub fn request(self: &Arc<Self>, target_instance_id: impl Into<String>, slot_function: impl Into<String>) -> Requestor {
        Requestor::new(self.clone(), target_instance_id, slot_function)
    }

    /// Subscribe `slot_function` on `target_instance_id` to `signal_name`
    /// emitted by this instance. If the target isn't known to the
    /// tracker yet, the connection is retried once its `instanceNew`
    /// event arrives instead of failing outright.
    pub fn connect(&self, signal_name: &str, target_instance_id: &str, slot_function: &str) {
        self.register_signal(signal_name);
        if self.tracker.is_known(target_instance_id) || target_instance_id == self.instance_id {
            if let Some(signal) = self.signals.get(signal_name) {
                signal.connect(target_instance_id, slot_function);
            }
            return;
        }
        self.pending_reconnects
            .entry(target_instance_id.to_string())
            .or_default()
            .push(PendingReconnect { signal_name: signal_name.to_string(), slot_function: slot_function.to_string() });
    }

    pub fn disconnect(&self, signal_name: &str, target_instance_id: &str, slot_function: &str) {
        if let Some(signal) = self.signals.get(signal_name) {
            signal.disconnect(target_instance_id, slot_function);
        }
    }

    /// Emit `signal_name` to every connected subscriber: in-process
    /// instances are delivered directly; everyone else goes through the
    /// broker.
    pub async fn emit(&self, signal_name: &str, args: Vec<Value>) -> NetResult<()> {
        let Some(signal) = self.signals.get(signal_name) else {
            return Ok(());
        };
        for (target_id, slot_name) in signal.subscribers() {
            let mut header = Header::signal(&self.instance_id, signal_name);
            header.set_slot_instance_ids(&[&target_id]);
            header.set_slot_functions(&[(target_id.as_str(), &[slot_name.as_str()])]);
            self.deliver(&target_id, header, args.clone()).await?;
        }
        Ok(())
    }

    pub(crate) async fn send_request(&self, target_instance_id: &str, slot_function: &str, reply_id: &str, args: Vec<Value>) -> NetResult<()> {
        let mut header = Header::signal(&self.instance_id, slot_function);
        header.set_slot_instance_ids(&[target_instance_id]);
        header.set_slot_functions(&[(target_instance_id, &[slot_function])]);
        header.set_reply_to(reply_id);
        self.deliver(target_instance_id, header, args).await
    }

    pub(crate) async fn send_fire_and_forget(&self, target_instance_id: &str, slot_function: &str, args: Vec<Value>) -> NetResult<()> {
        let mut header = Header::signal(&self.instance_id, slot_function);
        header.set_slot_instance_ids(&[target_instance_id]);
        header.set_slot_functions(&[(target_instance_id, &[slot_function])]);
        self.deliver(target_instance_id, header, args).await
    }

    pub(crate) async fn send_reply(&self, target_instance_id: &str, reply_to: &str, result: NetResult<Vec<Value>>) -> NetResult<()> {
        let mut header = Header::new();
        header.set_reply_to(reply_to);
        header.set_reply_from(&self.instance_id);
        let args = match result {
            Ok(values) => values,
            Err(e) => {
                header.set_error(&e.to_string());
                Vec::new()
            }
        };
        self.deliver(target_instance_id, header, args).await
    }

    /// Route a framed message to `target_instance_id`: direct in-process
    /// delivery if it's registered locally, otherwise publish through the
    /// broker to its topic.
    async fn deliver(&self, target_instance_id: &str, header: Header, args: Vec<Value>) -> NetResult<()> {
        if let Some(target) = registry::lookup(target_instance_id) {
            let sender_id = header.signal_instance_id().unwrap_or(&self.instance_id).to_string();
            let strand = target.strand_pool.strand_for(&sender_id);
            let target = target.clone();
            strand.post(async move {
                target.dispatch(header, args).await;
            });
            return Ok(());
        }
        let message = build_wire_message(&header, args)?;
        self.broker.publish(target_instance_id, Arc::new(message)).await
    }

    pub(crate) fn register_pending_reply(&self, reply_id: &str) -> oneshot::Receiver<NetResult<Vec<Value>>> {
        let (tx, rx) = oneshot::channel();
        self.pending_replies.insert(reply_id.to_string(), tx);
        rx
    }

    pub(crate) fn cancel_pending_reply(&self, reply_id: &str) {
        self.pending_replies.remove(reply_id);
    }

    /// Hand a slot a way to answer later instead of from inside `call`.
    pub fn async_reply(self: &Arc<Self>, ctx: &CallContext) -> Option<AsyncReply> {
        let reply_to = ctx.reply_to.clone()?;
        Some(AsyncReply::new(Arc::downgrade(self), reply_to, ctx.sender_instance_id.clone()))
    }

    /// Handle one decoded message: either resolve a pending reply, or
    /// invoke the matching slot handler(s) and, if a reply was
    /// requested, send the result back.
    async fn dispatch(self: Arc<Self>, header: Header, args: Vec<Value>) {
        if let Some(reply_to) = header.reply_to() {
            if header.reply_from().is_some() {
                if let Some((_, tx)) = self.pending_replies.remove(reply_to) {
                    let result = if header.is_error() {
                        Err(NetError::Remote {
                            instance_id: header.reply_from().unwrap_or_default().to_string(),
                            message: header.error_message().unwrap_or("remote error").to_string(),
                        })
                    } else {
                        Ok(args)
                    };
                    let _ = tx.send(result);
                }
                return;
            }
        }

        let sender_instance_id = header.signal_instance_id().unwrap_or_default().to_string();
        let reply_to = header.reply_to().map(str::to_string);
        for (target_id, slot_names) in header.slot_functions() {
            if target_id != self.instance_id {
                continue;
            }
            for slot_name in slot_names {
                let Some(handler) = self.slots.get(&slot_name).map(|h| h.value().clone()) else {
                    warn!(instance = %self.instance_id, slot = %slot_name, "no handler registered for slot");
                    continue;
                };
                let ctx = CallContext { sender_instance_id: sender_instance_id.clone(), reply_to: reply_to.clone() };
                let outcome = handler.call(ctx, args.clone()).await;
                if let Some(reply_to) = &reply_to {
                    let result = match outcome {
                        Ok(Some(values)) => Ok(values),
                        Ok(None) => continue, // handler will reply asynchronously
                        Err(e) => Err(e),
                    };
                    if let Err(e) = self.send_reply(&sender_instance_id, reply_to, result).await {
                        warn!(error = %e, "failed to send slot reply");
                    }
                }
            }
        }
    }
}

fn build_wire_message(header: &Header, args: Vec<Value>) -> NetResult<Vec<u8>> {
    let mut body = binary::pack(args);
    for (key, value, _attrs) in header.0.iter() {
        body.set_unchecked(key.clone(), value.clone());
    }
    let buffer_set = binary::encode(&body)?;
    Ok(buffer_set.to_contiguous())
}

fn decode_wire_message(bytes: &[u8]) -> NetResult<(Header, Vec<Value>)> {
    let (container, _) = binary::decode(bytes)?;
    let args = binary::unpack(&container);
    Ok((Header(container), args))
}

fn spawn_receive_loop(owner: Weak<SignalSlotable>, mut rx: tokio::sync::broadcast::Receiver<WireMessage>) {
    tokio::spawn(async move {
        loop {
            let message = match rx.recv().await {
                Ok(m) => m,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "receive loop lagged and dropped messages");
                    continue;
                }
            };
            let Some(owner) = owner.upgrade() else { break };
            match decode_wire_message(&message) {
                Ok((header, args)) => {
                    let sender = header.signal_instance_id().unwrap_or(&owner.instance_id).to_string();
                    let strand = owner.strand_pool.strand_for(&sender);
                    let owner = owner.clone();
                    strand.post(async move {
                        owner.dispatch(header, args).await;
                    });
                }
                Err(e) => warn!(error = %e, "failed to decode incoming message"),
            }
        }
    });
}

fn spawn_heartbeat_listener(owner: Weak<SignalSlotable>, mut rx: tokio::sync::broadcast::Receiver<WireMessage>) {
    tokio::spawn(async move {
        loop {
            let message = match rx.recv().await {
                Ok(m) => m,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
            };
            let Some(owner) = owner.upgrade() else { break };
            if let Ok((container, _)) = binary::decode(&message) {
                if let (Some(id), Some(kind)) =
                    (container.get("instanceId").and_then(Value::as_str), container.get("instanceType").and_then(Value::as_str))
                {
                    if id != owner.instance_id {
                        owner.tracker.beat(id, kind);
                    }
                }
            }
        }
    });
}

fn spawn_heartbeat_emitter(owner: Weak<SignalSlotable>) {
    tokio::spawn(async move {
        loop {
            let Some(owner) = owner.upgrade() else { break };
            let interval = owner.tracker.sweep_interval();
            let mut beat = Container::new();
            beat.set_unchecked("instanceId", owner.instance_id.clone());
            beat.set_unchecked("instanceType", owner.instance_type.clone());
            if let Ok(buffer_set) = binary::encode(&beat) {
                let _ = owner.broker.publish(HEARTBEAT_TOPIC, Arc::new(buffer_set.to_contiguous())).await;
            }
            drop(owner);
            tokio::time::sleep(interval).await;
        }
    });
}

fn spawn_topology_watcher(owner: Weak<SignalSlotable>) {
    tokio::spawn(async move {
        let Some(owner) = owner.upgrade() else { return };
        let mut events = owner.tracker.subscribe();
        let interval = owner.tracker.sweep_interval();
        drop(owner);
        loop {
            let Some(owner) = owner.upgrade() else { break };
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    owner.tracker.sweep_expired();
                }
                event = events.recv() => {
                    match event {
                        Ok(TopologyEvent::InstanceNew(inst)) => owner.fulfill_pending_reconnects(&inst.instance_id),
                        Ok(TopologyEvent::InstanceGone(id)) => {
                            owner.strand_pool.evict(&id);
                            debug!(instance = %id, "instance left the topology");
                        }
                        Err(_) => break,
                    }
                }
            }
        }
    });
}

impl SignalSlotable {
    fn fulfill_pending_reconnects(&self, instance_id: &str) {
        if let Some((_, pending)) = self.pending_reconnects.remove(instance_id) {
            for p in pending {
                self.connect(&p.signal_name, instance_id, &p.slot_function);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::InProcessBroker;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Echo;

    #[async_trait]
    impl SlotHandler for Echo {
        async fn call(&self, _ctx: CallContext, args: Vec<Value>) -> NetResult<Option<Vec<Value>>> {
            Ok(Some(args))
        }
    }

    #[tokio::test]
    async fn request_reply_round_trip() {
        let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
        let server = SignalSlotable::new("server", "Device", broker.clone(), Config::default());
        server.register_slot("slotEcho", Arc::new(Echo));
        server.start().await.unwrap();

        let client = SignalSlotable::new("client", "Device", broker.clone(), Config::default());
        client.start().await.unwrap();

        let result = client.request("server", "slotEcho").timeout(Duration::from_secs(1)).request(vec![Value::Int32(42)]).await.unwrap();
        assert_eq!(result, vec![Value::Int32(42)]);
    }

    #[tokio::test]
    async fn request_to_unknown_instance_times_out() {
        let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
        let client = SignalSlotable::new("lonely-client", "Device", broker, Config::default());
        client.start().await.unwrap();

        let result = client
            .request("nobody-home", "slotEcho")
            .timeout(Duration::from_millis(50))
            .request(vec![Value::Int32(1)])
            .await;
        assert!(matches!(result, Err(NetError::Timeout { .. })));
    }

    #[tokio::test]
    async fn signal_emission_reaches_connected_subscriber() {
        let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
        let emitter = SignalSlotable::new("emitter", "Device", broker.clone(), Config::default());
        emitter.start().await.unwrap();

        struct Capture(Arc<std::sync::Mutex<Vec<Vec<Value>>>>);
        #[async_trait]
        impl SlotHandler for Capture {
            async fn call(&self, _ctx: CallContext, args: Vec<Value>) -> NetResult<Option<Vec<Value>>> {
                self.0.lock().unwrap().push(args);
                Ok(None)
            }
        }

        let captured = Arc::new(std::sync::Mutex::new(Vec::new()));
        let receiver = SignalSlotable::new("receiver", "Device", broker, Config::default());
        receiver.register_slot("slotStateChanged", Arc::new(Capture(captured.clone())));
        receiver.start().await.unwrap();

        emitter.connect("signalStateChanged", "receiver", "slotStateChanged");
        emitter.emit("signalStateChanged", vec![Value::String("RUNNING".into())]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(captured.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_instance_id_is_rejected() {
        let broker: Arc<dyn BrokerDriver> = Arc::new(InProcessBroker::new());
        let first = SignalSlotable::new("dup", "Device", broker.clone(), Config::default());
        first.start().await.unwrap();
        let second = SignalSlotable::new("dup", "Device", broker, Config::default());
        assert!(matches!(second.start().await, Err(NetError::DuplicateInstanceId(_))));
    }
}
