//! The incoming side of signal/slot RPC: [`SlotHandler`] is what a device
//! implements to answer a call, [`Slot`] is the registered wrapper around
//! one, and [`AsyncReply`] lets a handler return control to its strand
//! before it actually has an answer, replying later from any task.

use std::sync::{Arc, Weak};

use async_trait::async_trait;

use karabo_data::Value;

use crate::error::{NetError, NetResult};
use crate::signalslotable::SignalSlotable;

/// Who called a slot, passed alongside the arguments so a handler can
/// reply, or decide behavior based on the caller's identity.
#[derive(Debug, Clone)]
pub struct CallContext {
    pub sender_instance_id: String,
    pub reply_to: Option<String>,
}

/// A device's handler for one named slot. `call` returns the reply
/// values directly for handlers that can answer synchronously; a handler
/// that needs to defer should return `Ok(None)` and complete the call
/// later through an [`AsyncReply`] obtained via
/// [`SignalSlotable::async_reply`].
#[async_trait]
pub trait SlotHandler: Send + Sync {
    async fn call(&self, ctx: CallContext, args: Vec<Value>) -> NetResult<Option<Vec<Value>>>;
}

pub struct Slot {
    pub name: String,
    pub handler: Arc<dyn SlotHandler>,
}

impl Slot {
    pub fn new(name: impl Into<String>, handler: Arc<dyn SlotHandler>) -> Self {
        Self { name: name.into(), handler }
    }
}

/// A one-shot, movable reply handle. Cloning is deliberately not
/// supported -- a reply may only be sent once, and consuming `self` in
/// [`AsyncReply::reply`] makes that a compile-time guarantee rather than
/// a runtime check.
pub struct AsyncReply {
    owner: Weak<SignalSlotable>,
    reply_to: String,
    requestor_instance_id: String,
}

impl AsyncReply {
    pub(crate) fn new(owner: Weak<SignalSlotable>, reply_to: String, requestor_instance_id: String) -> Self {
        Self { owner, reply_to, requestor_instance_id }
    }

    pub async fn reply(self, values: Vec<Value>) -> NetResult<()> {
        let owner = self.owner.upgrade().ok_or_else(|| NetError::SignalSlot("instance shut down before reply".into()))?;
        owner.send_reply(&self.requestor_instance_id, &self.reply_to, Ok(values)).await
    }

    pub async fn reply_error(self, message: impl Into<String>) -> NetResult<()> {
        let owner = self.owner.upgrade().ok_or_else(|| NetError::SignalSlot("instance shut down before reply".into()))?;
        let message = message.into();
        owner
            .send_reply(&self.requestor_instance_id, &self.reply_to, Err(NetError::Remote { instance_id: owner.instance_id().to_string(), message }))
            .await
    }
}
