//! The caller's side of a request/reply exchange. A [`Requestor`] is
//! built for one call, correlates its reply via a UUID reply-id, and can
//! be awaited synchronously, fired without waiting for a reply, or driven
//! by a callback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use karabo_data::Value;

use crate::error::{NetError, NetResult};
use crate::signalslotable::SignalSlotable;

pub struct Requestor {
    owner: Arc<SignalSlotable>,
    target_instance_id: String,
    slot_function: String,
    timeout: Duration,
}

impl Requestor {
    pub(crate) fn new(owner: Arc<SignalSlotable>, target_instance_id: impl Into<String>, slot_function: impl Into<String>) -> Self {
        let timeout = Duration::from_millis(owner.config().default_request_timeout_ms);
        Self { owner, target_instance_id: target_instance_id.into(), slot_function: slot_function.into(), timeout }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Send the request and block this task until a reply arrives or the
    /// timeout expires.
    pub async fn request(self, args: Vec<Value>) -> NetResult<Vec<Value>> {
        let reply_id = Uuid::new_v4().to_string();
        let rx = self.owner.register_pending_reply(&reply_id);
        self.owner.send_request(&self.target_instance_id, &self.slot_function, &reply_id, args).await?;

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_canceled)) => Err(NetError::SignalSlot("reply channel dropped before a reply arrived".into())),
            Err(_elapsed) => {
                self.owner.cancel_pending_reply(&reply_id);
                Err(NetError::Timeout {
                    instance_id: self.target_instance_id.clone(),
                    slot: self.slot_function.clone(),
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Fire the request without registering for a reply at all. Any
    /// reply the remote slot sends back is simply unroutable and dropped.
    pub async fn request_no_wait(self, args: Vec<Value>) -> NetResult<()> {
        self.owner.send_fire_and_forget(&self.target_instance_id, &self.slot_function, args).await
    }

    /// Send the request, then invoke `callback` with the eventual result
    /// on the instance's broadcast strand once it arrives (or times out).
    /// The wait for the reply itself runs off the strand, on its own
    /// task, so a slow or timed-out request never occupies the strand
    /// worker and blocks other posted work behind it.
    pub fn receive_async<F, Fut>(self, args: Vec<Value>, callback: F)
    where
        F: FnOnce(NetResult<Vec<Value>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let strand = self.owner.broadcast_strand();
        tokio::spawn(async move {
            let result = self.request(args).await;
            strand.post(async move {
                callback(result).await;
            });
        });
    }
}
