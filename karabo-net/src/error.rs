use thiserror::Error;

/// Errors raised by the RPC runtime: broker transport, request/reply
/// correlation, and argument casting.
#[derive(Debug, Error)]
pub enum NetError {
    #[error("request to {instance_id}::{slot} timed out after {timeout_ms}ms")]
    Timeout { instance_id: String, slot: String, timeout_ms: u64 },

    #[error("remote instance {instance_id} raised an exception: {message}")]
    Remote { instance_id: String, message: String },

    #[error("argument could not be cast to the type the handler expected")]
    Cast(#[from] karabo_data::DataError),

    #[error("signal/slot error: {0}")]
    SignalSlot(String),

    #[error("broker transport error: {0}")]
    Network(String),

    #[error("instance {0} is not known to this process")]
    UnknownInstance(String),

    #[error("instance id {0} is already in use on this broker")]
    DuplicateInstanceId(String),
}

pub type NetResult<T> = Result<T, NetError>;
