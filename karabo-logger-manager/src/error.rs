use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerManagerError {
    #[error("failed to persist {what} to {path}: {source}")]
    Persistence { what: &'static str, path: String, #[source] source: std::io::Error },

    #[error("failed to decode {what} at {path}: {source}")]
    Decode { what: &'static str, path: String, #[source] source: serde_json::Error },

    #[error(transparent)]
    Net(#[from] karabo_net::NetError),
}

pub type LoggerManagerResult<T> = Result<T, LoggerManagerError>;
