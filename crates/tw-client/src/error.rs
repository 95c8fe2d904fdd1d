//! Client error taxonomy.

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("connect timed out")]
    ConnectTimeout,
    #[error("request timed out")]
    Timeout,
    #[error("connection lost")]
    ConnectionLost,
    #[error("not connected")]
    NotConnected,
    #[error("remote error: {0}")]
    Remote(String),
    #[error(transparent)]
    Codec(#[from] tw_protocol::CodecError),
    #[error("payload serialization: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
