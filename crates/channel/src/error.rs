use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid server url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(std::time::Duration),

    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("connect aborted by disconnect")]
    Aborted,

    #[error("concurrent connect attempt failed")]
    AttemptFailed,
}
