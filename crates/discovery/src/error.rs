use thiserror::Error;

/// Failures inside the discovery subsystem. None of these abort a scan; they
/// are logged and the affected interface or reply is skipped.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed discovery reply from {peer}: {source}")]
    MalformedReply {
        peer: std::net::SocketAddr,
        #[source]
        source: serde_json::Error,
    },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}
