use thiserror::Error;

#[derive(Debug, Error)]
pub enum WatchdogError {
    #[error("process listing failed: {0}")]
    Listing(String),

    #[error("process listing task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
