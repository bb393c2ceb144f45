use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("dispatch queue closed")]
    ChannelClosed,
    #[error("workflow engine error: {message}")]
    Engine { message: String },
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("invalid flow command: {reason}")]
    InvalidCommand { reason: String },
    #[error("failed to spawn flow command: {reason}")]
    Spawn { reason: String },
}
