use tokio_util::codec::LinesCodecError;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Line codec error: {0}")]
    Codec(#[from] LinesCodecError),

    #[error("Processing error: {0}")]
    Processing(String),
}
