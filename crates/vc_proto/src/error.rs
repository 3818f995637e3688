use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("Unsupported envelope version: {0}")]
    UnsupportedVersion(u8),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    #[error("Serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}
