use thiserror::Error;

#[derive(Debug, Error)]
pub enum VidgrabError {
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("api error: {0}")]
    Api(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("task failed: {0}")]
    TaskFailed(String),
    #[error("cancelled")]
    Cancelled,
}

pub type VidgrabResult<T> = Result<T, VidgrabError>;
