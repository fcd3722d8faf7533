use std::time::Duration;

use pulse_protocol::NativeError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PulseError>;

#[derive(Error, Debug)]
pub enum PulseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Connection to the sound server was lost")]
    Disconnected,

    #[error("Operation rejected by server: {0}")]
    OperationInvalid(String),

    #[error("No entity matches {0}")]
    IndexNotFound(String),

    #[error("Timed out after {0:?}")]
    TimeoutExceeded(Duration),

    #[error("Usage error: {0}")]
    Usage(String),
}

impl From<NativeError> for PulseError {
    fn from(err: NativeError) -> Self {
        match err {
            NativeError::NotConnected => PulseError::Disconnected,
            other => PulseError::OperationInvalid(other.to_string()),
        }
    }
}
