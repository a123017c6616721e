use std::path::PathBuf;

use crate::task::TaskKind;

/// A transport-level fault on the serial link. The message is whatever the OS
/// (or serialport) told us, there's rarely anything more useful to add.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct SerialError {
    pub message: String,
}

impl SerialError {
    pub fn new(message: impl Into<String>) -> SerialError {
        SerialError {
            message: message.into(),
        }
    }

    pub(crate) fn closed() -> SerialError {
        SerialError::new("serial connection is closed")
    }
}

impl From<std::io::Error> for SerialError {
    fn from(error: std::io::Error) -> Self {
        SerialError::new(error.to_string())
    }
}

impl From<serialport::Error> for SerialError {
    fn from(error: serialport::Error) -> Self {
        SerialError::new(error.description)
    }
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("no reading available from {endpoint}")]
    SourceUnavailable { endpoint: String },
    #[error("failed to write to serial port: {0}")]
    SerialWriteFault(SerialError),
    #[error("failed to read from serial port: {0}")]
    SerialReadFault(SerialError),
    #[error("failed to append to {}: {message}", path.display())]
    LogWriteFault { path: PathBuf, message: String },
    /// The only fatal error: without a device there's nothing to supervise.
    #[error("no serial device available: {0}")]
    DeviceUnavailable(String),
    #[error("no reading source endpoint configured for polling")]
    NoEndpoint,
    #[error("unable to start {task}: {message}")]
    TaskSpawn { task: TaskKind, message: String },
    #[error("invalid configuration: {0}")]
    Config(String),
}
