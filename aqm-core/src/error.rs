use std::process::{ExitCode, Termination};

use crate::qdisc::queue::QueueSizeUnit;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Encounter IO error, {0}")]
    IoError(#[from] std::io::Error),
    #[error("Tokio Runtime error: {0}")]
    TokioRuntimeError(#[from] TokioRuntimeError),
    #[error("Channel error: {0}")]
    ChannelError(String),
    #[cfg(feature = "serde")]
    #[error("Serde error: {0}")]
    SerdeError(#[from] serde_json::Error),
    #[error("Error: {0}")]
    Custom(String),
}

/// Setup-time problems with a queue disc. None of these are recoverable once
/// traffic is flowing, so they are reported before the disc is installed.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} cannot have classes")]
    HasClasses(&'static str),
    #[error("{0} cannot have packet filters")]
    HasPacketFilters(&'static str),
    #[error("{name} needs {expected} internal queue, found {found}")]
    WrongQueueCount {
        name: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("Can not build a default internal queue for {0}")]
    NoDefaultQueue(String),
    #[error("The mode of the internal queue ({queue:?}) does not match the mode of the queue disc ({disc:?})")]
    ModeMismatch {
        queue: QueueSizeUnit,
        disc: QueueSizeUnit,
    },
    #[error("The size of the internal queue ({capacity}) is less than the queue disc limit ({limit})")]
    UndersizedQueue { capacity: u64, limit: u64 },
    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("Failed to load config, {0}")]
    Load(String),
}

#[derive(Debug, thiserror::Error)]
pub enum TokioRuntimeError {
    #[error("Failed to build runtime, {0}")]
    CreateError(#[from] std::io::Error),
    #[error("No tokio runtime in context, {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),
}

impl Termination for Error {
    fn report(self) -> ExitCode {
        match self {
            Error::ConfigError(_) => ExitCode::from(78),
            Error::IoError(_) => ExitCode::from(74),
            Error::TokioRuntimeError(_) => ExitCode::from(74),
            Error::ChannelError(_) => ExitCode::from(69),
            #[cfg(feature = "serde")]
            Error::SerdeError(_) => ExitCode::from(65),
            Error::Custom(_) => ExitCode::from(1),
        }
    }
}
