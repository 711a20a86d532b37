use thiserror::Error;

use crate::record::Record;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The store rejected the command (unknown command, bad arguments, wrong type).
    #[error("Command Error - {0}")]
    Command(String),

    /// The connection to the store is unusable. Never recovered locally, the
    /// caller owns the reconnect decision.
    #[error("Transport Error - {0}")]
    Transport(String),

    #[error("Config Error - {0}")]
    Config(String),

    #[error("Pipeline Error - {0}")]
    Pipeline(String),

    #[error("Serde Error - {0}")]
    Serde(String),

    #[error("IO Error - {0}")]
    Io(String),
}

impl Error {
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serde(e.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(e: tokio::task::JoinError) -> Self {
        Error::Pipeline(format!("stage task failed: {e}"))
    }
}

/// A failure of a single key or record inside a pipeline, delivered on the
/// caller's error channel.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("key {key}: {error}")]
pub struct StageError {
    pub key: String,
    /// The record whose write failed. Always `None` on the read path.
    pub record: Option<Record>,
    #[source]
    pub error: Error,
}

impl StageError {
    pub(crate) fn for_key(key: impl Into<String>, error: Error) -> Self {
        Self {
            key: key.into(),
            record: None,
            error,
        }
    }

    pub(crate) fn for_record(record: Record, error: Error) -> Self {
        Self {
            key: record.key().to_string(),
            record: Some(record),
            error,
        }
    }

    pub fn is_transport(&self) -> bool {
        self.error.is_transport()
    }
}
