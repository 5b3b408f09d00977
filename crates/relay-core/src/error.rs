use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),
}

/// Failures surfaced to the caller of a send.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AgentError {
    /// The agent endpoint answered 404, e.g. the resume target is gone.
    #[error("Agent endpoint not found: {url}")]
    NotFound { url: String },

    #[error("Request to {url} failed with status {status}")]
    RequestFailed { url: String, status: u16 },

    #[error("Execution failed: {details}")]
    ExecutionFailed { details: String },

    #[error("Network error: {details}")]
    Network { details: String },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Agent runner channel closed")]
    ChannelClosed,
}

impl AgentError {
    pub fn execution_failed(details: impl Into<String>) -> Self {
        Self::ExecutionFailed {
            details: details.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network {
            details: err.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Storage I/O error in region {region}: {source}")]
    Io {
        region: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Quota exceeded writing {region}: {size} bytes over a {quota} byte quota")]
    QuotaExceeded {
        region: String,
        size: usize,
        quota: usize,
    },

    #[error("Storage lock poisoned: {message}")]
    LockPoisoned { message: String },
}

impl StorageError {
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn lock_poisoned(message: impl Into<String>) -> Self {
        Self::LockPoisoned {
            message: message.into(),
        }
    }

    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}
