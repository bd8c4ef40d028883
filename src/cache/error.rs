//! Normalized failure type shared by reads and writes.

use thiserror::Error;

/// Every failure that crosses the fetcher boundary ends up as one of these,
/// each carrying a user-presentable message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// The request never produced a response (connection, timeout).
    #[error("{0}")]
    Network(String),
    /// The server answered but refused the operation.
    #[error("{0}")]
    Rejected(String),
    /// Field-level validation failed, either locally or on the server.
    #[error("{0}")]
    Validation(String),
    /// The response did not have the expected shape.
    #[error("{0}")]
    Decode(String),
}

impl QueryError {
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Network(message)
            | Self::Rejected(message)
            | Self::Validation(message)
            | Self::Decode(message) => message,
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Rejected(_) => "rejected",
            Self::Validation(_) => "validation",
            Self::Decode(_) => "decode",
        }
    }
}
