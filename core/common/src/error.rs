//! Common error types for attrsync.

use thiserror::Error;

/// Top-level error type for attrsync operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// An edit would exceed one of the attribute capacity caps.
    #[error("Capacity exceeded: {0}")]
    Capacity(String),

    /// Network-level failure (connection, timeout, TLS).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The server answered with a payload that breaks the protocol.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persistence backend failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A background worker is gone.
    #[error("Closed: {0}")]
    Closed(String),
}

impl Error {
    /// Whether this error is an authentication rejection (HTTP 401/403).
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Http { status: 401 | 403, .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_detection() {
        let unauthorized = Error::Http {
            status: 401,
            message: "bad key".to_string(),
        };
        let forbidden = Error::Http {
            status: 403,
            message: "forbidden".to_string(),
        };
        let server = Error::Http {
            status: 500,
            message: "oops".to_string(),
        };

        assert!(unauthorized.is_auth_error());
        assert!(forbidden.is_auth_error());
        assert!(!server.is_auth_error());
        assert!(!Error::Network("reset".to_string()).is_auth_error());
    }
}
