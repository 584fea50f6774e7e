//! Error types for the seal runner

use thiserror::Error;

/// Result type alias using our custom Error
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the seal runner
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid schedule expression '{expr}': {reason}")]
    InvalidSchedule { expr: String, reason: String },

    // Credential errors
    #[error("No wallet credentials available")]
    NoCredentials,

    #[error("Invalid {format} key: {reason}")]
    InvalidKey { format: &'static str, reason: String },

    // Ledger errors
    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("RPC connection failed: {0}")]
    RpcConnection(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("Unexpected transaction effects: {0}")]
    UnexpectedEffects(String),

    // Storage errors
    #[error("Publisher request failed: {0}")]
    Publisher(String),

    #[error("Invalid publisher response: {0}")]
    InvalidPublisherResponse(String),

    #[error("Failed to upload blob after {attempts} attempts")]
    UploadExhausted { attempts: u32 },

    #[error("Payload unavailable: {0}")]
    Payload(String),

    // Proxy errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    // Scheduling errors
    #[error("Another run is already in progress (lock held on {0})")]
    RunInProgress(String),

    // Persistence errors
    #[error("Failed-units persistence failed: {0}")]
    Persistence(String),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Check if this error should stop the process before any wallet is touched
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::NoCredentials | Error::Config(_) | Error::InvalidSchedule { .. }
        )
    }
}

// Conversion from reqwest errors
impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Error::RpcConnection(e.to_string())
        } else {
            Error::Rpc(e.to_string())
        }
    }
}

// Conversion from serde_json errors
impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

// Conversion from I/O errors
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_fatal() {
        assert!(Error::NoCredentials.is_startup_fatal());
        assert!(Error::Config("no publisher endpoints".to_string()).is_startup_fatal());
        assert!(!Error::Rpc("x".to_string()).is_startup_fatal());
        assert!(!Error::RpcConnection("refused".to_string()).is_startup_fatal());
    }
}
