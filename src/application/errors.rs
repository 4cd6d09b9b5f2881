//! Application layer errors

use thiserror::Error;

/// General relay errors
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Server error: {0}")]
    Server(String),
}

/// Errors talking to the homeserver
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Homeserver returned {status}: {errcode} {message}")]
    Http {
        status: u16,
        errcode: String,
        message: String,
    },

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl TransportError {
    /// Connection-class errors are worth retrying; the homeserver never saw the request
    /// or was temporarily unavailable.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Connection(_) => true,
            TransportError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            TransportError::Parse(e.to_string())
        } else {
            TransportError::Connection(e.to_string())
        }
    }
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Parse error: {0}")]
    Parse(String),
}
