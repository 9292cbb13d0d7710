//! Device client error types.
//!
//! # Error Classification
//!
//! Errors fall into the groups the connect flow cares about:
//!
//! - **Local / client errors**: bad credentials, malformed configuration,
//!   missing TLS material. [`IotError::is_client_error`] returns `true` and
//!   the retry loops surface them immediately.
//! - **Transient errors**: network failures, 5xx answers from the credential
//!   endpoints, transport connect failures. These are retried with backoff;
//!   exhaustion turns into [`IotError::RetriesExhausted`].
//! - **Per-message errors**: malformed frames, decompression or decryption
//!   failures. The receive path logs and drops the message.
//!
//! Timeouts of `call` / `sync_call` are not errors; they surface as a
//! `None` answer or a timeout callback.

use thiserror::Error;

/// Device client errors.
#[derive(Error, Debug)]
pub enum IotError {
    /// Local configuration is invalid or incomplete.
    #[error("Config error: {0}")]
    Config(String),

    /// Credential exchange answered with an HTTP error status.
    #[error("Auth error [{status}]: {message}")]
    Auth {
        /// HTTP status (or synthesized status for local failures).
        status: u16,
        /// Human-readable cause.
        message: String,
    },

    /// The broker refused the connection (bad credential, not authorized).
    #[error("Connection refused: {0}")]
    ConnectRefused(String),

    /// Network communication error.
    #[error("Network error: {0}")]
    Network(String),

    /// Transport binding failure (connect, publish).
    #[error("Transport error: {0}")]
    Transport(String),

    /// Every retry attempt failed.
    #[error("{operation} failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        /// Operation being retried.
        operation: &'static str,
        /// Number of attempts made.
        attempts: u32,
        /// Last error observed.
        #[source]
        source: Box<IotError>,
    },

    /// Device authorization was rejected by the server.
    #[error("Device authorization failed [{code}]: {message}")]
    Handshake {
        /// Response code from the server.
        code: String,
        /// Response text from the server.
        message: String,
    },

    /// No answer to a device authorization step.
    #[error("Device authorization timed out")]
    HandshakeTimeout,

    /// Invalid or malformed wire message.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Compression operation failed.
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression operation failed.
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Encryption, decryption or key derivation failed.
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Operation requires a connected transport.
    #[error("Not connected")]
    NotConnected,

    /// Session gave up reconnecting and is permanently closed.
    #[error("Session terminated: {0}")]
    Terminated(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for device client operations
pub type Result<T> = std::result::Result<T, IotError>;

impl IotError {
    /// Local problem that retrying cannot fix.
    pub fn is_client_error(&self) -> bool {
        match self {
            IotError::Config(_) | IotError::ConnectRefused(_) => true,
            IotError::Auth { status, .. } => (400..500).contains(status),
            IotError::RetriesExhausted { source, .. } => source.is_client_error(),
            _ => false,
        }
    }

    /// Problem on the remote side or in between; worth retrying.
    pub fn is_transient(&self) -> bool {
        !self.is_client_error()
    }
}

impl From<reqwest::Error> for IotError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => IotError::Auth {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => IotError::Network(err.to_string()),
        }
    }
}

impl From<toml::de::Error> for IotError {
    fn from(err: toml::de::Error) -> Self {
        IotError::Config(err.to_string())
    }
}

impl From<base64::DecodeError> for IotError {
    fn from(err: base64::DecodeError) -> Self {
        IotError::Crypto(format!("Base64 decode error: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(IotError::Config("missing site id".into()).is_client_error());
        assert!(IotError::ConnectRefused("bad password".into()).is_client_error());
        assert!(IotError::Auth {
            status: 401,
            message: "unauthorized".into()
        }
        .is_client_error());

        assert!(!IotError::Auth {
            status: 503,
            message: "unavailable".into()
        }
        .is_client_error());
        assert!(IotError::Network("unreachable".into()).is_transient());
        assert!(IotError::Transport("publish failed".into()).is_transient());
    }

    #[test]
    fn test_exhausted_keeps_source_classification() {
        let err = IotError::RetriesExhausted {
            operation: "transport connect",
            attempts: 3,
            source: Box::new(IotError::Network("timeout".into())),
        };
        assert!(err.is_transient());
        assert!(err.to_string().contains("transport connect"));
    }
}
