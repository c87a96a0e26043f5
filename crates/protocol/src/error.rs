//! Error types for the Rembus protocol.

use thiserror::Error;

use crate::status::Status;

/// Error type covering every failure a Rembus component can report.
#[derive(Debug, Error)]
pub enum RembusError {
    // Taxonomy surfaced to callers
    /// The transport reported an error or never reached the open state.
    #[error("connection error: {0}")]
    Connection(String),

    /// The broker answered with a non-success status.
    #[error("protocol error {status}: {reason}")]
    Protocol {
        /// Status code carried by the RESPONSE frame.
        status: Status,
        /// Server-supplied reason (rendered payload).
        reason: String,
    },

    /// No RESPONSE arrived within the request deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// Malformed input detected before any I/O.
    #[error("validation failed: {0}")]
    Validation(String),

    // Codec errors
    /// Failed to serialize a value or frame.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Failed to deserialize a value or frame.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    // Key material
    /// Key generation, signing or PEM handling failed.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The private key store could not complete an operation.
    #[error("key store failure: {0}")]
    KeyStore(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl RembusError {
    /// Builds a protocol error from a status and a reason.
    pub fn protocol(status: impl Into<Status>, reason: impl Into<String>) -> Self {
        RembusError::Protocol {
            status: status.into(),
            reason: reason.into(),
        }
    }

    /// Returns the wire status associated with this error.
    ///
    /// Errors that never crossed the wire map to the generic error status,
    /// timeouts map to the client-local timeout status.
    pub fn status(&self) -> Status {
        match self {
            RembusError::Protocol { status, .. } => *status,
            RembusError::Timeout(_) => Status::Timeout,
            _ => Status::GenericError,
        }
    }
}

/// Result type alias for Rembus operations.
pub type Result<T> = std::result::Result<T, RembusError>;

impl From<ciborium::ser::Error<std::io::Error>> for RembusError {
    fn from(err: ciborium::ser::Error<std::io::Error>) -> Self {
        RembusError::Serialization(err.to_string())
    }
}

impl From<ciborium::de::Error<std::io::Error>> for RembusError {
    fn from(err: ciborium::de::Error<std::io::Error>) -> Self {
        RembusError::Deserialization(err.to_string())
    }
}

impl From<arrow_schema::ArrowError> for RembusError {
    fn from(err: arrow_schema::ArrowError) -> Self {
        RembusError::Serialization(format!("arrow: {}", err))
    }
}

impl From<rsa::Error> for RembusError {
    fn from(err: rsa::Error) -> Self {
        RembusError::Crypto(err.to_string())
    }
}

impl From<std::io::Error> for RembusError {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::TimedOut => RembusError::Timeout(err.to_string()),
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => RembusError::Connection(err.to_string()),
            _ => RembusError::Io(err.to_string()),
        }
    }
}
