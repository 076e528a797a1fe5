//! Adapter error taxonomy and its mapping onto gRPC status codes.

use thiserror::Error;
use tonic::{Code, Status};

/// Result type alias using [`AdapterError`].
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors surfaced by the translation core.
///
/// Each variant corresponds to exactly one gRPC status code.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AdapterError {
    /// Path absent from the schema, node absent from the device response,
    /// or a keyed list lookup that matched no instance.
    #[error("{0}")]
    NotFound(String),

    /// Unsupported encoding, model, data type or path representation.
    #[error("{0}")]
    Unimplemented(String),

    /// Malformed payload or a value that fails schema validation.
    #[error("{0}")]
    InvalidArgument(String),

    /// NETCONF transport or device-side failure.
    #[error("{0}")]
    Unknown(String),

    /// Invariant violation inside the adapter.
    #[error("{0}")]
    Internal(String),
}

impl AdapterError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn unimplemented(msg: impl Into<String>) -> Self {
        Self::Unimplemented(msg.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn unknown(msg: impl Into<String>) -> Self {
        Self::Unknown(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// The gRPC status code this error is reported with.
    pub fn code(&self) -> Code {
        match self {
            Self::NotFound(_) => Code::NotFound,
            Self::Unimplemented(_) => Code::Unimplemented,
            Self::InvalidArgument(_) => Code::InvalidArgument,
            Self::Unknown(_) => Code::Unknown,
            Self::Internal(_) => Code::Internal,
        }
    }
}

impl From<AdapterError> for Status {
    fn from(err: AdapterError) -> Self {
        Status::new(err.code(), err.to_string())
    }
}
