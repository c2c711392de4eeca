//! Error types surfaced by the translator.

use crate::path::PathError;

/// Errors produced while translating a request.
///
/// Front ends map `NotFound` to a resource-not-found outcome and everything
/// else to a failed request. A validation callback that rejects a subtree is
/// not an error; the walk simply stops descending there.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// The target row or field is absent.
    #[error("resource not found: {message}")]
    NotFound { message: String },

    /// The path is valid but unreachable for the requested operation.
    #[error("not supported: {message}")]
    NotSupported { message: String },

    /// Schema index inconsistency, missing callback, malformed key.
    #[error("internal error: {message}")]
    Internal { message: String },

    /// A callback has no implementation for this particular row.
    ///
    /// Lenient reads skip the subtree that raised it.
    #[error("not implemented: {message}")]
    Unimplemented { message: String },

    /// The instance path could not be parsed.
    #[error("path error: {0}")]
    Path(#[from] PathError),

    /// The store client failed.
    #[error("store error: {message}")]
    Store { message: String },

    /// A registered callback returned an error.
    #[error("callback '{name}' failed: {message}")]
    Callback { name: String, message: String },
}

impl Error {
    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound {
            message: message.into(),
        }
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Error::NotSupported {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal {
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        Error::Store {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_unimplemented(&self) -> bool {
        matches!(self, Error::Unimplemented { .. })
    }
}
