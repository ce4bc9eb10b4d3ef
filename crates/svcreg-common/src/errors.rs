//! Error types for svcreg.
//!
//! Every fallible operation in the workspace returns [`Result<T>`]. The
//! variants map onto the failure classes the registry distinguishes:
//! validation failures at the HTTP boundary, unknown registrations,
//! delivery and transport failures, and an exhausted provider cache.

use crate::types::ServiceName;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for svcreg operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for svcreg operations.
#[derive(Debug, Error)]
pub enum Error {
    /// No registration with this service URL exists.
    #[error("Service at URL {url} not found")]
    RegistrationNotFound { url: String },

    /// The provider cache holds no URL for the requested service.
    #[error("No providers available for service {service}")]
    NoProviders { service: ServiceName },

    /// A registration with this service URL already exists and the
    /// registry rejects duplicates.
    #[error("Service at URL {url} is already registered")]
    DuplicateRegistration { url: String },

    /// Invalid input or configuration.
    #[error("Validation error: {message}")]
    Validation { message: String },

    /// A patch or registration could not be delivered to a peer.
    #[error("Delivery to {url} failed: {reason}")]
    Delivery { url: String, reason: String },

    /// A peer did not answer within the per-call timeout.
    #[error("Request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// Protocol error (bad URI, undecodable body, unexpected status).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The registry answered a client call with a failure.
    #[error("Registry error: {0}")]
    Registry(String),

    /// Internal error (shouldn't happen in normal operation).
    #[error("Internal error: {0}")]
    Internal(String),

    /// I/O error (wraps std::io::Error).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error with added context.
    #[error("{message}: {source}")]
    WithContext {
        message: String,
        source: Box<Error>,
    },
}

impl Error {
    /// Creates a RegistrationNotFound error.
    pub fn registration_not_found(url: impl Into<String>) -> Self {
        Self::RegistrationNotFound { url: url.into() }
    }

    /// Creates a NoProviders error.
    pub fn no_providers(service: ServiceName) -> Self {
        Self::NoProviders { service }
    }

    /// Creates a DuplicateRegistration error.
    pub fn duplicate_registration(url: impl Into<String>) -> Self {
        Self::DuplicateRegistration { url: url.into() }
    }

    /// Creates a Validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates a Delivery error.
    pub fn delivery(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Delivery {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Creates a Timeout error.
    pub fn timeout(url: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            url: url.into(),
            after,
        }
    }

    /// Returns true when the error means "the registration does not exist".
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::RegistrationNotFound { .. } => true,
            Self::WithContext { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// Adds context to an error.
    ///
    /// # Example
    /// ```
    /// use svcreg_common::{Error, Result};
    ///
    /// fn inner() -> Result<()> {
    ///     Err(Error::registration_not_found("http://localhost:4000"))
    /// }
    ///
    /// fn outer() -> Result<()> {
    ///     inner().map_err(|e| e.context("Failed to deregister"))
    /// }
    ///
    /// assert!(outer().unwrap_err().is_not_found());
    /// ```
    pub fn context(self, message: impl Into<String>) -> Self {
        Self::WithContext {
            message: message.into(),
            source: Box::new(self),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Protocol(format!("JSON error: {}", e))
    }
}

/// Convenience methods for Result types.
pub trait ResultExt<T> {
    /// Adds context to an error result.
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.context(message))
    }
}
