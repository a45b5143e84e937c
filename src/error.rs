//! Error types for the provider protocol.

use thiserror::Error;

use crate::diagnostics::{Diagnostic, DiagnosticKind, Diagnostics};

/// Errors that can occur when implementing a provider.
///
/// The session never lets these escape a protocol call: each one is turned
/// into error diagnostics with a matching [`DiagnosticKind`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The requested remote object was not found.
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// A validation error occurred.
    #[error("Validation error: {0}")]
    Validation(String),

    /// An internal SDK error occurred.
    #[error("SDK error: {0}")]
    Sdk(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The requested resource type is unknown.
    #[error("Unknown resource type: {0}")]
    UnknownResource(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource already exists (create conflict).
    #[error("Resource already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied (authentication/authorization failure).
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Quota or rate limit exceeded.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Service temporarily unavailable.
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// Operation timed out.
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Operation failed due to current state (precondition not met).
    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    /// Operation not implemented.
    #[error("Unimplemented: {0}")]
    Unimplemented(String),

    /// Invalid request from client.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A value that had to be known contained an unknown at this path.
    #[error("Unknown value at {0}")]
    UnknownValue(String),

    /// Stored state was written by a newer schema than this provider's.
    #[error(
        "State for {resource_type} has version {stored}, newer than current version {current}"
    )]
    SchemaVersion {
        /// The resource type.
        resource_type: String,
        /// The version the state was stored with.
        stored: u64,
        /// The provider's current schema version.
        current: u64,
    },

    /// The operation observed a stop request and gave up.
    #[error("Operation cancelled")]
    Cancelled,

    /// The operation failed with a set of diagnostics.
    #[error("{0}")]
    Diagnostics(Diagnostics),
}

impl ProviderError {
    /// The diagnostic kind this error is reported as.
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            Self::Validation(_) | Self::InvalidRequest(_) => DiagnosticKind::Validation,
            Self::UnknownValue(_) => DiagnosticKind::UnknownInput,
            Self::SchemaVersion { .. } => DiagnosticKind::SchemaVersion,
            Self::Cancelled => DiagnosticKind::Cancelled,
            Self::UnknownResource(_) => DiagnosticKind::ProtocolViolation,
            _ => DiagnosticKind::General,
        }
    }
}

impl From<ProviderError> for Diagnostics {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Diagnostics(diagnostics) => diagnostics,
            ProviderError::UnknownValue(path) => Diagnostic::error("Unknown value")
                .with_detail("The operation needs a value that is only known after apply")
                .with_attribute(path)
                .with_kind(DiagnosticKind::UnknownInput)
                .into(),
            ProviderError::Cancelled => Diagnostic::cancelled().into(),
            other => {
                let kind = other.kind();
                Diagnostic::error(other.to_string()).with_kind(kind).into()
            },
        }
    }
}

impl From<Diagnostics> for ProviderError {
    fn from(diagnostics: Diagnostics) -> Self {
        Self::Diagnostics(diagnostics)
    }
}
