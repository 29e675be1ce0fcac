//! Error types
//!
//! Resolution failures are fatal to a whole describe call and are surfaced as
//! [`Error`]. Failures inside a single scope never reach this type; they are
//! recorded in the [`ResourceSet`](crate::resource::ResourceSet) instead.

use thiserror::Error;

use crate::context::Interrupt;

/// Errors that abort a describe call
#[derive(Debug, Error)]
pub enum Error {
    /// The registry has no resource type with this name
    #[error("unsupported resource type: {0}")]
    ResourceTypeNotFound(String),

    /// The resource type exists but exposes no Get describer
    #[error("resource type {0} does not support get")]
    GetNotSupported(String),

    /// A scoped client could not be built from the credentials
    #[error("failed to build session for account {account}: {source}")]
    Session {
        account: String,
        #[source]
        source: anyhow::Error,
    },

    /// The provider could not enumerate scopes for the account
    #[error("failed to discover scopes for account {account}: {source}")]
    ScopeDiscovery {
        account: String,
        #[source]
        source: anyhow::Error,
    },

    /// The call was cancelled or ran past its deadline while resolving
    #[error("describe call interrupted: {0}")]
    Interrupted(Interrupt),

    /// A caller-supplied sink rejected a resource
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Registry construction failed
    #[error("invalid registry: {0}")]
    Registry(String),
}

/// Failure returned by a sink; aborts the branch that produced it
#[derive(Debug, Clone, Error)]
#[error("sink rejected resource {resource_id}: {message}")]
pub struct SinkError {
    pub resource_id: String,
    pub message: String,
}

impl SinkError {
    pub fn new(resource_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            resource_id: resource_id.into(),
            message: message.into(),
        }
    }
}

/// Structured error returned by a provider API
///
/// Scope-level describers propagate this inside an `anyhow::Error`; the
/// dispatcher finds it again with [`ApiError::find`] to decide whether the
/// failure is benign.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("API request failed: {status} {code}: {message}")]
pub struct ApiError {
    /// HTTP status
    pub status: u16,
    /// Canonical status code, e.g. `PERMISSION_DENIED`
    pub code: String,
    /// Fine-grained reasons, e.g. `accessNotConfigured`
    pub reasons: Vec<String>,
    pub message: String,
}

impl ApiError {
    /// Locate an `ApiError` anywhere in an error chain
    pub fn find(error: &anyhow::Error) -> Option<&ApiError> {
        error.chain().find_map(|e| e.downcast_ref::<ApiError>())
    }

    /// Code followed by reasons
    pub fn codes(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.code.as_str()).chain(self.reasons.iter().map(String::as_str))
    }

    /// Most specific machine-readable code
    pub fn machine_code(&self) -> &str {
        self.reasons.first().map(String::as_str).unwrap_or(&self.code)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
