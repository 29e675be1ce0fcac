//! Provider seam
//!
//! A provider turns credentials into a scoped client and knows which scopes
//! exist for an account. Everything provider-specific stops here; the
//! dispatcher and orchestrator only see [`ScopedClient`].

use anyhow::Result;
use async_trait::async_trait;
use std::fmt;

use crate::scope::Scope;

/// Client usable by scope-level describers
///
/// Implementations hold an immutable base configuration. `for_scope` returns a
/// shallow copy with the scope overridden; no state is shared mutably between
/// the copies handed to concurrent scopes.
pub trait ScopedClient: Clone + Send + Sync + 'static {
    fn for_scope(&self, scope: &Scope) -> Self;

    /// Account the client is bound to, used to tag resources
    fn account_id(&self) -> &str;
}

/// Credentials handed over by a job
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// Whatever the process environment provides
    ApplicationDefault,
    /// Service account key document (JSON)
    ServiceAccountKey(String),
    /// Pre-minted bearer token
    AccessToken(String),
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Never print secrets
        match self {
            Credentials::ApplicationDefault => f.write_str("ApplicationDefault"),
            Credentials::ServiceAccountKey(_) => f.write_str("ServiceAccountKey(..)"),
            Credentials::AccessToken(_) => f.write_str("AccessToken(..)"),
        }
    }
}

/// A cloud or SaaS backend
#[async_trait]
pub trait Provider: Send + Sync {
    type Client: ScopedClient;

    /// Build a client for `account_id` from `credentials`.
    ///
    /// The target account may differ from the credentials' home account; an
    /// empty `account_id` means "the credentials' own account".
    async fn session(&self, credentials: &Credentials, account_id: &str) -> Result<Self::Client>;

    /// Every scope currently enabled for the client's account
    async fn discover_scopes(&self, client: &Self::Client) -> Result<Vec<String>>;

    /// Scope enumerated first
    fn primary_scope(&self) -> &str;

    /// Partition a scope belongs to
    fn partition(&self, scope: &str) -> String;
}
