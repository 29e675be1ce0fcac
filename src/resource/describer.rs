//! Describer contract
//!
//! A resource type supplies scope-level functions ([`ListScope`], optionally
//! [`GetScope`]) that know how to talk to one API in one scope. A dispatch
//! strategy lifts them into a [`Describer`] that covers every scope.

use anyhow::Result;
use async_trait::async_trait;

use super::{Emitter, Resource, ResourceSet, Sink};
use crate::context::{DescribeContext, Fields, ScopeContext};
use crate::error::Error;
use crate::provider::ScopedClient;
use crate::scope::Scope;

/// Lists every resource of one type in one scope
///
/// Implementations must push resources through `emitter` (or return them) and
/// must not set scope tags themselves. Return `Err` on hard failure and an
/// empty vector when the scope simply has nothing.
#[async_trait]
pub trait ListScope<C: ScopedClient>: Send + Sync {
    async fn list(&self, cx: &ScopeContext, client: &C, emitter: &Emitter)
        -> Result<Vec<Resource>>;
}

/// Fetches one resource of one type in one scope
#[async_trait]
pub trait GetScope<C: ScopedClient>: Send + Sync {
    async fn get(&self, cx: &ScopeContext, client: &C, fields: &Fields)
        -> Result<Option<Resource>>;
}

/// Everything a lifted describer needs to know about where to look
#[derive(Clone)]
pub struct DescribeTarget<C> {
    /// Unscoped base client
    pub client: C,
    pub account_id: String,
    /// Resolved scopes, already in dispatch order
    pub scopes: Vec<Scope>,
    pub resource_type: String,
}

/// Full multi-scope contract for one resource type
#[async_trait]
pub trait Describer<C: ScopedClient>: Send + Sync {
    async fn list(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        sink: Option<Sink>,
    ) -> Result<ResourceSet, Error>;

    async fn get(
        &self,
        cx: &DescribeContext,
        target: &DescribeTarget<C>,
        fields: &Fields,
    ) -> Result<ResourceSet, Error>;
}
