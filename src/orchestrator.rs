//! Orchestrator
//!
//! Resolves everything a describe call needs (session, scopes, resource type)
//! and hands over to the resource type's lifted describer.

use std::future::Future;
use std::sync::Arc;

use crate::context::{DescribeContext, Fields};
use crate::error::Error;
use crate::provider::{Credentials, Provider, ScopedClient};
use crate::resource::{DescribeTarget, Registry, ResourceSet, ResourceType, Sink};
use crate::scope::{order_scopes, Scope};

/// What to describe and where
#[derive(Debug, Clone)]
pub struct DescribeRequest {
    pub resource_type: String,
    /// Target account; empty means the credentials' own account
    pub account_id: String,
    pub credentials: Credentials,
    /// Explicit scope list; `None` means every scope the provider reports
    pub scopes: Option<Vec<String>>,
}

impl DescribeRequest {
    pub fn new(resource_type: impl Into<String>, account_id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            account_id: account_id.into(),
            credentials: Credentials::ApplicationDefault,
            scopes: None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = Some(scopes.into_iter().map(Into::into).collect());
        self
    }
}

pub struct Orchestrator<P: Provider> {
    provider: P,
    registry: Arc<Registry<P::Client>>,
}

impl<P: Provider> Orchestrator<P> {
    pub fn new(provider: P, registry: Arc<Registry<P::Client>>) -> Self {
        Self { provider, registry }
    }

    pub fn registry(&self) -> &Registry<P::Client> {
        &self.registry
    }

    /// Enumerate a resource type across every resolved scope
    pub async fn get_resources(
        &self,
        cx: &DescribeContext,
        request: &DescribeRequest,
        sink: Option<Sink>,
    ) -> Result<ResourceSet, Error> {
        let (resource_type, target) = self.resolve(cx, request).await?;

        tracing::info!(
            resource_type = %target.resource_type,
            account = %target.account_id,
            scopes = target.scopes.len(),
            trigger = %cx.trigger,
            "describing resources"
        );

        resource_type.describer().list(cx, &target, sink).await
    }

    /// Fetch one resource by `id`, disambiguated by `fields`
    pub async fn get_single_resource(
        &self,
        cx: &DescribeContext,
        request: &DescribeRequest,
        id: &str,
        fields: &Fields,
    ) -> Result<ResourceSet, Error> {
        let (resource_type, target) = self.resolve(cx, request).await?;

        let mut fields = fields.clone();
        fields.insert("id".to_string(), id.to_string());

        tracing::info!(
            resource_type = %target.resource_type,
            account = %target.account_id,
            id = %id,
            "describing single resource"
        );

        resource_type.describer().get(cx, &target, &fields).await
    }

    async fn resolve(
        &self,
        cx: &DescribeContext,
        request: &DescribeRequest,
    ) -> Result<(&ResourceType<P::Client>, DescribeTarget<P::Client>), Error> {
        let client = bounded(cx, self.provider.session(&request.credentials, &request.account_id))
            .await?
            .map_err(|source| Error::Session {
                account: request.account_id.clone(),
                source,
            })?;
        let account_id = client.account_id().to_string();

        let names = match &request.scopes {
            Some(scopes) => scopes.clone(),
            None => bounded(cx, self.provider.discover_scopes(&client))
                .await?
                .map_err(|source| Error::ScopeDiscovery {
                    account: account_id.clone(),
                    source,
                })?,
        };

        let scopes: Vec<Scope> = order_scopes(self.provider.primary_scope(), names)
            .into_iter()
            .map(|name| {
                let partition = self.provider.partition(&name);
                Scope::new(name, partition)
            })
            .collect();

        let resource_type = self.registry.get(&request.resource_type)?;

        let target = DescribeTarget {
            client,
            account_id,
            scopes,
            resource_type: resource_type.name.clone(),
        };
        Ok((resource_type, target))
    }
}

/// Race a resolution step against the call's cancellation and deadline
async fn bounded<T, F>(cx: &DescribeContext, step: F) -> Result<T, Error>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        why = cx.done() => Err(Error::Interrupted(why)),
        output = step => Ok(output),
    }
}
