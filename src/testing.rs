//! Test doubles
//!
//! Deterministic provider, client and scope-level describers used by unit and
//! integration tests. Nothing here touches the network.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::{Fields, ScopeContext};
use crate::error::ApiError;
use crate::provider::{Credentials, Provider, ScopedClient};
use crate::resource::{Emitter, GetScope, ListScope, Resource};
use crate::scope::Scope;

/// Client that only remembers which account and scope it is bound to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeClient {
    pub account: String,
    pub scope: Option<String>,
}

impl FakeClient {
    pub fn new(account: impl Into<String>) -> Self {
        Self {
            account: account.into(),
            scope: None,
        }
    }
}

impl ScopedClient for FakeClient {
    fn for_scope(&self, scope: &Scope) -> Self {
        Self {
            account: self.account.clone(),
            scope: Some(scope.name.clone()),
        }
    }

    fn account_id(&self) -> &str {
        &self.account
    }
}

/// Provider with a fixed scope list
#[derive(Debug, Clone)]
pub struct FakeProvider {
    pub scopes: Vec<String>,
    pub primary: String,
    pub fail_session: bool,
    pub fail_discovery: bool,
    pub hang_discovery: bool,
    sessions: Arc<Mutex<Vec<String>>>,
}

impl FakeProvider {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scopes: Vec<String> = scopes.into_iter().map(Into::into).collect();
        Self {
            primary: scopes.first().cloned().unwrap_or_default(),
            scopes,
            fail_session: false,
            fail_discovery: false,
            hang_discovery: false,
            sessions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_primary(mut self, primary: impl Into<String>) -> Self {
        self.primary = primary.into();
        self
    }

    pub fn failing_session(mut self) -> Self {
        self.fail_session = true;
        self
    }

    pub fn failing_discovery(mut self) -> Self {
        self.fail_discovery = true;
        self
    }

    /// Scope discovery never returns
    pub fn hanging_discovery(mut self) -> Self {
        self.hang_discovery = true;
        self
    }

    /// Accounts sessions were opened for
    pub fn sessions(&self) -> Vec<String> {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Provider for FakeProvider {
    type Client = FakeClient;

    async fn session(&self, _credentials: &Credentials, account_id: &str) -> Result<FakeClient> {
        if self.fail_session {
            anyhow::bail!("credentials rejected");
        }
        let account = if account_id.is_empty() {
            "home-account"
        } else {
            account_id
        };
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(account.to_string());
        Ok(FakeClient::new(account))
    }

    async fn discover_scopes(&self, _client: &FakeClient) -> Result<Vec<String>> {
        if self.fail_discovery {
            anyhow::bail!("region listing unavailable");
        }
        if self.hang_discovery {
            futures::future::pending::<()>().await;
        }
        Ok(self.scopes.clone())
    }

    fn primary_scope(&self) -> &str {
        &self.primary
    }

    fn partition(&self, scope: &str) -> String {
        if scope.starts_with("gov-") {
            "fake-gov".to_string()
        } else {
            "fake".to_string()
        }
    }
}

#[derive(Debug, Clone)]
enum Behavior {
    Resources(Vec<Resource>),
    Error(String),
    Api(ApiError),
    Panic,
    Hang,
}

/// Scope-level lister scripted per scope; unknown scopes are empty
#[derive(Debug, Clone, Default)]
pub struct StaticLister {
    behaviors: HashMap<String, Behavior>,
    delays: HashMap<String, Duration>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl StaticLister {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(mut self, scope: &str, resources: Vec<Resource>) -> Self {
        self.behaviors
            .insert(scope.to_string(), Behavior::Resources(resources));
        self
    }

    pub fn with_error(mut self, scope: &str, message: &str) -> Self {
        self.behaviors
            .insert(scope.to_string(), Behavior::Error(message.to_string()));
        self
    }

    pub fn with_api_error(mut self, scope: &str, error: ApiError) -> Self {
        self.behaviors.insert(scope.to_string(), Behavior::Api(error));
        self
    }

    pub fn with_panic(mut self, scope: &str) -> Self {
        self.behaviors.insert(scope.to_string(), Behavior::Panic);
        self
    }

    /// Never returns; only cancellation ends the call
    pub fn with_hang(mut self, scope: &str) -> Self {
        self.behaviors.insert(scope.to_string(), Behavior::Hang);
        self
    }

    /// Sleep for `delay` before answering in `scope`
    pub fn with_delay(mut self, scope: &str, delay: Duration) -> Self {
        self.delays.insert(scope.to_string(), delay);
        self
    }

    /// Scopes listed so far, in call order
    pub fn calls(&self) -> Arc<Mutex<Vec<String>>> {
        self.calls.clone()
    }
}

#[async_trait]
impl ListScope<FakeClient> for StaticLister {
    async fn list(
        &self,
        cx: &ScopeContext,
        client: &FakeClient,
        emitter: &Emitter,
    ) -> Result<Vec<Resource>> {
        assert_eq!(
            client.scope.as_deref(),
            Some(cx.region()),
            "client must be scoped to the scope being listed"
        );
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(cx.region().to_string());

        if let Some(delay) = self.delays.get(cx.region()) {
            tokio::time::sleep(*delay).await;
        }

        match self.behaviors.get(cx.region()).cloned() {
            None => Ok(Vec::new()),
            Some(Behavior::Resources(resources)) => {
                let mut out = Vec::new();
                for resource in resources {
                    emitter.emit(&mut out, resource)?;
                }
                Ok(out)
            }
            Some(Behavior::Error(message)) => Err(anyhow::anyhow!(message)),
            Some(Behavior::Api(error)) => Err(error.into()),
            Some(Behavior::Panic) => panic!("describer blew up in {}", cx.region()),
            Some(Behavior::Hang) => {
                futures::future::pending::<()>().await;
                Ok(Vec::new())
            }
        }
    }
}

/// Scope-level getter returning a fixed match per scope
#[derive(Debug, Clone, Default)]
pub struct StaticGetter {
    matches: HashMap<String, Resource>,
}

impl StaticGetter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, scope: &str, resource: Resource) -> Self {
        self.matches.insert(scope.to_string(), resource);
        self
    }
}

#[async_trait]
impl GetScope<FakeClient> for StaticGetter {
    async fn get(
        &self,
        cx: &ScopeContext,
        _client: &FakeClient,
        fields: &Fields,
    ) -> Result<Option<Resource>> {
        let wanted = fields.get("id").map(String::as_str);
        Ok(self
            .matches
            .get(cx.region())
            .filter(|resource| wanted.is_none() || wanted == Some(resource.id.as_str()))
            .cloned())
    }
}
