//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality. A client is bound to one project; scoped copies
//! additionally carry a region.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use url::Url;

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use crate::provider::ScopedClient;
use crate::scope::Scope;

/// Base URLs of the GCP services the catalog talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub compute: Url,
    pub storage: Url,
}

impl Endpoints {
    /// Build endpoints, normalising each base to end with `/`
    pub fn new(compute: &str, storage: &str) -> Result<Self> {
        Ok(Self {
            compute: parse_base(compute).context("Invalid compute endpoint")?,
            storage: parse_base(storage).context("Invalid storage endpoint")?,
        })
    }

    pub fn for_service(&self, service: &str) -> Option<&Url> {
        match service {
            "compute" => Some(&self.compute),
            "storage" => Some(&self.storage),
            _ => None,
        }
    }
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            compute: Url::parse("https://compute.googleapis.com/compute/v1/")
                .expect("static compute URL is valid"),
            storage: Url::parse("https://storage.googleapis.com/storage/v1/")
                .expect("static storage URL is valid"),
        }
    }
}

fn parse_base(base: &str) -> Result<Url> {
    let base = if base.ends_with('/') {
        base.to_string()
    } else {
        format!("{}/", base)
    };
    Ok(Url::parse(&base)?)
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub endpoints: Arc<Endpoints>,
    pub project_id: String,
    /// Set on scoped copies only
    pub region: Option<String>,
}

impl GcpClient {
    pub fn new(
        credentials: GcpCredentials,
        http: GcpHttpClient,
        endpoints: Arc<Endpoints>,
        project_id: &str,
    ) -> Self {
        Self {
            credentials,
            http,
            endpoints,
            project_id: project_id.to_string(),
            region: None,
        }
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.credentials.get_token().await?;
        self.http.get(url, &token).await
    }

    /// Region of a scoped client
    pub fn region(&self) -> Result<&str> {
        self.region
            .as_deref()
            .context("Client is not scoped to a region")
    }

    /// Resolve `path` against a service endpoint
    pub fn service_url(&self, service: &str, path: &str) -> Result<Url> {
        let base = self
            .endpoints
            .for_service(service)
            .with_context(|| format!("Unknown service: {}", service))?;
        base.join(path.trim_start_matches('/'))
            .with_context(|| format!("Invalid {} path: {}", service, path))
    }

    /// Build Compute Engine API URL
    pub fn compute_url(&self, path: &str) -> Result<Url> {
        self.service_url("compute", &format!("projects/{}/{}", self.project_id, path))
    }

    /// Build regional Compute Engine API URL for the client's region
    pub fn compute_regional_url(&self, resource: &str) -> Result<Url> {
        let region = self.region()?;
        self.compute_url(&format!("regions/{}/{}", region, resource))
    }

    /// Build global Compute Engine API URL
    pub fn compute_global_url(&self, resource: &str) -> Result<Url> {
        self.compute_url(&format!("global/{}", resource))
    }
}

impl ScopedClient for GcpClient {
    fn for_scope(&self, scope: &Scope) -> Self {
        Self {
            region: Some(scope.name.clone()),
            ..self.clone()
        }
    }

    fn account_id(&self) -> &str {
        &self.project_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcpClient {
        GcpClient::new(
            GcpCredentials::from_token("t"),
            GcpHttpClient::new("describer-test").unwrap(),
            Arc::new(Endpoints::default()),
            "acme-prod",
        )
    }

    #[test]
    fn test_compute_urls() {
        let client = client();
        assert_eq!(
            client.compute_global_url("networks").unwrap().as_str(),
            "https://compute.googleapis.com/compute/v1/projects/acme-prod/global/networks"
        );
        assert!(client.compute_regional_url("addresses").is_err());

        let scoped = client.for_scope(&Scope::new("us-east1", "gcp"));
        assert_eq!(
            scoped.compute_regional_url("addresses").unwrap().as_str(),
            "https://compute.googleapis.com/compute/v1/projects/acme-prod/regions/us-east1/addresses"
        );
    }

    #[test]
    fn test_scoped_copy_leaves_base_untouched() {
        let base = client();
        let scoped = base.for_scope(&Scope::new("europe-west1", "gcp"));

        assert_eq!(base.region, None);
        assert_eq!(scoped.region.as_deref(), Some("europe-west1"));
        assert_eq!(scoped.account_id(), "acme-prod");
    }

    #[test]
    fn test_endpoint_without_trailing_slash() {
        let endpoints = Endpoints::new("http://127.0.0.1:9000/compute/v1", "http://127.0.0.1:9000/storage/v1").unwrap();
        assert_eq!(endpoints.compute.as_str(), "http://127.0.0.1:9000/compute/v1/");
    }
}
