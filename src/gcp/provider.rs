//! GCP provider
//!
//! Projects are accounts and Compute Engine regions are scopes.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use super::auth::{validate_project_id, GcpCredentials};
use super::client::{Endpoints, GcpClient};
use super::http::GcpHttpClient;
use super::regions;
use crate::provider::{Credentials, Provider};

/// Partition every GCP region belongs to
pub const GCP_PARTITION: &str = "gcp";

pub struct GcpProvider {
    http: GcpHttpClient,
    endpoints: Arc<Endpoints>,
    default_region: String,
}

impl GcpProvider {
    pub fn new(http: GcpHttpClient, endpoints: Endpoints, default_region: impl Into<String>) -> Self {
        Self {
            http,
            endpoints: Arc::new(endpoints),
            default_region: default_region.into(),
        }
    }
}

#[async_trait]
impl Provider for GcpProvider {
    type Client = GcpClient;

    async fn session(&self, credentials: &Credentials, account_id: &str) -> Result<GcpClient> {
        let credentials = GcpCredentials::from_credentials(credentials).await?;

        let project_id = if account_id.is_empty() {
            credentials.project_id().await?
        } else {
            account_id.to_string()
        };
        if !validate_project_id(&project_id) {
            bail!("Invalid project ID format: {}", project_id);
        }

        tracing::debug!(project = %project_id, "GCP session established");
        Ok(GcpClient::new(
            credentials,
            self.http.clone(),
            self.endpoints.clone(),
            &project_id,
        ))
    }

    async fn discover_scopes(&self, client: &GcpClient) -> Result<Vec<String>> {
        regions::list_region_names(client).await
    }

    fn primary_scope(&self) -> &str {
        &self.default_region
    }

    fn partition(&self, _scope: &str) -> String {
        GCP_PARTITION.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ScopedClient;

    fn provider() -> GcpProvider {
        GcpProvider::new(
            GcpHttpClient::new("describer-test").unwrap(),
            Endpoints::default(),
            "us-central1",
        )
    }

    #[tokio::test]
    async fn test_session_with_explicit_project() {
        let client = provider()
            .session(&Credentials::AccessToken("t".to_string()), "acme-prod")
            .await
            .unwrap();
        assert_eq!(client.account_id(), "acme-prod");
        assert_eq!(client.region, None);
    }

    #[tokio::test]
    async fn test_session_rejects_bad_project() {
        let result = provider()
            .session(&Credentials::AccessToken("t".to_string()), "Bad_Project")
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_token_credentials_need_project() {
        let result = provider()
            .session(&Credentials::AccessToken("t".to_string()), "")
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_primary_and_partition() {
        let provider = provider();
        assert_eq!(provider.primary_scope(), "us-central1");
        assert_eq!(provider.partition("europe-west1"), "gcp");
    }
}
