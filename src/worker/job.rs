//! Job payload
//!
//! One queue message describes one resource type in one account:
//!
//! ```json
//! {"id": "7f9c...", "resource_type": "GCP/ComputeAddress",
//!  "trigger_type": "scheduled", "account_id": "acme-prod",
//!  "credentials": "...", "scopes": ["us-east1"], "labels": {"team": "net"},
//!  "created_at": "2026-10-19T08:00:00Z"}
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::context::{DescribeContext, TriggerType};
use crate::orchestrator::DescribeRequest;
use crate::provider::Credentials;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub resource_type: String,
    #[serde(default)]
    pub trigger_type: TriggerType,
    /// Empty means the credentials' own account
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub integration_id: Option<String>,
    /// Encrypted credential document
    #[serde(default)]
    pub credentials: Option<String>,
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let job: Job = serde_json::from_slice(payload).context("Failed to decode job payload")?;
        if job.id.is_empty() {
            bail!("Job payload has an empty id");
        }
        if job.resource_type.is_empty() {
            bail!("Job {} names no resource type", job.id);
        }
        Ok(job)
    }

    /// Time the job spent waiting in the queue
    pub fn queue_latency(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.created_at)
    }

    /// Deadline-bounded context tagged with the job it runs for
    pub fn describe_context(&self, timeout: Duration) -> DescribeContext {
        let mut labels = self.labels.clone();
        if let Some(integration) = &self.integration_id {
            labels
                .entry("integration_id".to_string())
                .or_insert_with(|| integration.clone());
        }

        DescribeContext::new(self.trigger_type)
            .with_job_id(self.id.clone())
            .with_labels(labels)
            .with_timeout(
                timeout,
                format!("job {} ({}) timed out", self.id, self.resource_type),
            )
    }

    pub fn request(&self, decryptor: &dyn CredentialDecryptor) -> Result<DescribeRequest> {
        let credentials = match self.credentials.as_deref() {
            None | Some("") => Credentials::ApplicationDefault,
            Some(ciphertext) => decryptor
                .decrypt(ciphertext)
                .with_context(|| format!("Failed to decrypt credentials for job {}", self.id))?,
        };

        let mut request = DescribeRequest::new(self.resource_type.clone(), self.account_id.clone())
            .with_credentials(credentials);
        if let Some(scopes) = &self.scopes {
            request = request.with_scopes(scopes.iter().cloned());
        }
        Ok(request)
    }
}

/// Turns a job's credential ciphertext into usable credentials
pub trait CredentialDecryptor: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<Credentials>;
}

/// Credentials shipped as clear JSON
///
/// A service account key document (`"type": "service_account"`) or an object
/// carrying an `access_token`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Plaintext;

impl CredentialDecryptor for Plaintext {
    fn decrypt(&self, ciphertext: &str) -> Result<Credentials> {
        let document: Value =
            serde_json::from_str(ciphertext).context("Credentials are not valid JSON")?;

        if document.get("type").and_then(|v| v.as_str()) == Some("service_account") {
            return Ok(Credentials::ServiceAccountKey(ciphertext.to_string()));
        }
        if let Some(token) = document.get("access_token").and_then(|v| v.as_str()) {
            return Ok(Credentials::AccessToken(token.to_string()));
        }
        bail!("Unrecognised credential document")
    }
}
