//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::Value;

use crate::error::ApiError;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let cut = (0..=MAX_LOG_BODY_LENGTH)
            .rev()
            .find(|i| body.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Build an [`ApiError`] from a Google error envelope
///
/// ```json
/// {"error": {"code": 403, "message": "...", "status": "PERMISSION_DENIED",
///            "errors": [{"reason": "accessNotConfigured"}],
///            "details": [{"reason": "SERVICE_DISABLED"}]}}
/// ```
///
/// Bodies that are not JSON still produce an error carrying the HTTP status.
pub fn parse_api_error(status: u16, body: &str) -> ApiError {
    let envelope: Option<Value> = serde_json::from_str(body).ok();
    let error = envelope.as_ref().and_then(|v| v.get("error"));

    let code = error
        .and_then(|e| e.get("status"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string());

    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status));

    let mut reasons: Vec<String> = Vec::new();
    for list in ["errors", "details"] {
        let entries = error
            .and_then(|e| e.get(list))
            .and_then(|v| v.as_array())
            .into_iter()
            .flatten();
        for entry in entries {
            if let Some(reason) = entry.get("reason").and_then(|v| v.as_str()) {
                if !reasons.iter().any(|r| r == reason) {
                    reasons.push(reason.to_string());
                }
            }
        }
    }

    ApiError {
        status,
        code,
        reasons,
        message,
    }
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Security: Only log sanitized/truncated error body to avoid leaking sensitive data
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(parse_api_error(status.as_u16(), &body).into());
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}
