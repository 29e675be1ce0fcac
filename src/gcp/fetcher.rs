//! Resource Fetcher
//!
//! Walks paginated GCP list responses and extracts item arrays and scalar
//! fields from JSON payloads.

use anyhow::Result;
use serde_json::Value;
use url::Url;

use super::client::GcpClient;

/// Result of one page
pub struct PaginatedResult {
    pub items: Vec<Value>,
    pub next_token: Option<String>,
}

/// Fetch one page of items
pub async fn fetch_page(
    client: &GcpClient,
    url: &Url,
    response_path: &str,
    page_token: Option<&str>,
) -> Result<PaginatedResult> {
    let mut url = url.clone();
    if let Some(token) = page_token {
        url.query_pairs_mut().append_pair("pageToken", token);
    }

    let response = client.get(url.as_str()).await?;

    let items = extract_items(&response, response_path);
    let next_token = response
        .get("nextPageToken")
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string());

    Ok(PaginatedResult { items, next_token })
}

/// Fetch every page, handing each page's items to `on_page`
///
/// Stops at the first error from either the API or `on_page`.
pub async fn fetch_all<F>(
    client: &GcpClient,
    url: &Url,
    response_path: &str,
    mut on_page: F,
) -> Result<()>
where
    F: FnMut(Vec<Value>) -> Result<()>,
{
    let mut page_token: Option<String> = None;

    loop {
        let page = fetch_page(client, url, response_path, page_token.as_deref()).await?;
        on_page(page.items)?;

        match page.next_token {
            Some(token) => page_token = Some(token),
            None => break,
        }
    }

    Ok(())
}

/// Extract items from response using a dot-notation path
fn extract_items(response: &Value, path: &str) -> Vec<Value> {
    if path.is_empty() {
        return response.as_array().cloned().unwrap_or_default();
    }

    let mut current = response;
    for part in path.split('.') {
        current = match current.get(part) {
            Some(v) => v,
            None => return vec![],
        };
    }

    current.as_array().cloned().unwrap_or_default()
}

/// Extract a scalar from JSON using a dot-notation path
///
/// Numbers and booleans are rendered as strings; missing values, nulls,
/// arrays and objects yield `None`.
pub fn extract_json_value(item: &Value, path: &str) -> Option<String> {
    let mut current = item;

    for part in path.split('.') {
        current = if let Ok(idx) = part.parse::<usize>() {
            current.get(idx)?
        } else {
            current.get(part)?
        };
    }

    match current {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Extract short name from GCP resource URL
/// e.g., "https://www.googleapis.com/compute/v1/projects/my-project/regions/us-central1" -> "us-central1"
pub fn extract_short_name(url: &str) -> &str {
    url.rsplit('/').next().unwrap_or(url)
}
