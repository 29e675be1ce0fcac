//! GCP Regions
//!
//! Region discovery for a project; regions are the scopes GCP resources are
//! enumerated over.

use anyhow::Result;
use serde_json::Value;

use super::client::GcpClient;
use super::fetcher;

/// Region information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub name: String,
    pub status: String,
}

impl From<&Value> for Region {
    fn from(value: &Value) -> Self {
        Self {
            name: value
                .get("name")
                .and_then(|v| v.as_str())
                .unwrap_or("-")
                .to_string(),
            status: value
                .get("status")
                .and_then(|v| v.as_str())
                .unwrap_or("UNKNOWN")
                .to_string(),
        }
    }
}

/// List the project's regions that are currently up
pub async fn list_regions(client: &GcpClient) -> Result<Vec<Region>> {
    let url = client.compute_url("regions")?;
    let mut regions = Vec::new();

    fetcher::fetch_all(client, &url, "items", |items| {
        regions.extend(
            items
                .iter()
                .map(Region::from)
                // Only include regions accepting requests
                .filter(|r| r.status == "UP" && r.name != "-"),
        );
        Ok(())
    })
    .await?;

    Ok(regions)
}

/// Get region names as a simple list
pub async fn list_region_names(client: &GcpClient) -> Result<Vec<String>> {
    let regions = list_regions(client).await?;
    Ok(regions.into_iter().map(|r| r.name).collect())
}
