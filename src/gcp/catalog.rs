//! GCP resource catalog
//!
//! Resource types whose scope-level describers are plain paginated REST
//! calls are declared in embedded JSON instead of code. Each entry becomes a
//! [`ResourceType`] backed by [`RestLister`] / [`RestGetter`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use url::Url;

use super::client::GcpClient;
use super::fetcher;
use crate::context::{Fields, ScopeContext};
use crate::error::ApiError;
use crate::resource::{
    BenignPolicy, Dispatch, Emitter, GetScope, ListScope, Registry, RegistryBuilder, Resource,
    ResourceType, Strategy,
};

/// Embedded catalog (compiled into the binary)
const CATALOG_JSON: &str = include_str!("../resources/gcp.json");

fn default_response_path() -> String {
    "items".to_string()
}

/// One REST-described resource type
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceDef {
    pub display_name: String,
    pub service: String,
    /// Path template relative to the service endpoint
    pub list_path: String,
    #[serde(default)]
    pub list_query: BTreeMap<String, String>,
    /// Path template for a single resource; `{id}` and other fields are substituted
    #[serde(default)]
    pub get_path: Option<String>,
    #[serde(default = "default_response_path")]
    pub response_path: String,
    pub id_field: String,
    pub name_field: String,
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default)]
    pub benign_codes: Vec<String>,
    #[serde(default)]
    pub benign_scope_codes: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub tags: BTreeMap<String, Vec<String>>,
}

/// Root structure of resources/gcp.json
#[derive(Debug, Clone, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub default_benign_codes: Vec<String>,
    #[serde(default)]
    pub resources: HashMap<String, ResourceDef>,
}

impl Catalog {
    /// Parse the embedded catalog
    pub fn embedded() -> Result<Self> {
        Self::from_json(CATALOG_JSON)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        serde_json::from_str(content).context("Failed to parse resource catalog")
    }

    fn benign_policy(&self, def: &ResourceDef) -> BenignPolicy {
        let codes = self
            .default_benign_codes
            .iter()
            .chain(def.benign_codes.iter())
            .cloned();
        def.benign_scope_codes
            .iter()
            .fold(BenignPolicy::new(codes), |policy, (scope, codes)| {
                policy.with_scope_codes(scope.clone(), codes.iter().cloned())
            })
    }

    /// Turn every entry into a registrable resource type
    pub fn resource_types(&self) -> Vec<ResourceType<GcpClient>> {
        self.resources
            .iter()
            .map(|(name, def)| {
                let def = Arc::new(def.clone());
                let mut dispatch = Dispatch::new(def.strategy, RestLister::new(def.clone()))
                    .with_benign(self.benign_policy(&def));
                if def.get_path.is_some() {
                    dispatch = dispatch.with_get(RestGetter::new(def.clone()));
                }

                def.tags.iter().fold(
                    ResourceType::new(name.clone(), dispatch),
                    |resource_type, (key, values)| {
                        values
                            .iter()
                            .fold(resource_type, |rt, value| rt.with_tag(key.clone(), value.clone()))
                    },
                )
            })
            .collect()
    }
}

/// Registry holding every embedded GCP resource type
pub fn registry() -> Result<Registry<GcpClient>> {
    let catalog = Catalog::embedded()?;
    let registry = RegistryBuilder::new()
        .extend(catalog.resource_types())
        .build()?;
    Ok(registry)
}

/// Substitute `{project}`, `{region}` and field placeholders in `template`
fn render(template: &str, client: &GcpClient, fields: &Fields) -> Result<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let end = rest[start..]
            .find('}')
            .map(|i| start + i)
            .with_context(|| format!("Unterminated placeholder in {}", template))?;
        let key = &rest[start + 1..end];

        let value = match key {
            "project" => client.project_id.clone(),
            "region" => client.region()?.to_string(),
            _ => fields
                .get(key)
                .map(|v| urlencoding::encode(v).into_owned())
                .with_context(|| format!("Missing parameter: {}", key))?,
        };
        out.push_str(&value);
        rest = &rest[end + 1..];
    }
    out.push_str(rest);

    Ok(out)
}

impl ResourceDef {
    fn list_url(&self, client: &GcpClient) -> Result<Url> {
        let no_fields = Fields::new();
        let mut url = client.service_url(&self.service, &render(&self.list_path, client, &no_fields)?)?;
        if !self.list_query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in &self.list_query {
                pairs.append_pair(key, &render(value, client, &no_fields)?);
            }
        }
        Ok(url)
    }

    fn to_resource(&self, item: Value) -> Resource {
        let name = fetcher::extract_json_value(&item, &self.name_field).unwrap_or_default();
        let id = fetcher::extract_json_value(&item, &self.id_field).unwrap_or_else(|| name.clone());
        Resource::new(id, name, item)
    }
}

/// Lists a catalog resource type in one region
pub struct RestLister {
    def: Arc<ResourceDef>,
}

impl RestLister {
    pub fn new(def: Arc<ResourceDef>) -> Self {
        Self { def }
    }
}

#[async_trait]
impl ListScope<GcpClient> for RestLister {
    async fn list(
        &self,
        cx: &ScopeContext,
        client: &GcpClient,
        emitter: &Emitter,
    ) -> Result<Vec<Resource>> {
        let url = self.def.list_url(client)?;
        let mut out = Vec::new();

        fetcher::fetch_all(client, &url, &self.def.response_path, |items| {
            for item in items {
                emitter.emit(&mut out, self.def.to_resource(item))?;
            }
            Ok(())
        })
        .await
        .with_context(|| format!("Failed to list {} in {}", self.def.display_name, cx.region()))?;

        Ok(out)
    }
}

/// Fetches a single catalog resource in one region
pub struct RestGetter {
    def: Arc<ResourceDef>,
}

impl RestGetter {
    pub fn new(def: Arc<ResourceDef>) -> Self {
        Self { def }
    }
}

#[async_trait]
impl GetScope<GcpClient> for RestGetter {
    async fn get(
        &self,
        _cx: &ScopeContext,
        client: &GcpClient,
        fields: &Fields,
    ) -> Result<Option<Resource>> {
        let template = self
            .def
            .get_path
            .as_deref()
            .with_context(|| format!("{} has no get path", self.def.display_name))?;
        let url = client.service_url(&self.def.service, &render(template, client, fields)?)?;

        match client.get(url.as_str()).await {
            Ok(item) => Ok(Some(self.def.to_resource(item))),
            // Not in this region
            Err(err) if ApiError::find(&err).is_some_and(|api| api.status == 404) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gcp::auth::GcpCredentials;
    use crate::gcp::client::Endpoints;
    use crate::gcp::http::GcpHttpClient;
    use crate::provider::ScopedClient;
    use crate::resource::TypeFilter;
    use crate::scope::{Scope, ScopeKind};
    use serde_json::json;

    fn client() -> GcpClient {
        GcpClient::new(
            GcpCredentials::from_token("t"),
            GcpHttpClient::new("describer-test").unwrap(),
            Arc::new(Endpoints::default()),
            "acme-prod",
        )
    }

    #[test]
    fn test_embedded_catalog_builds_registry() {
        let registry = registry().expect("embedded catalog should load");
        assert!(!registry.is_empty());

        let address = registry.get("gcp/computeaddress").unwrap();
        assert_eq!(address.scope_kind, ScopeKind::Regional);
        assert!(address.has_tag("service", "compute"));

        let bucket = registry.get("GCP/StorageBucket").unwrap();
        assert_eq!(bucket.scope_kind, ScopeKind::Global);
    }

    #[test]
    fn test_registry_filters_by_tag() {
        let registry = registry().unwrap();
        let storage = registry.names(&TypeFilter::new().tag("service", "storage"));
        assert_eq!(storage, vec!["GCP/StorageBucket"]);
    }

    #[test]
    fn test_render_substitutes_placeholders() {
        let scoped = client().for_scope(&Scope::new("us-east1", "gcp"));
        let mut fields = Fields::new();
        fields.insert("id".to_string(), "my addr".to_string());

        let path = render("projects/{project}/regions/{region}/addresses/{id}", &scoped, &fields).unwrap();
        assert_eq!(path, "projects/acme-prod/regions/us-east1/addresses/my%20addr");
    }

    #[test]
    fn test_render_missing_parameter_fails() {
        assert!(render("b/{id}", &client(), &Fields::new()).is_err());
        assert!(render("regions/{region}", &client(), &Fields::new()).is_err());
        assert!(render("b/{id", &client(), &Fields::new()).is_err());
    }

    #[test]
    fn test_list_url_appends_query() {
        let catalog = Catalog::embedded().unwrap();
        let def = &catalog.resources["GCP/StorageBucket"];
        assert_eq!(
            def.list_url(&client()).unwrap().as_str(),
            "https://storage.googleapis.com/storage/v1/b?project=acme-prod"
        );
    }

    #[test]
    fn test_to_resource_falls_back_to_name() {
        let catalog = Catalog::embedded().unwrap();
        let def = &catalog.resources["GCP/StorageBucket"];
        let resource = def.to_resource(json!({ "name": "logs" }));
        assert_eq!(resource.id, "logs");
        assert_eq!(resource.name, "logs");
    }

    #[test]
    fn test_scope_benign_codes_loaded() {
        let catalog = Catalog::embedded().unwrap();
        let def = &catalog.resources["GCP/ComputeForwardingRule"];
        let policy = catalog.benign_policy(def);
        let err: anyhow::Error = ApiError {
            status: 403,
            code: "PERMISSION_DENIED".to_string(),
            reasons: vec!["forbidden".to_string()],
            message: "denied".to_string(),
        }
        .into();

        assert!(policy.is_benign("me-central2", &err));
        assert!(!policy.is_benign("us-east1", &err));
    }
}
