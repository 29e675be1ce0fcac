//! Resource Registry
//!
//! Maps resource type names to their describers. The registry is built once at
//! startup through [`RegistryBuilder`] and is read-only afterwards; callers
//! share it behind an `Arc`.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::describer::Describer;
use super::dispatch::Dispatch;
use crate::error::Error;
use crate::provider::ScopedClient;
use crate::scope::ScopeKind;

/// A registered resource type
pub struct ResourceType<C: ScopedClient> {
    pub name: String,
    pub scope_kind: ScopeKind,
    /// Labels such as `service` or `category`
    pub tags: BTreeMap<String, Vec<String>>,
    describer: Arc<dyn Describer<C>>,
}

impl<C: ScopedClient> ResourceType<C> {
    /// Register a dispatch-lifted describer; scope kind follows its strategy
    pub fn new(name: impl Into<String>, dispatch: Dispatch<C>) -> Self {
        Self {
            name: name.into(),
            scope_kind: dispatch.strategy().scope_kind(),
            tags: BTreeMap::new(),
            describer: Arc::new(dispatch),
        }
    }

    /// Register a hand-written describer
    pub fn with_describer(
        name: impl Into<String>,
        scope_kind: ScopeKind,
        describer: Arc<dyn Describer<C>>,
    ) -> Self {
        Self {
            name: name.into(),
            scope_kind,
            tags: BTreeMap::new(),
            describer,
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags
            .get(key)
            .is_some_and(|values| values.iter().any(|v| v.eq_ignore_ascii_case(value)))
    }

    pub fn describer(&self) -> &dyn Describer<C> {
        self.describer.as_ref()
    }
}

impl<C: ScopedClient> std::fmt::Debug for ResourceType<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceType")
            .field("name", &self.name)
            .field("scope_kind", &self.scope_kind)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// Filter for [`Registry::names`]
#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    pub scope_kind: Option<ScopeKind>,
    pub tags: BTreeMap<String, String>,
}

impl TypeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scope_kind(mut self, kind: ScopeKind) -> Self {
        self.scope_kind = Some(kind);
        self
    }

    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    fn matches<C: ScopedClient>(&self, resource_type: &ResourceType<C>) -> bool {
        if let Some(kind) = self.scope_kind {
            if resource_type.scope_kind != kind {
                return false;
            }
        }
        self.tags
            .iter()
            .all(|(key, value)| resource_type.has_tag(key, value))
    }
}

/// Collects resource types before freezing them into a [`Registry`]
pub struct RegistryBuilder<C: ScopedClient> {
    types: Vec<ResourceType<C>>,
}

impl<C: ScopedClient> Default for RegistryBuilder<C> {
    fn default() -> Self {
        Self { types: Vec::new() }
    }
}

impl<C: ScopedClient> RegistryBuilder<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, resource_type: ResourceType<C>) -> Self {
        self.types.push(resource_type);
        self
    }

    pub fn extend(mut self, types: impl IntoIterator<Item = ResourceType<C>>) -> Self {
        self.types.extend(types);
        self
    }

    /// Freeze the registry; names must be unique ignoring case
    pub fn build(self) -> Result<Registry<C>, Error> {
        let mut types = HashMap::with_capacity(self.types.len());
        let mut folded = HashMap::with_capacity(self.types.len());

        for resource_type in self.types {
            let name = resource_type.name.clone();
            if name.is_empty() {
                return Err(Error::Registry("resource type with empty name".to_string()));
            }
            if let Some(existing) = folded.insert(name.to_lowercase(), name.clone()) {
                return Err(Error::Registry(format!(
                    "resource type {} conflicts with {}",
                    name, existing
                )));
            }
            types.insert(name, resource_type);
        }

        tracing::debug!(types = types.len(), "resource registry built");
        Ok(Registry { types, folded })
    }
}

/// Immutable resource type lookup
pub struct Registry<C: ScopedClient> {
    types: HashMap<String, ResourceType<C>>,
    /// Lowercased name -> registered name
    folded: HashMap<String, String>,
}

impl<C: ScopedClient> Registry<C> {
    /// Exact match first, then case-insensitive
    pub fn get(&self, name: &str) -> Result<&ResourceType<C>, Error> {
        if let Some(resource_type) = self.types.get(name) {
            return Ok(resource_type);
        }
        self.folded
            .get(&name.to_lowercase())
            .and_then(|registered| self.types.get(registered))
            .ok_or_else(|| Error::ResourceTypeNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_ok()
    }

    /// Sorted names matching `filter`
    pub fn names(&self, filter: &TypeFilter) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .types
            .values()
            .filter(|resource_type| filter.matches(resource_type))
            .map(|resource_type| resource_type.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
