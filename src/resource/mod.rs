//! Resource abstraction layer
//!
//! This module holds the provider-agnostic half of discovery: the resource
//! envelope, the aggregate returned by a describe call, the sink used to
//! stream resources out, and the machinery that lifts a single-scope describer
//! into a multi-scope one.
//!
//! # Architecture
//!
//! - [`describer`] - Scope-level and lifted describer traits
//! - [`dispatch`] - Sequential/parallel, regional/global dispatch strategies
//! - [`registry`] - Immutable resource type registry
//!
//! # Example
//!
//! ```ignore
//! use describer::resource::{Dispatch, RegistryBuilder, ResourceType};
//!
//! let registry = RegistryBuilder::new()
//!     .register(ResourceType::new("GCP/ComputeAddress", Dispatch::parallel_regional(lister)))
//!     .build()?;
//! ```

pub mod describer;
pub mod dispatch;
pub mod registry;

pub use describer::{DescribeTarget, Describer, GetScope, ListScope};
pub use dispatch::{BenignPolicy, Dispatch, Strategy};
pub use registry::{Registry, RegistryBuilder, ResourceType, TypeFilter};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, OnceLock};

use crate::error::SinkError;

/// A discovered resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    /// Provider payload
    #[serde(default)]
    pub description: Value,
    #[serde(default)]
    pub account: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub partition: String,
    #[serde(default, rename = "type")]
    pub resource_type: String,
}

impl Resource {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description,
            account: String::new(),
            region: String::new(),
            partition: String::new(),
            resource_type: String::new(),
        }
    }

    /// Identity used for deduplication
    pub fn identity(&self) -> &str {
        if self.id.is_empty() {
            &self.name
        } else {
            &self.id
        }
    }

    pub(crate) fn tag(&mut self, tags: &Tags) {
        self.account.clone_from(&tags.account);
        self.region.clone_from(&tags.region);
        self.partition.clone_from(&tags.partition);
        self.resource_type.clone_from(&tags.resource_type);
    }
}

/// Scope tags stamped on every resource by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tags {
    pub account: String,
    pub region: String,
    pub partition: String,
    pub resource_type: String,
}

/// Streaming callback; called concurrently by parallel branches
pub type Sink = Arc<dyn Fn(Resource) -> Result<(), SinkError> + Send + Sync>;

/// Wrap a closure as a [`Sink`]
pub fn sink_fn<F>(f: F) -> Sink
where
    F: Fn(Resource) -> Result<(), SinkError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Result of a describe call
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSet {
    /// Resources per scope; every attempted, non-failed scope has an entry
    pub resources: BTreeMap<String, Vec<Resource>>,
    /// Error message per failed scope
    pub errors: BTreeMap<String, String>,
    /// Code of the last recorded error
    pub error_code: Option<String>,
}

impl ResourceSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of collected resources across scopes
    pub fn resource_count(&self) -> usize {
        self.resources.values().map(Vec::len).sum()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// All collected resources in scope order
    pub fn into_resources(self) -> Vec<Resource> {
        self.resources.into_values().flatten().collect()
    }
}

/// Append-or-stream emitter handed to a scope-level describer
///
/// Every resource is tagged, then either pushed through the sink or appended
/// to the caller's buffer. After the first sink failure the emitter latches
/// and refuses further resources for this branch without calling the sink.
/// A deduplicating emitter drops resources whose identity it has already
/// passed on, on both paths.
#[derive(Clone)]
pub struct Emitter {
    tags: Tags,
    sink: Option<Sink>,
    failure: Arc<OnceLock<SinkError>>,
    seen: Option<Arc<Mutex<HashSet<String>>>>,
}

impl Emitter {
    pub fn new(tags: Tags, sink: Option<Sink>) -> Self {
        Self {
            tags,
            sink,
            failure: Arc::new(OnceLock::new()),
            seen: None,
        }
    }

    /// Pass each identity on at most once
    pub fn deduplicating(mut self) -> Self {
        self.seen = Some(Arc::new(Mutex::new(HashSet::new())));
        self
    }

    pub fn is_streaming(&self) -> bool {
        self.sink.is_some()
    }

    pub fn tags(&self) -> &Tags {
        &self.tags
    }

    pub fn emit(&self, out: &mut Vec<Resource>, mut resource: Resource) -> Result<(), SinkError> {
        resource.tag(&self.tags);

        if let Some(seen) = &self.seen {
            let fresh = seen
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(resource.identity().to_string());
            if !fresh {
                return Ok(());
            }
        }

        let Some(sink) = &self.sink else {
            out.push(resource);
            return Ok(());
        };

        if let Some(err) = self.failure.get() {
            return Err(err.clone());
        }

        sink(resource).inspect_err(|err| {
            let _ = self.failure.set(err.clone());
        })
    }

    /// First sink failure seen by this branch
    pub fn failure(&self) -> Option<&SinkError> {
        self.failure.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tags() -> Tags {
        Tags {
            account: "acme-prod".to_string(),
            region: "us-east1".to_string(),
            partition: "gcp".to_string(),
            resource_type: "GCP/ComputeAddress".to_string(),
        }
    }

    #[test]
    fn test_emit_collects_without_sink() {
        let emitter = Emitter::new(tags(), None);
        let mut out = Vec::new();

        emitter
            .emit(&mut out, Resource::new("1", "a", json!({})))
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].region, "us-east1");
        assert_eq!(out[0].resource_type, "GCP/ComputeAddress");
    }

    #[test]
    fn test_emit_streams_tagged_resources() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_sink = seen.clone();
        let emitter = Emitter::new(
            tags(),
            Some(sink_fn(move |r| {
                seen_in_sink.lock().unwrap().push(r);
                Ok(())
            })),
        );
        let mut out = Vec::new();

        emitter
            .emit(&mut out, Resource::new("1", "a", json!({})))
            .unwrap();

        assert!(out.is_empty(), "streamed resources are not collected");
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].account, "acme-prod");
        assert_eq!(seen[0].partition, "gcp");
    }

    #[test]
    fn test_emit_latches_after_sink_failure() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in_sink = calls.clone();
        let emitter = Emitter::new(
            tags(),
            Some(sink_fn(move |r| {
                if calls_in_sink.fetch_add(1, Ordering::SeqCst) == 1 {
                    return Err(SinkError::new(r.id, "downstream closed"));
                }
                Ok(())
            })),
        );
        let mut out = Vec::new();

        assert!(emitter.emit(&mut out, Resource::new("1", "a", json!({}))).is_ok());
        assert!(emitter.emit(&mut out, Resource::new("2", "b", json!({}))).is_err());
        assert!(emitter.emit(&mut out, Resource::new("3", "c", json!({}))).is_err());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(emitter.failure().map(|e| e.resource_id.as_str()), Some("2"));
    }

    #[test]
    fn test_deduplicating_emitter_skips_seen_identities() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_in_sink = seen.clone();
        let streaming = Emitter::new(
            tags(),
            Some(sink_fn(move |r| {
                seen_in_sink.lock().unwrap().push(r.id);
                Ok(())
            })),
        )
        .deduplicating();
        let collecting = Emitter::new(tags(), None).deduplicating();
        let mut out = Vec::new();

        for id in ["1", "1", "2"] {
            streaming
                .emit(&mut Vec::new(), Resource::new(id, id, json!({})))
                .unwrap();
            collecting
                .emit(&mut out, Resource::new(id, id, json!({})))
                .unwrap();
        }

        assert_eq!(seen.lock().unwrap().as_slice(), ["1", "2"]);
        let ids: Vec<&str> = out.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_identity_falls_back_to_name() {
        let resource = Resource::new("", "bucket-a", json!({}));
        assert_eq!(resource.identity(), "bucket-a");
    }
}
