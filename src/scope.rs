//! Scopes
//!
//! A scope is one independent enumeration unit: a region, an account, or the
//! `global` marker. Scopes are resolved and ordered before any fan-out so
//! output is reproducible.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Marker used to tag resources that exist once per account
pub const GLOBAL_SCOPE: &str = "global";

/// How a resource type is spread across scopes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// One independent result set per scope
    Regional,
    /// Exists once; any scope that answers is authoritative
    Global,
}

/// A resolved scope with its derived partition
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Scope {
    pub name: String,
    pub partition: String,
}

impl Scope {
    pub fn new(name: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition: partition.into(),
        }
    }
}

/// Order scope names: `primary` first (if present), the rest lexicographic.
/// Duplicates and empty names are dropped.
pub fn order_scopes<I, S>(primary: &str, scopes: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut rest: BTreeSet<String> = scopes
        .into_iter()
        .map(Into::into)
        .filter(|s| !s.is_empty())
        .collect();

    let mut ordered = Vec::with_capacity(rest.len());
    if rest.remove(primary) {
        ordered.push(primary.to_string());
    }
    ordered.extend(rest);
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_first_then_lexicographic() {
        let ordered = order_scopes("us-central1", ["europe-west1", "us-central1", "asia-east1"]);
        assert_eq!(ordered, vec!["us-central1", "asia-east1", "europe-west1"]);
    }

    #[test]
    fn test_missing_primary_is_not_invented() {
        let ordered = order_scopes("us-central1", ["b", "a"]);
        assert_eq!(ordered, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicates_and_blanks_dropped() {
        let ordered = order_scopes("a", ["a", "", "c", "a", "b"]);
        assert_eq!(ordered, vec!["a", "b", "c"]);
    }
}
