//! Call-scoped describe parameters
//!
//! Everything a describe call needs beyond its target travels in an explicit
//! [`DescribeContext`]: the trigger that caused it, the job it belongs to, its
//! deadline and cancellation token. Scope-level describers receive a
//! [`ScopeContext`] derived from it.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::scope::Scope;

/// Opaque field map used to address a single resource at the API boundary
pub type Fields = BTreeMap<String, String>;

/// What caused a describe call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    #[default]
    Scheduled,
    Manual,
}

impl TriggerType {
    pub fn as_str(self) -> &'static str {
        match self {
            TriggerType::Scheduled => "scheduled",
            TriggerType::Manual => "manual",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "scheduled" => Ok(TriggerType::Scheduled),
            "manual" => Ok(TriggerType::Manual),
            other => Err(format!("unknown trigger type: {}", other)),
        }
    }
}

/// Why a context stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    /// Deadline passed; carries the cause the deadline was tagged with
    DeadlineExceeded(String),
}

impl fmt::Display for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Interrupt::Cancelled => f.write_str("context cancelled"),
            Interrupt::DeadlineExceeded(cause) => write!(f, "deadline exceeded: {}", cause),
        }
    }
}

impl std::error::Error for Interrupt {}

/// Parameters for one describe call
#[derive(Debug, Clone)]
pub struct DescribeContext {
    pub trigger: TriggerType,
    pub job_id: Option<String>,
    /// Free-form integration labels from the job payload
    pub labels: BTreeMap<String, String>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    cause: Arc<str>,
}

impl DescribeContext {
    pub fn new(trigger: TriggerType) -> Self {
        Self {
            trigger,
            job_id: None,
            labels: BTreeMap::new(),
            cancel: CancellationToken::new(),
            deadline: None,
            cause: Arc::from(""),
        }
    }

    pub fn with_job_id(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = labels;
        self
    }

    /// Bound the call by `timeout` from now, tagging expiry with `cause`
    pub fn with_timeout(mut self, timeout: Duration, cause: impl Into<String>) -> Self {
        self.deadline = Some(Instant::now() + timeout);
        self.cause = Arc::from(cause.into());
        self
    }

    /// Tie the call to an external cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Non-blocking check
    pub fn interruption(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(Interrupt::DeadlineExceeded(self.cause.to_string()))
            }
            _ => None,
        }
    }

    /// Resolves once the call is cancelled or its deadline passes
    pub async fn done(&self) -> Interrupt {
        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = self.cancel.cancelled() => Interrupt::Cancelled,
                _ = tokio::time::sleep_until(deadline) => {
                    Interrupt::DeadlineExceeded(self.cause.to_string())
                }
            },
            None => {
                self.cancel.cancelled().await;
                Interrupt::Cancelled
            }
        }
    }

    /// Child context for one scope of one resource type
    pub fn for_scope(&self, scope: &Scope, account_id: &str, resource_type: &str) -> ScopeContext {
        ScopeContext {
            describe: self.clone(),
            scope: scope.clone(),
            account_id: account_id.to_string(),
            resource_type: resource_type.to_string(),
        }
    }
}

/// Context handed to a scope-level describer
#[derive(Debug, Clone)]
pub struct ScopeContext {
    pub describe: DescribeContext,
    pub scope: Scope,
    pub account_id: String,
    pub resource_type: String,
}

impl ScopeContext {
    pub fn region(&self) -> &str {
        &self.scope.name
    }

    pub fn trigger(&self) -> TriggerType {
        self.describe.trigger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_type_parses_case_insensitively() {
        assert_eq!("Manual".parse::<TriggerType>(), Ok(TriggerType::Manual));
        assert_eq!("scheduled".parse::<TriggerType>(), Ok(TriggerType::Scheduled));
        assert!("hourly".parse::<TriggerType>().is_err());
    }

    #[tokio::test]
    async fn test_done_reports_cancellation() {
        let cx = DescribeContext::new(TriggerType::Manual);
        assert_eq!(cx.interruption(), None);

        cx.cancel();
        assert_eq!(cx.done().await, Interrupt::Cancelled);
        assert_eq!(cx.interruption(), Some(Interrupt::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn test_done_reports_deadline_cause() {
        let cx = DescribeContext::new(TriggerType::Scheduled)
            .with_timeout(Duration::from_secs(5), "job 7 timed out");

        let why = cx.done().await;
        assert_eq!(why, Interrupt::DeadlineExceeded("job 7 timed out".to_string()));
        assert_eq!(why.to_string(), "deadline exceeded: job 7 timed out");
    }

    #[test]
    fn test_scope_context_carries_trigger() {
        let cx = DescribeContext::new(TriggerType::Manual).with_job_id("42");
        let scope = Scope::new("us-east1", "gcp");
        let scx = cx.for_scope(&scope, "acme-prod", "GCP/ComputeAddress");

        assert_eq!(scx.region(), "us-east1");
        assert_eq!(scx.trigger(), TriggerType::Manual);
        assert_eq!(scx.describe.job_id.as_deref(), Some("42"));
    }
}
