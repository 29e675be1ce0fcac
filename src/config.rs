//! Configuration Management
//!
//! Worker configuration, read from a YAML file and overridden by the
//! environment and the command line.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::context::TriggerType;

/// Queue transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    pub url: String,
    pub stream: String,
    pub scheduled_subject: String,
    pub manual_subject: String,
    /// Durable consumer name is `<prefix>-<trigger>`
    pub consumer_prefix: String,
    pub ack_wait_secs: u64,
    pub inactive_threshold_secs: u64,
    pub max_age_secs: u64,
    pub max_bytes: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            stream: "describe-jobs".to_string(),
            scheduled_subject: "describe.jobs.scheduled".to_string(),
            manual_subject: "describe.jobs.manual".to_string(),
            consumer_prefix: "describer".to_string(),
            ack_wait_secs: 30 * 60,
            inactive_threshold_secs: 60 * 60,
            max_age_secs: 24 * 60 * 60,
            max_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// Job execution settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Which job topic this worker consumes
    pub trigger: TriggerType,
    pub job_timeout_secs: u64,
    /// Resources are published to `<results_subject>.<job id>`
    pub results_subject: String,
    /// Size the decode buffer is shrunk back to between jobs
    pub retained_buffer_bytes: usize,
    /// Resources queued for publishing before the sink pushes back
    pub publish_backlog: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            trigger: TriggerType::Scheduled,
            job_timeout_secs: 25 * 60,
            results_subject: "describe.results".to_string(),
            retained_buffer_bytes: 64 * 1024,
            publish_backlog: 8192,
        }
    }
}

/// GCP provider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub default_region: String,
    pub compute_endpoint: String,
    pub storage_endpoint: String,
    pub user_agent: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            default_region: "us-central1".to_string(),
            compute_endpoint: "https://compute.googleapis.com/compute/v1/".to_string(),
            storage_endpoint: "https://storage.googleapis.com/storage/v1/".to_string(),
            user_agent: format!("describer/{}", crate::VERSION),
        }
    }
}

/// Worker configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub nats: NatsConfig,
    pub worker: WorkerConfig,
    pub gcp: GcpConfig,
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("describer").join("worker.yaml"))
    }

    /// Load configuration from `path`, or the default location
    ///
    /// A missing or unreadable file yields the defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::read(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring config file {:?}: {:#}", path, e);
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).context("Failed to read config file")?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        serde_yaml::from_str(content).context("Failed to parse config file")
    }

    /// Apply `NATS_URL` and `DESCRIBER_TRIGGER` from the process environment
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    pub fn apply_env_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("NATS_URL").filter(|v| !v.is_empty()) {
            self.nats.url = url;
        }
        if let Some(trigger) = lookup("DESCRIBER_TRIGGER") {
            match trigger.parse() {
                Ok(trigger) => self.worker.trigger = trigger,
                Err(e) => tracing::warn!("Ignoring DESCRIBER_TRIGGER: {}", e),
            }
        }
    }

    /// Subject jobs of the given trigger are published on
    pub fn subject_for(&self, trigger: TriggerType) -> &str {
        match trigger {
            TriggerType::Scheduled => &self.nats.scheduled_subject,
            TriggerType::Manual => &self.nats.manual_subject,
        }
    }

    /// Durable consumer name for the given trigger
    pub fn consumer_name(&self, trigger: TriggerType) -> String {
        format!("{}-{}", self.nats.consumer_prefix, trigger.as_str())
    }

    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.worker.job_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_transport_contract() {
        let config = Config::default();
        assert_eq!(config.nats.stream, "describe-jobs");
        assert_eq!(config.subject_for(TriggerType::Scheduled), "describe.jobs.scheduled");
        assert_eq!(config.subject_for(TriggerType::Manual), "describe.jobs.manual");
        assert_eq!(config.nats.ack_wait_secs, 1800);
        assert_eq!(config.nats.inactive_threshold_secs, 3600);
        assert_eq!(config.consumer_name(TriggerType::Manual), "describer-manual");
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml(
            "nats:\n  url: nats://queue:4222\nworker:\n  trigger: manual\n  job_timeout_secs: 60\n",
        )
        .unwrap();

        assert_eq!(config.nats.url, "nats://queue:4222");
        assert_eq!(config.nats.stream, "describe-jobs");
        assert_eq!(config.worker.trigger, TriggerType::Manual);
        assert_eq!(config.job_timeout(), Duration::from_secs(60));
        assert_eq!(config.gcp.default_region, "us-central1");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            HashMap::from([("NATS_URL", "nats://env:4222"), ("DESCRIBER_TRIGGER", "MANUAL")]);
        let mut config = Config::default();
        config.apply_env_from(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.nats.url, "nats://env:4222");
        assert_eq!(config.worker.trigger, TriggerType::Manual);
    }

    #[test]
    fn test_invalid_env_trigger_ignored() {
        let mut config = Config::default();
        config.apply_env_from(|key| (key == "DESCRIBER_TRIGGER").then(|| "hourly".to_string()));
        assert_eq!(config.worker.trigger, TriggerType::Scheduled);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Some(Path::new("/nonexistent/describer/worker.yaml")));
        assert_eq!(config, Config::default());
    }
}
