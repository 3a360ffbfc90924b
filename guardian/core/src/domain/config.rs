// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Guardian configuration manifest.
//!
//! Kubernetes-style YAML (`apiVersion`/`kind`/`metadata`/`spec`). All numeric
//! thresholds are configurable defaults, not fixed requirements; production
//! limits must be confirmed with stakeholders before deployment.
//!
//! ```yaml
//! apiVersion: 100monkeys.ai/v1
//! kind: ProfitGuardian
//! metadata:
//!   name: client-account-main
//! spec:
//!   tick_interval: 15m
//!   hysteresis_ticks: 2
//!   absolute_loss_limit_micros: 300000000
//!   platform:
//!     endpoint: https://ads-gateway.internal
//!     customer_id: "483-920-1177"
//!   storage:
//!     type: memory
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

pub const API_VERSION: &str = "100monkeys.ai/v1";
pub const KIND: &str = "ProfitGuardian";

/// Configuration failures are fatal at startup: the scheduler must not start
/// with missing limits or malformed thresholds.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid config: {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Top-level manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianManifest {
    #[serde(rename = "apiVersion")]
    pub api_version: String,

    pub kind: String,

    pub metadata: ManifestMetadata,

    pub spec: GuardianConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestMetadata {
    /// Human-readable guardian instance name.
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

impl GuardianManifest {
    pub fn from_yaml_str(raw: &str) -> Result<Self, ConfigError> {
        let manifest: GuardianManifest = serde_yaml::from_str(raw)?;
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.api_version != API_VERSION {
            return Err(invalid(
                "apiVersion",
                format!("expected {API_VERSION}, got {}", self.api_version),
            ));
        }
        if self.kind != KIND {
            return Err(invalid("kind", format!("expected {KIND}, got {}", self.kind)));
        }
        if self.metadata.name.is_empty() {
            return Err(invalid("metadata.name", "must not be empty"));
        }
        self.spec.validate()
    }
}

/// Guardian tuning, the `spec:` section of the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuardianConfig {
    /// Wall-clock interval between ticks.
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,

    /// Consecutive ticks a condition must hold before a pause/resume
    /// transition commits.
    #[serde(default = "default_hysteresis_ticks")]
    pub hysteresis_ticks: u32,

    /// Minimum accumulated clicks before a signal may justify a pause.
    #[serde(default = "default_min_clicks")]
    pub min_clicks_for_decision: u64,

    /// Rolling window for profitability evaluation and loss ledgers.
    #[serde(with = "humantime_serde", default = "default_history_window")]
    pub history_window: Duration,

    /// Cap on trailing snapshots considered per entity (whichever of this and
    /// `history_window` is smaller wins).
    #[serde(default = "default_history_ticks")]
    pub history_ticks: usize,

    /// Campaign-wide halt once windowed loss exceeds this.
    #[serde(default = "default_absolute_loss_limit")]
    pub absolute_loss_limit_micros: i64,

    /// Campaign-wide halt once loss per elapsed hour exceeds this.
    #[serde(default = "default_loss_rate_limit")]
    pub loss_rate_limit_micros_per_hour: i64,

    /// Breakeven cost per conversion; the profitability proxy when no
    /// conversion value is attributed.
    #[serde(default = "default_breakeven_cost")]
    pub breakeven_cost_micros: i64,

    /// Cost per conversion beyond which performance rates Poor/Terrible.
    #[serde(default = "default_max_cost")]
    pub max_cost_micros: i64,

    /// Interval net loss up to this amount is tolerated and not recorded in
    /// the ledger.
    #[serde(default)]
    pub acceptable_loss_per_interval_micros: i64,

    /// Pacing ratio above which a REPACE advisory is raised.
    #[serde(default = "default_repace_ratio")]
    pub repace_ratio: f64,

    #[serde(default)]
    pub fetcher: FetchPolicy,

    #[serde(default)]
    pub applier: RetryPolicy,

    pub platform: PlatformConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub api: ApiConfig,

    /// Optional alert webhook (circuit trips, failed actions, aborted ticks).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Whether the guardian starts armed. Defaults to false: the operator
    /// arms it explicitly.
    #[serde(default)]
    pub start_enabled: bool,

    /// Prometheus exporter port; disabled when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
}

impl GuardianConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_interval < Duration::from_secs(60) {
            return Err(invalid("spec.tick_interval", "must be at least 1m"));
        }
        if self.hysteresis_ticks == 0 {
            return Err(invalid("spec.hysteresis_ticks", "must be at least 1"));
        }
        if self.min_clicks_for_decision == 0 {
            return Err(invalid("spec.min_clicks_for_decision", "must be positive"));
        }
        if self.history_window < self.tick_interval {
            return Err(invalid(
                "spec.history_window",
                "must be at least one tick interval",
            ));
        }
        if self.history_ticks == 0 {
            return Err(invalid("spec.history_ticks", "must be positive"));
        }
        if self.absolute_loss_limit_micros <= 0 {
            return Err(invalid("spec.absolute_loss_limit_micros", "must be positive"));
        }
        if self.loss_rate_limit_micros_per_hour <= 0 {
            return Err(invalid(
                "spec.loss_rate_limit_micros_per_hour",
                "must be positive",
            ));
        }
        if self.breakeven_cost_micros <= 0 {
            return Err(invalid("spec.breakeven_cost_micros", "must be positive"));
        }
        if self.max_cost_micros < self.breakeven_cost_micros {
            return Err(invalid(
                "spec.max_cost_micros",
                "must be at least breakeven_cost_micros",
            ));
        }
        if self.acceptable_loss_per_interval_micros < 0 {
            return Err(invalid(
                "spec.acceptable_loss_per_interval_micros",
                "must not be negative",
            ));
        }
        if self.repace_ratio <= 1.0 {
            return Err(invalid("spec.repace_ratio", "must be greater than 1.0"));
        }
        self.fetcher.validate()?;
        self.applier.validate()?;
        self.platform.validate()?;
        self.storage.validate()
    }

    /// History window as a chrono duration for ledger arithmetic.
    pub fn history_window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.history_window)
            .unwrap_or_else(|_| chrono::Duration::hours(24))
    }
}

/// Bounded-retry policy for the action applier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_applier_retries")]
    pub max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_applier_backoff")]
    pub backoff_base: Duration,

    #[serde(with = "humantime_serde", default = "default_backoff_cap")]
    pub backoff_cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_applier_retries(),
            backoff_base: default_applier_backoff(),
            backoff_cap: default_backoff_cap(),
        }
    }
}

impl RetryPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_base.is_zero() {
            return Err(invalid("spec.applier.backoff_base", "must be positive"));
        }
        if self.backoff_cap < self.backoff_base {
            return Err(invalid(
                "spec.applier.backoff_cap",
                "must be at least backoff_base",
            ));
        }
        Ok(())
    }
}

/// Fetch fan-out and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchPolicy {
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    #[serde(with = "humantime_serde", default = "default_fetch_backoff")]
    pub backoff_base: Duration,

    #[serde(with = "humantime_serde", default = "default_backoff_cap")]
    pub backoff_cap: Duration,

    /// Bounded worker pool for per-entity platform calls within a tick.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_fetch_retries(),
            backoff_base: default_fetch_backoff(),
            backoff_cap: default_backoff_cap(),
            concurrency: default_concurrency(),
        }
    }
}

impl FetchPolicy {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(invalid("spec.fetcher.concurrency", "must be positive"));
        }
        if self.backoff_base.is_zero() {
            return Err(invalid("spec.fetcher.backoff_base", "must be positive"));
        }
        Ok(())
    }
}

/// Advertising platform gateway settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformConfig {
    /// Base URL of the ads reporting/mutation gateway.
    pub endpoint: String,

    /// Account the managed entities belong to.
    pub customer_id: String,

    /// Environment variable holding the API token.
    #[serde(default = "default_token_env")]
    pub api_token_env: String,

    /// Outbound request budget toward the platform.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,
}

impl PlatformConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.is_empty() {
            return Err(invalid("spec.platform.endpoint", "must not be empty"));
        }
        if self.customer_id.is_empty() {
            return Err(invalid("spec.platform.customer_id", "must not be empty"));
        }
        if self.requests_per_minute == 0 {
            return Err(invalid(
                "spec.platform.requests_per_minute",
                "must be positive",
            ));
        }
        Ok(())
    }
}

/// Storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Ephemeral, for development and testing.
    Memory,
    /// Production persistence.
    Postgres { url: String },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            StorageConfig::Memory => Ok(()),
            StorageConfig::Postgres { url } if url.is_empty() => {
                Err(invalid("spec.storage.url", "must not be empty"))
            }
            StorageConfig::Postgres { .. } => Ok(()),
        }
    }
}

/// HTTP API bind address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_tick_interval() -> Duration {
    Duration::from_secs(15 * 60)
}

fn default_hysteresis_ticks() -> u32 {
    2
}

fn default_min_clicks() -> u64 {
    10
}

fn default_history_window() -> Duration {
    Duration::from_secs(24 * 3600)
}

fn default_history_ticks() -> usize {
    96
}

fn default_absolute_loss_limit() -> i64 {
    300_000_000
}

fn default_loss_rate_limit() -> i64 {
    60_000_000
}

fn default_breakeven_cost() -> i64 {
    45_000_000
}

fn default_max_cost() -> i64 {
    60_000_000
}

fn default_repace_ratio() -> f64 {
    1.5
}

fn default_applier_retries() -> u32 {
    3
}

fn default_applier_backoff() -> Duration {
    Duration::from_millis(500)
}

fn default_fetch_retries() -> u32 {
    2
}

fn default_fetch_backoff() -> Duration {
    Duration::from_millis(250)
}

fn default_backoff_cap() -> Duration {
    Duration::from_secs(30)
}

fn default_concurrency() -> usize {
    8
}

fn default_token_env() -> String {
    "GUARDIAN_PLATFORM_TOKEN".to_string()
}

fn default_requests_per_minute() -> u32 {
    60
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8700
}
