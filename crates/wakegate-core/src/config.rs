//! wakegate.toml configuration parser.
//!
//! Every section and field is optional; missing values fall back to the
//! defaults below. Durations are kept as strings (`"2s"`, `"15m"`) and
//! parsed on access so the file round-trips unchanged.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::KeyLayout;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for {field}: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WakegateConfig {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub orchestrator: OrchestratorConfig,
    pub wake: WakeSettings,
    pub gateway: GatewayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Default-backend listener the reverse proxy forwards to.
    pub listen: SocketAddr,
    /// Admin API and metrics. Never reachable through the proxy.
    pub admin_listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            admin_listen: SocketAddr::from(([127, 0, 0, 1], 9090)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    Redis,
    Embedded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Redis connection URL.
    pub url: String,
    pub pool_size: usize,
    /// redb file for the embedded backend. `None` keeps state in memory.
    pub path: Option<PathBuf>,
    pub key_prefix: String,
    pub wake_topic: String,
    /// Upper bound on one store command, including the pool wait.
    pub op_timeout: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        let layout = KeyLayout::default();
        Self {
            backend: StoreBackend::Redis,
            url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: 8,
            path: None,
            key_prefix: layout.prefix,
            wake_topic: layout.wake_topic,
            op_timeout: "5s".to_string(),
        }
    }
}

impl StoreConfig {
    pub fn layout(&self) -> KeyLayout {
        KeyLayout {
            prefix: self.key_prefix.clone(),
            wake_topic: self.wake_topic.clone(),
        }
    }

    pub fn op_timeout(&self) -> ConfigResult<Duration> {
        duration_field("store.op_timeout", &self.op_timeout)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorKind {
    Kubernetes,
    /// Records calls without touching a cluster.
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub kind: OrchestratorKind,
    /// Plain-HTTP API base, e.g. a `kubectl proxy` sidecar.
    pub api_url: String,
    pub token_file: Option<PathBuf>,
    /// Scalable resource plural under `apps/v1`.
    pub resource: String,
    /// Replica count restored on wake.
    pub running_replicas: u32,
    pub request_timeout: String,
    /// Scale-ups the scaler runs at once, across distinct workloads.
    pub max_concurrent: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            kind: OrchestratorKind::Kubernetes,
            api_url: "http://127.0.0.1:8001".to_string(),
            token_file: None,
            resource: "deployments".to_string(),
            running_replicas: 1,
            request_timeout: "10s".to_string(),
            max_concurrent: 16,
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> ConfigResult<Duration> {
        duration_field("orchestrator.request_timeout", &self.request_timeout)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WakeSettings {
    pub poll_interval: String,
    pub ceiling_timeout: String,
    /// Delay before reporting a workload that was already awake.
    pub settle_delay: String,
    /// Treat workloads with no lifecycle record as possibly asleep.
    pub wake_unrecorded: bool,
}

impl Default for WakeSettings {
    fn default() -> Self {
        Self {
            poll_interval: "2s".to_string(),
            ceiling_timeout: "15m".to_string(),
            settle_delay: "0s".to_string(),
            wake_unrecorded: false,
        }
    }
}

impl WakeSettings {
    pub fn poll_interval(&self) -> ConfigResult<Duration> {
        duration_field("wake.poll_interval", &self.poll_interval)
    }

    pub fn ceiling_timeout(&self) -> ConfigResult<Duration> {
        duration_field("wake.ceiling_timeout", &self.ceiling_timeout)
    }

    pub fn settle_delay(&self) -> ConfigResult<Duration> {
        duration_field("wake.settle_delay", &self.settle_delay)
    }
}

/// Which fallback header names the workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadHeader {
    /// `X-Ingress-Name`
    Ingress,
    /// `X-Service-Name`
    Service,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub workload_header: WorkloadHeader,
    /// Response format when the proxy sends no `X-Format`.
    pub default_format: String,
    /// Log every fallback header at debug level.
    pub debug_headers: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            workload_header: WorkloadHeader::Ingress,
            default_format: "text/html".to_string(),
            debug_headers: false,
        }
    }
}

impl WakegateConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let config: WakegateConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject settings the wake protocol cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        let poll = self.wake.poll_interval()?;
        let ceiling = self.wake.ceiling_timeout()?;
        self.wake.settle_delay()?;
        self.orchestrator.request_timeout()?;
        if self.store.op_timeout()?.is_zero() {
            return Err(ConfigError::Invalid("store.op_timeout must be > 0".into()));
        }

        if poll.is_zero() {
            return Err(ConfigError::Invalid("wake.poll_interval must be > 0".into()));
        }
        if ceiling < poll {
            return Err(ConfigError::Invalid(format!(
                "wake.ceiling_timeout ({}) is shorter than wake.poll_interval ({})",
                self.wake.ceiling_timeout, self.wake.poll_interval
            )));
        }
        if self.orchestrator.running_replicas == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.running_replicas must be > 0".into(),
            ));
        }
        if self.orchestrator.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "orchestrator.max_concurrent must be > 0".into(),
            ));
        }
        if self.server.listen == self.server.admin_listen {
            return Err(ConfigError::Invalid(
                "server.admin_listen must differ from server.listen".into(),
            ));
        }
        if self.store.key_prefix.is_empty() || self.store.wake_topic.is_empty() {
            return Err(ConfigError::Invalid(
                "store.key_prefix and store.wake_topic must not be empty".into(),
            ));
        }
        Ok(())
    }
}

fn duration_field(field: &'static str, value: &str) -> ConfigResult<Duration> {
    parse_duration(value).ok_or_else(|| ConfigError::Duration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "500ms", "2s", "15m", "1h", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        hours.trim().parse::<u64>().ok().map(|h| Duration::from_secs(h * 3600))
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_timings() {
        let config = WakegateConfig::default();
        assert_eq!(config.wake.poll_interval().unwrap(), Duration::from_secs(2));
        assert_eq!(config.wake.ceiling_timeout().unwrap(), Duration::from_secs(900));
        assert_eq!(config.wake.settle_delay().unwrap(), Duration::ZERO);
        assert!(!config.wake.wake_unrecorded);
        assert_eq!(config.store.layout(), KeyLayout::default());
        config.validate().unwrap();
    }

    #[test]
    fn parse_empty_file_uses_defaults() {
        let config = WakegateConfig::from_toml_str("").unwrap();
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.orchestrator.running_replicas, 1);
        assert_eq!(config.gateway.workload_header, WorkloadHeader::Ingress);
    }

    #[test]
    fn parse_partial_sections() {
        let toml_str = r#"
[store]
backend = "embedded"
key_prefix = "wg"

[wake]
poll_interval = "500ms"
ceiling_timeout = "1m"
wake_unrecorded = true

[gateway]
workload_header = "service"
"#;
        let config = WakegateConfig::from_toml_str(toml_str).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Embedded);
        assert_eq!(config.store.key_prefix, "wg");
        assert_eq!(config.store.wake_topic, "wakeup");
        assert_eq!(config.wake.poll_interval().unwrap(), Duration::from_millis(500));
        assert!(config.wake.wake_unrecorded);
        assert_eq!(config.gateway.workload_header, WorkloadHeader::Service);
    }

    #[test]
    fn rejects_ceiling_shorter_than_poll() {
        let toml_str = r#"
[wake]
poll_interval = "10s"
ceiling_timeout = "5s"
"#;
        let err = WakegateConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_bad_duration() {
        let toml_str = r#"
[wake]
poll_interval = "soon"
"#;
        let err = WakegateConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Duration { field: "wake.poll_interval", .. }));
    }

    #[test]
    fn rejects_zero_replicas() {
        let toml_str = r#"
[orchestrator]
running_replicas = 0
"#;
        assert!(WakegateConfig::from_toml_str(toml_str).is_err());
    }

    #[test]
    fn admin_listener_defaults_to_loopback() {
        let config = WakegateConfig::default();
        assert!(config.server.admin_listen.ip().is_loopback());
        assert_ne!(config.server.admin_listen, config.server.listen);
        assert_eq!(config.store.op_timeout().unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_shared_admin_listener() {
        let toml_str = r#"
[server]
listen = "0.0.0.0:8080"
admin_listen = "0.0.0.0:8080"
"#;
        let err = WakegateConfig::from_toml_str(toml_str).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn parse_duration_values() {
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7"), Some(Duration::from_secs(7)));
        assert_eq!(parse_duration("invalid"), None);
    }

    #[test]
    fn toml_round_trip() {
        let config = WakegateConfig::default();
        let text = config.to_toml_string().unwrap();
        let parsed = WakegateConfig::from_toml_str(&text).unwrap();
        assert_eq!(parsed.server.listen, config.server.listen);
        assert_eq!(parsed.orchestrator.api_url, config.orchestrator.api_url);
    }
}
