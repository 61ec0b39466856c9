//! Workload identity and the wire layout shared with the state store.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifies a scale-to-zero workload: `{namespace}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadKey {
    pub namespace: String,
    pub name: String,
}

impl WorkloadKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build a key from untrusted input, rejecting anything that is not a
    /// valid Kubernetes object name.
    pub fn parse(
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<Self, InvalidWorkloadKey> {
        let key = Self::new(namespace, name);
        key.validate()?;
        Ok(key)
    }

    /// Namespace must be a DNS-1123 label, name a DNS-1123 subdomain.
    pub fn validate(&self) -> Result<(), InvalidWorkloadKey> {
        if !is_dns_label(&self.namespace) {
            return Err(InvalidWorkloadKey {
                field: "namespace",
                value: self.namespace.clone(),
            });
        }
        if !is_dns_subdomain(&self.name) {
            return Err(InvalidWorkloadKey {
                field: "name",
                value: self.name.clone(),
            });
        }
        Ok(())
    }
}

/// A namespace or name that cannot identify a Kubernetes object.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid workload {field} {value:?}")]
pub struct InvalidWorkloadKey {
    pub field: &'static str,
    pub value: String,
}

fn is_dns_label(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty()
        && bytes.len() <= 63
        && bytes
            .iter()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-')
        && bytes[0].is_ascii_alphanumeric()
        && bytes[bytes.len() - 1].is_ascii_alphanumeric()
}

fn is_dns_subdomain(s: &str) -> bool {
    s.len() <= 253 && s.split('.').all(is_dns_label)
}

impl fmt::Display for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Errors decoding a wake event payload.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WakeEventError {
    #[error("malformed wake event payload: {0:?}")]
    Malformed(String),
}

/// A request to bring one workload back to its running replica count.
///
/// Carried over the store's publish/subscribe channel as
/// `{namespace}/{name}`. Delivery is at-most-once per publish and
/// duplicates are expected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WakeEvent {
    pub key: WorkloadKey,
}

impl WakeEvent {
    pub fn new(key: WorkloadKey) -> Self {
        Self { key }
    }

    /// Encode into the pub/sub payload.
    pub fn encode(&self) -> String {
        self.key.to_string()
    }

    /// Decode a pub/sub payload.
    pub fn decode(payload: &str) -> Result<Self, WakeEventError> {
        let (namespace, name) = payload
            .trim()
            .split_once('/')
            .ok_or_else(|| WakeEventError::Malformed(payload.to_string()))?;
        WorkloadKey::parse(namespace, name)
            .map(Self::new)
            .map_err(|_| WakeEventError::Malformed(payload.to_string()))
    }
}

/// Naming of lifecycle records and the wake topic inside the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyLayout {
    /// Record key prefix (`{prefix}:{namespace}:{name}`).
    pub prefix: String,
    /// Pub/sub topic for wake events.
    pub wake_topic: String,
}

impl Default for KeyLayout {
    fn default() -> Self {
        Self {
            prefix: "sleeping".to_string(),
            wake_topic: "wakeup".to_string(),
        }
    }
}

impl KeyLayout {
    /// Store key holding the lifecycle record of `key`.
    pub fn record_key(&self, key: &WorkloadKey) -> String {
        format!("{}:{}:{}", self.prefix, key.namespace, key.name)
    }
}
