//! Client configuration.
//!
//! Configuration is loaded once at startup from a JSON file and shared
//! read-only by every subsystem. It names the services the client may
//! reach, binds each to a server-side app, and selects the discovery
//! mechanism that yields the announcing hosts for that service.

use crate::protocol::error::{CourierError, Result};
use crate::protocol::message::MessagePolicy;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Default destination port of announcing hosts.
pub const DEFAULT_CONTROL_PORT: u16 = 5000;

/// Default seconds of announce silence before an endpoint is marked dead.
pub const DEFAULT_ENDPOINT_TIMEOUT: f64 = 2.0;

/// Discovery mechanism for one service's host list.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discovery {
    /// Local file of `tcp://host:port` lines; `#` comments ignored
    File { path: PathBuf },
    /// HTTP endpoint returning the same line format
    Http { url: String },
}

/// Static binding of one logical service to a server-side app.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Logical service name used in message paths
    pub name: String,
    /// Server-side application announced by hosts
    pub app: String,
    /// Where the service's host list comes from
    pub discovery: Discovery,
    /// Per-service policy defaults; the global defaults apply when absent
    #[serde(default)]
    pub policy_defaults: Option<MessagePolicy>,
}

/// Whether in-flight messages are mirrored to persistent storage.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageCacheKind {
    #[default]
    RamOnly,
    Persistent,
}

/// Persistent blob store settings.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub path: PathBuf,
    #[serde(default = "default_blob_size")]
    pub blob_size: u64,
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,
    #[serde(default = "default_defrag_timeout")]
    pub defrag_timeout: u64,
    #[serde(default = "default_thread_pool")]
    pub thread_pool: usize,
}

fn default_blob_size() -> u64 {
    2 * 1024 * 1024 * 1024
}

fn default_sync_interval() -> u64 {
    2
}

fn default_defrag_timeout() -> u64 {
    9_999_999
}

fn default_thread_pool() -> usize {
    16
}

fn default_control_port() -> u16 {
    DEFAULT_CONTROL_PORT
}

fn default_endpoint_timeout() -> f64 {
    DEFAULT_ENDPOINT_TIMEOUT
}

/// Top-level client configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CourierConfig {
    pub services: Vec<ServiceConfig>,
    /// Default destination port for announcers lacking an explicit one
    #[serde(default = "default_control_port")]
    pub control_port: u16,
    /// Seconds of announce silence before an endpoint is marked dead
    #[serde(default = "default_endpoint_timeout")]
    pub endpoint_timeout: f64,
    #[serde(default)]
    pub message_cache_type: MessageCacheKind,
    #[serde(default)]
    pub persistent_storage: Option<StorageConfig>,
    /// Process-wide policy defaults
    #[serde(default)]
    pub policy_defaults: MessagePolicy,
}

impl CourierConfig {
    /// Loads and validates a configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: CourierConfig = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks internal consistency: non-empty, unique service names and
    /// non-empty app bindings; storage settings present when the cache is
    /// persistent.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for service in &self.services {
            if service.name.is_empty() {
                return Err(CourierError::InvalidConfig(
                    "service with empty name".to_string(),
                ));
            }
            if service.app.is_empty() {
                return Err(CourierError::InvalidConfig(format!(
                    "service '{}' has an empty app binding",
                    service.name
                )));
            }
            if !seen.insert(service.name.clone()) {
                return Err(CourierError::InvalidConfig(format!(
                    "duplicate service '{}'",
                    service.name
                )));
            }
        }

        if self.message_cache_type == MessageCacheKind::Persistent
            && self.persistent_storage.is_none()
        {
            return Err(CourierError::InvalidConfig(
                "persistent message cache requires a persistent_storage section".to_string(),
            ));
        }

        Ok(())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Policy defaults for one service: the service-level override when
    /// present, the global defaults otherwise.
    pub fn policy_for(&self, service: &str) -> MessagePolicy {
        self.service(service)
            .and_then(|s| s.policy_defaults)
            .unwrap_or(self.policy_defaults)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn minimal_config(services: Vec<ServiceConfig>) -> CourierConfig {
        CourierConfig {
            services,
            control_port: DEFAULT_CONTROL_PORT,
            endpoint_timeout: DEFAULT_ENDPOINT_TIMEOUT,
            message_cache_type: MessageCacheKind::RamOnly,
            persistent_storage: None,
            policy_defaults: MessagePolicy::default(),
        }
    }

    fn file_service(name: &str, app: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            app: app.to_string(),
            discovery: Discovery::File {
                path: PathBuf::from("/tmp/hosts"),
            },
            policy_defaults: None,
        }
    }

    #[test]
    fn test_defaults() {
        let config = minimal_config(vec![]);
        assert_eq!(config.control_port, 5000);
        assert_eq!(config.endpoint_timeout, 2.0);
        assert_eq!(config.message_cache_type, MessageCacheKind::RamOnly);
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let config = minimal_config(vec![file_service("", "app")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_app() {
        let config = minimal_config(vec![file_service("svc", "")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_duplicates() {
        let config = minimal_config(vec![file_service("svc", "a"), file_service("svc", "b")]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_storage_for_persistent_cache() {
        let mut config = minimal_config(vec![file_service("svc", "app")]);
        config.message_cache_type = MessageCacheKind::Persistent;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_for_prefers_service_override() {
        let mut service = file_service("svc", "app");
        service.policy_defaults = Some(MessagePolicy::default().with_deadline(5.0));
        let config = minimal_config(vec![service]);

        assert_eq!(config.policy_for("svc").deadline, 5.0);
        assert_eq!(config.policy_for("other").deadline, 0.0);
    }

    #[test]
    fn test_from_file_parses_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{
                "services": [
                    {{
                        "name": "echo",
                        "app": "echo-app",
                        "discovery": {{"kind": "file", "path": "/etc/courier/echo.hosts"}}
                    }},
                    {{
                        "name": "search",
                        "app": "search-app",
                        "discovery": {{"kind": "http", "url": "http://discovery.local/hosts"}},
                        "policy_defaults": {{"deadline": 3.0, "max_retries": 2}}
                    }}
                ],
                "endpoint_timeout": 4.5
            }}"#
        )
        .unwrap();

        let config = CourierConfig::from_file(file.path()).unwrap();
        assert_eq!(config.services.len(), 2);
        assert_eq!(config.control_port, 5000);
        assert_eq!(config.endpoint_timeout, 4.5);
        assert_eq!(
            config.service("search").unwrap().discovery,
            Discovery::Http {
                url: "http://discovery.local/hosts".to_string()
            }
        );
        let policy = config.policy_for("search");
        assert_eq!(policy.deadline, 3.0);
        assert_eq!(policy.max_retries, 2);
        // unspecified fields take the policy defaults
        assert_eq!(policy.ack_timeout, 0.05);
    }
}
