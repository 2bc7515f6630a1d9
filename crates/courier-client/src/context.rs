//! Process-wide shared context.
//!
//! Every subsystem needs read access to the same configuration and the
//! same blob store. Both are built exactly once at startup and threaded
//! into the subsystems by shared ownership; teardown happens when the last
//! holder drops.

use std::sync::Arc;

use courier_common::config::{CourierConfig, MessageCacheKind};
use courier_common::Result;
use courier_storage::{BlobStore, FsBlobStore};

pub struct Context {
    pub config: CourierConfig,
    /// Present iff the message cache is configured persistent
    pub storage: Option<Arc<dyn BlobStore>>,
}

impl Context {
    /// Validates the configuration and opens the blob store when the cache
    /// is persistent.
    pub fn new(config: CourierConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let storage = match (&config.message_cache_type, &config.persistent_storage) {
            (MessageCacheKind::Persistent, Some(storage_config)) => Some(Arc::new(
                FsBlobStore::open(&storage_config.path)?,
            ) as Arc<dyn BlobStore>),
            _ => None,
        };

        Ok(Arc::new(Self { config, storage }))
    }

    /// Context over an arbitrary store, bypassing validation. Test-only
    /// construction path.
    pub fn for_tests(config: CourierConfig) -> Arc<Self> {
        Arc::new(Self {
            config,
            storage: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_common::config::{Discovery, ServiceConfig, StorageConfig};
    use courier_common::MessagePolicy;

    fn config() -> CourierConfig {
        CourierConfig {
            services: vec![ServiceConfig {
                name: "echo".to_string(),
                app: "echo-app".to_string(),
                discovery: Discovery::File {
                    path: "/tmp/hosts".into(),
                },
                policy_defaults: None,
            }],
            control_port: 5000,
            endpoint_timeout: 2.0,
            message_cache_type: MessageCacheKind::RamOnly,
            persistent_storage: None,
            policy_defaults: MessagePolicy::default(),
        }
    }

    #[test]
    fn test_ram_only_has_no_storage() {
        let context = Context::new(config()).unwrap();
        assert!(context.storage.is_none());
    }

    #[test]
    fn test_persistent_opens_storage() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config();
        config.message_cache_type = MessageCacheKind::Persistent;
        config.persistent_storage = Some(StorageConfig {
            path: dir.path().to_path_buf(),
            blob_size: 1024,
            sync_interval: 2,
            defrag_timeout: 9_999_999,
            thread_pool: 4,
        });

        let context = Context::new(config).unwrap();
        assert!(context.storage.is_some());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = config();
        config.services.push(config.services[0].clone());
        assert!(Context::new(config).is_err());
    }
}
