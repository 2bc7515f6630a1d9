use std::collections::HashMap;
use std::sync::Mutex;

use courier_common::{CourierError, Result};

use crate::BlobStore;

/// In-memory blob store for tests and ram-only setups that still want the
/// storage interface exercised.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<(String, Vec<u8>), Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self, namespace: &str) -> usize {
        self.blobs
            .lock()
            .map(|blobs| blobs.keys().filter(|(ns, _)| ns == namespace).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self, namespace: &str) -> bool {
        self.len(namespace) == 0
    }
}

fn poisoned() -> CourierError {
    CourierError::Storage("blob store mutex poisoned".to_string())
}

impl BlobStore for MemoryBlobStore {
    fn write(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .map_err(|_| poisoned())?
            .insert((namespace.to_string(), key.to_vec()), value.to_vec());
        Ok(())
    }

    fn read(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self
            .blobs
            .lock()
            .map_err(|_| poisoned())?
            .get(&(namespace.to_string(), key.to_vec()))
            .cloned())
    }

    fn remove(&self, namespace: &str, key: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .map_err(|_| poisoned())?
            .remove(&(namespace.to_string(), key.to_vec()));
        Ok(())
    }

    fn iterate(&self, namespace: &str, cb: &mut dyn FnMut(&[u8], &[u8])) -> Result<()> {
        for ((ns, key), value) in self.blobs.lock().map_err(|_| poisoned())?.iter() {
            if ns == namespace {
                cb(key, value);
            }
        }
        Ok(())
    }
}
