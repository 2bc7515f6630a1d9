use std::fs;
use std::path::PathBuf;

use courier_common::Result;

use crate::{from_hex, to_hex, BlobStore};

/// Filesystem blob store: one directory per namespace, one file per key.
///
/// Keys are hex-encoded into file names, so arbitrary key bytes are safe.
/// Writes go through a temporary file and a rename so a crashed write never
/// leaves a torn blob behind.
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    /// Opens a store rooted at `root`, creating the directory when missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        // namespaces are service aliases from configuration; hex-encode to
        // keep path separators and dot-files out of the tree
        self.root.join(to_hex(namespace.as_bytes()))
    }

    fn blob_path(&self, namespace: &str, key: &[u8]) -> PathBuf {
        self.namespace_dir(namespace).join(to_hex(key))
    }
}

impl BlobStore for FsBlobStore {
    fn write(&self, namespace: &str, key: &[u8], value: &[u8]) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        fs::create_dir_all(&dir)?;

        let path = self.blob_path(namespace, key);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read(&self, namespace: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(namespace, key)) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn remove(&self, namespace: &str, key: &[u8]) -> Result<()> {
        match fs::remove_file(self.blob_path(namespace, key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn iterate(&self, namespace: &str, cb: &mut dyn FnMut(&[u8], &[u8])) -> Result<()> {
        let dir = self.namespace_dir(namespace);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(key) = from_hex(&name) else {
                // foreign file in the namespace directory
                continue;
            };
            let value = fs::read(entry.path())?;
            cb(&key, &value);
        }

        Ok(())
    }
}
