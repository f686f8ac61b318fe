//! On-disk cache backend.
//!
//! Entries are sharded into subdirectories by the first two hex characters
//! of the key's SHA-256 digest, under a directory versioned by
//! [`super::VERSION`]: `{root}/v{VERSION}/{shard}/{digest}.bin`.

use std::fs;
use std::path::{Path, PathBuf};

use super::{CacheEntry, CacheError, CacheKey, Storage, VERSION};

pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn versioned_root(&self) -> PathBuf {
        self.root.join(format!("v{VERSION}"))
    }

    fn file_path(&self, key: &CacheKey) -> PathBuf {
        let digest = key.digest();
        let shard = &digest[..2];
        self.versioned_root().join(shard).join(format!("{digest}.bin"))
    }

    /// Removes `dir` and any now-empty ancestor directories, stopping at
    /// the versioned root.
    fn remove_empty_directories(&self, dir: &Path) {
        let mut current = dir.to_path_buf();
        let stop_at = self.versioned_root();
        while current != stop_at && current.starts_with(&stop_at) {
            match fs::read_dir(&current) {
                Ok(mut entries) => {
                    if entries.next().is_none() {
                        if fs::remove_dir(&current).is_err() {
                            break;
                        }
                    } else {
                        break;
                    }
                }
                _ => break,
            }
            match current.parent() {
                Some(parent) => current = parent.to_path_buf(),
                None => break,
            }
        }
    }
}

impl Storage for DiskStorage {
    fn get(&self, key: &CacheKey, return_expired: bool) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.file_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(CacheError::Io(err.to_string())),
        };
        let entry: CacheEntry =
            bincode::deserialize(&bytes).map_err(|e| CacheError::Serialization(e.to_string()))?;

        if !return_expired && entry.is_expired() {
            let _ = fs::remove_file(&path);
            if let Some(parent) = path.parent() {
                self.remove_empty_directories(parent);
            }
            return Ok(None);
        }
        Ok(Some(entry))
    }

    fn store(&self, key: &CacheKey, entry: CacheEntry) -> Result<(), CacheError> {
        let path = self.file_path(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::Io(e.to_string()))?;
        }
        let bytes = bincode::serialize(&entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        fs::write(&path, bytes).map_err(|e| CacheError::Io(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn roundtrips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let key = CacheKey::new("widget:1");
        storage.store(&key, CacheEntry::new(b"payload".to_vec(), None)).unwrap();

        let entry = storage.get(&key, false).unwrap().unwrap();
        assert_eq!(entry.payload, b"payload");
    }

    #[test]
    fn expired_entries_are_pruned_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let storage = DiskStorage::new(dir.path());
        let key = CacheKey::new("widget:2");
        let mut entry = CacheEntry::new(b"payload".to_vec(), Some(Duration::from_secs(60)));
        entry.expires_at = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
        storage.store(&key, entry).unwrap();

        assert!(storage.get(&key, false).unwrap().is_none());
        assert!(!storage.file_path(&key).exists());
    }
}
