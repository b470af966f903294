//! In-process profile and image stores.
//!
//! Used for ephemeral sessions and by tests. Both can be switched into a
//! failing mode to exercise partial-enrollment paths.

use crate::collab::{BlobStore, ProfileStore, StoreError};
use crate::types::{IdentityKey, ProfileRecord};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Default)]
pub struct MemoryProfileStore {
    records: Mutex<HashMap<IdentityKey, ProfileRecord>>,
    fail_writes: AtomicBool,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProfileStore for MemoryProfileStore {
    fn get(&self, key: &IdentityKey) -> Result<Option<ProfileRecord>, StoreError> {
        let records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("profile map poisoned".into()))?;
        Ok(records.get(key).cloned())
    }

    fn put(&self, key: &IdentityKey, record: &ProfileRecord) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("profile store rejecting writes".into()));
        }
        let mut records = self
            .records
            .lock()
            .map_err(|_| StoreError::Unavailable("profile map poisoned".into()))?;
        records.insert(key.clone(), record.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<IdentityKey, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlobStore for MemoryBlobStore {
    fn put(&self, key: &IdentityKey, bytes: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("blob store rejecting writes".into()));
        }
        let mut blobs = self
            .blobs
            .lock()
            .map_err(|_| StoreError::Unavailable("blob map poisoned".into()))?;
        blobs.insert(key.clone(), bytes.to_vec());
        Ok(())
    }

    fn get(&self, key: &IdentityKey) -> Result<Option<Vec<u8>>, StoreError> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| StoreError::Unavailable("blob map poisoned".into()))?;
        Ok(blobs.get(key).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_put_get() {
        let store = MemoryProfileStore::new();
        let key = IdentityKey::from("k");
        assert_eq!(store.get(&key).unwrap(), None);
        let rec = ProfileRecord { name: "Ana".into(), ..Default::default() };
        store.put(&key, &rec).unwrap();
        assert_eq!(store.get(&key).unwrap(), Some(rec));
    }

    #[test]
    fn test_failing_writes_leave_store_untouched() {
        let store = MemoryBlobStore::new();
        store.set_fail_writes(true);
        assert!(store.put(&"k".into(), b"jpeg").is_err());
        assert!(store.is_empty());
    }
}
