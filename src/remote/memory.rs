use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use anyhow::{anyhow, Result};

use super::BlobStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub body: Vec<u8>,
    pub expires: Option<SystemTime>,
}

/// In-process blob store for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    objects: Mutex<BTreeMap<(String, String), StoredBlob>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<(String, String), StoredBlob>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds an object with no expiry.
    pub fn insert(&self, bucket: &str, key: &str, body: Vec<u8>) {
        self.objects().insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob {
                body,
                expires: None,
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredBlob> {
        self.objects()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self) -> Vec<(String, String)> {
        self.objects().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.objects().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects().is_empty()
    }
}

impl BlobStore for MemoryBlobStore {
    fn get(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        self.object(bucket, key)
            .map(|blob| blob.body)
            .ok_or_else(|| anyhow!("NoSuchKey: {bucket}/{key}"))
    }

    fn put(&self, bucket: &str, key: &str, body: &[u8], expires: SystemTime) -> Result<()> {
        self.objects().insert(
            (bucket.to_string(), key.to_string()),
            StoredBlob {
                body: body.to_vec(),
                expires: Some(expires),
            },
        );
        Ok(())
    }
}
