use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use super::types::Blob;

const URL_PREFIX: &str = "blob:audioshrink/";

/// In-memory registry of blobs addressable by revocable reference URLs
#[derive(Debug, Default)]
pub struct BlobStore {
    entries: Mutex<HashMap<String, Blob>>,
}

impl BlobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a blob and return a fresh URL for it
    pub fn create_object_url(&self, blob: Blob) -> String {
        let url = format!("{}{}", URL_PREFIX, Uuid::new_v4());
        self.lock().insert(url.clone(), blob);
        url
    }

    pub fn resolve(&self, url: &str) -> Option<Blob> {
        self.lock().get(url).cloned()
    }

    /// Drop the store's reference; returns whether the URL was live
    pub fn revoke(&self, url: &str) -> bool {
        self.lock().remove(url).is_some()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Blob>> {
        // A poisoned map is still structurally valid
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
