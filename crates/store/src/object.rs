//! Durable blob staging.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::document::StoreFuture;
use crate::error::StoreError;

/// Location of a staged object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectRef {
    pub path: String,
}

impl ObjectRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Blob storage addressed by path.
pub trait ObjectStore: Send + Sync {
    fn upload(&self, bytes: Vec<u8>, path: &str) -> StoreFuture<'_, ObjectRef>;
    fn download(&self, object: &ObjectRef) -> StoreFuture<'_, Vec<u8>>;
    fn delete(&self, object: &ObjectRef) -> StoreFuture<'_, ()>;
}

/// Object store held in memory.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.lock().contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ObjectStore for MemoryObjectStore {
    fn upload(&self, bytes: Vec<u8>, path: &str) -> StoreFuture<'_, ObjectRef> {
        let path = path.to_string();
        Box::pin(async move {
            debug!(%path, size = bytes.len(), "object uploaded");
            self.lock().insert(path.clone(), bytes);
            Ok(ObjectRef { path })
        })
    }

    fn download(&self, object: &ObjectRef) -> StoreFuture<'_, Vec<u8>> {
        let path = object.path.clone();
        Box::pin(async move {
            self.lock()
                .get(&path)
                .cloned()
                .ok_or(StoreError::ObjectNotFound(path))
        })
    }

    fn delete(&self, object: &ObjectRef) -> StoreFuture<'_, ()> {
        let path = object.path.clone();
        Box::pin(async move {
            match self.lock().remove(&path) {
                Some(_) => Ok(()),
                None => Err(StoreError::ObjectNotFound(path)),
            }
        })
    }
}
