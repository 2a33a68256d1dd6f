//! The shared document store seam.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::StoreError;
use crate::subscription::Subscription;

/// Field map of one stored document.
pub type Document = serde_json::Map<String, Value>;

/// A boxed future returned by store methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// State of a watched document after a change.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentSnapshot {
    pub id: String,
    /// `None` once the document has been deleted (or never existed).
    pub data: Option<Document>,
}

impl DocumentSnapshot {
    pub fn exists(&self) -> bool {
        self.data.is_some()
    }

    /// Deserializes the snapshot into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        match &self.data {
            Some(data) => Ok(Some(serde_json::from_value(Value::Object(data.clone()))?)),
            None => Ok(None),
        }
    }
}

/// An entry appended to a sub-collection.
#[derive(Debug, Clone, PartialEq)]
pub struct ChildDocument {
    pub id: String,
    pub data: Document,
}

impl ChildDocument {
    /// Deserializes the entry into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }
}

/// A change stream plus the handle that ends it.
///
/// `updates` yields `None` once the subscription has been released.
pub struct Watch<T> {
    pub updates: mpsc::UnboundedReceiver<T>,
    pub subscription: Subscription,
}

/// Shared, eventually consistent document store.
///
/// Writes are field-scoped: [`update`](Self::update) merges the given
/// fields and leaves the others untouched, so concurrent writers touching
/// different fields never conflict. A `null` value removes the field.
/// Subscribers receive the current state first, then every change, in
/// order and at least once.
pub trait DocumentStore: Send + Sync {
    /// Creates a document with a generated id and returns the id.
    fn create(&self, collection: &str, fields: Document) -> StoreFuture<'_, String>;

    /// Reads a document. `None` if it does not exist.
    fn get(&self, collection: &str, id: &str) -> StoreFuture<'_, Option<Document>>;

    /// Lists documents, optionally only those whose `field` equals `value`.
    fn list(
        &self,
        collection: &str,
        filter: Option<(&str, Value)>,
    ) -> StoreFuture<'_, Vec<(String, Document)>>;

    /// Merges `fields` into an existing document.
    fn update(&self, collection: &str, id: &str, fields: Document) -> StoreFuture<'_, ()>;

    /// Deletes a document together with its sub-collections.
    fn delete(&self, collection: &str, id: &str) -> StoreFuture<'_, ()>;

    /// Watches one document for changes.
    fn subscribe(&self, collection: &str, id: &str) -> Result<Watch<DocumentSnapshot>, StoreError>;

    /// Appends an entry to a sub-collection of `parent_id` and returns its id.
    fn append_child(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
        fields: Document,
    ) -> StoreFuture<'_, String>;

    /// Watches a sub-collection. Existing entries are delivered first.
    fn subscribe_children(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
    ) -> Result<Watch<ChildDocument>, StoreError>;
}

/// Serializes `value` into a document field map.
pub fn to_document<T: Serialize>(value: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::InvalidDocument(format!(
            "expected an object, got {other}"
        ))),
    }
}
