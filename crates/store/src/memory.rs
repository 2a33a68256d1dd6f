//! In-process [`DocumentStore`].

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::document::{ChildDocument, Document, DocumentSnapshot, DocumentStore, StoreFuture, Watch};
use crate::error::StoreError;
use crate::subscription::Subscription;

type DocKey = (String, String);
type ChildKey = (String, String, String);

struct Watcher<T> {
    id: u64,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<T>,
}

impl<T: Clone> Watcher<T> {
    fn deliver(&self, item: &T) -> bool {
        !self.token.is_cancelled() && self.tx.send(item.clone()).is_ok()
    }
}

#[derive(Default)]
struct StoreInner {
    docs: HashMap<String, BTreeMap<String, Document>>,
    children: HashMap<ChildKey, Vec<ChildDocument>>,
    doc_watchers: HashMap<DocKey, Vec<Watcher<DocumentSnapshot>>>,
    child_watchers: HashMap<ChildKey, Vec<Watcher<ChildDocument>>>,
    next_watcher: u64,
    unavailable: bool,
}

impl StoreInner {
    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable {
            Err(StoreError::Unavailable("store is offline".into()))
        } else {
            Ok(())
        }
    }

    fn notify_doc(&mut self, collection: &str, id: &str) {
        let key = (collection.to_string(), id.to_string());
        let Some(watchers) = self.doc_watchers.get_mut(&key) else {
            return;
        };
        let snapshot = DocumentSnapshot {
            id: id.to_string(),
            data: self.docs.get(collection).and_then(|c| c.get(id)).cloned(),
        };
        watchers.retain(|w| w.deliver(&snapshot));
    }

    fn notify_child(&mut self, key: &ChildKey, child: &ChildDocument) {
        if let Some(watchers) = self.child_watchers.get_mut(key) {
            watchers.retain(|w| w.deliver(child));
        }
    }

    fn next_id(&mut self) -> u64 {
        self.next_watcher += 1;
        self.next_watcher
    }
}

/// Document store held entirely in memory.
///
/// Clones share the same data, so one instance can be handed to every
/// participant of a demo or test.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<StoreInner>>,
    latency: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delays every read and write by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Toggles simulated unavailability. While offline every call fails
    /// with [`StoreError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.lock().unavailable = !available;
    }

    /// Number of live document and child watchers.
    pub fn watcher_count(&self) -> usize {
        let inner = self.lock();
        let docs: usize = inner
            .doc_watchers
            .values()
            .map(|w| w.iter().filter(|w| !w.token.is_cancelled()).count())
            .sum();
        let children: usize = inner
            .child_watchers
            .values()
            .map(|w| w.iter().filter(|w| !w.token.is_cancelled()).count())
            .sum();
        docs + children
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn delay(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Removes the watcher when its token fires so the receiver ends.
    fn reap_on_cancel(&self, token: CancellationToken, remove: impl FnOnce(&mut StoreInner) + Send + 'static) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            // Without a runtime, cancelled watchers are pruned on the next change.
            return;
        };
        let inner = Arc::clone(&self.inner);
        handle.spawn(async move {
            token.cancelled().await;
            let mut guard = inner.lock().unwrap_or_else(PoisonError::into_inner);
            remove(&mut guard);
        });
    }
}

impl DocumentStore for MemoryStore {
    fn create(&self, collection: &str, fields: Document) -> StoreFuture<'_, String> {
        let collection = collection.to_string();
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.lock();
            inner.check_available()?;
            let id = uuid::Uuid::new_v4().simple().to_string();
            inner
                .docs
                .entry(collection.clone())
                .or_default()
                .insert(id.clone(), fields);
            debug!(%collection, %id, "document created");
            inner.notify_doc(&collection, &id);
            Ok(id)
        })
    }

    fn get(&self, collection: &str, id: &str) -> StoreFuture<'_, Option<Document>> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.delay().await;
            let inner = self.lock();
            inner.check_available()?;
            Ok(inner.docs.get(&collection).and_then(|c| c.get(&id)).cloned())
        })
    }

    fn list(
        &self,
        collection: &str,
        filter: Option<(&str, Value)>,
    ) -> StoreFuture<'_, Vec<(String, Document)>> {
        let collection = collection.to_string();
        let filter = filter.map(|(field, value)| (field.to_string(), value));
        Box::pin(async move {
            self.delay().await;
            let inner = self.lock();
            inner.check_available()?;
            let Some(docs) = inner.docs.get(&collection) else {
                return Ok(Vec::new());
            };
            Ok(docs
                .iter()
                .filter(|(_, doc)| match &filter {
                    Some((field, value)) => doc.get(field) == Some(value),
                    None => true,
                })
                .map(|(id, doc)| (id.clone(), doc.clone()))
                .collect())
        })
    }

    fn update(&self, collection: &str, id: &str, fields: Document) -> StoreFuture<'_, ()> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.lock();
            inner.check_available()?;
            let doc = inner
                .docs
                .get_mut(&collection)
                .and_then(|c| c.get_mut(&id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
            for (field, value) in fields {
                if value.is_null() {
                    doc.remove(&field);
                } else {
                    doc.insert(field, value);
                }
            }
            trace!(%collection, %id, "document updated");
            inner.notify_doc(&collection, &id);
            Ok(())
        })
    }

    fn delete(&self, collection: &str, id: &str) -> StoreFuture<'_, ()> {
        let collection = collection.to_string();
        let id = id.to_string();
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.lock();
            inner.check_available()?;
            let removed = inner
                .docs
                .get_mut(&collection)
                .and_then(|c| c.remove(&id))
                .is_some();
            if !removed {
                return Err(StoreError::NotFound { collection, id });
            }
            inner
                .children
                .retain(|(c, parent, _), _| !(c == &collection && parent == &id));
            debug!(%collection, %id, "document deleted");
            inner.notify_doc(&collection, &id);
            Ok(())
        })
    }

    fn subscribe(&self, collection: &str, id: &str) -> Result<Watch<DocumentSnapshot>, StoreError> {
        let key = (collection.to_string(), id.to_string());
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let watcher_id = {
            let mut inner = self.lock();
            inner.check_available()?;
            let snapshot = DocumentSnapshot {
                id: id.to_string(),
                data: inner.docs.get(collection).and_then(|c| c.get(id)).cloned(),
            };
            let _ = tx.send(snapshot);
            let watcher_id = inner.next_id();
            inner.doc_watchers.entry(key.clone()).or_default().push(Watcher {
                id: watcher_id,
                token: token.clone(),
                tx,
            });
            watcher_id
        };

        self.reap_on_cancel(token.clone(), move |inner| {
            if let Some(watchers) = inner.doc_watchers.get_mut(&key) {
                watchers.retain(|w| w.id != watcher_id);
                if watchers.is_empty() {
                    inner.doc_watchers.remove(&key);
                }
            }
        });

        Ok(Watch {
            updates: rx,
            subscription: Subscription::new(format!("{collection}/{id}"), token),
        })
    }

    fn append_child(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
        fields: Document,
    ) -> StoreFuture<'_, String> {
        let key = (
            collection.to_string(),
            parent_id.to_string(),
            subcollection.to_string(),
        );
        Box::pin(async move {
            self.delay().await;
            let mut inner = self.lock();
            inner.check_available()?;
            let parent_exists = inner
                .docs
                .get(&key.0)
                .is_some_and(|c| c.contains_key(&key.1));
            if !parent_exists {
                return Err(StoreError::NotFound {
                    collection: key.0,
                    id: key.1,
                });
            }
            let child = ChildDocument {
                id: uuid::Uuid::new_v4().simple().to_string(),
                data: fields,
            };
            inner.children.entry(key.clone()).or_default().push(child.clone());
            trace!(collection = %key.0, parent = %key.1, sub = %key.2, id = %child.id, "child appended");
            inner.notify_child(&key, &child);
            Ok(child.id)
        })
    }

    fn subscribe_children(
        &self,
        collection: &str,
        parent_id: &str,
        subcollection: &str,
    ) -> Result<Watch<ChildDocument>, StoreError> {
        let key = (
            collection.to_string(),
            parent_id.to_string(),
            subcollection.to_string(),
        );
        let (tx, rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();

        let watcher_id = {
            let mut inner = self.lock();
            inner.check_available()?;
            for child in inner.children.get(&key).into_iter().flatten() {
                let _ = tx.send(child.clone());
            }
            let watcher_id = inner.next_id();
            inner
                .child_watchers
                .entry(key.clone())
                .or_default()
                .push(Watcher {
                    id: watcher_id,
                    token: token.clone(),
                    tx,
                });
            watcher_id
        };

        let label = format!("{collection}/{parent_id}/{subcollection}");
        self.reap_on_cancel(token.clone(), move |inner| {
            if let Some(watchers) = inner.child_watchers.get_mut(&key) {
                watchers.retain(|w| w.id != watcher_id);
                if watchers.is_empty() {
                    inner.child_watchers.remove(&key);
                }
            }
        });

        Ok(Watch {
            updates: rx,
            subscription: Subscription::new(label, token),
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::to_document;

    fn fields(value: Value) -> Document {
        to_document(&value).unwrap()
    }

    #[tokio::test]
    async fn create_get_update() {
        let store = MemoryStore::new();
        let id = store
            .create("jobs", fields(json!({"status": "pending", "cost": 2})))
            .await
            .unwrap();

        store
            .update("jobs", &id, fields(json!({"status": "connecting", "cost": null})))
            .await
            .unwrap();

        let doc = store.get("jobs", &id).await.unwrap().unwrap();
        assert_eq!(doc["status"], "connecting");
        assert!(!doc.contains_key("cost"));
    }

    #[tokio::test]
    async fn update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("jobs", "nope", fields(json!({"status": "paid"})))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
        assert!(store.get("jobs", "nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_with_filter() {
        let store = MemoryStore::new();
        store.create("jobs", fields(json!({"merchantId": "m1"}))).await.unwrap();
        store.create("jobs", fields(json!({"merchantId": "m2"}))).await.unwrap();
        store.create("jobs", fields(json!({"merchantId": "m1"}))).await.unwrap();

        let all = store.list("jobs", None).await.unwrap();
        assert_eq!(all.len(), 3);
        let m1 = store
            .list("jobs", Some(("merchantId", json!("m1"))))
            .await
            .unwrap();
        assert_eq!(m1.len(), 2);
        assert!(store.list("other", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_sees_initial_and_changes() {
        let store = MemoryStore::new();
        let id = store.create("jobs", fields(json!({"status": "pending"}))).await.unwrap();

        let mut watch = store.subscribe("jobs", &id).unwrap();
        let first = watch.updates.recv().await.unwrap();
        assert_eq!(first.data.unwrap()["status"], "pending");

        store
            .update("jobs", &id, fields(json!({"status": "connecting"})))
            .await
            .unwrap();
        let second = watch.updates.recv().await.unwrap();
        assert_eq!(second.data.unwrap()["status"], "connecting");

        store.delete("jobs", &id).await.unwrap();
        let third = watch.updates.recv().await.unwrap();
        assert!(!third.exists());
    }

    #[tokio::test]
    async fn unsubscribe_ends_stream() {
        let store = MemoryStore::new();
        let id = store.create("jobs", Document::new()).await.unwrap();
        let mut watch = store.subscribe("jobs", &id).unwrap();
        watch.updates.recv().await.unwrap();

        watch.subscription.unsubscribe();
        assert!(watch.updates.recv().await.is_none());
        assert_eq!(store.watcher_count(), 0);

        // Later writes are not delivered anywhere.
        store.update("jobs", &id, fields(json!({"a": 1}))).await.unwrap();
    }

    #[tokio::test]
    async fn children_replay_then_stream() {
        let store = MemoryStore::new();
        let id = store.create("jobs", Document::new()).await.unwrap();
        store
            .append_child("jobs", &id, "offerCandidates", fields(json!({"n": 1})))
            .await
            .unwrap();

        let mut watch = store.subscribe_children("jobs", &id, "offerCandidates").unwrap();
        assert_eq!(watch.updates.recv().await.unwrap().data["n"], 1);

        store
            .append_child("jobs", &id, "offerCandidates", fields(json!({"n": 2})))
            .await
            .unwrap();
        assert_eq!(watch.updates.recv().await.unwrap().data["n"], 2);

        // Other sub-collections stay separate.
        store
            .append_child("jobs", &id, "answerCandidates", fields(json!({"n": 3})))
            .await
            .unwrap();
        assert!(watch.updates.try_recv().is_err());
    }

    #[tokio::test]
    async fn delete_drops_children() {
        let store = MemoryStore::new();
        let id = store.create("jobs", Document::new()).await.unwrap();
        store
            .append_child("jobs", &id, "offerCandidates", Document::new())
            .await
            .unwrap();
        store.delete("jobs", &id).await.unwrap();

        let mut watch = store.subscribe_children("jobs", &id, "offerCandidates").unwrap();
        assert!(watch.updates.try_recv().is_err());
        assert!(matches!(
            store.append_child("jobs", &id, "offerCandidates", Document::new()).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn offline_store_fails() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(
            store.create("jobs", Document::new()).await,
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.subscribe("jobs", "x").is_err());
        store.set_available(true);
        assert!(store.create("jobs", Document::new()).await.is_ok());
    }
}
