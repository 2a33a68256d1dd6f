//! Storage seams used by printlink.
//!
//! [`DocumentStore`] models the shared, eventually consistent job store
//! that doubles as the signaling side-channel: field-scoped updates,
//! change subscriptions and append-only sub-collections.
//! [`ObjectStore`] models durable blob staging. Both ship with in-memory
//! implementations used by tests and the demo binary.

pub mod document;
pub mod error;
pub mod memory;
pub mod object;
pub mod subscription;

pub use document::{
    ChildDocument, Document, DocumentSnapshot, DocumentStore, StoreFuture, Watch, to_document,
};
pub use error::StoreError;
pub use memory::MemoryStore;
pub use object::{MemoryObjectStore, ObjectRef, ObjectStore};
pub use subscription::Subscription;
