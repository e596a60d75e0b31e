//! The remote document store boundary.
//!
//! The mirror never talks to a database directly. Everything it needs from
//! the remote side goes through [`RemoteStore`]: single reads, merged
//! writes, and live watches that push full snapshots.
//!
//! [`MemoryRemote`] is a complete in-process implementation used by tests
//! and by hosts that want to run the mirror without a backend.

mod memory;

pub use memory::MemoryRemote;

use crate::error::Result;
use crate::types::{
    CollectionPath, CollectionSnapshot, DocumentPath, DocumentSnapshot, PartialUpdate,
};
use async_trait::async_trait;

/// One delivery on a live watch.
#[derive(Clone, Debug, PartialEq)]
pub enum WatchEvent<S> {
    /// A full, current snapshot.
    Snapshot(S),
    /// The stream failed after it was established. No more events follow.
    Error(String),
}

/// Callback for a single-document watch.
pub type DocumentListener = Box<dyn Fn(WatchEvent<DocumentSnapshot>) + Send + Sync>;

/// Callback for a collection watch.
pub type CollectionListener = Box<dyn Fn(WatchEvent<CollectionSnapshot>) + Send + Sync>;

/// A live watch. Dropping it stops delivery.
pub struct ListenerRegistration {
    id: u64,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl ListenerRegistration {
    pub fn new(id: u64, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            id,
            cancel: Some(Box::new(cancel)),
        }
    }

    /// A registration with nothing to cancel.
    pub fn detached(id: u64) -> Self {
        Self { id, cancel: None }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Stop the watch now. Cancellation runs in `Drop`.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ListenerRegistration {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for ListenerRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistration")
            .field("id", &self.id)
            .finish()
    }
}

/// Operations the mirror needs from the remote document database.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read one document.
    async fn get(&self, path: &DocumentPath) -> Result<DocumentSnapshot>;

    /// Read every document of a collection.
    async fn get_collection(&self, path: &CollectionPath) -> Result<CollectionSnapshot>;

    /// Merge `update` into the document, creating it if missing.
    async fn set(&self, path: &DocumentPath, update: &PartialUpdate) -> Result<()>;

    /// Watch one document. The current snapshot is delivered first.
    async fn subscribe_document(
        &self,
        path: &DocumentPath,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration>;

    /// Watch a collection. The current snapshot is delivered first.
    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        listener: CollectionListener,
    ) -> Result<ListenerRegistration>;
}
