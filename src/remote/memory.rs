//! In-process remote store.

use super::{CollectionListener, DocumentListener, ListenerRegistration, RemoteStore, WatchEvent};
use crate::error::{MirrorError, Result};
use crate::types::{
    CollectionPath, CollectionSnapshot, Document, DocumentPath, DocumentSnapshot, PartialUpdate,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

type SharedDocumentListener = Arc<dyn Fn(WatchEvent<DocumentSnapshot>) + Send + Sync>;
type SharedCollectionListener = Arc<dyn Fn(WatchEvent<CollectionSnapshot>) + Send + Sync>;
type Delivery = Box<dyn FnOnce() + Send>;

enum Listener {
    Document(DocumentPath, SharedDocumentListener),
    Collection(CollectionPath, SharedCollectionListener),
}

impl Listener {
    /// Whether a write to `path` changes what this listener sees.
    fn affected_by(&self, path: &DocumentPath) -> bool {
        match self {
            Listener::Document(p, _) => p == path,
            Listener::Collection(p, _) => &path.parent() == p,
        }
    }

    fn is_under(&self, prefix: &str) -> bool {
        let target = match self {
            Listener::Document(p, _) => p.to_string(),
            Listener::Collection(p, _) => p.to_string(),
        };
        target == prefix || target.starts_with(&format!("{prefix}/"))
    }
}

#[derive(Default)]
struct Data {
    documents: BTreeMap<DocumentPath, Document>,
    listeners: HashMap<u64, Listener>,
    writes: Vec<(DocumentPath, PartialUpdate)>,
    /// Successful subscribes to allow before one fails, and the reason.
    fail_subscribe: Option<(u64, String)>,
    fail_writes: Option<String>,
    subscribes: u64,
}

impl Data {
    fn document_snapshot(&self, path: &DocumentPath) -> DocumentSnapshot {
        DocumentSnapshot {
            path: path.clone(),
            data: self.documents.get(path).cloned(),
        }
    }

    fn collection_snapshot(&self, path: &CollectionPath) -> CollectionSnapshot {
        let documents = self
            .documents
            .iter()
            .filter(|(doc_path, _)| &doc_path.parent() == path)
            .map(|(doc_path, data)| DocumentSnapshot {
                path: doc_path.clone(),
                data: Some(data.clone()),
            })
            .collect();
        CollectionSnapshot {
            path: path.clone(),
            documents,
        }
    }

    /// Build the delivery for one listener from the current data.
    fn delivery_for(&self, listener: &Listener) -> Delivery {
        let delivery: Delivery = match listener {
            Listener::Document(path, cb) => {
                let cb = Arc::clone(cb);
                let snapshot = self.document_snapshot(path);
                Box::new(move || cb(WatchEvent::Snapshot(snapshot)))
            }
            Listener::Collection(path, cb) => {
                let cb = Arc::clone(cb);
                let snapshot = self.collection_snapshot(path);
                Box::new(move || cb(WatchEvent::Snapshot(snapshot)))
            }
        };
        delivery
    }
}

struct Outbox {
    pending: VecDeque<Delivery>,
    draining: bool,
}

struct Inner {
    data: Mutex<Data>,
    outbox: Mutex<Outbox>,
    next_id: AtomicU64,
}

impl Inner {
    /// Queue deliveries. Callers hold the `data` lock while queueing, so
    /// listeners observe snapshots in write order even when a listener
    /// writes back into the store.
    fn enqueue(&self, deliveries: Vec<Delivery>) {
        let mut outbox = self.outbox.lock();
        outbox.pending.extend(deliveries);
    }

    /// Run queued deliveries unless another caller already is.
    fn drain(&self) {
        {
            let mut outbox = self.outbox.lock();
            if outbox.draining {
                return;
            }
            outbox.draining = true;
        }

        loop {
            let next = {
                let mut outbox = self.outbox.lock();
                match outbox.pending.pop_front() {
                    Some(d) => d,
                    None => {
                        outbox.draining = false;
                        return;
                    }
                }
            };
            next();
        }
    }
}

/// A remote store that lives in memory.
///
/// Writes merge field by field and push a full snapshot to every watch whose
/// document or collection they touch. Tests can inject failures.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                data: Mutex::new(Data::default()),
                outbox: Mutex::new(Outbox {
                    pending: VecDeque::new(),
                    draining: false,
                }),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Replace a document wholesale and notify watchers.
    pub fn put(&self, path: &DocumentPath, data: Document) {
        {
            let mut store = self.inner.data.lock();
            store.documents.insert(path.clone(), data);
            let deliveries = Self::deliveries_for_write(&store, path);
            self.inner.enqueue(deliveries);
        }
        self.inner.drain();
    }

    /// Delete a document and notify watchers.
    pub fn remove(&self, path: &DocumentPath) {
        {
            let mut store = self.inner.data.lock();
            store.documents.remove(path);
            let deliveries = Self::deliveries_for_write(&store, path);
            self.inner.enqueue(deliveries);
        }
        self.inner.drain();
    }

    /// Current body of a document.
    pub fn document(&self, path: &DocumentPath) -> Option<Document> {
        self.inner.data.lock().documents.get(path).cloned()
    }

    /// Every merged write received through [`RemoteStore::set`], in order.
    pub fn writes(&self) -> Vec<(DocumentPath, PartialUpdate)> {
        self.inner.data.lock().writes.clone()
    }

    /// Number of watches currently delivering.
    pub fn active_listeners(&self) -> usize {
        self.inner.data.lock().listeners.len()
    }

    /// Number of watches ever established.
    pub fn subscribe_count(&self) -> u64 {
        self.inner.data.lock().subscribes
    }

    /// Make the next subscribe call fail with `reason`.
    pub fn fail_next_subscribe(&self, reason: impl Into<String>) {
        self.fail_subscribe_after(0, reason);
    }

    /// Let `successes` subscribe calls through, then fail one with `reason`.
    pub fn fail_subscribe_after(&self, successes: u64, reason: impl Into<String>) {
        self.inner.data.lock().fail_subscribe = Some((successes, reason.into()));
    }

    /// Make every write fail with `reason` until cleared with `None`.
    pub fn fail_writes(&self, reason: Option<String>) {
        self.inner.data.lock().fail_writes = reason;
    }

    /// Terminate every watch on or below `prefix` with a stream error.
    pub fn break_watches(&self, prefix: &str, reason: &str) {
        {
            let mut store = self.inner.data.lock();
            let broken: Vec<u64> = store
                .listeners
                .iter()
                .filter(|(_, l)| l.is_under(prefix))
                .map(|(id, _)| *id)
                .collect();

            let mut deliveries: Vec<Delivery> = Vec::new();
            for id in broken {
                if let Some(listener) = store.listeners.remove(&id) {
                    let reason = reason.to_string();
                    let delivery: Delivery = match listener {
                        Listener::Document(_, cb) => Box::new(move || cb(WatchEvent::Error(reason))),
                        Listener::Collection(_, cb) => {
                            Box::new(move || cb(WatchEvent::Error(reason)))
                        }
                    };
                    deliveries.push(delivery);
                }
            }
            self.inner.enqueue(deliveries);
        }
        self.inner.drain();
    }

    fn deliveries_for_write(store: &Data, path: &DocumentPath) -> Vec<Delivery> {
        let mut affected: Vec<(&u64, &Listener)> = store
            .listeners
            .iter()
            .filter(|(_, l)| l.affected_by(path))
            .collect();
        // Registration order.
        affected.sort_by_key(|(id, _)| **id);
        affected
            .into_iter()
            .map(|(_, l)| store.delivery_for(l))
            .collect()
    }

    fn register(&self, listener: Listener) -> Result<ListenerRegistration> {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        {
            let mut store = self.inner.data.lock();
            match store.fail_subscribe.take() {
                Some((0, reason)) => return Err(MirrorError::Remote(reason)),
                Some((n, reason)) => store.fail_subscribe = Some((n - 1, reason)),
                None => {}
            }
            let initial = store.delivery_for(&listener);
            store.listeners.insert(id, listener);
            store.subscribes += 1;
            self.inner.enqueue(vec![initial]);
        }
        self.inner.drain();

        let inner = Arc::downgrade(&self.inner);
        Ok(ListenerRegistration::new(id, move || {
            if let Some(inner) = inner.upgrade() {
                if inner.data.lock().listeners.remove(&id).is_some() {
                    debug!(listener = id, "Watch cancelled");
                }
            }
        }))
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn get(&self, path: &DocumentPath) -> Result<DocumentSnapshot> {
        Ok(self.inner.data.lock().document_snapshot(path))
    }

    async fn get_collection(&self, path: &CollectionPath) -> Result<CollectionSnapshot> {
        Ok(self.inner.data.lock().collection_snapshot(path))
    }

    async fn set(&self, path: &DocumentPath, update: &PartialUpdate) -> Result<()> {
        {
            let mut store = self.inner.data.lock();
            if let Some(reason) = store.fail_writes.clone() {
                return Err(MirrorError::Remote(reason));
            }
            update.apply_to(store.documents.entry(path.clone()).or_default());
            store.writes.push((path.clone(), update.clone()));
            let deliveries = Self::deliveries_for_write(&store, path);
            self.inner.enqueue(deliveries);
        }
        self.inner.drain();
        Ok(())
    }

    async fn subscribe_document(
        &self,
        path: &DocumentPath,
        listener: DocumentListener,
    ) -> Result<ListenerRegistration> {
        self.register(Listener::Document(path.clone(), Arc::from(listener)))
    }

    async fn subscribe_collection(
        &self,
        path: &CollectionPath,
        listener: CollectionListener,
    ) -> Result<ListenerRegistration> {
        self.register(Listener::Collection(path.clone(), Arc::from(listener)))
    }
}
