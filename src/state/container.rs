//! The reactive state container.

use crate::callbacks::{CallbackId, CallbackRegistry};
use crate::state::LocalState;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// A pure change to a draft of the local state.
pub type StateTransform = Box<dyn FnOnce(&mut LocalState) + Send>;

/// Transforms waiting to be applied.
struct Queue {
    transforms: VecDeque<StateTransform>,
    /// Whether some caller is currently applying the queue.
    draining: bool,
}

/// Clears `draining` if a transform or listener panics mid-drain. Queued
/// transforms stay queued for the next `update`.
struct DrainGuard<'a> {
    queue: &'a Mutex<Queue>,
    armed: bool,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.queue.lock().draining = false;
        }
    }
}

/// Holds the current [`LocalState`] snapshot and applies transforms to it.
///
/// Every `update` is applied exactly once, in the order `update` was called,
/// even when called from inside a state listener. Listeners receive every
/// intermediate snapshot.
pub struct StateContainer {
    current: RwLock<Arc<LocalState>>,
    queue: Mutex<Queue>,
    listeners: CallbackRegistry<Arc<LocalState>>,
    version: AtomicU64,
}

impl StateContainer {
    pub fn new() -> Self {
        Self::with_state(LocalState::default())
    }

    pub fn with_state(state: LocalState) -> Self {
        Self {
            current: RwLock::new(Arc::new(state)),
            queue: Mutex::new(Queue {
                transforms: VecDeque::new(),
                draining: false,
            }),
            listeners: CallbackRegistry::new(),
            version: AtomicU64::new(0),
        }
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<LocalState> {
        Arc::clone(&self.current.read())
    }

    /// Number of transforms applied so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Register a listener for every new snapshot.
    pub fn on_next_state<F>(&self, listener: F) -> CallbackId
    where
        F: Fn(&Arc<LocalState>) + Send + Sync + 'static,
    {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&self, id: CallbackId) -> bool {
        self.listeners.remove(id)
    }

    /// Apply a transform and notify listeners.
    ///
    /// If another `update` is already draining (for example, this call comes
    /// from a listener), the transform is queued and applied by that caller
    /// right after the current one finishes notifying.
    pub fn update<F>(&self, transform: F)
    where
        F: FnOnce(&mut LocalState) + Send + 'static,
    {
        {
            let mut queue = self.queue.lock();
            queue.transforms.push_back(Box::new(transform));
            if queue.draining {
                trace!(queued = queue.transforms.len(), "State update queued");
                return;
            }
            queue.draining = true;
        }

        let mut guard = DrainGuard {
            queue: &self.queue,
            armed: true,
        };

        loop {
            let next = {
                let mut queue = self.queue.lock();
                match queue.transforms.pop_front() {
                    Some(t) => t,
                    None => {
                        queue.draining = false;
                        guard.armed = false;
                        return;
                    }
                }
            };

            let snapshot = self.apply(next);
            self.listeners.dispatch(&snapshot);
        }
    }

    /// Only the draining caller gets here, so read-then-write cannot race.
    fn apply(&self, transform: StateTransform) -> Arc<LocalState> {
        let mut draft = LocalState::clone(&self.current.read());
        transform(&mut draft);

        let snapshot = Arc::new(draft);
        *self.current.write() = Arc::clone(&snapshot);
        let version = self.version.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(version, "State updated");
        snapshot
    }
}

impl Default for StateContainer {
    fn default() -> Self {
        Self::new()
    }
}
