//! Ordered callback registries.
//!
//! Used twice by the mirror: once for identity session transitions and once
//! for local state transitions. Callbacks run synchronously in registration
//! order. A callback that starts async work is not awaited.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Disposer token returned by [`CallbackRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallbackId(pub u64);

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// An ordered list of callbacks taking `&T`.
pub struct CallbackRegistry<T> {
    callbacks: RwLock<Vec<(CallbackId, Callback<T>)>>,
    next_id: AtomicU64,
}

impl<T> CallbackRegistry<T> {
    pub fn new() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Append a callback. It runs after every callback registered before it.
    pub fn register<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = CallbackId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.callbacks.write().push((id, Arc::new(callback)));
        id
    }

    /// Remove a callback. Returns false if it was already removed.
    pub fn remove(&self, id: CallbackId) -> bool {
        let mut callbacks = self.callbacks.write();
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        callbacks.len() != before
    }

    /// Invoke every callback with `value`, in registration order.
    ///
    /// The list is copied before dispatch so a callback may register or
    /// remove callbacks; such changes apply from the next dispatch on.
    pub fn dispatch(&self, value: &T) {
        let callbacks: Vec<Callback<T>> = self
            .callbacks
            .read()
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(value);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.read().is_empty()
    }
}

impl<T> Default for CallbackRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
