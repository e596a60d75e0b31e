//! Registry of live remote watches.

use crate::error::{MirrorError, Result};
use crate::remote::{ListenerRegistration, RemoteStore, WatchEvent};
use crate::state::{
    clear_user, replace_enrollments, replace_programs, replace_user, LocalState, StateContainer,
};
use crate::types::UserId;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::types::{Binding, Generation, WatchKind, WatchTargets};

/// A watch the registry keeps alive.
struct ActiveWatch {
    kind: WatchKind,
    generation: Generation,
    registration: ListenerRegistration,
}

/// Turns remote pushes into state transforms.
///
/// User-scoped watches (the user document and the enrollment collection)
/// belong to the generation that was current when they were created. Binding
/// a different user, or unbinding, starts a new generation: older watches are
/// cancelled and any event they still deliver is dropped.
///
/// The program watch is shared by every user and survives rebinding.
pub struct WatchRegistry {
    remote: Arc<dyn RemoteStore>,
    state: Arc<StateContainer>,
    targets: WatchTargets,
    /// Current generation, shared with listeners.
    generation: Arc<AtomicU64>,
    binding: RwLock<Option<Binding>>,
    user_watches: Mutex<Vec<ActiveWatch>>,
    program_watch: Mutex<Option<ListenerRegistration>>,
    /// Cleared when the program stream fails so the next call re-establishes it.
    programs_live: Arc<AtomicBool>,
    stale_events: Arc<AtomicU64>,
}

impl WatchRegistry {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        state: Arc<StateContainer>,
        targets: WatchTargets,
    ) -> Self {
        Self {
            remote,
            state,
            targets,
            generation: Arc::new(AtomicU64::new(0)),
            binding: RwLock::new(None),
            user_watches: Mutex::new(Vec::new()),
            program_watch: Mutex::new(None),
            programs_live: Arc::new(AtomicBool::new(false)),
            stale_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn targets(&self) -> &WatchTargets {
        &self.targets
    }

    pub fn generation(&self) -> Generation {
        Generation(self.generation.load(Ordering::SeqCst))
    }

    pub fn binding(&self) -> Option<Binding> {
        self.binding.read().clone()
    }

    pub fn bound_user(&self) -> Option<UserId> {
        self.binding.read().as_ref().map(|b| b.user_id.clone())
    }

    /// Number of user-scoped watches currently held.
    pub fn active_user_watches(&self) -> usize {
        self.user_watches.lock().len()
    }

    pub fn programs_watched(&self) -> bool {
        self.programs_live.load(Ordering::SeqCst) && self.program_watch.lock().is_some()
    }

    /// Events discarded because their watch was superseded.
    pub fn stale_events(&self) -> u64 {
        self.stale_events.load(Ordering::SeqCst)
    }

    /// Bind the mirror to `user_id`, superseding any previous binding.
    ///
    /// Watches of the previous generation are cancelled. When the previous
    /// binding belonged to a different user, that user's data is cleared from
    /// the local state.
    pub fn bind_user_document(&self, user_id: &UserId) -> Generation {
        let generation = self.advance_generation();
        let previous = self.binding.write().replace(Binding {
            user_id: user_id.clone(),
            generation,
            document: self.targets.user_document(user_id),
        });

        self.cancel_user_watches();

        if let Some(previous) = previous {
            if &previous.user_id != user_id {
                self.state.update(clear_user);
            }
        }

        info!(user_id = %user_id, generation = %generation, "Bound user document");
        generation
    }

    /// Drop the current binding, cancel user watches and clear user data.
    pub fn unbind(&self) -> Generation {
        let generation = self.advance_generation();
        let previous = self.binding.write().take();
        self.cancel_user_watches();

        if let Some(previous) = previous {
            self.state.update(clear_user);
            info!(user_id = %previous.user_id, generation = %generation, "Unbound user document");
        }
        generation
    }

    /// Mirror the bound user's document into `LocalState::user`.
    pub async fn watch_user_document(&self) -> Result<()> {
        let binding = self.binding().ok_or(MirrorError::NotBound)?;
        let listener = self.listener(
            WatchKind::UserDocument,
            Some(binding.generation),
            replace_user,
        );

        let registration = self
            .remote
            .subscribe_document(&binding.document, listener)
            .await
            .map_err(|e| setup_error(WatchKind::UserDocument, e))?;

        self.keep(WatchKind::UserDocument, binding.generation, registration);
        Ok(())
    }

    /// Mirror the bound user's enrollment collection into
    /// `LocalState::user_enrollments`.
    pub async fn watch_user_enrollments(&self) -> Result<()> {
        let binding = self.binding().ok_or(MirrorError::NotBound)?;
        let path = self.targets.user_enrollments(&binding.user_id);
        let listener = self.listener(
            WatchKind::UserEnrollments,
            Some(binding.generation),
            replace_enrollments,
        );

        let registration = self
            .remote
            .subscribe_collection(&path, listener)
            .await
            .map_err(|e| setup_error(WatchKind::UserEnrollments, e))?;

        self.keep(WatchKind::UserEnrollments, binding.generation, registration);
        Ok(())
    }

    /// Mirror the program collection into `LocalState::programs`.
    ///
    /// Does nothing if the program watch is already live.
    pub async fn watch_programs(&self) -> Result<()> {
        if self.programs_watched() {
            return Ok(());
        }

        self.programs_live.store(true, Ordering::SeqCst);
        let listener = self.listener(WatchKind::Programs, None, replace_programs);
        let registration = match self
            .remote
            .subscribe_collection(&self.targets.programs(), listener)
            .await
        {
            Ok(r) => r,
            Err(e) => {
                self.programs_live.store(false, Ordering::SeqCst);
                return Err(setup_error(WatchKind::Programs, e));
            }
        };

        let previous = self.program_watch.lock().replace(registration);
        drop(previous);
        debug!("Watching programs");
        Ok(())
    }

    /// Start all three watches for the current binding.
    pub async fn watch_all(&self) -> Result<()> {
        self.watch_user_document().await?;
        self.watch_user_enrollments().await?;
        self.watch_programs().await
    }

    fn advance_generation(&self) -> Generation {
        Generation(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Hold on to a new watch unless its generation was superseded while it
    /// was being established.
    fn keep(&self, kind: WatchKind, generation: Generation, registration: ListenerRegistration) {
        if self.generation() != generation {
            debug!(watch = %kind, generation = %generation, "Watch superseded during setup");
            registration.cancel();
            return;
        }

        debug!(watch = %kind, generation = %generation, listener = registration.id(), "Watch established");
        self.user_watches.lock().push(ActiveWatch {
            kind,
            generation,
            registration,
        });
    }

    fn cancel_user_watches(&self) {
        let superseded = std::mem::take(&mut *self.user_watches.lock());
        for watch in superseded {
            debug!(watch = %watch.kind, generation = %watch.generation, "Cancelling superseded watch");
            watch.registration.cancel();
        }
    }

    /// Build a listener that applies `apply` for every snapshot of the
    /// current generation (or every snapshot, when `scope` is None).
    fn listener<S>(
        &self,
        kind: WatchKind,
        scope: Option<Generation>,
        apply: fn(&mut LocalState, &S),
    ) -> Box<dyn Fn(WatchEvent<S>) + Send + Sync>
    where
        S: Send + Sync + 'static,
    {
        let state = Arc::clone(&self.state);
        let current = Arc::clone(&self.generation);
        let stale = Arc::clone(&self.stale_events);
        let live = (!kind.is_user_scoped()).then(|| Arc::clone(&self.programs_live));

        Box::new(move |event| match event {
            WatchEvent::Snapshot(snapshot) => {
                let current = Arc::clone(&current);
                let stale = Arc::clone(&stale);
                // Checked when the transform runs, so a rebind queued ahead
                // of it always wins.
                state.update(move |draft| {
                    if let Some(generation) = scope {
                        let now = current.load(Ordering::SeqCst);
                        if now != generation.0 {
                            stale.fetch_add(1, Ordering::SeqCst);
                            debug!(watch = %kind, generation = %generation, current = now, "Dropping event from superseded watch");
                            return;
                        }
                    }
                    apply(draft, &snapshot);
                });
            }
            WatchEvent::Error(reason) => {
                if let Some(live) = &live {
                    live.store(false, Ordering::SeqCst);
                }
                warn!(watch = %kind, reason = %reason, "Watch terminated, local state may be stale");
            }
        })
    }
}

fn setup_error(kind: WatchKind, e: MirrorError) -> MirrorError {
    MirrorError::WatchSetup {
        target: kind.to_string(),
        reason: e.to_string(),
    }
}
