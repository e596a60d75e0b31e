//! Identity session to watch binding.
//!
//! The bridge turns identity session transitions into watch bindings:
//!
//! ```text
//! Unbound      --sign in / existing session-->  Bound(u)
//! Bound(u)     --account switch------------->   Bound(u')
//! Bound(u)     --sign out------------------->   Unbound
//! ```
//!
//! Transitions are processed one at a time, in the order the identity
//! provider reports them.

use crate::callbacks::{CallbackId, CallbackRegistry};
use crate::error::Result;
use crate::identity::IdentityProvider;
use crate::subscriptions::WatchRegistry;
use crate::tokens::TokenExchangeWorker;
use crate::types::{Session, UserId};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which user, if any, the mirror is bound to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BindingState {
    Unbound,
    Bound(UserId),
}

/// Binds the mirror to whoever the identity provider says is signed in.
pub struct AuthSessionBridge {
    registry: Arc<WatchRegistry>,
    worker: Arc<TokenExchangeWorker>,
    auth_callbacks: CallbackRegistry<Option<Session>>,
    state: RwLock<BindingState>,
    exchange_tokens: bool,
    sweep: Mutex<Option<JoinHandle<Result<usize>>>>,
    /// Set once every watch for the current binding is live.
    established: AtomicBool,
    attached: AtomicBool,
    processed: watch::Sender<u64>,
}

impl AuthSessionBridge {
    pub fn new(
        registry: Arc<WatchRegistry>,
        worker: Arc<TokenExchangeWorker>,
        exchange_tokens: bool,
    ) -> Self {
        let (processed, _) = watch::channel(0);
        Self {
            registry,
            worker,
            auth_callbacks: CallbackRegistry::new(),
            state: RwLock::new(BindingState::Unbound),
            exchange_tokens,
            sweep: Mutex::new(None),
            established: AtomicBool::new(false),
            attached: AtomicBool::new(false),
            processed,
        }
    }

    /// Register a subscriber for every session transition, including
    /// sign-out (`None`).
    pub fn on_session_change<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Option<Session>) + Send + Sync + 'static,
    {
        self.auth_callbacks.register(callback)
    }

    pub fn remove_session_listener(&self, id: CallbackId) -> bool {
        self.auth_callbacks.remove(id)
    }

    pub fn state(&self) -> BindingState {
        self.state.read().clone()
    }

    /// Watch for the number of transitions handled so far.
    pub fn processed(&self) -> watch::Receiver<u64> {
        self.processed.subscribe()
    }

    /// Start following `identity`. Only the first call has any effect.
    ///
    /// Returns the task that processes transitions, or None if already
    /// attached.
    pub fn attach(self: &Arc<Self>, identity: &Arc<dyn IdentityProvider>) -> Option<JoinHandle<()>> {
        if self.attached.swap(true, Ordering::SeqCst) {
            return None;
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<Option<Session>>();
        identity.on_session_change(Box::new(move |session| {
            if tx.send(session).is_err() {
                debug!("Session transition after bridge shut down");
            }
        }));

        let bridge = Arc::clone(self);
        Some(tokio::spawn(async move {
            while let Some(session) = rx.recv().await {
                if let Err(e) = bridge.handle_transition(session).await {
                    warn!(error = %e, "Failed to bind session");
                }
            }
        }))
    }

    /// Apply one session transition.
    ///
    /// Subscribers are notified first, then the watches are rebound. Watch
    /// setup errors are returned. The token sweep runs in the background and
    /// its errors are only logged.
    pub async fn handle_transition(&self, session: Option<Session>) -> Result<BindingState> {
        self.auth_callbacks.dispatch(&session);
        let result = self.rebind(session).await;
        self.processed.send_modify(|n| *n += 1);
        result
    }

    async fn rebind(&self, session: Option<Session>) -> Result<BindingState> {
        let session = match session {
            Some(s) if s.email_verified => s,
            Some(s) => {
                info!(user_id = %s.uid, "Session email not verified, staying unbound");
                return Ok(self.unbind());
            }
            None => return Ok(self.unbind()),
        };

        if self.state() == BindingState::Bound(session.uid.clone())
            && self.established.load(Ordering::SeqCst)
        {
            debug!(user_id = %session.uid, "Session already bound");
            return Ok(self.state());
        }

        self.cancel_sweep();
        self.established.store(false, Ordering::SeqCst);
        self.registry.bind_user_document(&session.uid);
        let bound = BindingState::Bound(session.uid.clone());
        *self.state.write() = bound.clone();

        self.registry.watch_all().await?;
        self.established.store(true, Ordering::SeqCst);

        if self.exchange_tokens {
            self.start_sweep(session);
        }
        Ok(bound)
    }

    fn unbind(&self) -> BindingState {
        self.cancel_sweep();
        self.established.store(false, Ordering::SeqCst);
        let was_bound = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, BindingState::Unbound) != BindingState::Unbound
        };
        if was_bound {
            self.registry.unbind();
        }
        BindingState::Unbound
    }

    fn start_sweep(&self, session: Session) {
        let worker = Arc::clone(&self.worker);
        let handle = tokio::spawn(async move {
            let result = worker.exchange_all_for_user(&session).await;
            if let Err(e) = &result {
                warn!(user_id = %session.uid, error = %e, "Token sweep failed");
            }
            result
        });
        *self.sweep.lock() = Some(handle);
    }

    /// A sweep for a previous session must not broadcast tokens.
    fn cancel_sweep(&self) {
        if let Some(handle) = self.sweep.lock().take() {
            handle.abort();
        }
    }

    /// Wait for the latest token sweep. None if there is none or it was
    /// cancelled.
    pub async fn wait_for_token_sweep(&self) -> Option<Result<usize>> {
        let handle = self.sweep.lock().take()?;
        match handle.await {
            Ok(result) => Some(result),
            Err(e) => {
                debug!(error = %e, "Token sweep did not complete");
                None
            }
        }
    }
}
