//! The `Mirror` ties all components together.

use crate::bridge::{AuthSessionBridge, BindingState};
use crate::callbacks::CallbackId;
use crate::clock::{Clock, SystemClock};
use crate::enrollment::EnrollmentCoordinator;
use crate::error::{MirrorError, Result};
use crate::identity::IdentityProvider;
use crate::remote::RemoteStore;
use crate::signin::{route_message, HostReply, SignInFlows};
use crate::state::{programs_from_snapshot, LocalState, StateContainer};
use crate::subscriptions::{WatchRegistry, WatchTargets};
use crate::tokens::{EventBus, HttpTokenEndpoint, TokenEndpoint, TokenExchangeWorker};
use crate::types::{PartialUpdate, Program, ProgramId, Session, User};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

/// Mirror configuration.
#[derive(Clone, Debug)]
pub struct MirrorConfig {
    /// Host serving the token exchange function.
    pub functions_host: String,

    /// Path of the token exchange function under `functions_host`.
    pub token_exchange_path: String,

    /// Top-level collection of user documents.
    pub users_collection: String,

    /// Per-user subcollection holding enrollment records.
    pub enrollments_collection: String,

    /// Top-level collection of programs.
    pub programs_collection: String,

    /// Whether binding a user starts a token sweep.
    pub exchange_tokens_on_bind: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        let targets = WatchTargets::default();
        Self {
            functions_host: "http://localhost:5001".to_string(),
            token_exchange_path: "tokenExchange".to_string(),
            users_collection: targets.users_collection,
            enrollments_collection: targets.enrollments_collection,
            programs_collection: targets.programs_collection,
            exchange_tokens_on_bind: true,
        }
    }
}

impl MirrorConfig {
    /// Point the token exchange at a local functions emulator.
    pub fn emulator(project: &str) -> Self {
        Self {
            functions_host: format!("http://localhost:5001/{project}/us-central1"),
            ..Default::default()
        }
    }

    pub fn targets(&self) -> WatchTargets {
        WatchTargets {
            users_collection: self.users_collection.clone(),
            enrollments_collection: self.enrollments_collection.clone(),
            programs_collection: self.programs_collection.clone(),
        }
    }
}

/// What `initialize` found.
#[derive(Clone, Debug, PartialEq)]
pub struct InitialState {
    pub initialized: bool,
    /// The signed-in user's document, if a verified session existed.
    pub user: Option<User>,
    pub programs: Vec<Program>,
}

/// External collaborators the mirror is built from.
pub struct MirrorParts {
    pub remote: Arc<dyn RemoteStore>,
    pub identity: Arc<dyn IdentityProvider>,
    pub endpoint: Arc<dyn TokenEndpoint>,
    pub bus: Arc<dyn EventBus>,
    pub clock: Arc<dyn Clock>,
}

/// A reactive local mirror of the signed-in user's documents.
///
/// Constructed once by the host and shared by reference. Owns the state
/// snapshot and both callback registries.
pub struct Mirror {
    config: MirrorConfig,
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    state: Arc<StateContainer>,
    registry: Arc<WatchRegistry>,
    coordinator: EnrollmentCoordinator,
    bridge: Arc<AuthSessionBridge>,
    flows: SignInFlows,
}

impl Mirror {
    /// Build a mirror that exchanges tokens over HTTP and uses system time.
    pub fn new(
        config: MirrorConfig,
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        bus: Arc<dyn EventBus>,
    ) -> Self {
        let endpoint = Arc::new(HttpTokenEndpoint::new(
            &config.functions_host,
            &config.token_exchange_path,
        ));
        Self::from_parts(
            config,
            MirrorParts {
                remote,
                identity,
                endpoint,
                bus,
                clock: Arc::new(SystemClock),
            },
        )
    }

    pub fn from_parts(config: MirrorConfig, parts: MirrorParts) -> Self {
        let targets = config.targets();
        let state = Arc::new(StateContainer::new());
        let registry = Arc::new(WatchRegistry::new(
            Arc::clone(&parts.remote),
            Arc::clone(&state),
            targets.clone(),
        ));
        let coordinator = EnrollmentCoordinator::new(
            Arc::clone(&parts.remote),
            Arc::clone(&state),
            targets.clone(),
            parts.clock,
        );
        let worker = Arc::new(TokenExchangeWorker::new(
            Arc::clone(&parts.remote),
            Arc::clone(&parts.identity),
            parts.endpoint,
            parts.bus,
            targets,
        ));
        let bridge = Arc::new(AuthSessionBridge::new(
            Arc::clone(&registry),
            worker,
            config.exchange_tokens_on_bind,
        ));
        let flows = SignInFlows::new(Arc::clone(&parts.identity));

        Self {
            config,
            remote: parts.remote,
            identity: parts.identity,
            state,
            registry,
            coordinator,
            bridge,
            flows,
        }
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn bridge(&self) -> &Arc<AuthSessionBridge> {
        &self.bridge
    }

    pub fn registry(&self) -> &Arc<WatchRegistry> {
        &self.registry
    }

    /// Start following the identity provider and load the initial state.
    ///
    /// Waits for the provider's first session report. If a verified session
    /// exists, the user is bound and the user document is read once. The
    /// program collection is read once and then watched.
    pub async fn initialize(&self) -> Result<InitialState> {
        let mut processed = self.bridge.processed();
        self.bridge.attach(&self.identity);
        processed
            .wait_for(|n| *n >= 1)
            .await
            .map_err(|e| MirrorError::Authentication(e.to_string()))?;

        let user = match self.registry.binding() {
            Some(binding) => {
                let snapshot = self.remote.get(&binding.document).await?;
                snapshot.data.map(|data| User::new(binding.user_id, data))
            }
            None => None,
        };

        let programs = self
            .remote
            .get_collection(&self.config.targets().programs())
            .await?;
        self.registry.watch_programs().await?;

        info!(signed_in = user.is_some(), "Mirror initialized");
        Ok(InitialState {
            initialized: true,
            user,
            programs: programs_from_snapshot(&programs),
        })
    }

    // --- State ---

    pub fn snapshot(&self) -> Arc<LocalState> {
        self.state.snapshot()
    }

    pub fn binding_state(&self) -> BindingState {
        self.bridge.state()
    }

    /// Called with every new local state snapshot.
    pub fn on_next_state<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Arc<LocalState>) + Send + Sync + 'static,
    {
        self.state.on_next_state(callback)
    }

    pub fn remove_state_listener(&self, id: CallbackId) -> bool {
        self.state.remove_listener(id)
    }

    /// Called with every session transition; `None` means signed out.
    pub fn on_auth_change<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&Option<Session>) + Send + Sync + 'static,
    {
        self.bridge.on_session_change(callback)
    }

    pub fn remove_auth_listener(&self, id: CallbackId) -> bool {
        self.bridge.remove_session_listener(id)
    }

    // --- Writes ---

    /// Enroll the bound user in a program, or withdraw them.
    pub async fn set_enrollment(&self, program_id: &ProgramId, enroll: bool) -> Result<bool> {
        let user_id = self.registry.bound_user().ok_or(MirrorError::NotBound)?;
        self.coordinator
            .set_enrollment(&user_id, program_id, enroll)
            .await
    }

    pub async fn update_onboarded_status(&self, onboarded: bool) -> Result<()> {
        self.update_user_document(PartialUpdate::new().set("onboarded", onboarded))
            .await
    }

    pub async fn update_platform_enrollment(&self, enrolled: bool) -> Result<()> {
        self.update_user_document(PartialUpdate::new().set("enrolled", enrolled))
            .await
    }

    pub async fn update_demographic_survey(&self, data: Value) -> Result<()> {
        self.update_user_document(PartialUpdate::new().set("demographicsData", data))
            .await
    }

    /// Merge `update` into the bound user's document.
    pub async fn update_user_document(&self, update: PartialUpdate) -> Result<()> {
        let binding = self.registry.binding().ok_or(MirrorError::NotBound)?;
        debug!(user_id = %binding.user_id, fields = update.len(), "Updating user document");
        self.remote.set(&binding.document, &update).await
    }

    // --- Sign-in ---

    pub fn sign_in(&self) -> &SignInFlows {
        &self.flows
    }

    /// Handle a sign-in request from the host. Returns a reply only on
    /// failure.
    pub async fn handle_host_message(&self, message: &Value) -> Option<HostReply> {
        route_message(&self.flows, message).await
    }

    /// Wait for the token sweep started by the latest sign-in.
    pub async fn wait_for_token_sweep(&self) -> Option<Result<usize>> {
        self.bridge.wait_for_token_sweep().await
    }
}
