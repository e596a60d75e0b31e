//! Program token exchange.
//!
//! Each program needs its own access token. For a signed-in user the worker
//! walks the program collection in order, trades a fresh identity credential
//! for a program token at the exchange endpoint, and broadcasts a
//! [`SignupCompleted`] event for every token it gets.
//!
//! Exchanges run one at a time. The first failure ends the sweep; programs
//! after it are not attempted.

use crate::error::{MirrorError, Result};
use crate::identity::IdentityProvider;
use crate::remote::RemoteStore;
use crate::state::programs_from_snapshot;
use crate::subscriptions::WatchTargets;
use crate::types::{Program, ProgramId, Session};
use async_trait::async_trait;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name hosts use for the broadcast event.
pub const SIGNUP_COMPLETED_EVENT: &str = "complete-signup";

/// Broadcast after a program token was obtained.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupCompleted {
    pub program_id: ProgramId,
    pub token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExchangeRequest<'a> {
    program_id: &'a ProgramId,
    id_token: &'a str,
}

#[derive(Deserialize)]
struct ExchangeResponse {
    token: String,
}

/// Trades an identity credential for a program token.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange(&self, program_id: &ProgramId, id_token: &str) -> Result<String>;
}

/// `POST {host}/{path}` with `{programId, idToken}`, answered by `{token}`.
pub struct HttpTokenEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpTokenEndpoint {
    pub fn new(host: &str, path: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: format!(
                "{}/{}",
                host.trim_end_matches('/'),
                path.trim_start_matches('/')
            ),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TokenEndpoint for HttpTokenEndpoint {
    async fn exchange(&self, program_id: &ProgramId, id_token: &str) -> Result<String> {
        let response = self
            .client
            .post(&self.url)
            .json(&ExchangeRequest {
                program_id,
                id_token,
            })
            .send()
            .await?
            .error_for_status()?;

        let body: ExchangeResponse = response.json().await?;
        Ok(body.token)
    }
}

/// Where signup events go.
pub trait EventBus: Send + Sync {
    fn broadcast(&self, event: SignupCompleted);
}

/// Fans events out to channel receivers. Receivers that hang up are dropped.
#[derive(Default)]
pub struct ChannelEventBus {
    subscribers: RwLock<Vec<Sender<SignupCompleted>>>,
}

impl ChannelEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A receiver for every event broadcast from now on.
    pub fn subscribe(&self) -> Receiver<SignupCompleted> {
        let (sender, receiver) = unbounded();
        self.subscribers.write().push(sender);
        receiver
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl EventBus for ChannelEventBus {
    fn broadcast(&self, event: SignupCompleted) {
        debug!(event = SIGNUP_COMPLETED_EVENT, program_id = %event.program_id, "Broadcasting");
        self.subscribers
            .write()
            .retain(|sender| sender.send(event.clone()).is_ok());
    }
}

/// Runs the per-program token sweep.
pub struct TokenExchangeWorker {
    remote: Arc<dyn RemoteStore>,
    identity: Arc<dyn IdentityProvider>,
    endpoint: Arc<dyn TokenEndpoint>,
    bus: Arc<dyn EventBus>,
    targets: WatchTargets,
}

impl TokenExchangeWorker {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        identity: Arc<dyn IdentityProvider>,
        endpoint: Arc<dyn TokenEndpoint>,
        bus: Arc<dyn EventBus>,
        targets: WatchTargets,
    ) -> Self {
        Self {
            remote,
            identity,
            endpoint,
            bus,
            targets,
        }
    }

    /// Exchange a token for every program, in collection order.
    ///
    /// Returns how many tokens were broadcast. Fails on the first exchange
    /// error without trying the remaining programs. Unverified sessions get
    /// no tokens.
    pub async fn exchange_all_for_user(&self, session: &Session) -> Result<usize> {
        if !session.email_verified {
            return Err(MirrorError::EmailNotVerified);
        }
        let snapshot = self.remote.get_collection(&self.targets.programs()).await?;
        let programs = programs_from_snapshot(&snapshot);
        debug!(user_id = %session.uid, programs = programs.len(), "Starting token sweep");

        let mut completed = 0;
        for program in &programs {
            let event = match self.exchange_one(session, program).await {
                Ok(event) => event,
                Err(e) => {
                    warn!(user_id = %session.uid, error = %e, remaining = programs.len() - completed - 1, "Token sweep aborted");
                    return Err(e);
                }
            };
            self.bus.broadcast(event);
            completed += 1;
        }

        info!(user_id = %session.uid, completed, "Token sweep finished");
        Ok(completed)
    }

    /// Exchange a token for one program. Errors name the program.
    pub async fn exchange_one(&self, session: &Session, program: &Program) -> Result<SignupCompleted> {
        let program_id = &program.program_id;
        let fail = |e: MirrorError| MirrorError::TokenExchange {
            program_id: program_id.clone(),
            reason: e.to_string(),
        };

        let id_token = self.identity.id_token(session).await.map_err(fail)?;
        let token = self
            .endpoint
            .exchange(program_id, &id_token)
            .await
            .map_err(fail)?;

        Ok(SignupCompleted {
            program_id: program_id.clone(),
            token,
        })
    }
}
