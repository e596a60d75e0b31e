//! Sign-in flows and host message routing.
//!
//! The flows only talk to the identity provider. Binding the signed-in user
//! happens when the provider reports the new session to the
//! [`AuthSessionBridge`](crate::bridge::AuthSessionBridge).

use crate::error::{MirrorError, Result};
use crate::identity::IdentityProvider;
use crate::types::Session;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

/// The only external provider hosts may ask for.
pub const GOOGLE_PROVIDER: &str = "google";

/// How a sign-in attempt ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SignInOutcome {
    SignedIn(Session),
    /// The account exists but its email is unverified; a verification email
    /// was sent instead of signing in.
    VerificationSent { email: Option<String> },
}

/// Password and provider sign-in.
pub struct SignInFlows {
    identity: Arc<dyn IdentityProvider>,
}

impl SignInFlows {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self { identity }
    }

    pub async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<SignInOutcome> {
        let session = self
            .identity
            .sign_in_with_password(email, password)
            .await
            .inspect_err(|e| error!(error = %e, "Password sign-in failed"))?;

        if session.email_verified {
            return Ok(SignInOutcome::SignedIn(session));
        }

        warn!(user_id = %session.uid, "Email account not verified, sending verification email");
        self.identity.send_email_verification(&session).await?;
        Ok(SignInOutcome::VerificationSent {
            email: session.email,
        })
    }

    /// Create a password account. New accounts always need verification.
    pub async fn sign_up_with_password(&self, email: &str, password: &str) -> Result<SignInOutcome> {
        let session = self
            .identity
            .create_user_with_password(email, password)
            .await
            .inspect_err(|e| error!(error = %e, "Password sign-up failed"))?;

        info!(user_id = %session.uid, "Sending verification email");
        self.identity.send_email_verification(&session).await?;
        Ok(SignInOutcome::VerificationSent {
            email: session.email,
        })
    }

    pub async fn sign_in_with_provider(&self, provider: &str) -> Result<SignInOutcome> {
        let session = self
            .identity
            .sign_in_with_provider(provider)
            .await
            .inspect_err(|e| error!(provider, error = %e, "Provider sign-in failed"))?;
        Ok(SignInOutcome::SignedIn(session))
    }

    pub async fn sign_out(&self) -> Result<()> {
        self.identity.sign_out().await
    }
}

/// A sign-in request from the host's UI.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HostMessage {
    Password { email: String, password: String },
    Provider { provider: String },
}

impl HostMessage {
    pub fn parse(value: &Value) -> Result<Self> {
        HostMessage::deserialize(value).map_err(|e| MirrorError::InvalidMessage(e.to_string()))
    }
}

/// Sent back to the host when a request fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HostReply {
    pub result: String,
}

impl From<MirrorError> for HostReply {
    fn from(e: MirrorError) -> Self {
        HostReply {
            result: e.to_string(),
        }
    }
}

/// Run the sign-in a host message asks for. Returns a reply only on failure.
pub async fn route_message(flows: &SignInFlows, message: &Value) -> Option<HostReply> {
    let outcome = match HostMessage::parse(message) {
        Ok(HostMessage::Password { email, password }) => {
            flows.sign_in_with_password(&email, &password).await
        }
        Ok(HostMessage::Provider { provider }) if provider == GOOGLE_PROVIDER => {
            flows.sign_in_with_provider(&provider).await
        }
        Ok(HostMessage::Provider { provider }) => Err(MirrorError::InvalidMessage(format!(
            "unsupported provider: {provider}"
        ))),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(_) => None,
        Err(e) => Some(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::MemoryIdentity;
    use serde_json::json;

    fn flows() -> (Arc<MemoryIdentity>, SignInFlows) {
        let identity = Arc::new(MemoryIdentity::new());
        identity.add_account("ok@example.com", "pw", "u1", true);
        identity.add_account("new@example.com", "pw", "u2", false);
        identity.add_provider_session(GOOGLE_PROVIDER, Session::new("g1"));
        let flows = SignInFlows::new(identity.clone());
        (identity, flows)
    }

    #[test]
    fn test_parse_host_messages() {
        assert_eq!(
            HostMessage::parse(&json!({"email": "a", "password": "b"})).unwrap(),
            HostMessage::Password {
                email: "a".into(),
                password: "b".into()
            }
        );
        assert_eq!(
            HostMessage::parse(&json!({"provider": "google"})).unwrap(),
            HostMessage::Provider {
                provider: "google".into()
            }
        );
        assert!(matches!(
            HostMessage::parse(&json!({"email": "a"})),
            Err(MirrorError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn test_verified_password_sign_in() {
        let (_identity, flows) = flows();
        let outcome = flows.sign_in_with_password("ok@example.com", "pw").await.unwrap();
        assert!(matches!(outcome, SignInOutcome::SignedIn(s) if s.uid.0 == "u1"));
    }

    #[tokio::test]
    async fn test_unverified_sign_in_sends_verification() {
        let (identity, flows) = flows();
        let outcome = flows.sign_in_with_password("new@example.com", "pw").await.unwrap();
        assert_eq!(
            outcome,
            SignInOutcome::VerificationSent {
                email: Some("new@example.com".into())
            }
        );
        assert_eq!(identity.verification_emails(), vec!["new@example.com"]);
    }

    #[tokio::test]
    async fn test_sign_up_sends_verification() {
        let (identity, flows) = flows();
        let outcome = flows.sign_up_with_password("fresh@example.com", "pw").await.unwrap();
        assert!(matches!(outcome, SignInOutcome::VerificationSent { .. }));
        assert_eq!(identity.verification_emails(), vec!["fresh@example.com"]);
    }

    #[tokio::test]
    async fn test_route_replies_only_on_failure() {
        let (_identity, flows) = flows();

        assert_eq!(route_message(&flows, &json!({"provider": "google"})).await, None);

        let reply = route_message(&flows, &json!({"email": "ok@example.com", "password": "bad"}))
            .await
            .unwrap();
        assert!(reply.result.contains("Authentication failed"));

        let reply = route_message(&flows, &json!({"provider": "github"})).await.unwrap();
        assert!(reply.result.contains("unsupported provider"));

        let reply = route_message(&flows, &json!({"hello": 1})).await.unwrap();
        assert!(reply.result.contains("Invalid host message"));
    }
}
