//! Identity provider boundary.
//!
//! The mirror does not authenticate anyone itself. It observes sessions and
//! asks for credentials through [`IdentityProvider`]. [`MemoryIdentity`] is
//! an in-process provider with a fixed account table, used by tests.

use crate::callbacks::CallbackRegistry;
use crate::error::{MirrorError, Result};
use crate::types::{Session, UserId};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Observer of session transitions; `None` means signed out.
pub type SessionCallback = Box<dyn Fn(Option<Session>) + Send + Sync>;

/// What the mirror needs from the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Register an observer. It is called once right away with the current
    /// session, then on every transition.
    fn on_session_change(&self, callback: SessionCallback);

    /// A fresh identity credential for `session`.
    async fn id_token(&self, session: &Session) -> Result<String>;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session>;

    async fn create_user_with_password(&self, email: &str, password: &str) -> Result<Session>;

    /// Interactive sign-in through an external provider (e.g. "google").
    async fn sign_in_with_provider(&self, provider: &str) -> Result<Session>;

    async fn send_email_verification(&self, session: &Session) -> Result<()>;

    async fn sign_out(&self) -> Result<()>;
}

struct Account {
    password: String,
    uid: UserId,
    verified: bool,
}

/// An identity provider backed by an in-memory account table.
pub struct MemoryIdentity {
    current: RwLock<Option<Session>>,
    observers: CallbackRegistry<Option<Session>>,
    accounts: Mutex<HashMap<String, Account>>,
    providers: Mutex<HashMap<String, Session>>,
    verification_emails: Mutex<Vec<String>>,
    fail_id_token: Mutex<Option<String>>,
    tokens_issued: AtomicU64,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(None),
            observers: CallbackRegistry::new(),
            accounts: Mutex::new(HashMap::new()),
            providers: Mutex::new(HashMap::new()),
            verification_emails: Mutex::new(Vec::new()),
            fail_id_token: Mutex::new(None),
            tokens_issued: AtomicU64::new(0),
        }
    }

    /// Add a password account.
    pub fn add_account(&self, email: &str, password: &str, uid: &str, verified: bool) {
        self.accounts.lock().insert(
            email.to_string(),
            Account {
                password: password.to_string(),
                uid: UserId::from(uid),
                verified,
            },
        );
    }

    /// Make `provider` sign in as `session`.
    pub fn add_provider_session(&self, provider: &str, session: Session) {
        self.providers.lock().insert(provider.to_string(), session);
    }

    /// Change the current session and notify observers.
    pub fn set_session(&self, session: Option<Session>) {
        *self.current.write() = session.clone();
        self.observers.dispatch(&session);
    }

    pub fn current_session(&self) -> Option<Session> {
        self.current.read().clone()
    }

    /// Addresses a verification email was sent to, in order.
    pub fn verification_emails(&self) -> Vec<String> {
        self.verification_emails.lock().clone()
    }

    pub fn tokens_issued(&self) -> u64 {
        self.tokens_issued.load(Ordering::SeqCst)
    }

    /// Make `id_token` fail with `reason` until cleared with `None`.
    pub fn fail_id_token(&self, reason: Option<String>) {
        *self.fail_id_token.lock() = reason;
    }
}

impl Default for MemoryIdentity {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    fn on_session_change(&self, callback: SessionCallback) {
        let current = self.current_session();
        callback(current);
        self.observers.register(move |session: &Option<Session>| callback(session.clone()));
    }

    async fn id_token(&self, session: &Session) -> Result<String> {
        if let Some(reason) = self.fail_id_token.lock().clone() {
            return Err(MirrorError::Authentication(reason));
        }
        let n = self.tokens_issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("id-token-{}-{}", session.uid, n))
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = {
            let accounts = self.accounts.lock();
            let account = accounts
                .get(email)
                .filter(|a| a.password == password)
                .ok_or_else(|| MirrorError::Authentication("invalid email or password".to_string()))?;
            Session {
                uid: account.uid.clone(),
                email: Some(email.to_string()),
                email_verified: account.verified,
            }
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn create_user_with_password(&self, email: &str, password: &str) -> Result<Session> {
        let session = {
            let mut accounts = self.accounts.lock();
            if accounts.contains_key(email) {
                return Err(MirrorError::Authentication("email already in use".to_string()));
            }
            let uid = UserId(format!("uid-{}", accounts.len() + 1));
            accounts.insert(
                email.to_string(),
                Account {
                    password: password.to_string(),
                    uid: uid.clone(),
                    verified: false,
                },
            );
            Session {
                uid,
                email: Some(email.to_string()),
                email_verified: false,
            }
        };
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn sign_in_with_provider(&self, provider: &str) -> Result<Session> {
        let session = self
            .providers
            .lock()
            .get(provider)
            .cloned()
            .ok_or_else(|| MirrorError::Authentication(format!("provider {provider} unavailable")))?;
        self.set_session(Some(session.clone()));
        Ok(session)
    }

    async fn send_email_verification(&self, session: &Session) -> Result<()> {
        let email = session
            .email
            .clone()
            .ok_or_else(|| MirrorError::Authentication("session has no email".to_string()))?;
        self.verification_emails.lock().push(email);
        Ok(())
    }

    async fn sign_out(&self) -> Result<()> {
        self.set_session(None);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_observer_gets_current_session_first() {
        let identity = MemoryIdentity::new();
        identity.set_session(Some(Session::new("u1")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = Arc::clone(&seen);
        identity.on_session_change(Box::new(move |session| {
            s.lock().push(session.map(|s| s.uid.0))
        }));
        identity.set_session(None);

        assert_eq!(*seen.lock(), vec![Some("u1".to_string()), None]);
    }

    #[tokio::test]
    async fn test_password_sign_in() {
        let identity = MemoryIdentity::new();
        identity.add_account("a@example.com", "pw", "u1", true);

        assert!(identity.sign_in_with_password("a@example.com", "nope").await.is_err());
        let session = identity.sign_in_with_password("a@example.com", "pw").await.unwrap();
        assert_eq!(session.uid, UserId::from("u1"));
        assert_eq!(identity.current_session(), Some(session));
    }

    #[tokio::test]
    async fn test_id_tokens_are_fresh() {
        let identity = MemoryIdentity::new();
        let session = Session::new("u1");
        let a = identity.id_token(&session).await.unwrap();
        let b = identity.id_token(&session).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(identity.tokens_issued(), 2);
    }
}
