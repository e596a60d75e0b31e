//! Error types for the mirror.

use crate::types::ProgramId;
use thiserror::Error;

/// Main error type for mirror operations.
#[derive(Debug, Error)]
pub enum MirrorError {
    #[error("Remote store error: {0}")]
    Remote(String),

    #[error("Failed to establish {target} watch: {reason}")]
    WatchSetup { target: String, reason: String },

    #[error("No user document is bound")]
    NotBound,

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Email address is not verified")]
    EmailNotVerified,

    #[error("Token exchange failed for program {program_id}: {reason}")]
    TokenExchange {
        program_id: ProgramId,
        reason: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid host message: {0}")]
    InvalidMessage(String),
}

impl MirrorError {
    /// Whether the error came from the token exchange sweep.
    pub fn is_token_exchange(&self) -> bool {
        matches!(self, MirrorError::TokenExchange { .. })
    }
}

impl From<serde_json::Error> for MirrorError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            MirrorError::Deserialization(e.to_string())
        } else {
            MirrorError::Serialization(e.to_string())
        }
    }
}

/// Result type for mirror operations.
pub type Result<T> = std::result::Result<T, MirrorError>;
