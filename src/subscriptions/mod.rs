//! Live remote watches feeding the local state.
//!
//! The registry keeps three watches:
//! - the bound user's document
//! - the bound user's enrollment collection
//! - the shared program collection
//!
//! Every pushed snapshot becomes a transform on the
//! [`StateContainer`](crate::state::StateContainer). Each push replaces its
//! part of the state wholesale; nothing is diffed.
//!
//! # Example
//!
//! ```ignore
//! let registry = WatchRegistry::new(remote, state, WatchTargets::default());
//!
//! registry.bind_user_document(&UserId::from("u1"));
//! registry.watch_all().await?;
//!
//! // Switching user supersedes the old watches.
//! registry.bind_user_document(&UserId::from("u2"));
//! registry.watch_all().await?;
//! ```

mod registry;
mod types;

pub use registry::WatchRegistry;
pub use types::{Binding, Generation, WatchKind, WatchTargets};
