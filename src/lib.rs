//! # Program Mirror
//!
//! A reactive local mirror of a signed-in user's remote documents: the user
//! document, the user's program enrollments, and the shared program list.
//!
//! ## Core Concepts
//!
//! - **State**: One immutable [`LocalState`] snapshot, replaced by ordered transforms
//! - **Watches**: Live remote watches that push full snapshots into the state
//! - **Bridge**: Identity session transitions rebind the watches to the new user
//! - **Tokens**: After sign-in, a per-program token is exchanged and broadcast
//!
//! ## Example
//!
//! ```ignore
//! use program_mirror::{ChannelEventBus, MemoryIdentity, MemoryRemote, Mirror, MirrorConfig};
//!
//! let mirror = Mirror::new(
//!     MirrorConfig::emulator("demo"),
//!     Arc::new(MemoryRemote::new()),
//!     Arc::new(MemoryIdentity::new()),
//!     Arc::new(ChannelEventBus::new()),
//! );
//!
//! mirror.on_next_state(|state| println!("{} programs", state.programs.len()));
//! let initial = mirror.initialize().await?;
//!
//! mirror.set_enrollment(&ProgramId::from("p1"), true).await?;
//! ```

pub mod bridge;
pub mod callbacks;
pub mod clock;
pub mod enrollment;
pub mod error;
pub mod identity;
pub mod mirror;
pub mod remote;
pub mod signin;
pub mod state;
pub mod subscriptions;
pub mod tokens;
pub mod types;

// Re-exports
pub use bridge::{AuthSessionBridge, BindingState};
pub use callbacks::{CallbackId, CallbackRegistry};
pub use clock::{Clock, FixedClock, SystemClock};
pub use enrollment::EnrollmentCoordinator;
pub use error::{MirrorError, Result};
pub use identity::{IdentityProvider, MemoryIdentity, SessionCallback};
pub use mirror::{InitialState, Mirror, MirrorConfig, MirrorParts};
pub use remote::{
    CollectionListener, DocumentListener, ListenerRegistration, MemoryRemote, RemoteStore,
    WatchEvent,
};
pub use signin::{route_message, HostMessage, HostReply, SignInFlows, SignInOutcome, GOOGLE_PROVIDER};
pub use state::{LocalState, StateContainer, StateTransform};
pub use subscriptions::{Binding, Generation, WatchKind, WatchRegistry, WatchTargets};
pub use tokens::{
    ChannelEventBus, EventBus, HttpTokenEndpoint, SignupCompleted, TokenEndpoint,
    TokenExchangeWorker, SIGNUP_COMPLETED_EVENT,
};
pub use types::*;
