//! Reactive local state.
//!
//! The mirror's state is a single immutable [`LocalState`] value held by a
//! [`StateContainer`]. Every change is a transform applied to a copy of the
//! current snapshot; listeners see each new snapshot in order.

mod container;
mod local;
mod operations;

pub use container::{StateContainer, StateTransform};
pub use local::LocalState;
pub use operations::{
    clear_user, enrollments_from_snapshot, programs_from_snapshot, replace_enrollments,
    replace_programs, replace_user,
};
