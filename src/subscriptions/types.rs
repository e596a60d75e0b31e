//! Watch types.

use crate::types::{CollectionPath, DocumentPath, ProgramId, UserId};
use std::fmt;

/// Marks which user binding a watch belongs to.
///
/// Every bind or unbind moves to a new generation. Events from a watch of an
/// older generation are discarded.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Generation(pub u64);

impl Generation {
    pub fn next(self) -> Self {
        Generation(self.0 + 1)
    }
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Gen({})", self.0)
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The three live watches the mirror keeps.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum WatchKind {
    UserDocument,
    UserEnrollments,
    Programs,
}

impl WatchKind {
    /// Whether the watch follows the bound user.
    pub fn is_user_scoped(self) -> bool {
        !matches!(self, WatchKind::Programs)
    }
}

impl fmt::Display for WatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WatchKind::UserDocument => "user document",
            WatchKind::UserEnrollments => "user enrollments",
            WatchKind::Programs => "programs",
        };
        f.write_str(name)
    }
}

/// Where the watched documents live.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatchTargets {
    /// Top-level collection of user documents.
    pub users_collection: String,
    /// Per-user subcollection of enrollment records.
    pub enrollments_collection: String,
    /// Top-level collection of programs.
    pub programs_collection: String,
}

impl Default for WatchTargets {
    fn default() -> Self {
        Self {
            users_collection: "users".to_string(),
            enrollments_collection: "enrollments".to_string(),
            programs_collection: "programs".to_string(),
        }
    }
}

impl WatchTargets {
    pub fn user_document(&self, user_id: &UserId) -> DocumentPath {
        CollectionPath::root(self.users_collection.as_str()).doc(user_id.0.as_str())
    }

    pub fn user_enrollments(&self, user_id: &UserId) -> CollectionPath {
        self.user_document(user_id)
            .collection(self.enrollments_collection.as_str())
    }

    pub fn enrollment_document(&self, user_id: &UserId, program_id: &ProgramId) -> DocumentPath {
        self.user_enrollments(user_id).doc(program_id.as_str())
    }

    pub fn programs(&self) -> CollectionPath {
        CollectionPath::root(self.programs_collection.as_str())
    }
}

/// The user the registry currently mirrors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub user_id: UserId,
    pub generation: Generation,
    pub document: DocumentPath,
}
