//! The local state tree.

use crate::types::{EnrollmentRecord, Program, ProgramId, User};
use std::collections::HashMap;
use std::sync::Arc;

/// Snapshot of everything the mirror knows.
///
/// Collections sit behind `Arc` so cloning a snapshot is cheap and a
/// transform only copies the part it replaces.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LocalState {
    /// The bound user's document, None before the first push or when signed out.
    pub user: Option<Arc<User>>,
    /// Enrollment records keyed by program id, as of the latest push.
    pub user_enrollments: Arc<HashMap<ProgramId, EnrollmentRecord>>,
    /// Available programs in push order.
    pub programs: Arc<Vec<Program>>,
    pub onboarded: bool,
}

impl LocalState {
    pub fn enrollment(&self, program_id: &ProgramId) -> Option<&EnrollmentRecord> {
        self.user_enrollments.get(program_id)
    }

    pub fn is_enrolled(&self, program_id: &ProgramId) -> bool {
        self.enrollment(program_id).map(|r| r.enrolled).unwrap_or(false)
    }

    pub fn program(&self, program_id: &ProgramId) -> Option<&Program> {
        self.programs.iter().find(|p| &p.program_id == program_id)
    }
}
