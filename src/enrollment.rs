//! Enrollment toggling.
//!
//! The coordinator never writes to the local state. It computes the next
//! record from the latest snapshot, merges it into the remote enrollment
//! document, and leaves reconciliation to the enrollment watch.

use crate::clock::Clock;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::state::StateContainer;
use crate::subscriptions::WatchTargets;
use crate::types::{EnrollmentRecord, PartialUpdate, ProgramId, Timestamp, UserId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Merges and persists per-user enrollment records.
pub struct EnrollmentCoordinator {
    remote: Arc<dyn RemoteStore>,
    state: Arc<StateContainer>,
    targets: WatchTargets,
    clock: Arc<dyn Clock>,
}

impl EnrollmentCoordinator {
    pub fn new(
        remote: Arc<dyn RemoteStore>,
        state: Arc<StateContainer>,
        targets: WatchTargets,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            remote,
            state,
            targets,
            clock,
        }
    }

    /// Compute the record to write.
    ///
    /// `joined_on` is stamped when the record moves from not enrolled to
    /// enrolled, and kept as is otherwise (including on un-enroll).
    pub fn merged_record(
        current: Option<&EnrollmentRecord>,
        program_id: &ProgramId,
        enroll: bool,
        now: Timestamp,
    ) -> EnrollmentRecord {
        let mut record = current
            .cloned()
            .unwrap_or_else(|| EnrollmentRecord::new(program_id.clone()));
        record.program_id = program_id.clone();

        if enroll && (!record.enrolled || record.joined_on.is_none()) {
            record.joined_on = Some(now);
        }
        record.enrolled = enroll;
        record
    }

    /// Enroll `user_id` in `program_id`, or withdraw them.
    ///
    /// Returns `Ok(true)` once the remote write is acknowledged. The local
    /// state only changes when the enrollment watch delivers the write back.
    /// Concurrent calls for the same program are not serialized; the last
    /// write to reach the remote wins.
    pub async fn set_enrollment(
        &self,
        user_id: &UserId,
        program_id: &ProgramId,
        enroll: bool,
    ) -> Result<bool> {
        let snapshot = self.state.snapshot();
        let record = Self::merged_record(
            snapshot.enrollment(program_id),
            program_id,
            enroll,
            self.clock.now(),
        );

        let path = self.targets.enrollment_document(user_id, program_id);
        let update = PartialUpdate::from_record(&record)?;

        debug!(user_id = %user_id, program_id = %program_id, enroll, "Writing enrollment");
        if let Err(e) = self.remote.set(&path, &update).await {
            warn!(user_id = %user_id, program_id = %program_id, error = %e, "Enrollment write failed");
            return Err(e);
        }
        Ok(true)
    }
}
