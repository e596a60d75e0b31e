//! Transforms derived from remote snapshots.
//!
//! Each function rewrites one part of a draft [`LocalState`] from a full
//! snapshot. Nothing here merges with the previous value: the draft always
//! ends up reflecting exactly the snapshot it was given.

use crate::state::LocalState;
use crate::types::{
    CollectionSnapshot, Document, DocumentSnapshot, EnrollmentRecord, Program, ProgramId, User,
    UserId,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

const PROGRAM_ID_FIELD: &str = "programId";

/// Replace `user` (and `onboarded`) with the pushed user document.
pub fn replace_user(draft: &mut LocalState, snapshot: &DocumentSnapshot) {
    let user = snapshot
        .data
        .as_ref()
        .map(|data| User::new(UserId(snapshot.path.id().to_string()), data.clone()));

    draft.onboarded = user.as_ref().map(User::onboarded).unwrap_or(false);
    draft.user = user.map(Arc::new);
}

/// Replace `user_enrollments` with the records in a collection snapshot.
pub fn replace_enrollments(draft: &mut LocalState, snapshot: &CollectionSnapshot) {
    draft.user_enrollments = Arc::new(enrollments_from_snapshot(snapshot));
}

/// Replace `programs` with the records in a collection snapshot.
pub fn replace_programs(draft: &mut LocalState, snapshot: &CollectionSnapshot) {
    draft.programs = Arc::new(programs_from_snapshot(snapshot));
}

/// Forget everything that belongs to the signed-in user.
pub fn clear_user(draft: &mut LocalState) {
    draft.user = None;
    draft.user_enrollments = Arc::new(HashMap::new());
    draft.onboarded = false;
}

/// Key every enrollment record in the snapshot by its program id.
pub fn enrollments_from_snapshot(
    snapshot: &CollectionSnapshot,
) -> HashMap<ProgramId, EnrollmentRecord> {
    decode_records::<EnrollmentRecord>(snapshot)
        .map(|record| (record.program_id.clone(), record))
        .collect()
}

/// Decode every program in the snapshot, keeping push order.
pub fn programs_from_snapshot(snapshot: &CollectionSnapshot) -> Vec<Program> {
    decode_records::<Program>(snapshot).collect()
}

/// Decode documents that carry a `programId`, falling back to the document id.
/// Undecodable documents are logged and skipped.
fn decode_records<T: DeserializeOwned>(
    snapshot: &CollectionSnapshot,
) -> impl Iterator<Item = T> + '_ {
    snapshot.documents.iter().filter_map(move |doc| {
        let mut data: Document = doc.data.clone()?;
        data.entry(PROGRAM_ID_FIELD)
            .or_insert_with(|| Value::String(doc.path.id().to_string()));

        match serde_json::from_value(Value::Object(data)) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(path = %doc.path, collection = %snapshot.path, error = %e, "Skipping malformed document");
                None
            }
        }
    })
}
