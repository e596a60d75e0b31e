//! Core types for the mirror.

use crate::error::{MirrorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A remote document body: field name to JSON value.
pub type Document = serde_json::Map<String, Value>;

/// Opaque identity-provider issued user id.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

/// Stable program identifier, shared by all users.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProgramId(pub String);

impl fmt::Debug for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProgramId({})", self.0)
    }
}

impl fmt::Display for ProgramId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ProgramId {
    fn from(s: &str) -> Self {
        ProgramId(s.to_string())
    }
}

impl ProgramId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }

    pub fn from_millis(millis: i64) -> Self {
        Timestamp(millis * 1000)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

// --- Paths ---

/// Address of a single remote document: `collection/id[/collection/id]*`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DocumentPath(Vec<String>);

/// Address of a remote collection: `collection[/id/collection]*`.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CollectionPath(Vec<String>);

fn split_segments(path: &str) -> Result<Vec<String>> {
    let segments: Vec<String> = path.split('/').map(str::to_string).collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(MirrorError::InvalidPath(path.to_string()));
    }
    Ok(segments)
}

impl CollectionPath {
    /// A top-level collection.
    pub fn root(name: impl Into<String>) -> Self {
        CollectionPath(vec![name.into()])
    }

    /// Parse a slash-separated path with an odd number of segments.
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 == 0 {
            return Err(MirrorError::InvalidPath(path.to_string()));
        }
        Ok(CollectionPath(segments))
    }

    /// Address a document inside this collection.
    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        let mut segments = self.0.clone();
        segments.push(id.into());
        DocumentPath(segments)
    }

    /// The collection's own name (last segment).
    pub fn name(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }
}

impl DocumentPath {
    /// Parse a slash-separated path with an even number of segments.
    pub fn parse(path: &str) -> Result<Self> {
        let segments = split_segments(path)?;
        if segments.len() % 2 != 0 {
            return Err(MirrorError::InvalidPath(path.to_string()));
        }
        Ok(DocumentPath(segments))
    }

    /// Address a subcollection of this document.
    pub fn collection(&self, name: impl Into<String>) -> CollectionPath {
        let mut segments = self.0.clone();
        segments.push(name.into());
        CollectionPath(segments)
    }

    /// The collection containing this document.
    pub fn parent(&self) -> CollectionPath {
        CollectionPath(self.0[..self.0.len() - 1].to_vec())
    }

    /// The document id (last segment).
    pub fn id(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl fmt::Debug for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DocumentPath({})", self)
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("/"))
    }
}

impl fmt::Debug for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CollectionPath({})", self)
    }
}

// --- Snapshots ---

/// Point-in-time state of one remote document.
#[derive(Clone, Debug, PartialEq)]
pub struct DocumentSnapshot {
    pub path: DocumentPath,
    /// None when the document does not exist.
    pub data: Option<Document>,
}

/// Point-in-time state of a whole remote collection.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSnapshot {
    pub path: CollectionPath,
    /// Every existing document, in the order the remote delivered them.
    pub documents: Vec<DocumentSnapshot>,
}

// --- Writes ---

/// New value for one field of a merged write.
#[derive(Clone, Debug, PartialEq)]
pub enum FieldValue {
    /// Overwrite the field (a JSON null is written as null).
    Set(Value),
    /// Remove the field remotely.
    Delete,
}

/// A field-level merge write. Fields not named are left untouched remotely.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartialUpdate {
    fields: BTreeMap<String, FieldValue>,
}

impl PartialUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field to a value.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), FieldValue::Set(value.into()));
        self
    }

    /// Remove a field.
    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.fields.insert(field.into(), FieldValue::Delete);
        self
    }

    /// Build an update that sets every top-level field of a serializable record.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self> {
        match serde_json::to_value(record)? {
            Value::Object(map) => Ok(Self {
                fields: map
                    .into_iter()
                    .map(|(k, v)| (k, FieldValue::Set(v)))
                    .collect(),
            }),
            other => Err(MirrorError::Serialization(format!(
                "expected an object, got {other}"
            ))),
        }
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Merge this update into an existing document body.
    pub fn apply_to(&self, doc: &mut Document) {
        for (name, value) in &self.fields {
            match value {
                FieldValue::Set(v) => {
                    doc.insert(name.clone(), v.clone());
                }
                FieldValue::Delete => {
                    doc.remove(name);
                }
            }
        }
    }
}

// --- Records ---

/// The signed-in user's remote document.
///
/// Profile and consent fields are owned by the remote store and kept opaque.
#[derive(Clone, Debug, PartialEq)]
pub struct User {
    pub id: UserId,
    pub data: Document,
}

impl User {
    pub fn new(id: UserId, data: Document) -> Self {
        Self { id, data }
    }

    /// The `onboarded` flag, false when absent or not a boolean.
    pub fn onboarded(&self) -> bool {
        self.data
            .get("onboarded")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// A program users can enroll in.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Program {
    pub program_id: ProgramId,
    /// Remaining descriptor fields.
    #[serde(flatten)]
    pub extra: Document,
}

impl Program {
    pub fn new(program_id: impl Into<ProgramId>) -> Self {
        Self {
            program_id: program_id.into(),
            extra: Document::new(),
        }
    }
}

impl From<String> for ProgramId {
    fn from(s: String) -> Self {
        ProgramId(s)
    }
}

/// Per-(user, program) participation record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentRecord {
    pub program_id: ProgramId,
    #[serde(default)]
    pub enrolled: bool,
    /// Set on each transition to enrolled, never cleared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joined_on: Option<Timestamp>,
}

impl EnrollmentRecord {
    /// A not-enrolled record with no join time.
    pub fn new(program_id: ProgramId) -> Self {
        Self {
            program_id,
            enrolled: false,
            joined_on: None,
        }
    }
}

/// An authenticated identity-provider session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    pub uid: UserId,
    pub email: Option<String>,
    pub email_verified: bool,
}

impl Session {
    pub fn new(uid: impl Into<UserId>) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            email_verified: true,
        }
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        UserId(s)
    }
}
