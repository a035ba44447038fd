//! Identity, versioning and delta value types.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifies the logical record a delta targets.
///
/// Immutable once built; used as the key of the version store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    /// Kind of record, e.g. `"installation"` or `"photo"`.
    pub entity_type: String,
    /// Identifier of the record within its type.
    pub entity_id: Uuid,
}

impl EntityReference {
    /// Creates a new entity reference.
    pub fn new(entity_type: impl Into<String>, entity_id: Uuid) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
        }
    }
}

impl fmt::Display for EntityReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.entity_type, self.entity_id)
    }
}

/// Per-entity version number.
///
/// `0` means the entity has never been written. Accepted writes only ever
/// move a version forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SyncVersion(u64);

impl SyncVersion {
    /// The version of an entity that has never been written.
    pub const UNVERSIONED: SyncVersion = SyncVersion(0);

    /// Creates a version from a raw number.
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw number.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Returns the next version.
    #[must_use]
    pub const fn increment(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    /// Returns true if no write has been accepted yet.
    #[must_use]
    pub const fn is_unversioned(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SyncVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for SyncVersion {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Identifies a submitting device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generates a fresh random device id.
    #[must_use]
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing uuid.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying uuid.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DeviceId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| ProtocolError::unknown("device id", s))
    }
}

/// Kind of change a delta carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaOperation {
    /// The device created the entity.
    Create,
    /// The device changed the entity.
    Update,
    /// The device removed the entity.
    Delete,
}

impl DeltaOperation {
    /// Converts to a numeric code.
    pub fn to_code(&self) -> u8 {
        match self {
            DeltaOperation::Create => 1,
            DeltaOperation::Update => 2,
            DeltaOperation::Delete => 3,
        }
    }

    /// Converts from a numeric code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(DeltaOperation::Create),
            2 => Some(DeltaOperation::Update),
            3 => Some(DeltaOperation::Delete),
            _ => None,
        }
    }

    /// Returns true for tombstoning operations.
    pub fn is_delete(&self) -> bool {
        matches!(self, DeltaOperation::Delete)
    }
}

impl fmt::Display for DeltaOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeltaOperation::Create => "create",
            DeltaOperation::Update => "update",
            DeltaOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// The serialized state of an entity after a delta.
///
/// Treated as an uninterpreted blob. Collaborating domains own its meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeltaPayload(Vec<u8>);

impl DeltaPayload {
    /// Wraps raw bytes.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// An empty payload, used as the tombstone body of deletes.
    #[must_use]
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Returns the raw bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Consumes the payload and returns its bytes.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Returns the payload as UTF-8 text, if it is valid UTF-8.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    /// Size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the payload has no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for DeltaPayload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for DeltaPayload {
    fn from(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }
}

impl From<String> for DeltaPayload {
    fn from(text: String) -> Self {
        Self(text.into_bytes())
    }
}

/// Lifecycle of a submitted batch.
///
/// `Pending --process--> Completed | PartialConflict`. `Processing` is only
/// observed while a processor holds the batch. `Failed` marks an
/// unrecoverable processing error, never a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    /// Submitted, not yet processed.
    Pending,
    /// A processor is walking the deltas.
    Processing,
    /// Every delta was applied.
    Completed,
    /// At least one delta produced a conflict.
    PartialConflict,
    /// Processing failed for a reason retrying will not fix.
    Failed,
}

impl BatchStatus {
    /// Returns true for statuses a batch never leaves.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::PartialConflict | BatchStatus::Failed
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::PartialConflict => "partial-conflict",
            BatchStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn unversioned_is_zero() {
        assert!(SyncVersion::UNVERSIONED.is_unversioned());
        assert_eq!(SyncVersion::default(), SyncVersion::UNVERSIONED);
        assert!(!SyncVersion::new(1).is_unversioned());
    }

    #[test]
    fn entity_reference_display() {
        let id = Uuid::nil();
        let entity = EntityReference::new("installation", id);
        assert_eq!(
            entity.to_string(),
            "installation/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn operation_codes() {
        for op in [
            DeltaOperation::Create,
            DeltaOperation::Update,
            DeltaOperation::Delete,
        ] {
            assert_eq!(DeltaOperation::from_code(op.to_code()), Some(op));
        }
        assert_eq!(DeltaOperation::from_code(0), None);
        assert!(DeltaOperation::Delete.is_delete());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
        assert!(BatchStatus::Completed.is_terminal());
        assert!(BatchStatus::PartialConflict.is_terminal());
        assert!(BatchStatus::Failed.is_terminal());
    }

    #[test]
    fn payload_text_view() {
        let payload = DeltaPayload::from(r#"{"depth":3}"#);
        assert_eq!(payload.as_text(), Some(r#"{"depth":3}"#));
        assert_eq!(DeltaPayload::new(vec![0xff, 0xfe]).as_text(), None);
        assert!(DeltaPayload::empty().is_empty());
    }

    #[test]
    fn device_id_parses() {
        let device = DeviceId::random();
        let parsed: DeviceId = device.to_string().parse().unwrap();
        assert_eq!(parsed, device);
        assert!("not-a-uuid".parse::<DeviceId>().is_err());
    }

    proptest! {
        #[test]
        fn increment_is_strictly_greater(raw in 0u64..u64::MAX) {
            let version = SyncVersion::new(raw);
            prop_assert!(version.increment() > version);
            prop_assert_eq!(version.increment().get(), raw + 1);
        }
    }
}
