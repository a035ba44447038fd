//! Conflict status, resolution strategies and the conflict payload.

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{DeltaPayload, DeviceId, SyncVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle of a conflict record.
///
/// Created `Unresolved`; moves to one of the resolved variants exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConflictStatus {
    /// Waiting for a decision.
    Unresolved,
    /// Resolved in favour of the device's payload.
    ClientWins,
    /// Resolved in favour of the stored payload.
    ServerWins,
    /// Resolved with a caller-supplied merged payload.
    ManualMerge,
}

impl ConflictStatus {
    /// Returns true once a strategy has been applied.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ConflictStatus::Unresolved)
    }
}

impl From<ResolutionStrategy> for ConflictStatus {
    fn from(strategy: ResolutionStrategy) -> Self {
        match strategy {
            ResolutionStrategy::ClientWins => ConflictStatus::ClientWins,
            ResolutionStrategy::ServerWins => ConflictStatus::ServerWins,
            ResolutionStrategy::ManualMerge => ConflictStatus::ManualMerge,
        }
    }
}

impl fmt::Display for ConflictStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictStatus::Unresolved => "unresolved",
            ConflictStatus::ClientWins => "client-wins",
            ConflictStatus::ServerWins => "server-wins",
            ConflictStatus::ManualMerge => "manual-merge",
        };
        f.write_str(name)
    }
}

impl FromStr for ConflictStatus {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "unresolved" => Ok(ConflictStatus::Unresolved),
            "client-wins" | "clientwins" => Ok(ConflictStatus::ClientWins),
            "server-wins" | "serverwins" => Ok(ConflictStatus::ServerWins),
            "manual-merge" | "manualmerge" => Ok(ConflictStatus::ManualMerge),
            _ => Err(ProtocolError::unknown("conflict status", s)),
        }
    }
}

/// How a conflict gets resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionStrategy {
    /// Write the device's original payload at a new version.
    ClientWins,
    /// Keep whatever the store currently holds.
    ServerWins,
    /// Write a caller-supplied merged payload at a new version.
    ManualMerge,
}

impl ResolutionStrategy {
    /// Returns true if resolving writes to the version store.
    pub fn writes_version(&self) -> bool {
        !matches!(self, ResolutionStrategy::ServerWins)
    }

    /// Returns true if the caller must supply a merged payload.
    pub fn requires_payload(&self) -> bool {
        matches!(self, ResolutionStrategy::ManualMerge)
    }
}

impl fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ConflictStatus::from(*self).fmt(f)
    }
}

impl FromStr for ResolutionStrategy {
    type Err = ProtocolError;

    fn from_str(s: &str) -> ProtocolResult<Self> {
        match s.parse::<ConflictStatus>() {
            Ok(ConflictStatus::ClientWins) => Ok(ResolutionStrategy::ClientWins),
            Ok(ConflictStatus::ServerWins) => Ok(ResolutionStrategy::ServerWins),
            Ok(ConflictStatus::ManualMerge) => Ok(ResolutionStrategy::ManualMerge),
            _ => Err(ProtocolError::unknown("resolution strategy", s)),
        }
    }
}

/// Policy for resolving conflicts without an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AutoResolvePolicy {
    /// Leave every conflict for a human.
    #[default]
    Manual,
    /// Stored state always wins.
    ServerWins,
    /// The device's payload always wins.
    ClientWins,
}

impl AutoResolvePolicy {
    /// Returns true if this policy resolves conflicts on its own.
    pub fn auto_resolves(&self) -> bool {
        !matches!(self, AutoResolvePolicy::Manual)
    }

    /// The strategy this policy applies, if any.
    pub fn strategy(&self) -> Option<ResolutionStrategy> {
        match self {
            AutoResolvePolicy::Manual => None,
            AutoResolvePolicy::ServerWins => Some(ResolutionStrategy::ServerWins),
            AutoResolvePolicy::ClientWins => Some(ResolutionStrategy::ClientWins),
        }
    }
}

/// A conflict as reported to devices and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDto {
    /// Conflict id.
    pub id: Uuid,
    /// Batch the conflicting delta arrived in.
    pub batch_id: Uuid,
    /// Device that submitted the conflicting delta.
    pub device_id: DeviceId,
    /// Entity type.
    pub entity_type: String,
    /// Entity id.
    pub entity_id: Uuid,
    /// Payload the device tried to write.
    pub client_payload: DeltaPayload,
    /// Payload stored when the conflict was detected.
    pub server_payload: DeltaPayload,
    /// Version the device based its change on.
    pub client_version: SyncVersion,
    /// Version stored when the conflict was detected.
    pub server_version: SyncVersion,
    /// Current status.
    pub status: ConflictStatus,
    /// When the conflict was detected.
    pub detected_at: DateTime<Utc>,
    /// Payload chosen by the resolution.
    #[serde(default)]
    pub resolved_payload: Option<DeltaPayload>,
    /// When the conflict was resolved.
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_strategy() {
        assert_eq!(
            ConflictStatus::from(ResolutionStrategy::ClientWins),
            ConflictStatus::ClientWins
        );
        assert_eq!(
            ConflictStatus::from(ResolutionStrategy::ManualMerge),
            ConflictStatus::ManualMerge
        );
        assert!(!ConflictStatus::Unresolved.is_resolved());
        assert!(ConflictStatus::ServerWins.is_resolved());
    }

    #[test]
    fn parse_names() {
        assert_eq!(
            "client-wins".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::ClientWins
        );
        assert_eq!(
            "ManualMerge".parse::<ResolutionStrategy>().unwrap(),
            ResolutionStrategy::ManualMerge
        );
        assert_eq!(
            "server_wins".parse::<ConflictStatus>().unwrap(),
            ConflictStatus::ServerWins
        );
        assert!("unresolved".parse::<ResolutionStrategy>().is_err());
        assert!("bogus".parse::<ConflictStatus>().is_err());
    }

    #[test]
    fn display_matches_parse() {
        for strategy in [
            ResolutionStrategy::ClientWins,
            ResolutionStrategy::ServerWins,
            ResolutionStrategy::ManualMerge,
        ] {
            assert_eq!(strategy.to_string().parse::<ResolutionStrategy>().unwrap(), strategy);
        }
    }

    #[test]
    fn policy_strategies() {
        assert!(!AutoResolvePolicy::Manual.auto_resolves());
        assert_eq!(AutoResolvePolicy::Manual.strategy(), None);
        assert_eq!(
            AutoResolvePolicy::ServerWins.strategy(),
            Some(ResolutionStrategy::ServerWins)
        );
        assert!(AutoResolvePolicy::ClientWins.auto_resolves());
    }

    #[test]
    fn only_server_wins_skips_the_write() {
        assert!(!ResolutionStrategy::ServerWins.writes_version());
        assert!(ResolutionStrategy::ClientWins.writes_version());
        assert!(ResolutionStrategy::ManualMerge.writes_version());
        assert!(ResolutionStrategy::ManualMerge.requires_payload());
        assert!(!ResolutionStrategy::ClientWins.requires_payload());
    }

    #[test]
    fn dto_json_uses_camel_case() {
        let dto = ConflictDto {
            id: Uuid::nil(),
            batch_id: Uuid::nil(),
            device_id: DeviceId::from_uuid(Uuid::nil()),
            entity_type: "photo".into(),
            entity_id: Uuid::nil(),
            client_payload: DeltaPayload::from("a"),
            server_payload: DeltaPayload::from("b"),
            client_version: SyncVersion::new(0),
            server_version: SyncVersion::new(1),
            status: ConflictStatus::Unresolved,
            detected_at: Utc::now(),
            resolved_payload: None,
            resolved_at: None,
        };
        let json = serde_json::to_value(&dto).unwrap();
        assert!(json.get("clientVersion").is_some());
        assert!(json.get("detectedAt").is_some());
        assert_eq!(json["serverVersion"], 1);
    }
}
