use chrono::NaiveDateTime;
use serde::Serialize;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumIter, Serialize)]
#[serde(into = "u8")]
pub enum AuditKind {
    UserCreated = 1,
    UserUpdated = 2,
    PasswordChanged = 3,
    IncidentResubmitted = 4,
    IncidentConflict = 5,
    IncidentResolved = 6,
    IncidentRejected = 7,
    EntryReplaced = 8,
    EntryDeleted = 9,
}

impl From<AuditKind> for u8 {
    fn from(kind: AuditKind) -> u8 {
        kind as u8
    }
}

impl AuditKind {
    pub fn from_id(id: u8) -> Option<Self> {
        AuditKind::iter().find(|k| *k as u8 == id)
    }

    pub fn entity(self) -> AuditEntity {
        match self {
            AuditKind::UserCreated | AuditKind::UserUpdated | AuditKind::PasswordChanged => {
                AuditEntity::User
            }
            AuditKind::EntryReplaced | AuditKind::EntryDeleted => AuditEntity::ClockEntry,
            _ => AuditEntity::Incident,
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, Serialize)]
#[serde(into = "u8")]
pub enum AuditEntity {
    User = 1,
    Incident = 2,
    ClockEntry = 3,
}

impl From<AuditEntity> for u8 {
    fn from(entity: AuditEntity) -> u8 {
        entity as u8
    }
}

impl AuditEntity {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(AuditEntity::User),
            2 => Some(AuditEntity::Incident),
            3 => Some(AuditEntity::ClockEntry),
            _ => None,
        }
    }
}

/// Record to append to `audit_log`.
#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub author_id: Option<u64>,
    pub kind: AuditKind,
    pub entity_id: u64,
    pub at: NaiveDateTime,
    pub reason: Option<String>,
}

impl NewAuditEntry {
    pub fn new(author_id: u64, kind: AuditKind, entity_id: u64, at: NaiveDateTime) -> Self {
        Self {
            author_id: Some(author_id),
            kind,
            entity_id,
            at,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct AuditEntry {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = 3)]
    pub author_id: Option<u64>,
    /// see `AuditKind` ids
    #[schema(example = 4)]
    pub kind: u8,
    #[schema(example = 2)]
    pub entity: u8,
    #[schema(example = 17)]
    pub entity_id: u64,
    #[schema(example = "2025-03-03T10:15:00", format = "date-time", value_type = String)]
    pub at: NaiveDateTime,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_map_to_their_entity() {
        assert_eq!(AuditKind::PasswordChanged.entity(), AuditEntity::User);
        assert_eq!(AuditKind::IncidentConflict.entity(), AuditEntity::Incident);
        assert_eq!(AuditKind::EntryDeleted.entity(), AuditEntity::ClockEntry);
    }

    #[test]
    fn kind_ids_round_trip() {
        for kind in AuditKind::iter() {
            assert_eq!(AuditKind::from_id(kind as u8), Some(kind));
        }
        assert_eq!(AuditKind::from_id(0), None);
        assert_eq!(AuditEntity::from_id(3), Some(AuditEntity::ClockEntry));
    }
}
