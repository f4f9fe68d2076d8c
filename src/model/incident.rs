use crate::model::clock_entry::{ClockEntry, NewClockEntry};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, EnumIter};
use utoipa::ToSchema;

#[derive(Debug, Copy, Clone, Eq, PartialEq, AsRefStr, EnumIter, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum IncidentKind {
    NewEntry = 1,
    DeleteEntry = 2,
    ExitCorrection = 3,
}

impl From<IncidentKind> for u8 {
    fn from(kind: IncidentKind) -> u8 {
        kind as u8
    }
}

impl TryFrom<u8> for IncidentKind {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(IncidentKind::NewEntry),
            2 => Ok(IncidentKind::DeleteEntry),
            3 => Ok(IncidentKind::ExitCorrection),
            _ => Err(format!("unknown incident kind {id}")),
        }
    }
}

/// Incident states plus the two actions a manager can request.
///
/// ```text
/// Requested    --Resolve--> Resolved | Conflict | ResolveError
/// ResolveError --Resolve--> Resolved | Conflict | ResolveError
/// Requested    --Reject---> Rejected
/// Conflict | Rejected --resubmit--> Requested
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq, AsRefStr, EnumIter, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum IncidentState {
    Requested = 1,
    Conflict = 2,
    ResolveError = 3,
    Rejected = 4,
    Resolved = 5,
    Resolve = 6,
    Reject = 7,
}

impl From<IncidentState> for u8 {
    fn from(state: IncidentState) -> u8 {
        state as u8
    }
}

impl TryFrom<u8> for IncidentState {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(IncidentState::Requested),
            2 => Ok(IncidentState::Conflict),
            3 => Ok(IncidentState::ResolveError),
            4 => Ok(IncidentState::Rejected),
            5 => Ok(IncidentState::Resolved),
            6 => Ok(IncidentState::Resolve),
            7 => Ok(IncidentState::Reject),
            _ => Err(format!("unknown incident state {id}")),
        }
    }
}

impl IncidentState {
    pub fn id(self) -> u8 {
        self.into()
    }

    /// States an action may start from.
    pub fn sources(action: IncidentState) -> &'static [IncidentState] {
        match action {
            IncidentState::Resolve => &[IncidentState::Requested, IncidentState::ResolveError],
            IncidentState::Reject => &[IncidentState::Requested],
            _ => &[],
        }
    }

    /// States the requester may send back as a new request.
    pub fn can_resubmit(self) -> bool {
        matches!(self, IncidentState::Conflict | IncidentState::Rejected)
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct IncidentRow {
    pub id: u64,
    pub kind: u8,
    pub state: u8,
    pub user_id: u64,
    pub creator_id: u64,
    pub manager_id: Option<u64>,
    pub clock_entry_id: Option<u64>,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub requested_at: NaiveDateTime,
    pub state_changed_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
    pub request_reason: Option<String>,
    pub reject_reason: Option<String>,
    pub error: Option<String>,
    pub entry_start: Option<NaiveTime>,
    pub entry_end: Option<NaiveTime>,
}

/// Times of the clock entry an incident points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkedEntry {
    pub id: u64,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: u64,
    pub kind: IncidentKind,
    pub state: IncidentState,
    pub user_id: u64,
    pub creator_id: u64,
    pub manager_id: Option<u64>,
    pub clock_entry: Option<LinkedEntry>,
    pub date: NaiveDate,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub requested_at: NaiveDateTime,
    pub state_changed_at: Option<NaiveDateTime>,
    pub resolved_at: Option<NaiveDateTime>,
    pub request_reason: Option<String>,
    pub reject_reason: Option<String>,
    pub error: Option<String>,
}

impl TryFrom<IncidentRow> for Incident {
    type Error = String;

    fn try_from(row: IncidentRow) -> Result<Self, Self::Error> {
        let clock_entry = match (row.clock_entry_id, row.entry_start) {
            (Some(id), Some(start_time)) => Some(LinkedEntry {
                id,
                start_time,
                end_time: row.entry_end,
            }),
            _ => None,
        };
        Ok(Self {
            id: row.id,
            kind: IncidentKind::try_from(row.kind)?,
            state: IncidentState::try_from(row.state)?,
            user_id: row.user_id,
            creator_id: row.creator_id,
            manager_id: row.manager_id,
            clock_entry,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            requested_at: row.requested_at,
            state_changed_at: row.state_changed_at,
            resolved_at: row.resolved_at,
            request_reason: row.request_reason,
            reject_reason: row.reject_reason,
            error: row.error,
        })
    }
}

impl Incident {
    /// Registrar of the entries a resolution creates: the creator when the
    /// request was made for someone else.
    pub fn registrar(&self) -> Option<u64> {
        (self.creator_id != self.user_id).then_some(self.creator_id)
    }

    /// Replacement for `linked` ending at the requested check-out.
    pub fn exit_correction(&self, linked: &ClockEntry) -> Option<NewClockEntry> {
        Some(NewClockEntry {
            user_id: linked.user_id,
            registrar_id: self.registrar(),
            date: linked.date,
            start_time: linked.start_time,
            end_time: Some(self.end_time?),
        })
    }

    /// Request fields, as kept in the audit log before a resubmission.
    pub fn describe_request(&self) -> String {
        let time = |t: Option<NaiveTime>| t.map(|t| t.to_string()).unwrap_or_else(|| "-".into());
        format!(
            "state={} start={} end={} reason={}",
            self.state.as_ref(),
            time(self.start_time),
            time(self.end_time),
            self.request_reason.as_deref().unwrap_or("-"),
        )
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct NewIncident {
    /// 1 new entry, 2 delete entry, 3 exit correction
    #[schema(example = 1, value_type = u8)]
    pub kind: IncidentKind,
    #[schema(example = 4)]
    pub user_id: u64,
    #[schema(example = "2025-03-03", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = "08:00:00", value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[schema(example = "15:00:00", value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    #[schema(example = json!(null))]
    pub clock_entry_id: Option<u64>,
    #[schema(example = "Forgot to clock in")]
    pub reason: Option<String>,
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum IncidentRuleError {
    #[display(fmt = "A new entry needs a start time")]
    MissingStart,
    #[display(fmt = "A new entry cannot reference an existing one")]
    UnexpectedEntry,
    #[display(fmt = "The request must reference the clock entry it changes")]
    MissingEntry,
    #[display(fmt = "An exit correction needs the new check-out time")]
    MissingEnd,
    #[display(fmt = "The check-out must be later than the check-in")]
    InvalidRange,
    #[display(fmt = "The clock entry belongs to another user or another day")]
    EntryMismatch,
}

impl NewIncident {
    /// Checks the fields each kind needs, given the referenced entry.
    pub fn check(&self, linked: Option<&ClockEntry>) -> Result<(), IncidentRuleError> {
        match self.kind {
            IncidentKind::NewEntry => {
                if self.clock_entry_id.is_some() {
                    return Err(IncidentRuleError::UnexpectedEntry);
                }
                let start = self.start_time.ok_or(IncidentRuleError::MissingStart)?;
                if self.end_time.is_some_and(|end| end <= start) {
                    return Err(IncidentRuleError::InvalidRange);
                }
            }
            IncidentKind::ExitCorrection => {
                let entry = linked.ok_or(IncidentRuleError::MissingEntry)?;
                let end = self.end_time.ok_or(IncidentRuleError::MissingEnd)?;
                check_entry_matches(self, entry)?;
                if end <= entry.start_time {
                    return Err(IncidentRuleError::InvalidRange);
                }
            }
            IncidentKind::DeleteEntry => {
                let entry = linked.ok_or(IncidentRuleError::MissingEntry)?;
                check_entry_matches(self, entry)?;
            }
        }
        Ok(())
    }
}

fn check_entry_matches(req: &NewIncident, entry: &ClockEntry) -> Result<(), IncidentRuleError> {
    if entry.user_id != req.user_id || entry.date != req.date {
        return Err(IncidentRuleError::EntryMismatch);
    }
    Ok(())
}
