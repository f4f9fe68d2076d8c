use crate::model::schedule::{Schedule, Weekday};
use chrono::{NaiveDate, NaiveTime};
use derive_more::Display;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use utoipa::ToSchema;

/// Row of `clock_entries` joined with its schedule slot.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ClockEntryRow {
    pub id: u64,
    pub user_id: u64,
    pub registrar_id: Option<u64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub schedule_id: Option<u64>,
    pub schedule_weekday: Option<String>,
    pub schedule_start: Option<NaiveTime>,
    pub schedule_end: Option<NaiveTime>,
}

/// A check-in, optionally closed by a check-out.
///
/// Entries are never edited: a correction points the old row at its
/// replacement through `modified_by` and a deletion stamps `deleted_at`.
/// Only rows with neither are loaded into this type.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClockEntry {
    pub id: u64,
    pub user_id: u64,
    pub registrar_id: Option<u64>,
    pub schedule: Option<Schedule>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
    pub worked_hours: Option<f64>,
}

impl ClockEntry {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

impl From<ClockEntryRow> for ClockEntry {
    fn from(row: ClockEntryRow) -> Self {
        let schedule = match (
            row.schedule_id,
            row.schedule_weekday.as_deref().and_then(Weekday::from_letter),
            row.schedule_start,
            row.schedule_end,
        ) {
            (Some(id), Some(weekday), Some(start_time), Some(end_time)) => Some(Schedule {
                id,
                weekday,
                start_time,
                end_time,
            }),
            _ => None,
        };

        let worked_hours = row
            .end_time
            .map(|end| (end - row.start_time).num_seconds() as f64 / 3600.0);

        Self {
            id: row.id,
            user_id: row.user_id,
            registrar_id: row.registrar_id,
            schedule,
            date: row.date,
            start_time: row.start_time,
            end_time: row.end_time,
            worked_hours,
        }
    }
}

/// Entry about to be stored. `end_time: None` is an automatic clock-in.
#[derive(Debug, Clone)]
pub struct NewClockEntry {
    pub user_id: u64,
    pub registrar_id: Option<u64>,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: Option<NaiveTime>,
}

#[derive(Debug, Display, PartialEq, Eq)]
pub enum ClockRuleError {
    #[display(fmt = "There is an entry on {} without check-out; close it first", _0)]
    OpenEntry(NaiveDate),
    #[display(fmt = "A check-in cannot be recorded before an existing entry of the same day")]
    LaterEntryExists,
    #[display(fmt = "The start time {} falls inside an existing entry", _0)]
    StartInsideEntry(NaiveTime),
    #[display(fmt = "The check-out must be later than the check-in")]
    InvalidRange,
    #[display(fmt = "The entry {}-{} overlaps an existing entry", _0, _1)]
    Overlap(NaiveTime, NaiveTime),
}

/// Checks a new entry against the active entries of the same user and day.
/// `exclude` leaves out the entry being replaced by an exit correction.
pub fn validate_new_entry(
    existing: &[ClockEntry],
    new: &NewClockEntry,
    exclude: Option<u64>,
) -> Result<(), ClockRuleError> {
    let others = || existing.iter().filter(move |e| Some(e.id) != exclude);

    if others().any(ClockEntry::is_open) {
        return Err(ClockRuleError::OpenEntry(new.date));
    }

    if new.end_time.is_none()
        && others().any(|e| {
            e.start_time > new.start_time || e.end_time.is_some_and(|end| end > new.start_time)
        })
    {
        return Err(ClockRuleError::LaterEntryExists);
    }

    if others().any(|e| {
        e.end_time
            .is_some_and(|end| e.start_time <= new.start_time && new.start_time <= end)
    }) {
        return Err(ClockRuleError::StartInsideEntry(new.start_time));
    }

    if let Some(new_end) = new.end_time {
        if new_end <= new.start_time {
            return Err(ClockRuleError::InvalidRange);
        }
        let overlaps = others().any(|e| {
            e.end_time
                .is_some_and(|end| e.start_time < new_end && end > new.start_time)
        });
        if overlaps {
            return Err(ClockRuleError::Overlap(new.start_time, new_end));
        }
    }

    Ok(())
}

/// Schedule ids already consumed by the given entries.
pub fn taken_schedules(entries: &[ClockEntry], exclude: Option<u64>) -> HashSet<u64> {
    entries
        .iter()
        .filter(|e| Some(e.id) != exclude)
        .filter_map(|e| e.schedule.as_ref().map(|s| s.id))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DaySummary {
    #[schema(example = "2025-03-03", format = "date", value_type = String)]
    pub date: NaiveDate,
    #[schema(example = 7.5)]
    pub worked_hours: f64,
    #[schema(example = 7.0)]
    pub scheduled_hours: f64,
    /// worked minus scheduled
    #[schema(example = 0.5)]
    pub balance: f64,
    #[schema(example = 0)]
    pub open_entries: u32,
}

/// Per-day worked and scheduled hours, ordered by date.
pub fn summarize(entries: &[ClockEntry]) -> Vec<DaySummary> {
    let mut days: BTreeMap<NaiveDate, (f64, BTreeMap<u64, f64>, u32)> = BTreeMap::new();

    for entry in entries {
        let (worked, slots, open) = days.entry(entry.date).or_default();
        match entry.worked_hours {
            Some(hours) => *worked += hours,
            None => *open += 1,
        }
        if let Some(schedule) = &entry.schedule {
            slots.insert(schedule.id, schedule.hours());
        }
    }

    days.into_iter()
        .map(|(date, (worked, slots, open))| {
            let scheduled: f64 = slots.values().sum();
            DaySummary {
                date,
                worked_hours: worked,
                scheduled_hours: scheduled,
                balance: worked - scheduled,
                open_entries: open,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 3).unwrap()
    }

    fn entry(id: u64, start: NaiveTime, end: Option<NaiveTime>) -> ClockEntry {
        ClockEntry::from(ClockEntryRow {
            id,
            user_id: 1,
            registrar_id: None,
            date: day(),
            start_time: start,
            end_time: end,
            schedule_id: None,
            schedule_weekday: None,
            schedule_start: None,
            schedule_end: None,
        })
    }

    fn new(start: NaiveTime, end: Option<NaiveTime>) -> NewClockEntry {
        NewClockEntry {
            user_id: 1,
            registrar_id: None,
            date: day(),
            start_time: start,
            end_time: end,
        }
    }

    #[test]
    fn first_entry_of_the_day_is_accepted() {
        assert_eq!(validate_new_entry(&[], &new(t(8, 0), None), None), Ok(()));
    }

    #[test]
    fn open_entry_blocks_any_new_one() {
        let existing = [entry(1, t(8, 0), None)];
        assert_eq!(
            validate_new_entry(&existing, &new(t(16, 0), Some(t(18, 0))), None),
            Err(ClockRuleError::OpenEntry(day()))
        );
    }

    #[test]
    fn automatic_check_in_cannot_precede_existing_entries() {
        let existing = [entry(1, t(10, 0), Some(t(12, 0)))];
        assert_eq!(
            validate_new_entry(&existing, &new(t(9, 0), None), None),
            Err(ClockRuleError::LaterEntryExists)
        );
        assert_eq!(validate_new_entry(&existing, &new(t(13, 0), None), None), Ok(()));
    }

    #[test]
    fn start_inside_existing_range_is_rejected() {
        let existing = [entry(1, t(8, 0), Some(t(12, 0)))];
        assert_eq!(
            validate_new_entry(&existing, &new(t(11, 0), Some(t(13, 0))), None),
            Err(ClockRuleError::StartInsideEntry(t(11, 0)))
        );
    }

    #[test]
    fn range_covering_existing_entry_overlaps() {
        let existing = [entry(1, t(10, 0), Some(t(11, 0)))];
        assert_eq!(
            validate_new_entry(&existing, &new(t(9, 0), Some(t(12, 0))), None),
            Err(ClockRuleError::Overlap(t(9, 0), t(12, 0)))
        );
        assert_eq!(
            validate_new_entry(&existing, &new(t(11, 30), Some(t(12, 0))), None),
            Ok(())
        );
    }

    #[test]
    fn end_must_follow_start() {
        assert_eq!(
            validate_new_entry(&[], &new(t(12, 0), Some(t(12, 0))), None),
            Err(ClockRuleError::InvalidRange)
        );
    }

    #[test]
    fn excluded_entry_is_ignored() {
        let existing = [entry(1, t(8, 0), None), entry(2, t(4, 0), Some(t(6, 0)))];
        assert_eq!(
            validate_new_entry(&existing, &new(t(8, 0), Some(t(15, 0))), Some(1)),
            Ok(())
        );
    }

    #[test]
    fn taken_schedules_skip_excluded_entry() {
        let mut a = entry(1, t(8, 0), Some(t(9, 0)));
        a.schedule = Some(Schedule {
            id: 4,
            weekday: Weekday::Monday,
            start_time: t(8, 0),
            end_time: t(14, 0),
        });
        let entries = [a];
        assert_eq!(taken_schedules(&entries, None), HashSet::from([4]));
        assert!(taken_schedules(&entries, Some(1)).is_empty());
    }

    #[test]
    fn summary_adds_worked_hours_and_distinct_slots() {
        let slot = Schedule {
            id: 4,
            weekday: Weekday::Monday,
            start_time: t(8, 0),
            end_time: t(15, 0),
        };
        let mut morning = entry(1, t(8, 0), Some(t(11, 30)));
        morning.schedule = Some(slot.clone());
        let mut late = entry(2, t(12, 0), Some(t(16, 0)));
        late.schedule = Some(slot);
        let open = entry(3, t(17, 0), None);

        assert_eq!(
            summarize(&[morning, late, open]),
            vec![DaySummary {
                date: day(),
                worked_hours: 7.5,
                scheduled_hours: 7.0,
                balance: 0.5,
                open_entries: 1,
            }]
        );
    }

    #[test]
    fn worked_hours_only_for_closed_entries() {
        assert_eq!(entry(1, t(8, 0), Some(t(8, 45))).worked_hours, Some(0.75));
        assert_eq!(entry(1, t(8, 0), None).worked_hours, None);
    }
}
