use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use strum_macros::{Display, EnumIter};
use utoipa::ToSchema;

/// Day of the week as the single letter stored in `schedules.weekday`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Display, EnumIter, Serialize, Deserialize)]
pub enum Weekday {
    #[serde(rename = "L")]
    #[strum(serialize = "L")]
    Monday,
    #[serde(rename = "M")]
    #[strum(serialize = "M")]
    Tuesday,
    #[serde(rename = "X")]
    #[strum(serialize = "X")]
    Wednesday,
    #[serde(rename = "J")]
    #[strum(serialize = "J")]
    Thursday,
    #[serde(rename = "V")]
    #[strum(serialize = "V")]
    Friday,
    #[serde(rename = "S")]
    #[strum(serialize = "S")]
    Saturday,
    #[serde(rename = "D")]
    #[strum(serialize = "D")]
    Sunday,
}

impl Weekday {
    pub fn from_letter(letter: &str) -> Option<Self> {
        match letter.trim().to_ascii_uppercase().as_str() {
            "L" => Some(Weekday::Monday),
            "M" => Some(Weekday::Tuesday),
            "X" => Some(Weekday::Wednesday),
            "J" => Some(Weekday::Thursday),
            "V" => Some(Weekday::Friday),
            "S" => Some(Weekday::Saturday),
            "D" => Some(Weekday::Sunday),
            _ => None,
        }
    }

    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    pub id: u64,
    pub weekday: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

/// One slot of a working-hours template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Schedule {
    #[schema(example = 3)]
    pub id: u64,
    #[schema(example = "L", value_type = String)]
    pub weekday: Weekday,
    #[schema(example = "08:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "15:00:00", value_type = String)]
    pub end_time: NaiveTime,
}

impl Schedule {
    pub fn hours(&self) -> f64 {
        (self.end_time - self.start_time).num_seconds() as f64 / 3600.0
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time <= self.end_time
    }
}

impl TryFrom<ScheduleRow> for Schedule {
    type Error = String;

    fn try_from(row: ScheduleRow) -> Result<Self, Self::Error> {
        let weekday = Weekday::from_letter(&row.weekday)
            .ok_or_else(|| format!("schedule {} has unknown weekday `{}`", row.id, row.weekday))?;
        Ok(Self {
            id: row.id,
            weekday,
            start_time: row.start_time,
            end_time: row.end_time,
        })
    }
}

/// Slots not yet consumed by an active clock entry, ordered by start.
pub fn unassigned<'a>(slots: &'a [Schedule], taken: &HashSet<u64>) -> Vec<&'a Schedule> {
    let mut free: Vec<&Schedule> = slots.iter().filter(|s| !taken.contains(&s.id)).collect();
    free.sort_by_key(|s| s.start_time);
    free
}

/// Slot a clock entry starting at `time` belongs to.
///
/// A free slot containing `time` wins; otherwise the earliest free slot that
/// starts later.
pub fn closest<'a>(
    slots: &'a [Schedule],
    taken: &HashSet<u64>,
    time: NaiveTime,
) -> Option<&'a Schedule> {
    let free = unassigned(slots, taken);
    free.iter()
        .find(|s| s.contains(time))
        .or_else(|| free.iter().find(|s| s.start_time > time))
        .copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn slot(id: u64, from: (u32, u32), to: (u32, u32)) -> Schedule {
        Schedule {
            id,
            weekday: Weekday::Monday,
            start_time: t(from.0, from.1),
            end_time: t(to.0, to.1),
        }
    }

    fn split_day() -> Vec<Schedule> {
        vec![slot(2, (16, 0), (19, 0)), slot(1, (8, 0), (14, 0))]
    }

    #[test]
    fn slot_containing_the_time_wins() {
        let slots = split_day();
        let found = closest(&slots, &HashSet::new(), t(9, 30)).unwrap();
        assert_eq!(found.id, 1);
    }

    #[test]
    fn falls_back_to_next_slot_when_between_slots() {
        let slots = split_day();
        let found = closest(&slots, &HashSet::new(), t(15, 0)).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn skips_slots_already_taken() {
        let slots = split_day();
        let taken = HashSet::from([1]);
        let found = closest(&slots, &taken, t(9, 0)).unwrap();
        assert_eq!(found.id, 2);
    }

    #[test]
    fn none_after_last_slot_or_when_all_taken() {
        let slots = split_day();
        assert!(closest(&slots, &HashSet::new(), t(20, 0)).is_none());
        assert!(closest(&slots, &HashSet::from([1, 2]), t(7, 0)).is_none());
        assert!(closest(&[], &HashSet::new(), t(7, 0)).is_none());
    }

    #[test]
    fn unassigned_is_ordered_by_start() {
        let slots = split_day();
        let ids: Vec<u64> = unassigned(&slots, &HashSet::new()).iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn hours_and_weekday_letters() {
        assert_eq!(slot(1, (8, 0), (15, 30)).hours(), 7.5);
        assert_eq!(Weekday::from_letter("x"), Some(Weekday::Wednesday));
        assert_eq!(Weekday::from_letter("Q"), None);
        assert_eq!(Weekday::Wednesday.to_string(), "X");
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        assert_eq!(Weekday::of(monday), Weekday::Monday);
    }
}
