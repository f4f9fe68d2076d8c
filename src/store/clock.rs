use crate::error::{AppError, AppResult};
use crate::model::clock_entry::{
    ClockEntry, ClockEntryRow, NewClockEntry, taken_schedules, validate_new_entry,
};
use crate::model::schedule::{self, Schedule};
use crate::store;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{MySql, MySqlConnection, QueryBuilder};

const ENTRY_COLUMNS: &str = r#"
    SELECT c.id, c.user_id, c.registrar_id, c.date, c.start_time, c.end_time,
           c.schedule_id,
           s.weekday AS schedule_weekday,
           s.start_time AS schedule_start,
           s.end_time AS schedule_end
    FROM clock_entries c
    LEFT JOIN schedules s ON s.id = c.schedule_id
    WHERE c.modified_by IS NULL AND c.deleted_at IS NULL
"#;

async fn fetch(
    conn: &mut MySqlConnection,
    mut qb: QueryBuilder<'_, MySql>,
) -> Result<Vec<ClockEntry>, sqlx::Error> {
    let rows = qb
        .build_query_as::<ClockEntryRow>()
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.into_iter().map(ClockEntry::from).collect())
}

pub async fn find_active(
    conn: &mut MySqlConnection,
    entry_id: u64,
) -> Result<Option<ClockEntry>, sqlx::Error> {
    let mut qb = QueryBuilder::new(ENTRY_COLUMNS);
    qb.push(" AND c.id = ").push_bind(entry_id);
    Ok(fetch(conn, qb).await?.into_iter().next())
}

fn entries_of(user_id: u64, registrar: Option<u64>) -> QueryBuilder<'static, MySql> {
    let mut qb = QueryBuilder::new(ENTRY_COLUMNS);
    qb.push(" AND c.user_id = ").push_bind(user_id);
    if let Some(registrar) = registrar {
        qb.push(" AND c.registrar_id = ").push_bind(registrar);
    }
    qb
}

/// Active entries of a day, optionally only those `registrar` recorded.
pub async fn active_on(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
    registrar: Option<u64>,
) -> Result<Vec<ClockEntry>, sqlx::Error> {
    let mut qb = entries_of(user_id, registrar);
    qb.push(" AND c.date = ").push_bind(date);
    qb.push(" ORDER BY c.start_time");
    fetch(conn, qb).await
}

fn latest_query(user_id: u64, registrar: Option<u64>, limit: u32) -> QueryBuilder<'static, MySql> {
    let mut qb = entries_of(user_id, registrar);
    qb.push(" ORDER BY c.date DESC, c.start_time DESC LIMIT ").push_bind(limit);
    qb
}

pub async fn latest(
    conn: &mut MySqlConnection,
    user_id: u64,
    registrar: Option<u64>,
    limit: u32,
) -> Result<Vec<ClockEntry>, sqlx::Error> {
    fetch(conn, latest_query(user_id, registrar, limit)).await
}

pub async fn between(
    conn: &mut MySqlConnection,
    user_id: u64,
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    registrar: Option<u64>,
) -> Result<Vec<ClockEntry>, sqlx::Error> {
    let mut qb = entries_of(user_id, registrar);
    if let Some(from) = from {
        qb.push(" AND c.date >= ").push_bind(from);
    }
    if let Some(to) = to {
        qb.push(" AND c.date <= ").push_bind(to);
    }
    qb.push(" ORDER BY c.date, c.start_time");
    fetch(conn, qb).await
}

/// Entries of the day no incident points at yet.
pub async fn without_incident(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
    registrar: Option<u64>,
) -> Result<Vec<ClockEntry>, sqlx::Error> {
    let mut qb = entries_of(user_id, registrar);
    qb.push(" AND c.date = ").push_bind(date);
    qb.push(" AND NOT EXISTS (SELECT 1 FROM incidents i WHERE i.clock_entry_id = c.id)");
    qb.push(" ORDER BY c.start_time");
    fetch(conn, qb).await
}

pub async fn has_open(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
    registrar: Option<u64>,
) -> Result<bool, sqlx::Error> {
    Ok(active_on(conn, user_id, date, registrar)
        .await?
        .iter()
        .any(ClockEntry::is_open))
}

/// Slot for an entry starting at `start`, ignoring the entry being replaced.
pub async fn closest_schedule(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
    start: NaiveTime,
    exclude: Option<u64>,
) -> AppResult<Schedule> {
    let slots = store::schedule::effective_on(conn, user_id, date).await?;
    let entries = active_on(conn, user_id, date, None).await?;
    let taken = taken_schedules(&entries, exclude);

    schedule::closest(&slots, &taken, start)
        .cloned()
        .ok_or_else(|| {
            AppError::validation(format!(
                "No schedule available on {date} at {start}: none configured or all slots already used"
            ))
        })
}

const LOCK_USER: &str = "SELECT id FROM users WHERE id = ? FOR UPDATE";

/// Serialises clock changes of one user until the transaction ends.
async fn lock_user(conn: &mut MySqlConnection, user_id: u64) -> AppResult<()> {
    sqlx::query(LOCK_USER)
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?
        .map(|_| ())
        .ok_or_else(|| AppError::not_found(format!("User {user_id} not found")))
}

/// Validates and stores a new entry linked to its schedule slot.
///
/// Must run inside a transaction: the user row stays locked until it ends.
pub async fn add(
    conn: &mut MySqlConnection,
    entry: &NewClockEntry,
    exclude: Option<u64>,
) -> AppResult<u64> {
    lock_user(conn, entry.user_id).await?;
    let existing = active_on(conn, entry.user_id, entry.date, None).await?;
    validate_new_entry(&existing, entry, exclude).map_err(|e| AppError::Validation(e.to_string()))?;

    let slot = closest_schedule(conn, entry.user_id, entry.date, entry.start_time, exclude).await?;

    let result = sqlx::query(
        r#"
        INSERT INTO clock_entries
            (user_id, registrar_id, schedule_id, date, start_time, end_time)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.registrar_id)
    .bind(slot.id)
    .bind(entry.date)
    .bind(entry.start_time)
    .bind(entry.end_time)
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_id())
}

/// Closes the open entry of `date` at `end`. With `registered_by`, only an
/// entry recorded by that registrar may be closed.
pub async fn finish(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
    end: NaiveTime,
    registered_by: Option<u64>,
) -> AppResult<u64> {
    lock_user(conn, user_id).await?;
    let open = active_on(conn, user_id, date, None)
        .await?
        .into_iter()
        .find(ClockEntry::is_open)
        .ok_or_else(|| AppError::validation(format!("There is no open entry on {date}")))?;

    if registered_by.is_some_and(|r| open.registrar_id != Some(r)) {
        return Err(AppError::Forbidden("The open entry was not registered by you"));
    }

    if end <= open.start_time {
        return Err(AppError::validation(format!(
            "The check-out ({end}) must be later than the check-in ({})",
            open.start_time
        )));
    }

    let result = sqlx::query(
        r#"
        UPDATE clock_entries
        SET end_time = ?
        WHERE id = ?
          AND end_time IS NULL
          AND modified_by IS NULL
          AND deleted_at IS NULL
        "#,
    )
    .bind(end)
    .bind(open.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::Conflict("The entry was closed by someone else".into()));
    }
    Ok(open.id)
}

pub async fn mark_replaced(
    conn: &mut MySqlConnection,
    entry_id: u64,
    replacement: u64,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE clock_entries SET modified_by = ? WHERE id = ? AND modified_by IS NULL AND deleted_at IS NULL",
    )
    .bind(replacement)
    .bind(entry_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_deleted(
    conn: &mut MySqlConnection,
    entry_id: u64,
    at: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE clock_entries SET deleted_at = ? WHERE id = ? AND modified_by IS NULL AND deleted_at IS NULL",
    )
    .bind(at)
    .bind(entry_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registrar_filter_is_applied_before_the_limit() {
        let qb = latest_query(4, Some(2), 10);
        let sql = qb.sql();
        let filter = sql.find("c.registrar_id = ?").unwrap();
        let limit = sql.find("LIMIT ?").unwrap();
        assert!(filter < limit);

        let qb = latest_query(4, None, 10);
        assert!(!qb.sql().contains("c.registrar_id"));
    }

    #[test]
    fn user_lock_holds_the_row_until_commit() {
        assert!(LOCK_USER.ends_with("FOR UPDATE"));
        assert!(LOCK_USER.contains("FROM users WHERE id = ?"));
    }
}
