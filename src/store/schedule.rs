use crate::error::{AppError, AppResult};
use crate::model::schedule::{Schedule, ScheduleRow, Weekday};
use chrono::{NaiveDate, NaiveTime};
use sqlx::{MySql, MySqlConnection, QueryBuilder};

fn into_schedules(rows: Vec<ScheduleRow>) -> AppResult<Vec<Schedule>> {
    rows.into_iter()
        .map(|row| Schedule::try_from(row).map_err(AppError::Internal))
        .collect()
}

pub async fn insert(
    conn: &mut MySqlConnection,
    weekday: Weekday,
    start: NaiveTime,
    end: NaiveTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "INSERT INTO schedules (weekday, start_time, end_time) VALUES (?, ?, ?)",
    )
    .bind(weekday.to_string())
    .bind(start)
    .bind(end)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

pub async fn list(conn: &mut MySqlConnection) -> AppResult<Vec<Schedule>> {
    let rows = sqlx::query_as::<_, ScheduleRow>(
        r#"
        SELECT id, weekday, start_time, end_time
        FROM schedules
        ORDER BY FIELD(weekday, 'L', 'M', 'X', 'J', 'V', 'S', 'D'), start_time
        "#,
    )
    .fetch_all(&mut *conn)
    .await?;
    into_schedules(rows)
}

/// Stores a new set of slots for a user, applying from `effective_from`.
pub async fn assign(
    conn: &mut MySqlConnection,
    user_id: u64,
    effective_from: NaiveDate,
    schedule_ids: &[u64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_schedules WHERE user_id = ? AND effective_from = ?")
        .bind(user_id)
        .bind(effective_from)
        .execute(&mut *conn)
        .await?;

    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO user_schedules (user_id, schedule_id, effective_from) ",
    );
    qb.push_values(schedule_ids, |mut row, id| {
        row.push_bind(user_id).push_bind(*id).push_bind(effective_from);
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

/// Slots of the set in force on `date` for that date's weekday.
pub async fn effective_on(
    conn: &mut MySqlConnection,
    user_id: u64,
    date: NaiveDate,
) -> AppResult<Vec<Schedule>> {
    let rows = sqlx::query_as::<_, ScheduleRow>(
        r#"
        SELECT s.id, s.weekday, s.start_time, s.end_time
        FROM user_schedules us
        JOIN schedules s ON s.id = us.schedule_id
        WHERE us.user_id = ?
          AND s.weekday = ?
          AND us.effective_from = (
              SELECT MAX(effective_from)
              FROM user_schedules
              WHERE user_id = ? AND effective_from <= ?
          )
        ORDER BY s.start_time
        "#,
    )
    .bind(user_id)
    .bind(Weekday::of(date).to_string())
    .bind(user_id)
    .bind(date)
    .fetch_all(&mut *conn)
    .await?;
    into_schedules(rows)
}
