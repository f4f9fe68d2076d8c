use crate::error::{AppError, AppResult};
use crate::model::incident::{Incident, IncidentRow, IncidentState, NewIncident};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use sqlx::{MySql, MySqlConnection, QueryBuilder};

const INCIDENT_COLUMNS: &str = r#"
    SELECT i.id, i.kind, i.state, i.user_id, i.creator_id, i.manager_id, i.clock_entry_id,
           i.date, i.start_time, i.end_time, i.requested_at, i.state_changed_at,
           i.resolved_at, i.request_reason, i.reject_reason, i.error,
           c.start_time AS entry_start,
           c.end_time AS entry_end
    FROM incidents i
    LEFT JOIN clock_entries c ON c.id = i.clock_entry_id
    WHERE 1=1
"#;

/// Which incidents a caller may list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncidentScope {
    /// everything, optionally only those created by one user
    All { creator: Option<u64> },
    /// supervisor: incidents filed on behalf of someone else, plus their own
    OnBehalf { supervisor: u64 },
    CreatedBy(u64),
}

#[derive(Debug, Clone, Default)]
pub struct IncidentQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub states: Vec<IncidentState>,
}

async fn fetch(
    conn: &mut MySqlConnection,
    mut qb: QueryBuilder<'_, MySql>,
) -> AppResult<Vec<Incident>> {
    let rows = qb
        .build_query_as::<IncidentRow>()
        .fetch_all(&mut *conn)
        .await?;
    rows.into_iter()
        .map(|row| Incident::try_from(row).map_err(AppError::Internal))
        .collect()
}

pub async fn find(conn: &mut MySqlConnection, id: u64) -> AppResult<Option<Incident>> {
    let mut qb = QueryBuilder::new(INCIDENT_COLUMNS);
    qb.push(" AND i.id = ").push_bind(id);
    Ok(fetch(conn, qb).await?.into_iter().next())
}

pub async fn search(
    conn: &mut MySqlConnection,
    query: &IncidentQuery,
    scope: IncidentScope,
) -> AppResult<Vec<Incident>> {
    let mut qb = QueryBuilder::new(INCIDENT_COLUMNS);

    if !query.states.is_empty() {
        qb.push(" AND i.state IN (");
        let mut states = qb.separated(", ");
        for state in &query.states {
            states.push_bind(state.id());
        }
        states.push_unseparated(")");
    }
    if let Some(from) = query.from {
        qb.push(" AND i.requested_at >= ").push_bind(from);
    }
    if let Some(to) = query.to {
        qb.push(" AND i.requested_at < DATE_ADD(")
            .push_bind(to)
            .push(", INTERVAL 1 DAY)");
    }

    match scope {
        IncidentScope::All { creator: Some(creator) } => {
            qb.push(" AND i.creator_id = ").push_bind(creator);
        }
        IncidentScope::All { creator: None } => {}
        IncidentScope::OnBehalf { supervisor } => {
            qb.push(" AND (i.creator_id <> i.user_id OR i.creator_id = ")
                .push_bind(supervisor)
                .push(")");
        }
        IncidentScope::CreatedBy(user) => {
            qb.push(" AND i.creator_id = ").push_bind(user);
        }
    }

    qb.push(" ORDER BY i.requested_at, i.state, i.date");
    fetch(conn, qb).await
}

pub async fn insert(
    conn: &mut MySqlConnection,
    req: &NewIncident,
    creator: u64,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO incidents
            (kind, state, user_id, creator_id, clock_entry_id, date,
             start_time, end_time, requested_at, request_reason)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(u8::from(req.kind))
    .bind(IncidentState::Requested.id())
    .bind(req.user_id)
    .bind(creator)
    .bind(req.clock_entry_id)
    .bind(req.date)
    .bind(req.start_time)
    .bind(req.end_time)
    .bind(now)
    .bind(req.reason.as_deref())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

/// New request values when sending an incident back.
#[derive(Debug, Clone)]
pub struct Resubmission<'a> {
    pub from: IncidentState,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub reason: Option<&'a str>,
    pub creator: u64,
    pub now: NaiveDateTime,
}

pub async fn resubmit(
    conn: &mut MySqlConnection,
    id: u64,
    change: &Resubmission<'_>,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE incidents
        SET state = ?, start_time = ?, end_time = ?, request_reason = ?,
            requested_at = ?, creator_id = ?,
            reject_reason = NULL, state_changed_at = NULL, error = NULL,
            manager_id = NULL, resolved_at = NULL
        WHERE id = ? AND state = ?
        "#,
    )
    .bind(IncidentState::Requested.id())
    .bind(change.start_time)
    .bind(change.end_time)
    .bind(change.reason)
    .bind(change.now)
    .bind(change.creator)
    .bind(id)
    .bind(change.from.id())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

pub async fn reject(
    conn: &mut MySqlConnection,
    id: u64,
    manager: u64,
    reason: Option<&str>,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE incidents
        SET state = ?, manager_id = ?, state_changed_at = ?, reject_reason = ?
        WHERE id = ? AND state = ?
        "#,
    )
    .bind(IncidentState::Rejected.id())
    .bind(manager)
    .bind(now)
    .bind(reason)
    .bind(id)
    .bind(IncidentState::Requested.id())
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}

/// Claims the incident for resolution; 0 rows means someone else got it.
pub async fn mark_resolved(
    conn: &mut MySqlConnection,
    id: u64,
    manager: u64,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let sources = IncidentState::sources(IncidentState::Resolve);
    let mut qb = QueryBuilder::<MySql>::new("UPDATE incidents SET state = ");
    qb.push_bind(IncidentState::Resolved.id())
        .push(", manager_id = ")
        .push_bind(manager)
        .push(", resolved_at = ")
        .push_bind(now)
        .push(", state_changed_at = ")
        .push_bind(now)
        .push(", error = NULL WHERE id = ")
        .push_bind(id)
        .push(" AND state IN (");
    let mut states = qb.separated(", ");
    for state in sources {
        states.push_bind(state.id());
    }
    states.push_unseparated(")");

    let result = qb.build().execute(&mut *conn).await?;
    Ok(result.rows_affected())
}

/// Moves a claimed incident to `Conflict` or `ResolveError`.
pub async fn mark_failed(
    conn: &mut MySqlConnection,
    id: u64,
    state: IncidentState,
    error: &str,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE incidents
        SET state = ?, error = ?, state_changed_at = ?,
            manager_id = NULL, resolved_at = NULL
        WHERE id = ?
        "#,
    )
    .bind(state.id())
    .bind(error)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected())
}
