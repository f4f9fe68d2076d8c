use crate::model::audit::{AuditEntry, NewAuditEntry};
use sqlx::MySqlConnection;

/// Appends an entry; call it on the transaction of the change it records.
pub async fn insert(conn: &mut MySqlConnection, entry: &NewAuditEntry) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO audit_log (author_id, kind, entity, entity_id, at, reason)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.author_id)
    .bind(u8::from(entry.kind))
    .bind(u8::from(entry.kind.entity()))
    .bind(entry.entity_id)
    .bind(entry.at)
    .bind(entry.reason.as_deref())
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_id())
}

#[derive(Debug, Default)]
pub struct AuditFilter {
    pub entity: Option<u8>,
    pub entity_id: Option<u64>,
    pub kind: Option<u8>,
}

// typed binding for the dynamic WHERE
enum FilterValue {
    U8(u8),
    U64(u64),
}

pub async fn list(
    conn: &mut MySqlConnection,
    filter: &AuditFilter,
    per_page: u64,
    offset: u64,
) -> Result<(Vec<AuditEntry>, i64), sqlx::Error> {
    let mut where_sql = String::from(" WHERE 1=1");
    let mut args: Vec<FilterValue> = Vec::new();

    if let Some(entity) = filter.entity {
        where_sql.push_str(" AND entity = ?");
        args.push(FilterValue::U8(entity));
    }
    if let Some(entity_id) = filter.entity_id {
        where_sql.push_str(" AND entity_id = ?");
        args.push(FilterValue::U64(entity_id));
    }
    if let Some(kind) = filter.kind {
        where_sql.push_str(" AND kind = ?");
        args.push(FilterValue::U8(kind));
    }

    let count_sql = format!("SELECT COUNT(*) FROM audit_log{}", where_sql);
    let mut count_q = sqlx::query_scalar::<_, i64>(&count_sql);
    for arg in &args {
        count_q = match arg {
            FilterValue::U8(v) => count_q.bind(*v),
            FilterValue::U64(v) => count_q.bind(*v),
        };
    }
    let total = count_q.fetch_one(&mut *conn).await?;

    let data_sql = format!(
        r#"
        SELECT id, author_id, kind, entity, entity_id, at, reason
        FROM audit_log
        {}
        ORDER BY at DESC, id DESC
        LIMIT ? OFFSET ?
        "#,
        where_sql
    );
    let mut data_q = sqlx::query_as::<_, AuditEntry>(&data_sql);
    for arg in args {
        data_q = match arg {
            FilterValue::U8(v) => data_q.bind(v),
            FilterValue::U64(v) => data_q.bind(v),
        };
    }
    let entries = data_q
        .bind(per_page)
        .bind(offset)
        .fetch_all(&mut *conn)
        .await?;

    Ok((entries, total))
}
