use crate::model::role::Role;
use crate::store;
use anyhow::Result;
use futures_util::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use sqlx::MySqlPool;
use std::sync::Arc;
use std::time::Duration;

/// Current state of an account, checked on every authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccess {
    pub active: bool,
    pub roles: Vec<Role>,
}

impl UserAccess {
    pub const NONE: UserAccess = UserAccess {
        active: false,
        roles: Vec::new(),
    };
}

pub static ACCESS_CACHE: Lazy<Cache<u64, Arc<UserAccess>>> = Lazy::new(|| {
    Cache::builder()
        .max_capacity(100_000)
        .time_to_live(Duration::from_secs(300))
        .build()
});

/// Cached access of a user; unknown users come back inactive.
pub async fn get(pool: &MySqlPool, user_id: u64) -> Result<Arc<UserAccess>, Arc<sqlx::Error>> {
    ACCESS_CACHE
        .try_get_with(user_id, async move {
            let mut conn = pool.acquire().await?;
            let access = store::user::access_of(&mut *conn, user_id).await?;
            Ok::<_, sqlx::Error>(Arc::new(access))
        })
        .await
}

/// Drop a user's entry after their roles or active flag change.
pub async fn invalidate(user_id: u64) {
    ACCESS_CACHE.invalidate(&user_id).await;
}

/// Load users who signed in during the last `days` days.
pub async fn warmup_access_cache(pool: &MySqlPool, days: u32, batch_size: usize) -> Result<()> {
    let mut stream = sqlx::query_as::<_, (u64, i64, Option<u8>)>(
        r#"
        SELECT u.id, (u.active_since IS NOT NULL) AS active, ur.role_id
        FROM users u
        LEFT JOIN user_roles ur ON ur.user_id = u.id
        WHERE u.last_login_at >= NOW() - INTERVAL ? DAY
        ORDER BY u.id
        "#,
    )
    .bind(days)
    .fetch(pool);

    let mut batch: Vec<(u64, UserAccess)> = Vec::with_capacity(batch_size);
    let mut total = 0usize;

    while let Some(row) = stream.next().await {
        let (user_id, active, role_id) = row?;

        match batch.last_mut() {
            Some((last_id, access)) if *last_id == user_id => {
                access.roles.extend(role_id.and_then(Role::from_id));
            }
            _ => {
                if batch.len() >= batch_size {
                    total += flush(&mut batch).await;
                }
                batch.push((
                    user_id,
                    UserAccess {
                        active: active != 0,
                        roles: role_id.and_then(Role::from_id).into_iter().collect(),
                    },
                ));
            }
        }
    }
    total += flush(&mut batch).await;

    log::info!(
        "Access cache warmup complete: {} recent users (last {} days)",
        total,
        days
    );

    Ok(())
}

async fn flush(batch: &mut Vec<(u64, UserAccess)>) -> usize {
    let count = batch.len();
    let inserts: Vec<_> = batch
        .drain(..)
        .map(|(id, access)| ACCESS_CACHE.insert(id, Arc::new(access)))
        .collect();
    futures::future::join_all(inserts).await;
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    #[actix_web::test]
    async fn invalidate_removes_entry() {
        let access = UserAccess {
            active: true,
            roles: vec![Role::Admin],
        };
        ACCESS_CACHE.insert(9_001, Arc::new(access.clone())).await;
        assert_eq!(ACCESS_CACHE.get(&9_001).await.as_deref(), Some(&access));

        invalidate(9_001).await;
        assert!(ACCESS_CACHE.get(&9_001).await.is_none());
    }

    #[actix_web::test]
    async fn flush_drains_the_batch() {
        let mut batch = vec![(9_002, UserAccess::NONE), (9_003, UserAccess::NONE)];
        assert_eq!(flush(&mut batch).await, 2);
        assert!(batch.is_empty());
        assert!(ACCESS_CACHE.get(&9_003).await.is_some());
    }
}
