use crate::model::role::{self, Role};
use crate::model::user::{CreateUser, Credentials, UpdateUser, User, UserDescriptor, UserRow};
use crate::model::user_cache::WithUserCache;
use crate::utils::access_cache::UserAccess;
use chrono::NaiveDateTime;
use sqlx::{MySql, MySqlConnection, QueryBuilder};
use std::collections::{BTreeSet, HashMap};

const USER_COLUMNS: &str = r#"
    SELECT id, dni, email, name, first_surname, second_surname, active_since, last_login_at
    FROM users
"#;

pub async fn roles_of(conn: &mut MySqlConnection, user_id: u64) -> Result<Vec<Role>, sqlx::Error> {
    let ids: Vec<u8> =
        sqlx::query_scalar("SELECT role_id FROM user_roles WHERE user_id = ? ORDER BY role_id")
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;
    Ok(ids.into_iter().filter_map(Role::from_id).collect())
}

pub async fn access_of(conn: &mut MySqlConnection, user_id: u64) -> Result<UserAccess, sqlx::Error> {
    let active: Option<Option<NaiveDateTime>> =
        sqlx::query_scalar("SELECT active_since FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;

    match active {
        Some(active_since) => Ok(UserAccess {
            active: active_since.is_some(),
            roles: roles_of(conn, user_id).await?,
        }),
        None => Ok(UserAccess::NONE),
    }
}

pub async fn find(conn: &mut MySqlConnection, user_id: u64) -> Result<Option<User>, sqlx::Error> {
    let row = sqlx::query_as::<_, UserRow>(&format!("{USER_COLUMNS} WHERE id = ?"))
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let roles = roles_of(conn, row.id).await?;
            Ok(Some(User::from_row(row, roles)))
        }
        None => Ok(None),
    }
}

pub async fn list(conn: &mut MySqlConnection) -> Result<Vec<User>, sqlx::Error> {
    let rows = sqlx::query_as::<_, UserRow>(&format!(
        "{USER_COLUMNS} ORDER BY first_surname, second_surname, name"
    ))
    .fetch_all(&mut *conn)
    .await?;

    let pairs: Vec<(u64, u8)> = sqlx::query_as("SELECT user_id, role_id FROM user_roles")
        .fetch_all(&mut *conn)
        .await?;
    let mut roles: HashMap<u64, Vec<Role>> = HashMap::new();
    for (user_id, role_id) in pairs {
        roles
            .entry(user_id)
            .or_default()
            .extend(Role::from_id(role_id));
    }

    Ok(rows
        .into_iter()
        .map(|row| {
            let mut user_roles = roles.remove(&row.id).unwrap_or_default();
            user_roles.sort();
            User::from_row(row, user_roles)
        })
        .collect())
}

pub async fn credentials_by_dni(
    conn: &mut MySqlConnection,
    dni: &str,
) -> Result<Option<Credentials>, sqlx::Error> {
    sqlx::query_as::<_, Credentials>(
        "SELECT id, name, password, active_since FROM users WHERE dni = ?",
    )
    .bind(dni)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn dni_taken(
    conn: &mut MySqlConnection,
    dni: &str,
    except_user: Option<u64>,
) -> Result<bool, sqlx::Error> {
    let taken: i64 = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM users WHERE dni = ? AND (? IS NULL OR id <> ?) LIMIT 1)",
    )
    .bind(dni)
    .bind(except_user)
    .bind(except_user)
    .fetch_one(&mut *conn)
    .await?;
    Ok(taken != 0)
}

pub async fn insert(
    conn: &mut MySqlConnection,
    user: &CreateUser,
    dni: &str,
    password_hash: &str,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO users
            (dni, email, name, first_surname, second_surname, password, active_since)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(dni)
    .bind(user.email.trim())
    .bind(user.name.trim())
    .bind(user.first_surname.trim())
    .bind(user.second_surname.as_deref().map(str::trim))
    .bind(password_hash)
    .bind(user.active.then_some(now))
    .execute(&mut *conn)
    .await?;

    Ok(result.last_insert_id())
}

pub async fn update(
    conn: &mut MySqlConnection,
    user_id: u64,
    user: &UpdateUser,
    dni: &str,
    now: NaiveDateTime,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE users
        SET dni = ?, email = ?, name = ?, first_surname = ?, second_surname = ?,
            active_since = CASE WHEN ? THEN COALESCE(active_since, ?) ELSE NULL END
        WHERE id = ?
        "#,
    )
    .bind(dni)
    .bind(user.email.trim())
    .bind(user.name.trim())
    .bind(user.first_surname.trim())
    .bind(user.second_surname.as_deref().map(str::trim))
    .bind(user.active)
    .bind(now)
    .bind(user_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected())
}

pub async fn replace_roles(
    conn: &mut MySqlConnection,
    user_id: u64,
    roles: &[Role],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM user_roles WHERE user_id = ?")
        .bind(user_id)
        .execute(&mut *conn)
        .await?;

    let roles = role::distinct(roles);
    if roles.is_empty() {
        return Ok(());
    }

    let mut qb = QueryBuilder::<MySql>::new("INSERT INTO user_roles (user_id, role_id) ");
    qb.push_values(&roles, |mut row, role| {
        row.push_bind(user_id).push_bind(role.id());
    });
    qb.build().execute(&mut *conn).await?;
    Ok(())
}

pub async fn set_password(
    conn: &mut MySqlConnection,
    user_id: u64,
    password_hash: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("UPDATE users SET password = ? WHERE id = ?")
        .bind(password_hash)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

pub async fn touch_login(
    conn: &mut MySqlConnection,
    user_id: u64,
    now: NaiveDateTime,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE users SET last_login_at = ? WHERE id = ?")
        .bind(now)
        .bind(user_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

pub async fn dni_of(conn: &mut MySqlConnection, user_id: u64) -> Result<Option<String>, sqlx::Error> {
    sqlx::query_scalar("SELECT dni FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn descriptors_with_role(
    conn: &mut MySqlConnection,
    role: Role,
) -> Result<Vec<UserDescriptor>, sqlx::Error> {
    sqlx::query_as::<_, UserDescriptor>(
        r#"
        SELECT u.id, u.name, u.first_surname, u.second_surname
        FROM users u
        JOIN user_roles ur ON ur.user_id = u.id
        WHERE ur.role_id = ? AND u.active_since IS NOT NULL
        ORDER BY u.first_surname, u.second_surname, u.name
        "#,
    )
    .bind(role.id())
    .fetch_all(&mut *conn)
    .await
}

/// Adds the descriptors of `ids` to the cache, one query for all of them.
pub async fn fill_cache<T>(
    conn: &mut MySqlConnection,
    cache: &mut WithUserCache<T>,
    ids: impl IntoIterator<Item = u64>,
) -> Result<(), sqlx::Error> {
    let missing: BTreeSet<u64> = ids.into_iter().filter(|id| cache.user(*id).is_none()).collect();
    if missing.is_empty() {
        return Ok(());
    }

    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT id, name, first_surname, second_surname FROM users WHERE id IN (",
    );
    let mut ids = qb.separated(", ");
    for id in &missing {
        ids.push_bind(*id);
    }
    ids.push_unseparated(")");

    let descriptors = qb
        .build_query_as::<UserDescriptor>()
        .fetch_all(&mut *conn)
        .await?;
    for descriptor in descriptors {
        cache.push_user(descriptor);
    }
    Ok(())
}
