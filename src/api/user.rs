use crate::auth::auth::AuthUser;
use crate::auth::password::{hash_password, validate_password};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::audit::{AuditKind, NewAuditEntry};
use crate::model::role::Role;
use crate::model::user::{ChangePassword, CreateUser, UpdateUser};
use crate::store;
use crate::utils::{access_cache, dni, dni_filter};
use actix_web::{HttpResponse, web};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use utoipa::ToSchema;

/// Shared checks of create and update; returns the normalized DNI.
fn check_profile(
    raw_dni: &str,
    email: &str,
    name: &str,
    first_surname: &str,
    roles: &[Role],
) -> AppResult<String> {
    if !dni::is_valid(raw_dni) {
        return Err(AppError::validation(format!("`{raw_dni}` is not a valid DNI")));
    }
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::validation("A valid email is required"));
    }
    if name.trim().is_empty() || first_surname.trim().is_empty() {
        return Err(AppError::validation("Name and first surname are required"));
    }
    if roles.is_empty() {
        return Err(AppError::validation("At least one role is required"));
    }
    Ok(dni::normalize(raw_dni))
}

/// Filter first, DB only when the filter can't rule the DNI out.
async fn ensure_dni_free(
    conn: &mut MySqlConnection,
    dni: &str,
    except_user: Option<u64>,
) -> AppResult<()> {
    if !dni_filter::might_exist(dni) {
        return Ok(());
    }
    if store::user::dni_taken(conn, dni, except_user).await? {
        return Err(AppError::Conflict(format!("A user with DNI {dni} already exists")));
    }
    Ok(())
}

fn enforce_policy(password: &str, config: &Config) -> AppResult<()> {
    let check = validate_password(password, &config.password_policy);
    if check.valid {
        Ok(())
    } else {
        Err(AppError::Validation(check.errors.join(". ")))
    }
}

/// Create a user (Admin)
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = CreateUser,
    responses(
        (status = 201, description = "User created", body = Object, example = json!({"id": 12})),
        (status = 400, description = "Invalid DNI, email, roles or weak password"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "DNI or email already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn create_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<CreateUser>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;

    let dni = check_profile(
        &payload.dni,
        &payload.email,
        &payload.name,
        &payload.first_surname,
        &payload.roles,
    )?;
    enforce_policy(&payload.password, &config)?;

    let mut tx = pool.begin().await?;
    ensure_dni_free(&mut tx, &dni, None).await?;

    let hash = hash_password(&payload.password)?;
    let now = config.now_local();

    let user_id = store::user::insert(&mut tx, &payload, &dni, &hash, now).await?;
    store::user::replace_roles(&mut tx, user_id, &payload.roles).await?;
    store::audit::insert(
        &mut tx,
        &NewAuditEntry::new(auth.user_id, AuditKind::UserCreated, user_id, now),
    )
    .await?;
    tx.commit().await?;

    dni_filter::insert(&dni);
    tracing::info!(user_id, created_by = auth.user_id, "User created");

    Ok(HttpResponse::Created().json(json!({ "id": user_id })))
}

/// Update a user's profile, roles and active flag (Admin)
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    request_body = UpdateUser,
    responses(
        (status = 204, description = "User updated"),
        (status = 400, description = "Invalid data"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found"),
        (status = 409, description = "DNI or email already registered")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn update_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<UpdateUser>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let user_id = path.into_inner();

    let dni = check_profile(
        &payload.dni,
        &payload.email,
        &payload.name,
        &payload.first_surname,
        &payload.roles,
    )?;

    let mut tx = pool.begin().await?;
    let previous_dni = store::user::dni_of(&mut tx, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {user_id} not found")))?;
    ensure_dni_free(&mut tx, &dni, Some(user_id)).await?;

    let now = config.now_local();
    store::user::update(&mut tx, user_id, &payload, &dni, now).await?;
    store::user::replace_roles(&mut tx, user_id, &payload.roles).await?;
    store::audit::insert(
        &mut tx,
        &NewAuditEntry::new(auth.user_id, AuditKind::UserUpdated, user_id, now),
    )
    .await?;
    tx.commit().await?;

    if previous_dni != dni {
        dni_filter::remove(&previous_dni);
        dni_filter::insert(&dni);
    }
    access_cache::invalidate(user_id).await;

    Ok(HttpResponse::NoContent().finish())
}

/// Change a password (the user themself or Admin)
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/password",
    params(("id" = u64, Path, description = "User id")),
    request_body = ChangePassword,
    responses(
        (status = 204, description = "Password changed"),
        (status = 400, description = "Password rejected by policy"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn change_password(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<ChangePassword>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    if auth.user_id != user_id {
        auth.require_admin()?;
    }
    enforce_policy(&payload.password, &config)?;

    let hash = hash_password(&payload.password)?;
    let now = config.now_local();

    let mut tx = pool.begin().await?;
    if store::user::set_password(&mut tx, user_id, &hash).await? == 0 {
        return Err(AppError::not_found(format!("User {user_id} not found")));
    }
    store::audit::insert(
        &mut tx,
        &NewAuditEntry::new(auth.user_id, AuditKind::PasswordChanged, user_id, now),
    )
    .await?;
    tx.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}

#[derive(Deserialize, ToSchema)]
pub struct PasswordProbe {
    pub password: String,
}

/// Score a candidate password against the policy
#[utoipa::path(
    post,
    path = "/api/v1/users/password/check",
    request_body = PasswordProbe,
    responses((status = 200, description = "Policy result", body = PasswordCheck)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn check_password(
    _auth: AuthUser,
    config: web::Data<Config>,
    payload: web::Json<PasswordProbe>,
) -> HttpResponse {
    let check = validate_password(&payload.password, &config.password_policy);
    HttpResponse::Ok().json(json!({
        "valid": check.valid,
        "errors": check.errors,
        "score": check.score,
        "strength": check.strength(),
    }))
}

/// List users (Admin)
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "All users with roles", body = [User]),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn list_users(auth: AuthUser, pool: web::Data<MySqlPool>) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    let mut conn = pool.acquire().await?;
    let users = store::user::list(&mut conn).await?;
    Ok(HttpResponse::Ok().json(users))
}

/// Get one user (self, Admin or any role that reads everybody)
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "User", body = User),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "User not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn get_user(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    if !auth.reads_all_of(user_id) {
        return Err(AppError::Forbidden("You can only see your own profile"));
    }
    fetch_user(&pool, user_id).await
}

/// The signed-in user
#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    responses((status = 200, description = "Current user", body = User)),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn me(auth: AuthUser, pool: web::Data<MySqlPool>) -> AppResult<HttpResponse> {
    fetch_user(&pool, auth.user_id).await
}

async fn fetch_user(pool: &MySqlPool, user_id: u64) -> AppResult<HttpResponse> {
    let mut conn = pool.acquire().await?;
    let user = store::user::find(&mut conn, user_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("User {user_id} not found")))?;
    Ok(HttpResponse::Ok().json(user))
}

/// Active users holding a role
#[utoipa::path(
    get,
    path = "/api/v1/roles/{id}/users",
    params(("id" = u8, Path, description = "Role id, 1 to 7")),
    responses(
        (status = 200, description = "User descriptors", body = [UserDescriptor]),
        (status = 400, description = "Unknown role"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Users"
)]
pub async fn users_with_role(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u8>,
) -> AppResult<HttpResponse> {
    if !auth.is_registrar() && !auth.roles.iter().any(|r| r.reads_everything()) {
        return Err(AppError::Forbidden("Not allowed for your role"));
    }
    let role_id = path.into_inner();
    let role = Role::from_id(role_id)
        .ok_or_else(|| AppError::validation(format!("Unknown role {role_id}")))?;

    let mut conn = pool.acquire().await?;
    let users = store::user::descriptors_with_role(&mut conn, role).await?;
    Ok(HttpResponse::Ok().json(users))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profile_checks_normalize_dni() {
        assert_eq!(
            check_profile(" 12345678z", "a@b.es", "Ana", "Pérez", &[Role::Employee]).unwrap(),
            "12345678Z"
        );
    }

    #[test]
    fn profile_checks_reject_bad_fields() {
        let roles = [Role::Employee];
        assert!(check_profile("12345678A", "a@b.es", "Ana", "Pérez", &roles).is_err());
        assert!(check_profile("12345678Z", "nope", "Ana", "Pérez", &roles).is_err());
        assert!(check_profile("12345678Z", "a@b.es", " ", "Pérez", &roles).is_err());
        assert!(check_profile("12345678Z", "a@b.es", "Ana", "Pérez", &[]).is_err());
    }
}
