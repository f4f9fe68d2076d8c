use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::clock_entry::{ClockEntry, NewClockEntry, summarize};
use crate::model::role::Role;
use crate::model::user_cache::WithUserCache;
use crate::store;
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct RegisterEntry {
    /// defaults to the caller
    #[schema(example = 4)]
    pub user_id: Option<u64>,
    #[schema(example = "2025-03-03", format = "date", value_type = Option<String>)]
    pub date: Option<NaiveDate>,
    #[serde(alias = "start")]
    #[schema(example = "08:00:00", value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[serde(alias = "end")]
    #[schema(example = "15:00:00", value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
}

#[derive(Deserialize, ToSchema, Default)]
pub struct CheckOut {
    /// only honoured for registrars
    #[schema(example = "2025-03-03T15:00:00", value_type = Option<String>)]
    pub at: Option<NaiveDateTime>,
}

#[derive(Deserialize, IntoParams)]
pub struct DateQuery {
    /// today when missing
    #[param(value_type = Option<String>, example = "2025-03-03")]
    pub date: Option<NaiveDate>,
    /// only entries recorded by this registrar
    pub registrar: Option<u64>,
}

#[derive(Deserialize, IntoParams)]
pub struct RangeQuery {
    #[param(value_type = Option<String>, example = "2025-03-01")]
    pub from: Option<NaiveDate>,
    #[param(value_type = Option<String>, example = "2025-03-31")]
    pub to: Option<NaiveDate>,
    pub registrar: Option<u64>,
}

/// Registrar filter the caller is allowed to use for `user_id`'s records.
/// A plain registrar only sees what they recorded.
fn visible_registrar(auth: &AuthUser, user_id: u64, requested: Option<u64>) -> AppResult<Option<u64>> {
    if auth.reads_all_of(user_id) {
        Ok(requested)
    } else if auth.has_role(Role::Registrar) {
        Ok(Some(auth.user_id))
    } else {
        Err(AppError::Forbidden("You cannot see the records of this user"))
    }
}

async fn with_users(
    conn: &mut MySqlConnection,
    entries: Vec<ClockEntry>,
) -> AppResult<WithUserCache<ClockEntry>> {
    let ids: Vec<u64> = entries
        .iter()
        .flat_map(|e| std::iter::once(e.user_id).chain(e.registrar_id))
        .collect();

    let mut cache = WithUserCache::with_capacity(entries.len());
    for entry in entries {
        cache.push_item(entry);
    }
    store::user::fill_cache(conn, &mut cache, ids).await?;
    Ok(cache)
}

/// Record a clock entry
///
/// For oneself without registrar rights this is a check-in stamped with the
/// server time. Registrars give the date and times explicitly.
#[utoipa::path(
    post,
    path = "/api/v1/clock",
    request_body = RegisterEntry,
    responses(
        (status = 201, description = "Entry recorded", body = Object, example = json!({"id": 120})),
        (status = 400, description = "Entry rejected by the clock rules or no free slot"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn register_entry(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<RegisterEntry>,
) -> AppResult<HttpResponse> {
    let user_id = payload.user_id.unwrap_or(auth.user_id);

    let entry = if user_id == auth.user_id && !auth.is_registrar() {
        let now = config.now_local();
        NewClockEntry {
            user_id,
            registrar_id: None,
            date: now.date(),
            start_time: now.time(),
            end_time: None,
        }
    } else {
        if !auth.is_registrar() {
            return Err(AppError::Forbidden("Only registrars record entries for others"));
        }
        NewClockEntry {
            user_id,
            registrar_id: Some(auth.user_id),
            date: payload
                .date
                .ok_or_else(|| AppError::validation("The date is required"))?,
            start_time: payload
                .start_time
                .ok_or_else(|| AppError::validation("The start time is required"))?,
            end_time: payload.end_time,
        }
    };

    let mut tx = pool.begin().await?;
    let id = store::clock::add(&mut tx, &entry, None).await?;
    tx.commit().await?;

    tracing::info!(entry_id = id, user_id, registrar = ?entry.registrar_id, "Clock entry recorded");
    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

/// Close the open entry of a user
#[utoipa::path(
    put,
    path = "/api/v1/users/{id}/clock/check-out",
    params(("id" = u64, Path, description = "User id")),
    request_body = CheckOut,
    responses(
        (status = 200, description = "Entry closed", body = Object, example = json!({"id": 120})),
        (status = 400, description = "No open entry or check-out before check-in"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "Closed concurrently")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn check_out(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: Option<web::Json<CheckOut>>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let requested = payload.map(|p| p.into_inner()).unwrap_or_default().at;

    let (at, registered_by) = if auth.is_registrar() {
        let restrict = user_id != auth.user_id && !auth.has_role(Role::Supervisor);
        (
            requested.unwrap_or_else(|| config.now_local()),
            restrict.then_some(auth.user_id),
        )
    } else if user_id == auth.user_id {
        (config.now_local(), None)
    } else {
        return Err(AppError::Forbidden("Only registrars close entries for others"));
    };

    let mut tx = pool.begin().await?;
    let id = store::clock::finish(&mut tx, user_id, at.date(), at.time(), registered_by).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(json!({ "id": id })))
}

/// Whether the user has an entry without check-out
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/clock/open",
    params(("id" = u64, Path, description = "User id"), DateQuery),
    responses((status = 200, description = "Open flag", body = Object, example = json!({"open": true}))),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn open_entry(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    query: web::Query<DateQuery>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let registrar = visible_registrar(&auth, user_id, query.registrar)?;
    let date = query.date.unwrap_or_else(|| config.now_local().date());

    let mut conn = pool.acquire().await?;
    let open = store::clock::has_open(&mut conn, user_id, date, registrar).await?;
    Ok(HttpResponse::Ok().json(json!({ "open": open })))
}

/// Active entries of a day
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/clock",
    params(("id" = u64, Path, description = "User id"), DateQuery),
    responses(
        (status = 200, description = "Entries with user cache", body = Object),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn entries_on(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    query: web::Query<DateQuery>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let registrar = visible_registrar(&auth, user_id, query.registrar)?;
    let date = query.date.unwrap_or_else(|| config.now_local().date());

    let mut conn = pool.acquire().await?;
    let entries = store::clock::active_on(&mut conn, user_id, date, registrar).await?;
    Ok(HttpResponse::Ok().json(with_users(&mut conn, entries).await?))
}

/// Most recent entries
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/clock/latest",
    params(("id" = u64, Path, description = "User id")),
    responses(
        (status = 200, description = "Latest entries, newest first", body = Object),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn latest_entries(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let registrar = visible_registrar(&auth, user_id, None)?;

    let mut conn = pool.acquire().await?;
    let entries =
        store::clock::latest(&mut conn, user_id, registrar, config.latest_entries_limit).await?;
    Ok(HttpResponse::Ok().json(with_users(&mut conn, entries).await?))
}

/// Active entries between two dates
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/clock/range",
    params(("id" = u64, Path, description = "User id"), RangeQuery),
    responses(
        (status = 200, description = "Entries ordered by date and start", body = Object),
        (status = 400, description = "from after to"),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn entries_between(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<RangeQuery>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let registrar = visible_registrar(&auth, user_id, query.registrar)?;
    check_range(query.from, query.to)?;

    let mut conn = pool.acquire().await?;
    let entries = store::clock::between(&mut conn, user_id, query.from, query.to, registrar).await?;
    Ok(HttpResponse::Ok().json(with_users(&mut conn, entries).await?))
}

/// Entries of a day with no incident filed against them
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/clock/without-incident",
    params(("id" = u64, Path, description = "User id"), DateQuery),
    responses(
        (status = 200, description = "Entries free for a new incident", body = Object),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn entries_without_incident(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    query: web::Query<DateQuery>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let registrar = visible_registrar(&auth, user_id, query.registrar)?;
    let date = query.date.unwrap_or_else(|| config.now_local().date());

    let mut conn = pool.acquire().await?;
    let entries = store::clock::without_incident(&mut conn, user_id, date, registrar).await?;
    Ok(HttpResponse::Ok().json(with_users(&mut conn, entries).await?))
}

/// Worked versus scheduled hours per day
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/clock/summary",
    params(("id" = u64, Path, description = "User id"), RangeQuery),
    responses(
        (status = 200, description = "One row per day with entries", body = [crate::model::clock_entry::DaySummary]),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Clock"
)]
pub async fn summary(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    query: web::Query<RangeQuery>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let registrar = visible_registrar(&auth, user_id, query.registrar)?;
    check_range(query.from, query.to)?;

    let mut conn = pool.acquire().await?;
    let entries = store::clock::between(&mut conn, user_id, query.from, query.to, registrar).await?;
    Ok(HttpResponse::Ok().json(summarize(&entries)))
}

fn check_range(from: Option<NaiveDate>, to: Option<NaiveDate>) -> AppResult<()> {
    match (from, to) {
        (Some(from), Some(to)) if from > to => Err(AppError::validation(format!(
            "`from` ({from}) must not be after `to` ({to})"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{TestRequest, call_service, init_service};
    use actix_web::{App, HttpMessage, http::StatusCode};

    fn caller(user_id: u64, roles: &[Role]) -> AuthUser {
        AuthUser {
            user_id,
            name: "Ana".into(),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn registrar_is_forced_to_own_records() {
        let registrar = caller(1, &[Role::Registrar]);
        assert_eq!(visible_registrar(&registrar, 2, None).unwrap(), Some(1));
        assert_eq!(visible_registrar(&registrar, 2, Some(9)).unwrap(), Some(1));
        assert_eq!(visible_registrar(&registrar, 1, Some(9)).unwrap(), Some(9));
    }

    #[test]
    fn supervisors_read_everybody() {
        let supervisor = caller(1, &[Role::Supervisor]);
        assert_eq!(visible_registrar(&supervisor, 2, None).unwrap(), None);
    }

    #[test]
    fn employees_only_read_themselves() {
        let employee = caller(1, &[Role::Employee]);
        assert!(visible_registrar(&employee, 1, None).is_ok());
        assert!(matches!(
            visible_registrar(&employee, 2, None),
            Err(AppError::Forbidden(_))
        ));
    }

    #[test]
    fn register_body_takes_short_time_names() {
        let body: RegisterEntry = serde_json::from_value(json!({
            "user_id": 4, "date": "2025-03-03", "start": "08:00:00", "end": "15:00:00"
        }))
        .unwrap();
        assert_eq!(body.start_time, NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(body.end_time, NaiveTime::from_hms_opt(15, 0, 0));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let d = |day| NaiveDate::from_ymd_opt(2025, 3, day).unwrap();
        assert!(check_range(Some(d(5)), Some(d(1))).is_err());
        assert!(check_range(Some(d(1)), Some(d(1))).is_ok());
        assert!(check_range(None, Some(d(1))).is_ok());
    }

    #[actix_web::test]
    async fn employee_cannot_clock_for_someone_else() {
        let pool = sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://localhost/none")
            .unwrap();
        let config = Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://localhost/none".into()),
            "JWT_SECRET" => Some("test-secret".into()),
            _ => None,
        })
        .unwrap();

        let app = init_service(
            App::new()
                .app_data(web::Data::new(pool))
                .app_data(web::Data::new(config))
                .route("/clock", web::post().to(register_entry)),
        )
        .await;

        let req = TestRequest::post()
            .uri("/clock")
            .set_json(json!({"user_id": 2, "date": "2025-03-03", "start_time": "08:00:00"}))
            .to_request();
        req.extensions_mut().insert(caller(1, &[Role::Employee]));
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }
}
