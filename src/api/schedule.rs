use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::clock_entry::taken_schedules;
use crate::model::schedule::{self, Schedule, Weekday};
use crate::store;
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

#[derive(Deserialize, ToSchema)]
pub struct CreateSchedule {
    /// L, M, X, J, V, S or D
    #[schema(example = "L")]
    pub weekday: String,
    #[schema(example = "08:00:00", value_type = String)]
    pub start_time: NaiveTime,
    #[schema(example = "15:00:00", value_type = String)]
    pub end_time: NaiveTime,
}

#[derive(Deserialize, ToSchema)]
pub struct AssignSchedules {
    #[schema(example = "2025-01-01", format = "date", value_type = String)]
    pub effective_from: NaiveDate,
    #[schema(example = json!([1, 2, 3, 4, 5]))]
    pub schedule_ids: Vec<u64>,
}

#[derive(Deserialize, IntoParams)]
pub struct AtQuery {
    /// date-time to match; now when missing
    #[param(value_type = Option<String>, example = "2025-03-03T09:15:00")]
    pub at: Option<NaiveDateTime>,
}

/// Create a schedule slot (Admin)
#[utoipa::path(
    post,
    path = "/api/v1/schedules",
    request_body = CreateSchedule,
    responses(
        (status = 201, description = "Slot created", body = Object, example = json!({"id": 3})),
        (status = 400, description = "Unknown weekday or empty range"),
        (status = 409, description = "Slot already exists")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedules"
)]
pub async fn create_schedule(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<CreateSchedule>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;

    let weekday = Weekday::from_letter(&payload.weekday).ok_or_else(|| {
        AppError::validation(format!("`{}` is not a weekday letter", payload.weekday))
    })?;
    if payload.end_time <= payload.start_time {
        return Err(AppError::validation("The slot must end after it starts"));
    }

    let mut conn = pool.acquire().await?;
    let id = store::schedule::insert(&mut conn, weekday, payload.start_time, payload.end_time)
        .await?;
    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

/// List schedule slots
#[utoipa::path(
    get,
    path = "/api/v1/schedules",
    responses((status = 200, description = "All slots", body = [Schedule])),
    security(("bearer_auth" = [])),
    tag = "Schedules"
)]
pub async fn list_schedules(_auth: AuthUser, pool: web::Data<MySqlPool>) -> AppResult<HttpResponse> {
    let mut conn = pool.acquire().await?;
    Ok(HttpResponse::Ok().json(store::schedule::list(&mut conn).await?))
}

/// Assign a set of slots to a user from a date on (Admin)
#[utoipa::path(
    post,
    path = "/api/v1/users/{id}/schedules",
    params(("id" = u64, Path, description = "User id")),
    request_body = AssignSchedules,
    responses(
        (status = 204, description = "Assigned"),
        (status = 400, description = "Empty set"),
        (status = 409, description = "Unknown user or slot")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedules"
)]
pub async fn assign_schedules(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    path: web::Path<u64>,
    payload: web::Json<AssignSchedules>,
) -> AppResult<HttpResponse> {
    auth.require_admin()?;
    if payload.schedule_ids.is_empty() {
        return Err(AppError::validation("At least one schedule slot is required"));
    }
    let user_id = path.into_inner();

    let mut tx = pool.begin().await?;
    store::schedule::assign(&mut tx, user_id, payload.effective_from, &payload.schedule_ids)
        .await?;
    tx.commit().await?;

    Ok(HttpResponse::NoContent().finish())
}

/// Today's slots not yet used by a clock entry
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/schedules/today",
    params(("id" = u64, Path, description = "User id")),
    responses((status = 200, description = "Free slots ordered by start", body = [Schedule])),
    security(("bearer_auth" = [])),
    tag = "Schedules"
)]
pub async fn unassigned_today(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    if !auth.reads_all_of(user_id) && !auth.is_registrar() {
        return Err(AppError::Forbidden("Not allowed for your role"));
    }
    let today = config.now_local().date();

    let mut conn = pool.acquire().await?;
    let slots = store::schedule::effective_on(&mut conn, user_id, today).await?;
    let entries = store::clock::active_on(&mut conn, user_id, today, None).await?;
    let taken = taken_schedules(&entries, None);

    let free: Vec<&Schedule> = schedule::unassigned(&slots, &taken);
    Ok(HttpResponse::Ok().json(free))
}

/// Slot a clock entry at the given time would be assigned to
#[utoipa::path(
    get,
    path = "/api/v1/users/{id}/schedules/closest",
    params(("id" = u64, Path, description = "User id"), AtQuery),
    responses(
        (status = 200, description = "Closest free slot", body = Schedule),
        (status = 400, description = "No free slot")
    ),
    security(("bearer_auth" = [])),
    tag = "Schedules"
)]
pub async fn closest_schedule(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    query: web::Query<AtQuery>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    if !auth.reads_all_of(user_id) && !auth.is_registrar() {
        return Err(AppError::Forbidden("Not allowed for your role"));
    }
    let at = query.at.unwrap_or_else(|| config.now_local());

    let mut conn = pool.acquire().await?;
    let slot =
        store::clock::closest_schedule(&mut conn, user_id, at.date(), at.time(), None).await?;
    Ok(HttpResponse::Ok().json(slot))
}
