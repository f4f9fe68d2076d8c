use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::model::audit::{AuditKind, NewAuditEntry};
use crate::model::clock_entry::{ClockEntry, NewClockEntry};
use crate::model::incident::{Incident, IncidentKind, IncidentState, NewIncident};
use crate::model::role::Role;
use crate::model::user_cache::WithUserCache;
use crate::store;
use crate::store::incident::{IncidentQuery, IncidentScope, Resubmission};
use actix_web::{HttpResponse, web};
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Deserialize;
use serde_json::json;
use sqlx::{MySqlConnection, MySqlPool};
use tracing::{error, info, warn};
use utoipa::ToSchema;

const RESOLVE_ERROR_MESSAGE: &str = "Internal error while resolving the incident";

#[derive(Debug, Deserialize, ToSchema)]
pub struct ResubmitIncident {
    /// state the caller saw: 2 conflict or 4 rejected
    #[schema(example = 2, value_type = u8)]
    pub from_state: IncidentState,
    #[serde(alias = "start")]
    #[schema(example = "08:00:00", value_type = Option<String>)]
    pub start_time: Option<NaiveTime>,
    #[serde(alias = "end")]
    #[schema(example = "15:00:00", value_type = Option<String>)]
    pub end_time: Option<NaiveTime>,
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct IncidentAction {
    #[schema(example = 17)]
    pub id: u64,
    /// 6 resolve, 7 reject
    #[schema(example = 6, value_type = u8)]
    pub action: IncidentState,
    pub reject_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IncidentFilter {
    #[schema(example = "2025-03-01", format = "date", value_type = Option<String>)]
    pub from: Option<NaiveDate>,
    #[schema(example = "2025-03-31", format = "date", value_type = Option<String>)]
    pub to: Option<NaiveDate>,
    #[serde(default)]
    #[schema(example = json!([1, 3]), value_type = Vec<u8>)]
    pub states: Vec<IncidentState>,
    /// creator filter, honoured for roles that see every incident
    #[serde(alias = "user")]
    pub user_id: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProcessIncidents {
    pub incidents: Vec<IncidentAction>,
    #[serde(default)]
    pub filter: IncidentFilter,
}

/// Where a failed resolution leaves the incident.
#[derive(Debug)]
struct FailureOutcome {
    state: IncidentState,
    message: String,
    audit: Option<NewAuditEntry>,
}

/// User-facing errors become a conflict the requester can fix and resubmit;
/// anything else is kept as a resolve error with a generic message.
fn failure_outcome(
    e: &AppError,
    manager: u64,
    incident_id: u64,
    now: NaiveDateTime,
) -> FailureOutcome {
    match e.user_message() {
        Some(message) => FailureOutcome {
            state: IncidentState::Conflict,
            audit: Some(
                NewAuditEntry::new(manager, AuditKind::IncidentConflict, incident_id, now)
                    .with_reason(message.as_str()),
            ),
            message,
        },
        None => FailureOutcome {
            state: IncidentState::ResolveError,
            message: RESOLVE_ERROR_MESSAGE.to_string(),
            audit: None,
        },
    }
}

fn scope_for(auth: &AuthUser, filter: &IncidentFilter) -> IncidentScope {
    if auth.has_any(&[Role::Manager, Role::Admin, Role::Director, Role::Inspector]) {
        IncidentScope::All {
            creator: filter.user_id,
        }
    } else if auth.has_role(Role::Supervisor) {
        IncidentScope::OnBehalf {
            supervisor: auth.user_id,
        }
    } else {
        IncidentScope::CreatedBy(auth.user_id)
    }
}

async fn with_users(
    conn: &mut MySqlConnection,
    incidents: Vec<Incident>,
) -> AppResult<WithUserCache<Incident>> {
    let ids: Vec<u64> = incidents
        .iter()
        .flat_map(|i| [Some(i.user_id), Some(i.creator_id), i.manager_id])
        .flatten()
        .collect();

    let mut cache = WithUserCache::with_capacity(incidents.len());
    for incident in incidents {
        cache.push_item(incident);
    }
    store::user::fill_cache(conn, &mut cache, ids).await?;
    Ok(cache)
}

async fn search_visible(
    conn: &mut MySqlConnection,
    auth: &AuthUser,
    filter: &IncidentFilter,
) -> AppResult<WithUserCache<Incident>> {
    if let (Some(from), Some(to)) = (filter.from, filter.to) {
        if from > to {
            return Err(AppError::validation(format!(
                "`from` ({from}) must not be after `to` ({to})"
            )));
        }
    }
    let query = IncidentQuery {
        from: filter.from,
        to: filter.to,
        states: filter.states.clone(),
    };
    let incidents = store::incident::search(conn, &query, scope_for(auth, filter)).await?;
    with_users(conn, incidents).await
}

async fn linked_entry(conn: &mut MySqlConnection, entry_id: Option<u64>) -> AppResult<Option<ClockEntry>> {
    match entry_id {
        Some(id) => store::clock::find_active(conn, id)
            .await?
            .map(Some)
            .ok_or_else(|| {
                AppError::validation(format!("Clock entry {id} does not exist or was already changed"))
            }),
        None => Ok(None),
    }
}

/// Request a change on the clock records
#[utoipa::path(
    post,
    path = "/api/v1/incidents",
    request_body = NewIncident,
    responses(
        (status = 201, description = "Incident requested", body = Object, example = json!({"id": 17})),
        (status = 400, description = "Fields missing for the kind, or entry not usable"),
        (status = 403, description = "Forbidden"),
        (status = 409, description = "The entry already has an incident")
    ),
    security(("bearer_auth" = [])),
    tag = "Incidents"
)]
pub async fn create_incident(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<NewIncident>,
) -> AppResult<HttpResponse> {
    let req = payload.into_inner();
    let on_behalf = req.user_id != auth.user_id;

    if on_behalf && !auth.is_registrar() {
        return Err(AppError::Forbidden("Only registrars request changes for others"));
    }
    if req.kind == IncidentKind::DeleteEntry && !auth.is_registrar() {
        return Err(AppError::Forbidden("Only registrars request an entry deletion"));
    }

    let mut conn = pool.acquire().await?;
    let linked = linked_entry(&mut conn, req.clock_entry_id).await?;
    req.check(linked.as_ref())
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let plain_registrar = auth.has_role(Role::Registrar) && !auth.has_role(Role::Supervisor);
    if let Some(entry) = &linked {
        if plain_registrar
            && (on_behalf || req.kind == IncidentKind::DeleteEntry)
            && entry.registrar_id != Some(auth.user_id)
        {
            return Err(AppError::Forbidden("You can only request changes on entries you registered"));
        }
    }

    let id = store::incident::insert(&mut conn, &req, auth.user_id, config.now_local()).await?;
    info!(incident_id = id, kind = req.kind.as_ref(), creator = auth.user_id, "Incident requested");

    Ok(HttpResponse::Created().json(json!({ "id": id })))
}

/// Send a conflicting or rejected incident back as a new request
#[utoipa::path(
    put,
    path = "/api/v1/incidents/{id}/resubmit",
    params(("id" = u64, Path, description = "Incident id")),
    request_body = ResubmitIncident,
    responses(
        (status = 200, description = "Updated incident with user cache", body = Object),
        (status = 400, description = "State cannot be resubmitted or fields invalid"),
        (status = 403, description = "Not the creator"),
        (status = 404, description = "Incident not found"),
        (status = 409, description = "The incident changed meanwhile")
    ),
    security(("bearer_auth" = [])),
    tag = "Incidents"
)]
pub async fn resubmit_incident(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<ResubmitIncident>,
) -> AppResult<HttpResponse> {
    let id = path.into_inner();
    if !payload.from_state.can_resubmit() {
        return Err(AppError::validation(format!(
            "An incident in state {} cannot be resubmitted",
            payload.from_state.as_ref()
        )));
    }

    let mut tx = pool.begin().await?;
    let incident = store::incident::find(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("Incident {id} not found")))?;

    if incident.creator_id != auth.user_id && !auth.has_role(Role::Supervisor) {
        return Err(AppError::Forbidden("Only the creator can resubmit an incident"));
    }
    if incident.state != payload.from_state {
        return Err(AppError::Conflict(format!(
            "Incident {id} is now {}; reload it",
            incident.state.as_ref()
        )));
    }

    let candidate = NewIncident {
        kind: incident.kind,
        user_id: incident.user_id,
        date: incident.date,
        start_time: payload.start_time,
        end_time: payload.end_time,
        clock_entry_id: incident.clock_entry.as_ref().map(|e| e.id),
        reason: payload.reason.clone(),
    };
    let linked = linked_entry(&mut tx, candidate.clock_entry_id).await?;
    candidate
        .check(linked.as_ref())
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let now = config.now_local();
    let change = Resubmission {
        from: payload.from_state,
        start_time: payload.start_time,
        end_time: payload.end_time,
        reason: payload.reason.as_deref(),
        creator: auth.user_id,
        now,
    };
    if store::incident::resubmit(&mut tx, id, &change).await? == 0 {
        return Err(AppError::Conflict(format!("Incident {id} changed meanwhile; reload it")));
    }
    store::audit::insert(
        &mut tx,
        &NewAuditEntry::new(auth.user_id, AuditKind::IncidentResubmitted, id, now)
            .with_reason(incident.describe_request()),
    )
    .await?;

    let updated = store::incident::find(&mut tx, id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("incident {id} vanished after resubmission")))?;
    let response = with_users(&mut tx, vec![updated]).await?;
    tx.commit().await?;

    Ok(HttpResponse::Ok().json(response))
}

/// Resolve or reject a batch of incidents (Manager)
///
/// Each incident is handled in its own transaction; ids whose processing
/// could not be recorded at all are returned in `failed`.
#[utoipa::path(
    post,
    path = "/api/v1/incidents/process",
    request_body = ProcessIncidents,
    responses(
        (status = 200, description = "Failed ids plus the refreshed list", body = Object, example = json!({
            "failed": [],
            "incidents": {"items": [], "users": {}}
        })),
        (status = 403, description = "Forbidden")
    ),
    security(("bearer_auth" = [])),
    tag = "Incidents"
)]
pub async fn process_incidents(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<ProcessIncidents>,
) -> AppResult<HttpResponse> {
    auth.require_any(&[Role::Manager])?;

    let mut failed = Vec::new();
    for action in &payload.incidents {
        if let Err(e) = process_one(&pool, &config, auth.user_id, action).await {
            error!(incident_id = action.id, error = %e, "Failed to process incident");
            failed.push(action.id);
        }
    }

    let mut conn = pool.acquire().await?;
    let incidents = search_visible(&mut conn, &auth, &payload.filter).await?;
    Ok(HttpResponse::Ok().json(json!({
        "failed": failed,
        "incidents": incidents,
    })))
}

async fn process_one(
    pool: &MySqlPool,
    config: &Config,
    manager: u64,
    action: &IncidentAction,
) -> AppResult<()> {
    let now = config.now_local();
    match action.action {
        IncidentState::Reject => {
            let mut tx = pool.begin().await?;
            let reason = action.reject_reason.as_deref();
            if store::incident::reject(&mut tx, action.id, manager, reason, now).await? == 0 {
                warn!(incident_id = action.id, "Incident not in a rejectable state; skipped");
                return Ok(());
            }
            let mut entry = NewAuditEntry::new(manager, AuditKind::IncidentRejected, action.id, now);
            if let Some(reason) = reason {
                entry = entry.with_reason(reason);
            }
            store::audit::insert(&mut tx, &entry).await?;
            tx.commit().await?;
            info!(incident_id = action.id, manager, "Incident rejected");
        }
        IncidentState::Resolve => {
            let mut tx = pool.begin().await?;
            if store::incident::mark_resolved(&mut tx, action.id, manager, now).await? == 0 {
                warn!(incident_id = action.id, "Incident already processed; skipped");
                return Ok(());
            }
            let incident = store::incident::find(&mut tx, action.id)
                .await?
                .ok_or_else(|| AppError::Internal(format!("incident {} vanished", action.id)))?;

            // changes to clock entries are undone on failure, the state change is kept
            let outcome = {
                let mut savepoint = sqlx::Connection::begin(&mut *tx).await?;
                match apply_resolution(&mut savepoint, &incident, manager, now).await {
                    Ok(()) => {
                        savepoint.commit().await?;
                        Ok(())
                    }
                    Err(e) => {
                        savepoint.rollback().await?;
                        Err(e)
                    }
                }
            };

            match outcome {
                Ok(()) => {
                    store::audit::insert(
                        &mut tx,
                        &NewAuditEntry::new(manager, AuditKind::IncidentResolved, action.id, now),
                    )
                    .await?;
                    info!(incident_id = action.id, manager, "Incident resolved");
                }
                Err(e) => {
                    let failure = failure_outcome(&e, manager, action.id, now);
                    store::incident::mark_failed(
                        &mut tx,
                        action.id,
                        failure.state,
                        &failure.message,
                        now,
                    )
                    .await?;
                    match &failure.audit {
                        Some(entry) => {
                            store::audit::insert(&mut tx, entry).await?;
                            info!(incident_id = action.id, message = %failure.message, "Incident in conflict");
                        }
                        None => {
                            error!(incident_id = action.id, error = %e, "Incident resolution failed");
                        }
                    }
                }
            }
            tx.commit().await?;
        }
        other => {
            warn!(incident_id = action.id, action = other.as_ref(), "Unknown incident action ignored");
        }
    }
    Ok(())
}

/// Applies a resolved incident to the clock entries.
async fn apply_resolution(
    conn: &mut MySqlConnection,
    incident: &Incident,
    manager: u64,
    now: NaiveDateTime,
) -> AppResult<()> {
    let entry_id = incident.clock_entry.as_ref().map(|e| e.id);

    match incident.kind {
        IncidentKind::NewEntry => {
            let start_time = incident
                .start_time
                .ok_or_else(|| AppError::validation("The request has no start time"))?;
            let entry = NewClockEntry {
                user_id: incident.user_id,
                registrar_id: incident.registrar(),
                date: incident.date,
                start_time,
                end_time: incident.end_time,
            };
            store::clock::add(conn, &entry, None).await?;
        }
        IncidentKind::ExitCorrection => {
            let linked = linked_entry(conn, entry_id)
                .await?
                .ok_or_else(|| AppError::validation("The request has no clock entry"))?;
            let replacement = incident
                .exit_correction(&linked)
                .ok_or_else(|| AppError::validation("The request has no check-out time"))?;
            let new_id = store::clock::add(conn, &replacement, Some(linked.id)).await?;
            if store::clock::mark_replaced(conn, linked.id, new_id).await? == 0 {
                return Err(AppError::Conflict("The clock entry was changed meanwhile".into()));
            }
            store::audit::insert(
                conn,
                &NewAuditEntry::new(manager, AuditKind::EntryReplaced, linked.id, now)
                    .with_reason(format!("replaced by {new_id} for incident {}", incident.id)),
            )
            .await?;
        }
        IncidentKind::DeleteEntry => {
            let linked = linked_entry(conn, entry_id)
                .await?
                .ok_or_else(|| AppError::validation("The request has no clock entry"))?;
            if store::clock::mark_deleted(conn, linked.id, now).await? == 0 {
                return Err(AppError::Conflict("The clock entry was changed meanwhile".into()));
            }
            store::audit::insert(
                conn,
                &NewAuditEntry::new(manager, AuditKind::EntryDeleted, linked.id, now)
                    .with_reason(format!("incident {}", incident.id)),
            )
            .await?;
        }
    }
    Ok(())
}

/// List incidents visible to the caller
#[utoipa::path(
    post,
    path = "/api/v1/incidents/search",
    request_body = IncidentFilter,
    responses(
        (status = 200, description = "Incidents with user cache", body = Object),
        (status = 400, description = "from after to")
    ),
    security(("bearer_auth" = [])),
    tag = "Incidents"
)]
pub async fn search_incidents(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    payload: web::Json<IncidentFilter>,
) -> AppResult<HttpResponse> {
    let mut conn = pool.acquire().await?;
    let incidents = search_visible(&mut conn, &auth, &payload).await?;
    Ok(HttpResponse::Ok().json(incidents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::{TestRequest, call_service, init_service};
    use actix_web::{App, HttpMessage, http::StatusCode};

    fn caller(roles: &[Role]) -> AuthUser {
        AuthUser {
            user_id: 5,
            name: "Luis".into(),
            roles: roles.to_vec(),
        }
    }

    fn config() -> Config {
        Config::from_lookup(|key| match key {
            "SERVER_ADDR" => Some("127.0.0.1:0".into()),
            "DATABASE_URL" => Some("mysql://localhost/none".into()),
            "JWT_SECRET" => Some("test-secret".into()),
            _ => None,
        })
        .unwrap()
    }

    fn lazy_pool() -> MySqlPool {
        sqlx::mysql::MySqlPoolOptions::new()
            .connect_lazy("mysql://localhost/none")
            .unwrap()
    }

    #[test]
    fn listing_scope_follows_roles() {
        let filter = IncidentFilter {
            user_id: Some(9),
            ..Default::default()
        };
        assert_eq!(
            scope_for(&caller(&[Role::Inspector]), &filter),
            IncidentScope::All { creator: Some(9) }
        );
        assert_eq!(
            scope_for(&caller(&[Role::Supervisor]), &filter),
            IncidentScope::OnBehalf { supervisor: 5 }
        );
        assert_eq!(
            scope_for(&caller(&[Role::Employee, Role::Registrar]), &filter),
            IncidentScope::CreatedBy(5)
        );
    }

    #[test]
    fn process_body_accepts_numeric_actions() {
        let body: ProcessIncidents = serde_json::from_value(json!({
            "incidents": [{"id": 1, "action": 6}, {"id": 2, "action": 7, "reject_reason": "No"}]
        }))
        .unwrap();
        assert_eq!(body.incidents[0].action, IncidentState::Resolve);
        assert_eq!(body.incidents[1].action, IncidentState::Reject);
        assert!(body.filter.states.is_empty());
    }

    #[actix_web::test]
    async fn only_managers_process_incidents() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config()))
                .route("/incidents/process", web::post().to(process_incidents)),
        )
        .await;
        let req = TestRequest::post()
            .uri("/incidents/process")
            .set_json(json!({"incidents": []}))
            .to_request();
        req.extensions_mut().insert(caller(&[Role::Supervisor]));
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[actix_web::test]
    async fn employees_cannot_request_deletions() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config()))
                .route("/incidents", web::post().to(create_incident)),
        )
        .await;
        let req = TestRequest::post()
            .uri("/incidents")
            .set_json(json!({"kind": 2, "user_id": 5, "date": "2025-03-03", "clock_entry_id": 3}))
            .to_request();
        req.extensions_mut().insert(caller(&[Role::Employee]));
        let resp = call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn search_body_takes_user_as_creator_filter() {
        let filter: IncidentFilter =
            serde_json::from_value(json!({"states": [1], "user": 9})).unwrap();
        assert_eq!(filter.user_id, Some(9));
        assert_eq!(filter.states, vec![IncidentState::Requested]);

        let filter: IncidentFilter = serde_json::from_value(json!({"user_id": 4})).unwrap();
        assert_eq!(filter.user_id, Some(4));
    }

    #[test]
    fn resubmit_body_takes_short_time_names() {
        let body: ResubmitIncident = serde_json::from_value(json!({
            "from_state": 2, "start": "08:00:00", "end": "15:00:00"
        }))
        .unwrap();
        assert_eq!(body.start_time, NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(body.end_time, NaiveTime::from_hms_opt(15, 0, 0));
    }

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 3)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap()
    }

    #[test]
    fn user_facing_failure_is_a_conflict_with_audit() {
        let err = AppError::validation("There is an open entry on 2025-03-03");
        let outcome = failure_outcome(&err, 3, 17, now());
        assert_eq!(outcome.state, IncidentState::Conflict);
        assert_eq!(outcome.message, "There is an open entry on 2025-03-03");

        let audit = outcome.audit.unwrap();
        assert_eq!(audit.kind, AuditKind::IncidentConflict);
        assert_eq!(audit.author_id, Some(3));
        assert_eq!(audit.entity_id, 17);
        assert_eq!(audit.reason.as_deref(), Some("There is an open entry on 2025-03-03"));
    }

    #[test]
    fn infrastructure_failure_is_a_resolve_error() {
        for err in [
            AppError::Internal("incident 17 vanished".into()),
            AppError::from(sqlx::Error::PoolTimedOut),
        ] {
            let outcome = failure_outcome(&err, 3, 17, now());
            assert_eq!(outcome.state, IncidentState::ResolveError);
            assert_eq!(outcome.message, RESOLVE_ERROR_MESSAGE);
            assert!(outcome.audit.is_none());
        }
    }

    #[actix_web::test]
    async fn only_conflict_or_rejected_can_be_resubmitted() {
        let app = init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(config()))
                .route("/incidents/{id}/resubmit", web::put().to(resubmit_incident)),
        )
        .await;

        for state in [IncidentState::Requested, IncidentState::Resolved] {
            let req = TestRequest::put()
                .uri("/incidents/17/resubmit")
                .set_json(json!({"from_state": state.id(), "end": "15:00:00"}))
                .to_request();
            req.extensions_mut().insert(caller(&[Role::Employee]));
            let resp = call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", state.as_ref());
        }
    }
}
