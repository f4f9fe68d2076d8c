use crate::api::audit::{AuditListResponse, AuditQuery};
use crate::api::clock::{CheckOut, RegisterEntry};
use crate::api::incident::{IncidentAction, IncidentFilter, ProcessIncidents, ResubmitIncident};
use crate::api::schedule::{AssignSchedules, CreateSchedule};
use crate::api::user::PasswordProbe;
use crate::auth::password::PasswordCheck;
use crate::model::audit::AuditEntry;
use crate::model::clock_entry::DaySummary;
use crate::model::incident::NewIncident;
use crate::model::schedule::Schedule;
use crate::model::user::{ChangePassword, CreateUser, UpdateUser, User, UserDescriptor};
use crate::models::{LoginReqDto, LoginResponse};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi, openapi};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Controla API",
        version = "1.0.0",
        description = r#"
## Time and attendance

Backend of the attendance dashboard: employees clock in and out, registrars
record entries for others, and changes to recorded entries go through
incidents that a manager resolves or rejects.

### Key features
- **Users**: DNI login, roles, password policy
- **Schedules**: weekday slots assigned to users from an effective date
- **Clock entries**: check-in, check-out, day lists and hour summaries
- **Incidents**: request, resubmit, resolve or reject entry changes
- **Audit**: append-only log of user and incident changes

### Security
Every `/api/v1` endpoint takes a **JWT Bearer** access token obtained from
`/auth/login`. Clock entries are never edited in place; corrections and
deletions keep the previous row.

### Response format
- JSON bodies; enums travel as numeric ids
- Lists that reference users carry an `items` array plus a `users` map
"#,
    ),
    paths(
        crate::auth::handlers::login,
        crate::auth::handlers::refresh_token,
        crate::auth::handlers::logout,

        crate::api::user::create_user,
        crate::api::user::update_user,
        crate::api::user::change_password,
        crate::api::user::check_password,
        crate::api::user::list_users,
        crate::api::user::get_user,
        crate::api::user::me,
        crate::api::user::users_with_role,

        crate::api::schedule::create_schedule,
        crate::api::schedule::list_schedules,
        crate::api::schedule::assign_schedules,
        crate::api::schedule::unassigned_today,
        crate::api::schedule::closest_schedule,

        crate::api::clock::register_entry,
        crate::api::clock::check_out,
        crate::api::clock::open_entry,
        crate::api::clock::entries_on,
        crate::api::clock::latest_entries,
        crate::api::clock::entries_between,
        crate::api::clock::entries_without_incident,
        crate::api::clock::summary,

        crate::api::incident::create_incident,
        crate::api::incident::resubmit_incident,
        crate::api::incident::process_incidents,
        crate::api::incident::search_incidents,

        crate::api::audit::list_audit
    ),
    components(
        schemas(
            LoginReqDto,
            LoginResponse,
            User,
            UserDescriptor,
            CreateUser,
            UpdateUser,
            ChangePassword,
            PasswordProbe,
            PasswordCheck,
            Schedule,
            CreateSchedule,
            AssignSchedules,
            RegisterEntry,
            CheckOut,
            DaySummary,
            NewIncident,
            ResubmitIncident,
            IncidentAction,
            IncidentFilter,
            ProcessIncidents,
            AuditEntry,
            AuditQuery,
            AuditListResponse
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Auth", description = "Login and token rotation"),
        (name = "Users", description = "User management APIs"),
        (name = "Schedules", description = "Schedule slot APIs"),
        (name = "Clock", description = "Clock entry APIs"),
        (name = "Incidents", description = "Incident workflow APIs"),
        (name = "Audit", description = "Audit log APIs"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_lists_core_paths_and_bearer_scheme() {
        let doc = ApiDoc::openapi();
        let json = serde_json::to_value(&doc).unwrap();
        let paths = json["paths"].as_object().unwrap();
        assert!(paths.contains_key("/auth/login"));
        assert!(paths.contains_key("/api/v1/incidents/process"));
        assert!(paths.contains_key("/api/v1/users/{id}/clock/summary"));
        assert!(json["components"]["securitySchemes"]["bearer_auth"].is_object());
    }
}
