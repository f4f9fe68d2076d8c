use crate::model::role::Role;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRow {
    pub id: u64,
    pub dni: String,
    pub email: String,
    pub name: String,
    pub first_surname: String,
    pub second_surname: Option<String>,
    pub active_since: Option<NaiveDateTime>,
    pub last_login_at: Option<NaiveDateTime>,
}

/// Row used by login: only place the password hash is read.
#[derive(sqlx::FromRow)]
pub struct Credentials {
    pub id: u64,
    pub name: String,
    pub password: String,
    pub active_since: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct User {
    #[schema(example = 1)]
    pub id: u64,
    #[schema(example = "12345678Z")]
    pub dni: String,
    #[schema(example = "ana.garcia@example.com")]
    pub email: String,
    #[schema(example = "Ana")]
    pub name: String,
    #[schema(example = "García")]
    pub first_surname: String,
    #[schema(example = "López", nullable = true)]
    pub second_surname: Option<String>,
    /// `null` when the account is disabled
    #[schema(example = "2025-01-01T08:00:00", format = "date-time", value_type = Option<String>)]
    pub active_since: Option<NaiveDateTime>,
    #[schema(format = "date-time", value_type = Option<String>)]
    pub last_login_at: Option<NaiveDateTime>,
    #[schema(example = json!([1, 5]), value_type = Vec<u8>)]
    pub roles: Vec<Role>,
}

impl User {
    pub fn from_row(row: UserRow, roles: Vec<Role>) -> Self {
        Self {
            id: row.id,
            dni: row.dni,
            email: row.email,
            name: row.name,
            first_surname: row.first_surname,
            second_surname: row.second_surname,
            active_since: row.active_since,
            last_login_at: row.last_login_at,
            roles,
        }
    }
}

/// The part of a user other records need to display who did what.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, ToSchema)]
pub struct UserDescriptor {
    pub id: u64,
    pub name: String,
    pub first_surname: String,
    pub second_surname: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateUser {
    #[schema(example = "12345678Z")]
    pub dni: String,
    #[schema(example = "ana.garcia@example.com")]
    pub email: String,
    #[schema(example = "Ana")]
    pub name: String,
    #[schema(example = "García")]
    pub first_surname: String,
    pub second_surname: Option<String>,
    #[schema(example = "Tr1cky!Passw0rd")]
    pub password: String,
    #[serde(default = "default_active")]
    pub active: bool,
    #[schema(example = json!([1]), value_type = Vec<u8>)]
    pub roles: Vec<Role>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateUser {
    #[schema(example = "12345678Z")]
    pub dni: String,
    pub email: String,
    pub name: String,
    pub first_surname: String,
    pub second_surname: Option<String>,
    /// false disables the account
    pub active: bool,
    #[schema(example = json!([1, 5]), value_type = Vec<u8>)]
    pub roles: Vec<Role>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangePassword {
    pub password: String,
}
