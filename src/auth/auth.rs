use crate::error::AppError;
use crate::model::role::Role;
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload};
use futures::future::{Ready, ready};

/// Caller identity, put in the request extensions by `auth_middleware`.
/// Roles are the user's current ones, not the ones in the token.
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: u64,
    pub name: String,
    pub roles: Vec<Role>,
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        match req.extensions().get::<AuthUser>() {
            Some(user) => ready(Ok(user.clone())),
            None => ready(Err(AppError::Unauthorized("Missing token").into())),
        }
    }
}

impl AuthUser {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn has_any(&self, roles: &[Role]) -> bool {
        roles.iter().any(|r| self.has_role(*r))
    }

    pub fn require_any(&self, roles: &[Role]) -> Result<(), AppError> {
        if self.has_any(roles) {
            Ok(())
        } else {
            Err(AppError::Forbidden("Not allowed for your role"))
        }
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        self.require_any(&[Role::Admin])
    }

    /// Registrars and supervisors record entries on behalf of others.
    pub fn is_registrar(&self) -> bool {
        self.has_any(&[Role::Registrar, Role::Supervisor])
    }

    /// Whether the caller may read records of `user_id` without restriction.
    pub fn reads_all_of(&self, user_id: u64) -> bool {
        self.user_id == user_id || self.roles.iter().any(|r| r.reads_everything())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(roles: &[Role]) -> AuthUser {
        AuthUser {
            user_id: 7,
            name: "Ana".into(),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn role_checks() {
        let u = user(&[Role::Employee, Role::Registrar]);
        assert!(u.is_registrar());
        assert!(u.require_admin().is_err());
        assert!(u.require_any(&[Role::Manager, Role::Registrar]).is_ok());
    }

    #[test]
    fn own_records_are_always_readable() {
        let employee = user(&[Role::Employee]);
        assert!(employee.reads_all_of(7));
        assert!(!employee.reads_all_of(8));
        assert!(user(&[Role::Inspector]).reads_all_of(8));
        assert!(!user(&[Role::Registrar]).reads_all_of(8));
    }
}
