use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter};

/// Roles with the numeric ids the dashboard uses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Display, EnumIter)]
#[derive(Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Role {
    Employee = 1,
    Manager = 2,
    Admin = 3,
    Director = 4,
    Registrar = 5,
    Inspector = 6,
    Supervisor = 7,
}

impl Role {
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            1 => Some(Role::Employee),
            2 => Some(Role::Manager),
            3 => Some(Role::Admin),
            4 => Some(Role::Director),
            5 => Some(Role::Registrar),
            6 => Some(Role::Inspector),
            7 => Some(Role::Supervisor),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    /// Roles allowed to read every user's records.
    pub fn reads_everything(self) -> bool {
        matches!(
            self,
            Role::Manager | Role::Admin | Role::Director | Role::Inspector | Role::Supervisor
        )
    }
}

impl From<Role> for u8 {
    fn from(role: Role) -> u8 {
        role.id()
    }
}

impl TryFrom<u8> for Role {
    type Error = String;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        Role::from_id(id).ok_or_else(|| format!("unknown role id {id}"))
    }
}

/// Sorted, without repeats.
pub fn distinct(roles: &[Role]) -> Vec<Role> {
    let mut roles = roles.to_vec();
    roles.sort();
    roles.dedup();
    roles
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn ids_round_trip() {
        for role in Role::iter() {
            assert_eq!(Role::from_id(role.id()), Some(role));
        }
        assert_eq!(Role::from_id(0), None);
        assert_eq!(Role::from_id(8), None);
    }

    #[test]
    fn serializes_as_number() {
        assert_eq!(serde_json::to_string(&Role::Registrar).unwrap(), "5");
        let role: Role = serde_json::from_str("7").unwrap();
        assert_eq!(role, Role::Supervisor);
        assert!(serde_json::from_str::<Role>("9").is_err());
    }

    #[test]
    fn distinct_sorts_and_drops_repeats() {
        assert_eq!(
            distinct(&[Role::Registrar, Role::Employee, Role::Registrar]),
            vec![Role::Employee, Role::Registrar]
        );
    }
}
