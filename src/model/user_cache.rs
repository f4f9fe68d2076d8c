use crate::model::user::UserDescriptor;
use serde::Serialize;
use std::collections::BTreeMap;

/// A list of records plus the descriptors of every user they reference.
///
/// Records keep only user ids; each user is sent once in `users`, keyed by id.
#[derive(Debug, Clone, Serialize)]
pub struct WithUserCache<T> {
    pub items: Vec<T>,
    pub users: BTreeMap<u64, UserDescriptor>,
}

impl<T> Default for WithUserCache<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            users: BTreeMap::new(),
        }
    }
}

impl<T> WithUserCache<T> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            users: BTreeMap::new(),
        }
    }

    pub fn push_item(&mut self, item: T) {
        self.items.push(item);
    }

    /// Keeps the first descriptor seen for an id.
    pub fn push_user(&mut self, user: UserDescriptor) {
        self.users.entry(user.id).or_insert(user);
    }

    pub fn user(&self, id: u64) -> Option<&UserDescriptor> {
        self.users.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn desc(id: u64, name: &str) -> UserDescriptor {
        UserDescriptor {
            id,
            name: name.into(),
            first_surname: "Pérez".into(),
            second_surname: None,
        }
    }

    #[test]
    fn each_user_is_stored_once() {
        let mut cache = WithUserCache::with_capacity(2);
        cache.push_item(10u64);
        cache.push_item(11u64);
        cache.push_user(desc(1, "Ana"));
        cache.push_user(desc(1, "Other"));
        cache.push_user(desc(2, "Luis"));

        assert_eq!(cache.users.len(), 2);
        assert_eq!(cache.user(1).map(|u| u.name.as_str()), Some("Ana"));
        assert_eq!(cache.user(3), None);
    }

    #[test]
    fn serializes_items_and_users_by_id() {
        let mut cache = WithUserCache::default();
        cache.push_item(json!({"id": 7, "user_id": 1}));
        cache.push_user(desc(1, "Ana"));

        assert_eq!(
            serde_json::to_value(&cache).unwrap(),
            json!({
                "items": [{"id": 7, "user_id": 1}],
                "users": {
                    "1": {"id": 1, "name": "Ana", "first_surname": "Pérez", "second_surname": null}
                }
            })
        );
    }
}
