use std::collections::HashMap;

use serde::Deserialize;

/// A workspace member as listed once at connect time.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub is_admin: bool,
}

impl User {
    pub fn new(id: impl Into<String>, name: impl Into<String>, is_admin: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            is_admin,
        }
    }
}

/// Members keyed by id.
#[derive(Debug, Clone, Default)]
pub struct UserDirectory {
    users: HashMap<String, User>,
}

impl UserDirectory {
    pub fn get(&self, id: &str) -> Option<&User> {
        self.users.get(id)
    }

    /// Resolves a mention token: user id first, then display name.
    pub fn find(&self, token: &str) -> Option<&User> {
        self.get(token).or_else(|| {
            self.users
                .values()
                .find(|user| user.name.eq_ignore_ascii_case(token))
        })
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl FromIterator<User> for UserDirectory {
    fn from_iter<I: IntoIterator<Item = User>>(iter: I) -> Self {
        Self {
            users: iter.into_iter().map(|u| (u.id.clone(), u)).collect(),
        }
    }
}
