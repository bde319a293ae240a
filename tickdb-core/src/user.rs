//! Caller identity and per-database privileges

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Privilege level on a single database
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privilege {
    Read,
    Write,
    All,
}

/// A resolved caller identity, owned by the backend and borrowed by the
/// request pipeline for the duration of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    pub admin: bool,

    #[serde(default)]
    pub privileges: BTreeMap<String, Privilege>,
}

impl User {
    pub fn new<S: Into<String>>(name: S, admin: bool) -> Self {
        Self {
            name: name.into(),
            admin,
            privileges: BTreeMap::new(),
        }
    }

    /// Grant a privilege on one database.
    pub fn with_privilege<S: Into<String>>(mut self, database: S, privilege: Privilege) -> Self {
        self.privileges.insert(database.into(), privilege);
        self
    }

    /// Whether this identity may perform `privilege` against `database`.
    /// Admins are authorized for everything; `All` covers both directions;
    /// `Read` and `Write` are distinct and neither implies the other.
    pub fn authorize(&self, privilege: Privilege, database: &str) -> bool {
        if self.admin {
            return true;
        }
        match self.privileges.get(database) {
            Some(Privilege::All) => true,
            Some(held) => *held == privilege,
            None => false,
        }
    }
}
