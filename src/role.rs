//! Authorization roles and their landing routes.

use serde::{Deserialize, Serialize};

/// Authorization role carried by a profile row.
///
/// Admin outranks manager outranks employee in privilege, but the ordering is
/// only ever used to pick landing routes; there is no numeric comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Manager,
    Employee,
}

impl Role {
    /// Parse a wire-format role string. Unknown values (including legacy
    /// roles the profile table may still contain) map to `None`, which
    /// callers must treat as unauthorized for every role-gated route.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "admin" => Some(Self::Admin),
            "manager" => Some(Self::Manager),
            "employee" => Some(Self::Employee),
            _ => None,
        }
    }

    /// Landing route for an authenticated user with this role.
    #[must_use]
    pub fn landing_path(self) -> &'static str {
        match self {
            Self::Admin => "/admin",
            Self::Manager => "/manager",
            Self::Employee => "/employee",
        }
    }

    /// Landing route for an optional role. Unset or unknown roles fall back
    /// to the lowest-privilege landing, never to admin.
    #[must_use]
    pub fn landing_path_or_default(role: Option<Role>) -> &'static str {
        role.map_or(Role::Employee.landing_path(), Role::landing_path)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Manager => "manager",
            Self::Employee => "employee",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[path = "role_test.rs"]
mod tests;
