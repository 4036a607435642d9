//! Route table — navigation targets and the access rules attached to them.

use crate::role::Role;

pub const LOGIN_PATH: &str = "/login";

/// Access rules attached to a route. A route declaring both `requires_auth`
/// and `requires_guest` is a configuration error the guard rejects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteRules {
    pub requires_auth: bool,
    pub requires_guest: bool,
    pub requires_role: Option<Role>,
}

impl RouteRules {
    pub const NONE: Self = Self { requires_auth: false, requires_guest: false, requires_role: None };

    /// Authenticated users only.
    #[must_use]
    pub const fn auth() -> Self {
        Self { requires_auth: true, requires_guest: false, requires_role: None }
    }

    /// Signed-out users only (e.g. the login screen).
    #[must_use]
    pub const fn guest() -> Self {
        Self { requires_auth: false, requires_guest: true, requires_role: None }
    }

    /// Authenticated users holding exactly this role.
    #[must_use]
    pub const fn role(role: Role) -> Self {
        Self { requires_auth: true, requires_guest: false, requires_role: Some(role) }
    }
}

/// A named route in the application table.
#[derive(Debug, Clone)]
pub struct Route {
    pub path: &'static str,
    pub name: &'static str,
    pub rules: RouteRules,
    /// Unconditional forward (the bare root goes straight to login).
    pub redirect_to: Option<&'static str>,
}

static APP_ROUTES: [Route; 5] = [
    Route { path: "/", name: "Root", rules: RouteRules::NONE, redirect_to: Some(LOGIN_PATH) },
    Route { path: LOGIN_PATH, name: "Login", rules: RouteRules::guest(), redirect_to: None },
    Route { path: "/admin", name: "Admin", rules: RouteRules::role(Role::Admin), redirect_to: None },
    Route { path: "/manager", name: "Manager", rules: RouteRules::role(Role::Manager), redirect_to: None },
    Route { path: "/employee", name: "Employee", rules: RouteRules::role(Role::Employee), redirect_to: None },
];

/// The full application route table.
#[must_use]
pub fn app_routes() -> &'static [Route] {
    &APP_ROUTES
}

/// Look up a route by exact path. Unknown paths carry no rules.
#[must_use]
pub fn find_route(path: &str) -> Option<&'static Route> {
    APP_ROUTES.iter().find(|route| route.path == path)
}

#[cfg(test)]
#[path = "routes_test.rs"]
mod tests;
