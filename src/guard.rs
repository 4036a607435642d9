//! Route guard — allow / deny / redirect decisions for navigation attempts.
//!
//! DESIGN
//! ======
//! Consulted before every navigation. Reads only [`SessionStore`] state,
//! never performs remote calls of its own. Rule precedence is fixed:
//! requires_auth, then requires_guest, then requires_role — and an
//! unresolved (still loading) session denies outright rather than guessing,
//! so no unauthorized content ever flashes.

use tracing::debug;

use crate::role::Role;
use crate::routes::{LOGIN_PATH, RouteRules};
use crate::store::SessionStore;

/// Route configuration errors the guard refuses to evaluate.
#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    /// `requires_auth` and `requires_guest` on the same route have no
    /// defined precedence.
    #[error("route {path:?} declares both requires_auth and requires_guest")]
    ConflictingRules { path: String },
}

/// Outcome of a guard check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Proceed with the navigation.
    Allow,
    /// Session state is still resolving; hold the navigation, no redirect.
    Deny,
    /// Navigate elsewhere. `redirect_back` preserves the originally
    /// requested path so login can return the user afterwards.
    Redirect { path: String, redirect_back: Option<String> },
}

impl Verdict {
    fn to_login(original: &str) -> Self {
        Self::Redirect { path: LOGIN_PATH.to_owned(), redirect_back: Some(original.to_owned()) }
    }

    /// Landing redirect for an authenticated but misrouted user. Unset or
    /// unknown roles land on the lowest-privilege screen, never admin.
    fn to_landing(role: Option<Role>) -> Self {
        Self::Redirect { path: Role::landing_path_or_default(role).to_owned(), redirect_back: None }
    }
}

/// Navigation gatekeeper over a shared [`SessionStore`].
pub struct RouteGuard {
    store: SessionStore,
}

impl RouteGuard {
    #[must_use]
    pub fn new(store: SessionStore) -> Self {
        Self { store }
    }

    /// Decide a navigation to `path` under `rules`.
    ///
    /// Triggers the store bootstrap first so a navigation can never race
    /// ahead of an unresolved session.
    ///
    /// # Errors
    ///
    /// Returns [`GuardError::ConflictingRules`] when the route declares both
    /// auth-only and guest-only access.
    pub async fn check(&self, path: &str, rules: &RouteRules) -> Result<Verdict, GuardError> {
        if rules.requires_auth && rules.requires_guest {
            return Err(GuardError::ConflictingRules { path: path.to_owned() });
        }

        self.store.ready().await;

        let state = self.store.state();
        if state.loading {
            debug!(path, "session still resolving, holding navigation");
            return Ok(Verdict::Deny);
        }

        if rules.requires_auth && !state.authenticated {
            return Ok(Verdict::to_login(path));
        }

        if rules.requires_guest && state.authenticated {
            return Ok(Verdict::to_landing(state.role));
        }

        if let Some(required) = rules.requires_role {
            if state.role != Some(required) {
                // Authenticated but misrouted: send to their own landing,
                // not to login.
                return Ok(Verdict::to_landing(state.role));
            }
        }

        Ok(Verdict::Allow)
    }
}

#[cfg(test)]
#[path = "guard_test.rs"]
mod tests;
