//! rolegate — session cache and role-based navigation guard.
//!
//! ARCHITECTURE
//! ============
//! Two components, consumed in this order: [`SessionStore`] owns the
//! authenticated session, the derived user/profile pair, and a loading flag,
//! synchronized with a remote identity service behind the
//! [`identity::IdentityService`] seam. [`RouteGuard`] is consulted before
//! every navigation and decides allow / deny / redirect from the store's
//! cached state alone — it never performs remote calls of its own.
//!
//! Control flow: application boot → `SessionStore::ready()` (idempotent,
//! side effects exactly once) → long-lived subscription to remote auth
//! changes → `RouteGuard::check()` per navigation attempt.

pub mod guard;
pub mod identity;
pub mod role;
pub mod routes;
pub mod store;

pub use guard::{GuardError, RouteGuard, Verdict};
pub use identity::{
    AuthChange, AuthEvent, AuthUser, IdentityError, IdentityService, Profile, ProfileStore, Session, SignUpData,
    SignUpMetadata,
};
pub use role::Role;
pub use routes::{Route, RouteRules, find_route};
pub use store::{AuthState, SessionStore};
