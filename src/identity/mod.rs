//! Identity-service seam — wire types and the async traits the session
//! store consumes.
//!
//! DESIGN
//! ======
//! The remote authentication backend and the profile row store are opaque
//! collaborators. Both are modeled as dyn-compatible traits so the store and
//! guard can be exercised against mocks; the concrete REST implementation
//! lives in [`http`].

pub mod http;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::role::Role;

// =============================================================================
// ERROR
// =============================================================================

/// Errors produced by remote identity and profile-store operations.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// The HTTP request to the identity service failed to complete.
    #[error("identity request failed: {0}")]
    Request(String),

    /// The identity service returned a non-success status.
    #[error("identity service error: status {status}: {message}")]
    Service { status: u16, message: String },

    /// The identity service response body could not be deserialized.
    #[error("identity response parse failed: {0}")]
    Parse(String),

    /// The profile store rejected a select or insert.
    #[error("profile store error: {0}")]
    ProfileStore(String),
}

// =============================================================================
// WIRE TYPES
// =============================================================================

/// Identity record attached to a session. Exists only while a session exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
}

/// Server-issued proof of authentication tied to a user.
///
/// Replaced wholesale on every auth-state change, never partially mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds at which the access token expires.
    #[serde(default)]
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

/// Application-level authorization record, keyed by user id. At most one row
/// per user; created out-of-band (admin action or sign-up), only read here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: Uuid,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub full_name: Option<String>,
    /// Unknown wire values deserialize to `None` rather than failing the
    /// whole row.
    #[serde(default, deserialize_with = "role_from_wire")]
    pub role: Option<Role>,
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn role_from_wire<'de, D>(deserializer: D) -> Result<Option<Role>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(Role::parse))
}

/// Remote auth-state change kinds the service pushes to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthEvent {
    SignedIn,
    SignedOut,
    TokenRefreshed,
}

/// One auth-state change pushed by the remote service.
#[derive(Debug, Clone)]
pub struct AuthChange {
    pub event: AuthEvent,
    /// The replacement session; `None` on sign-out.
    pub session: Option<Session>,
}

/// Outcome of a sign-up call. The new identity may come without a session
/// (e.g. e-mail confirmation still pending).
#[derive(Debug, Clone)]
pub struct SignUpData {
    pub user: AuthUser,
    pub session: Option<Session>,
}

/// Metadata attached to a sign-up call and mirrored into the profile row.
#[derive(Debug, Clone, Serialize)]
pub struct SignUpMetadata {
    pub full_name: String,
    pub role: Role,
    /// Back-reference to the creating user; `None` for self-registration.
    pub created_by: Option<Uuid>,
}

// =============================================================================
// SERVICE TRAITS
// =============================================================================

/// Remote authentication service. Dyn-compatible to enable mocking in tests.
#[async_trait::async_trait]
pub trait IdentityService: Send + Sync {
    /// Fetch the currently established session, if any.
    async fn current_session(&self) -> Result<Option<Session>, IdentityError>;

    /// Password sign-in. A success always carries a session.
    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError>;

    /// Terminate the current session on the remote side.
    async fn sign_out(&self) -> Result<(), IdentityError>;

    /// Register a new identity carrying the given metadata.
    async fn sign_up(&self, email: &str, password: &str, metadata: &SignUpMetadata) -> Result<SignUpData, IdentityError>;

    /// Subscribe to auth-state changes pushed by the service. Every call
    /// returns a fresh receiver on the same broadcast channel.
    fn auth_events(&self) -> broadcast::Receiver<AuthChange>;
}

/// Profile row store; at most one row per user id.
#[async_trait::async_trait]
pub trait ProfileStore: Send + Sync {
    /// Look up the profile for a user id, expecting at most one row.
    async fn select_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>, IdentityError>;

    /// Insert a freshly created profile row.
    async fn insert_profile(&self, row: &Profile) -> Result<(), IdentityError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
