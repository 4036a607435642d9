//! REST identity service — GoTrue-style auth endpoints plus a PostgREST
//! profile table.
//!
//! DESIGN
//! ======
//! One client implements both seams: auth calls go to `/auth/v1/...`, profile
//! rows live behind `/rest/v1/profiles`. The remote keeps the canonical
//! session; this client mirrors the last bundle it was handed so
//! `current_session` answers without a round trip, and rebroadcasts its own
//! sign-in/sign-out transitions on the auth-event channel.

use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::{Mutex, broadcast};
use uuid::Uuid;

use super::{
    AuthChange, AuthEvent, AuthUser, IdentityError, IdentityService, Profile, ProfileStore, Session, SignUpData,
    SignUpMetadata,
};

const AUTH_EVENT_CAPACITY: usize = 16;

/// Identity service configuration loaded from environment.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub base_url: String,
    pub api_key: String,
}

impl IdentityConfig {
    /// Load from `ROLEGATE_IDENTITY_URL` and `ROLEGATE_IDENTITY_API_KEY`.
    /// Returns `None` if either is missing (remote auth disabled).
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("ROLEGATE_IDENTITY_URL").ok()?;
        let api_key = std::env::var("ROLEGATE_IDENTITY_API_KEY").ok()?;
        Some(Self::new(&base_url, &api_key))
    }

    #[must_use]
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self { base_url: base_url.trim_end_matches('/').to_owned(), api_key: api_key.to_owned() }
    }
}

pub(crate) fn auth_endpoint(base_url: &str, path: &str) -> String {
    format!("{base_url}/auth/v1/{path}")
}

pub(crate) fn profiles_endpoint(base_url: &str) -> String {
    format!("{base_url}/rest/v1/profiles")
}

/// Best-effort extraction of a human-readable message from an error body.
pub(crate) fn extract_error_message(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["msg", "message", "error_description", "error"] {
            if let Some(message) = value.get(key).and_then(|v| v.as_str()) {
                return message.to_owned();
            }
        }
    }
    body.trim().to_owned()
}

fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    /// Seconds-to-live fallback when the service omits `expires_at`.
    #[serde(default)]
    expires_in: Option<i64>,
    user: AuthUser,
}

pub(crate) fn session_from_token_response(resp: TokenResponse, issued_at: i64) -> Session {
    let expires_at = resp.expires_at.or_else(|| resp.expires_in.map(|ttl| issued_at + ttl));
    Session {
        access_token: resp.access_token,
        refresh_token: resp.refresh_token,
        expires_at,
        user: resp.user,
    }
}

#[derive(Debug, serde::Deserialize)]
struct SignUpResponse {
    #[serde(default)]
    user: Option<AuthUser>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
    // Some deployments return the bare identity when confirmation is pending.
    #[serde(default)]
    id: Option<Uuid>,
    #[serde(default)]
    email: Option<String>,
}

/// REST-backed implementation of [`IdentityService`] and [`ProfileStore`].
pub struct HttpIdentityService {
    config: IdentityConfig,
    client: reqwest::Client,
    /// Last session bundle the remote handed us.
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthChange>,
}

impl HttpIdentityService {
    #[must_use]
    pub fn new(config: IdentityConfig) -> Self {
        let (events, _) = broadcast::channel(AUTH_EVENT_CAPACITY);
        Self { config, client: reqwest::Client::new(), session: Mutex::new(None), events }
    }

    /// Build from environment. `None` when the service is not configured.
    #[must_use]
    pub fn from_env() -> Option<Self> {
        IdentityConfig::from_env().map(Self::new)
    }

    async fn bearer_token(&self) -> String {
        let session = self.session.lock().await;
        session
            .as_ref()
            .map_or_else(|| self.config.api_key.clone(), |s| s.access_token.clone())
    }

    async fn error_for(resp: reqwest::Response) -> IdentityError {
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        IdentityError::Service { status, message: extract_error_message(&body) }
    }

    fn publish(&self, event: AuthEvent, session: Option<Session>) {
        // Send fails only when nobody is subscribed yet; that is fine.
        let _ = self.events.send(AuthChange { event, session });
    }
}

#[async_trait::async_trait]
impl IdentityService for HttpIdentityService {
    async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
        let session = self.session.lock().await;
        Ok(session.clone())
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let url = format!("{}?grant_type=password", auth_endpoint(&self.config.base_url, "token"));
        let resp = self
            .client
            .post(&url)
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let token_resp = resp
            .json::<TokenResponse>()
            .await
            .map_err(|e| IdentityError::Parse(e.to_string()))?;
        let session = session_from_token_response(token_resp, now_unix());

        *self.session.lock().await = Some(session.clone());
        self.publish(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        let token = self.bearer_token().await;
        let resp = self
            .client
            .post(auth_endpoint(&self.config.base_url, "logout"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        *self.session.lock().await = None;
        self.publish(AuthEvent::SignedOut, None);
        Ok(())
    }

    async fn sign_up(&self, email: &str, password: &str, metadata: &SignUpMetadata) -> Result<SignUpData, IdentityError> {
        let resp = self
            .client
            .post(auth_endpoint(&self.config.base_url, "signup"))
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({ "email": email, "password": password, "data": metadata }))
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(Self::error_for(resp).await);
        }

        let body = resp
            .json::<SignUpResponse>()
            .await
            .map_err(|e| IdentityError::Parse(e.to_string()))?;

        let user = body
            .user
            .or_else(|| body.id.map(|id| AuthUser { id, email: body.email.clone() }))
            .ok_or_else(|| IdentityError::Parse("sign-up response carried no user".into()))?;

        // The caller's own session is deliberately left untouched: creating
        // another account must not switch who is signed in.
        let session = body.access_token.map(|access_token| Session {
            access_token,
            refresh_token: body.refresh_token,
            expires_at: body.expires_at,
            user: user.clone(),
        });

        Ok(SignUpData { user, session })
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthChange> {
        self.events.subscribe()
    }
}

#[async_trait::async_trait]
impl ProfileStore for HttpIdentityService {
    async fn select_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>, IdentityError> {
        let token = self.bearer_token().await;
        let resp = self
            .client
            .get(profiles_endpoint(&self.config.base_url))
            .query(&[
                ("id", format!("eq.{id}")),
                ("select", "id,email,full_name,role,created_by,created_at,updated_at".to_owned()),
            ])
            .header("apikey", &self.config.api_key)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let err = Self::error_for(resp).await;
            return Err(IdentityError::ProfileStore(err.to_string()));
        }

        let mut rows = resp
            .json::<Vec<Profile>>()
            .await
            .map_err(|e| IdentityError::Parse(e.to_string()))?;
        Ok(if rows.is_empty() { None } else { Some(rows.remove(0)) })
    }

    async fn insert_profile(&self, row: &Profile) -> Result<(), IdentityError> {
        let token = self.bearer_token().await;
        let resp = self
            .client
            .post(profiles_endpoint(&self.config.base_url))
            .header("apikey", &self.config.api_key)
            .header("Prefer", "return=minimal")
            .bearer_auth(token)
            .json(row)
            .send()
            .await
            .map_err(|e| IdentityError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            let err = Self::error_for(resp).await;
            return Err(IdentityError::ProfileStore(err.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "http_test.rs"]
mod tests;
