//! Session store — process-wide cache of "who is signed in and with what
//! role".
//!
//! DESIGN
//! ======
//! One cloneable handle over Arc-backed state, safe to read from many
//! concurrent tasks. Bootstrap runs exactly once per process through a
//! `OnceCell` latch: every caller of [`SessionStore::ready`], concurrent or
//! later, awaits the same one-shot initialization, which also spawns the
//! single long-lived auth-event listener.
//!
//! TRADE-OFFS
//! ==========
//! Remote calls are not cancellable, so a sign-in or remote event racing an
//! in-flight profile fetch is resolved at write time instead: every session
//! replacement advances a generation counter, and a profile fetch commits
//! only if the generation it was issued under is still current. The stale
//! fetch completes and is discarded, never clobbering newer state.

use std::sync::Arc;

use tokio::sync::{OnceCell, RwLock, broadcast, watch};
use tracing::{debug, info, warn};

use crate::identity::{
    AuthUser, IdentityError, IdentityService, Profile, ProfileStore, Session, SignUpData, SignUpMetadata,
};
use crate::role::Role;

// =============================================================================
// DERIVED STATE
// =============================================================================

/// Derived authentication state published to observers on every mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthState {
    /// `true` only during the initial bootstrap or an explicit reload.
    pub loading: bool,
    pub authenticated: bool,
    /// `None` when the profile is missing or its fetch failed; callers must
    /// treat that as unauthorized for every role-gated route.
    pub role: Option<Role>,
}

/// Cached fields guarded by one lock. `generation` advances on every session
/// replacement so in-flight profile fetches can detect staleness.
#[derive(Debug, Default)]
struct Cache {
    session: Option<Session>,
    user: Option<AuthUser>,
    profile: Option<Profile>,
    loading: bool,
    generation: u64,
}

// =============================================================================
// SESSION STORE
// =============================================================================

/// Process-wide session cache. Clone is cheap; all clones share state.
#[derive(Clone)]
pub struct SessionStore {
    identity: Arc<dyn IdentityService>,
    profiles: Arc<dyn ProfileStore>,
    cache: Arc<RwLock<Cache>>,
    bootstrap: Arc<OnceCell<()>>,
    state_tx: Arc<watch::Sender<AuthState>>,
}

impl SessionStore {
    #[must_use]
    pub fn new(identity: Arc<dyn IdentityService>, profiles: Arc<dyn ProfileStore>) -> Self {
        let initial = AuthState { loading: true, authenticated: false, role: None };
        let (state_tx, _) = watch::channel(initial);
        Self {
            identity,
            profiles,
            cache: Arc::new(RwLock::new(Cache { loading: true, ..Cache::default() })),
            bootstrap: Arc::new(OnceCell::new()),
            state_tx: Arc::new(state_tx),
        }
    }

    /// Idempotent bootstrap. The first caller fetches the current session,
    /// resolves the matching profile, and spawns the auth-event listener;
    /// every other caller awaits that same initialization. Never fails and
    /// never hangs: a remote error during the session fetch is logged and
    /// degraded to a signed-out state.
    pub async fn ready(&self) {
        self.bootstrap
            .get_or_init(|| async {
                self.load_session().await;
                self.spawn_event_listener();
            })
            .await;
    }

    /// Explicit re-bootstrap: re-fetches the session and profile, toggling
    /// the loading flag. Does not register a second event subscription.
    pub async fn reload(&self) {
        self.load_session().await;
    }

    /// Password sign-in. A failure propagates to the caller without touching
    /// local state; on success the profile is current the instant this
    /// returns.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, IdentityError> {
        let session = self.identity.sign_in_with_password(email, password).await?;
        info!(user_id = %session.user.id, "signed in");
        let generation = self.apply_session(Some(session.clone())).await;
        self.refresh_profile(generation).await;
        Ok(session)
    }

    /// Sign out. Local state is cleared only after the remote call succeeds;
    /// a failure propagates and leaves the cache untouched, so the cache
    /// never disagrees with a still-valid remote session.
    pub async fn sign_out(&self) -> Result<(), IdentityError> {
        self.identity.sign_out().await?;
        info!("signed out");
        self.apply_session(None).await;
        Ok(())
    }

    /// Register another account without disturbing the caller's own session.
    /// The new identity gets a profile row carrying the given name and role,
    /// back-referencing the currently signed-in user (`None` when
    /// self-registering).
    pub async fn create_user(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
        role: Role,
    ) -> Result<SignUpData, IdentityError> {
        let created_by = self.user().await.map(|u| u.id);
        let metadata = SignUpMetadata { full_name: full_name.to_owned(), role, created_by };
        let data = self.identity.sign_up(email, password, &metadata).await?;

        let row = Profile {
            id: data.user.id,
            email: data.user.email.clone(),
            full_name: Some(full_name.to_owned()),
            role: Some(role),
            created_by,
            created_at: None,
            updated_at: None,
        };
        self.profiles.insert_profile(&row).await?;
        info!(user_id = %data.user.id, role = %role, "user created");
        Ok(data)
    }

    // =========================================================================
    // READ ACCESSORS — cached state only, never a remote call.
    // =========================================================================

    pub async fn session(&self) -> Option<Session> {
        self.cache.read().await.session.clone()
    }

    pub async fn user(&self) -> Option<AuthUser> {
        self.cache.read().await.user.clone()
    }

    pub async fn profile(&self) -> Option<Profile> {
        self.cache.read().await.profile.clone()
    }

    pub async fn is_loading(&self) -> bool {
        self.cache.read().await.loading
    }

    pub async fn is_authenticated(&self) -> bool {
        self.cache.read().await.user.is_some()
    }

    pub async fn role(&self) -> Option<Role> {
        self.cache.read().await.profile.as_ref().and_then(|p| p.role)
    }

    pub async fn is_admin(&self) -> bool {
        self.role().await == Some(Role::Admin)
    }

    pub async fn is_manager(&self) -> bool {
        self.role().await == Some(Role::Manager)
    }

    pub async fn is_employee(&self) -> bool {
        self.role().await == Some(Role::Employee)
    }

    /// Latest published derived state, without locking the cache.
    #[must_use]
    pub fn state(&self) -> AuthState {
        self.state_tx.borrow().clone()
    }

    /// Observe derived-state changes over an explicit channel.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.state_tx.subscribe()
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    async fn load_session(&self) {
        self.set_loading(true).await;
        let session = match self.identity.current_session().await {
            Ok(session) => session,
            Err(err) => {
                warn!(error = %err, "session fetch failed, continuing signed out");
                None
            }
        };
        let generation = self.apply_session(session).await;
        self.refresh_profile(generation).await;
        self.set_loading(false).await;
    }

    /// Replace the cached session wholesale and advance the generation so any
    /// in-flight profile fetch for the previous identity gets discarded.
    /// Returns the new generation for the follow-up profile fetch.
    async fn apply_session(&self, session: Option<Session>) -> u64 {
        let mut cache = self.cache.write().await;
        let next_user = session.as_ref().map(|s| s.user.clone());
        let user_changed = cache.user.as_ref().map(|u| u.id) != next_user.as_ref().map(|u| u.id);
        if user_changed {
            // A token refresh for the same user keeps the profile until the
            // re-fetch lands; an identity change must not.
            cache.profile = None;
        }
        cache.user = next_user;
        cache.session = session;
        cache.generation += 1;
        let generation = cache.generation;
        self.publish(&cache);
        generation
    }

    /// Fetch the profile for the user recorded at `generation` and commit it
    /// only if no newer session transition happened since. A transient store
    /// failure degrades to no role, never an error.
    async fn refresh_profile(&self, generation: u64) {
        let user = {
            let cache = self.cache.read().await;
            if cache.generation != generation {
                return;
            }
            cache.user.clone()
        };

        let Some(user) = user else {
            let mut cache = self.cache.write().await;
            if cache.generation == generation {
                cache.profile = None;
                self.publish(&cache);
            }
            return;
        };

        let fetched = match self.profiles.select_profile_by_id(user.id).await {
            Ok(profile) => profile,
            Err(err) => {
                warn!(user_id = %user.id, error = %err, "profile select failed, degrading to no role");
                None
            }
        };

        let mut cache = self.cache.write().await;
        if cache.generation != generation {
            debug!(user_id = %user.id, "discarding stale profile fetch");
            return;
        }
        cache.profile = fetched;
        self.publish(&cache);
    }

    async fn set_loading(&self, loading: bool) {
        let mut cache = self.cache.write().await;
        cache.loading = loading;
        self.publish(&cache);
    }

    fn publish(&self, cache: &Cache) {
        self.state_tx.send_replace(AuthState {
            loading: cache.loading,
            authenticated: cache.user.is_some(),
            role: cache.profile.as_ref().and_then(|p| p.role),
        });
    }

    /// Spawn the long-lived task applying remote auth changes. Called exactly
    /// once, from inside the bootstrap latch: a second listener would
    /// double-apply every remote event.
    fn spawn_event_listener(&self) {
        let mut events = self.identity.auth_events();
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(change) => {
                        info!(event = ?change.event, "auth change received");
                        let generation = store.apply_session(change.session).await;
                        store.refresh_profile(generation).await;
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "auth change stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    use tokio::sync::{Mutex, Notify, broadcast};
    use uuid::Uuid;

    use super::SessionStore;
    use crate::identity::{
        AuthChange, AuthUser, IdentityError, IdentityService, Profile, ProfileStore, Session, SignUpData,
        SignUpMetadata,
    };
    use crate::role::Role;

    /// Build a session bundle for tests.
    #[must_use]
    pub fn session_for(id: Uuid, email: &str) -> Session {
        Session {
            access_token: format!("token-{id}"),
            refresh_token: Some(format!("refresh-{id}")),
            expires_at: Some(4_000_000_000),
            user: AuthUser { id, email: Some(email.to_owned()) },
        }
    }

    /// Build a profile row for tests.
    #[must_use]
    pub fn profile_for(id: Uuid, role: Option<Role>) -> Profile {
        Profile {
            id,
            email: Some(format!("{id}@example.com")),
            full_name: Some("Test Person".into()),
            role,
            created_by: None,
            created_at: Some("2025-01-15T09:30:00Z".into()),
            updated_at: Some("2025-01-15T09:30:00Z".into()),
        }
    }

    /// Scriptable identity service with call counters.
    pub struct MockIdentity {
        pub session: Mutex<Option<Session>>,
        pub session_fetches: AtomicUsize,
        pub subscriptions: AtomicUsize,
        pub fail_session_fetch: AtomicBool,
        pub sign_in_result: Mutex<Option<Result<Session, IdentityError>>>,
        pub sign_out_error: Mutex<Option<IdentityError>>,
        pub sign_ups: Mutex<Vec<(String, SignUpMetadata)>>,
        pub sign_up_user: Mutex<Option<AuthUser>>,
        pub events: broadcast::Sender<AuthChange>,
    }

    impl MockIdentity {
        #[must_use]
        pub fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(16);
            Arc::new(Self {
                session: Mutex::new(None),
                session_fetches: AtomicUsize::new(0),
                subscriptions: AtomicUsize::new(0),
                fail_session_fetch: AtomicBool::new(false),
                sign_in_result: Mutex::new(None),
                sign_out_error: Mutex::new(None),
                sign_ups: Mutex::new(Vec::new()),
                sign_up_user: Mutex::new(None),
                events,
            })
        }

        #[must_use]
        pub fn with_session(session: Session) -> Arc<Self> {
            let mock = Self::new();
            *mock.session.try_lock().unwrap() = Some(session);
            mock
        }

        pub async fn script_sign_in(&self, result: Result<Session, IdentityError>) {
            *self.sign_in_result.lock().await = Some(result);
        }

        pub async fn set_session(&self, session: Option<Session>) {
            *self.session.lock().await = session;
        }

        /// Push a remote auth change as the service would.
        pub fn push_change(&self, change: AuthChange) {
            let _ = self.events.send(change);
        }
    }

    #[async_trait::async_trait]
    impl IdentityService for MockIdentity {
        async fn current_session(&self) -> Result<Option<Session>, IdentityError> {
            self.session_fetches.fetch_add(1, Ordering::SeqCst);
            // Yield so racing ready() callers genuinely interleave.
            tokio::task::yield_now().await;
            if self.fail_session_fetch.load(Ordering::SeqCst) {
                return Err(IdentityError::Request("connection refused".into()));
            }
            Ok(self.session.lock().await.clone())
        }

        async fn sign_in_with_password(&self, _email: &str, _password: &str) -> Result<Session, IdentityError> {
            self.sign_in_result.lock().await.take().unwrap_or_else(|| {
                Err(IdentityError::Service { status: 400, message: "invalid login credentials".into() })
            })
        }

        async fn sign_out(&self) -> Result<(), IdentityError> {
            match self.sign_out_error.lock().await.take() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn sign_up(&self, email: &str, _password: &str, metadata: &SignUpMetadata) -> Result<SignUpData, IdentityError> {
            self.sign_ups.lock().await.push((email.to_owned(), metadata.clone()));
            let user = self
                .sign_up_user
                .lock()
                .await
                .clone()
                .unwrap_or_else(|| AuthUser { id: Uuid::new_v4(), email: Some(email.to_owned()) });
            Ok(SignUpData { user, session: None })
        }

        fn auth_events(&self) -> broadcast::Receiver<AuthChange> {
            self.subscriptions.fetch_add(1, Ordering::SeqCst);
            self.events.subscribe()
        }
    }

    /// In-memory profile store. Selects can be gated per user id to simulate
    /// an out-of-order-resolving fetch.
    pub struct MockProfiles {
        pub rows: Mutex<HashMap<Uuid, Profile>>,
        pub selects: AtomicUsize,
        pub fail_select: AtomicBool,
        pub gates: Mutex<HashMap<Uuid, Arc<Notify>>>,
        pub inserted: Mutex<Vec<Profile>>,
    }

    impl MockProfiles {
        #[must_use]
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                rows: Mutex::new(HashMap::new()),
                selects: AtomicUsize::new(0),
                fail_select: AtomicBool::new(false),
                gates: Mutex::new(HashMap::new()),
                inserted: Mutex::new(Vec::new()),
            })
        }

        pub async fn put_row(&self, profile: Profile) {
            self.rows.lock().await.insert(profile.id, profile);
        }

        /// Make the next select for `id` block until the returned handle is
        /// notified.
        pub async fn gate(&self, id: Uuid) -> Arc<Notify> {
            let notify = Arc::new(Notify::new());
            self.gates.lock().await.insert(id, notify.clone());
            notify
        }
    }

    #[async_trait::async_trait]
    impl ProfileStore for MockProfiles {
        async fn select_profile_by_id(&self, id: Uuid) -> Result<Option<Profile>, IdentityError> {
            self.selects.fetch_add(1, Ordering::SeqCst);
            let gate = self.gates.lock().await.remove(&id);
            if let Some(gate) = gate {
                gate.notified().await;
            }
            if self.fail_select.load(Ordering::SeqCst) {
                return Err(IdentityError::ProfileStore("select failed".into()));
            }
            Ok(self.rows.lock().await.get(&id).cloned())
        }

        async fn insert_profile(&self, row: &Profile) -> Result<(), IdentityError> {
            self.inserted.lock().await.push(row.clone());
            self.rows.lock().await.insert(row.id, row.clone());
            Ok(())
        }
    }

    /// Store wired to the given mocks.
    #[must_use]
    pub fn store_with(identity: Arc<MockIdentity>, profiles: Arc<MockProfiles>) -> SessionStore {
        SessionStore::new(identity, profiles)
    }

    /// Poll `condition` until it holds or a short deadline passes.
    pub async fn wait_until(condition: impl Fn() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached within deadline");
    }

    /// Poll an async `condition` until it holds or a short deadline passes.
    pub async fn wait_until_async<F, Fut>(condition: F)
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..200 {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        panic!("condition not reached within deadline");
    }
}

#[cfg(test)]
#[path = "store_test.rs"]
mod tests;
