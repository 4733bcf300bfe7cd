//! SessionRoleManager - single source of truth for who is signed in and what they can do
//!
//! Reconciles two facts that arrive independently (session existence from the
//! identity backend, role assignment from the role table) into one
//! [`AuthState`], published through a `tokio::sync::watch` channel.
//!
//! ```text
//!  backend notification ──▶ on_session_change ──▶ state (session, Ready)
//!                                  │
//!                                  └─ spawn ─▶ sleep(delay) ─▶ role lookup ─▶ state (role)
//! ```
//!
//! Role lookups never run inside the backend's notification callback. They are
//! spawned onto the runtime and start after `role_lookup_delay`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use shared::{
    AuthEvent, AuthState, AuthStatus, BackendError, CampusError, IdentityBackend, Notification,
    Notifier, Role, RoleTable, Session, SessionConfig, SessionListener, SignUpRequest,
    Subscription, UserId,
};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::role_resolver::{RoleResolution, RoleResolver};

/// Owns the session lifecycle and derives the caller's role from it
#[derive(Clone)]
pub struct SessionRoleManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    backend: Arc<dyn IdentityBackend>,
    resolver: RoleResolver,
    notifier: Arc<dyn Notifier>,
    config: SessionConfig,
    runtime: Handle,
    state: watch::Sender<AuthState>,
    /// At most one role lookup at a time
    lookup_in_flight: AtomicBool,
    /// Cleared by teardown; nothing mutates state afterwards
    alive: AtomicBool,
    subscription: Mutex<Option<Subscription>>,
    writes: AtomicU64,
}

/// Forwards backend notifications without keeping the manager alive
struct ManagerListener {
    inner: Weak<ManagerInner>,
}

impl SessionListener for ManagerListener {
    fn on_session_change(&self, event: AuthEvent, session: Option<Session>) {
        if let Some(inner) = self.inner.upgrade() {
            inner.on_session_change(event, session);
        }
    }
}

/// Releases the in-flight flag
struct LookupGuard<'a>(&'a AtomicBool);

impl Drop for LookupGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Store a session, dropping the role if the subject changed or went away
fn store_session(state: &mut AuthState, session: Option<Session>) {
    let previous = state.subject().cloned();
    state.session = session;
    if state.subject().is_none() || state.subject() != previous.as_ref() {
        state.role = None;
        state.role_source = None;
    }
}

impl ManagerInner {
    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// The only write path into the state channel
    fn update(&self, mutate: impl FnOnce(&mut AuthState) -> bool) -> bool {
        self.state.send_if_modified(|state| {
            if !self.is_alive() {
                return false;
            }
            self.writes.fetch_add(1, Ordering::Relaxed);
            let modified = mutate(state);
            debug_assert!(state.session.is_some() || state.role.is_none());
            debug_assert_eq!(state.role.is_some(), state.role_source.is_some());
            modified
        })
    }

    fn on_session_change(self: &Arc<Self>, event: AuthEvent, session: Option<Session>) {
        if !self.is_alive() {
            tracing::debug!(%event, "session change after teardown ignored");
            return;
        }

        let subject = session.as_ref().and_then(|s| s.subject().cloned());
        tracing::debug!(%event, user_id = ?subject, "auth state changed");

        let mut role_missing = false;
        self.update(|state| {
            store_session(state, session);
            state.status = AuthStatus::Ready;
            role_missing = state.role.is_none();
            true
        });

        match subject {
            // A refresh only keeps the role when the subject was already known
            Some(subject) if !event.is_token_refresh() || role_missing => {
                self.schedule_role_lookup(subject);
            }
            Some(_) => {}
            None => tracing::debug!("no user session"),
        }
    }

    fn schedule_role_lookup(self: &Arc<Self>, subject: UserId) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        let delay = self.config.role_lookup_delay();

        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if inner.is_alive() {
                inner.run_role_lookup(subject).await;
            }
        })
    }

    async fn run_role_lookup(self: &Arc<Self>, subject: UserId) {
        if self
            .lookup_in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(user_id = %subject, "role lookup already in flight, skipping");
            return;
        }

        let resolution = {
            let _guard = LookupGuard(&self.lookup_in_flight);
            self.resolver.resolve(&subject).await
        };

        self.apply_role(resolution);
    }

    fn apply_role(self: &Arc<Self>, resolution: RoleResolution) {
        let mut follow_up = None;

        self.update(|state| match state.subject().cloned() {
            None => {
                tracing::debug!(user_id = %resolution.user_id, "signed out before role arrived, discarding");
                false
            }
            Some(current) if current != resolution.user_id => {
                tracing::debug!(
                    stale = %resolution.user_id,
                    current = %current,
                    "session changed during role lookup, discarding"
                );
                follow_up = Some(current);
                false
            }
            Some(_) => {
                let modified = state.role != Some(resolution.role)
                    || state.role_source.as_ref() != Some(&resolution.source)
                    || state.status != AuthStatus::Ready;
                state.role = Some(resolution.role);
                state.role_source = Some(resolution.source);
                state.status = AuthStatus::Ready;
                modified
            }
        });

        // The lookup for the newer subject may have been suppressed by ours
        if let Some(current) = follow_up {
            self.schedule_role_lookup(current);
        }
    }

    fn notify(&self, notification: Notification) {
        self.notifier.notify(notification);
    }
}

/// Toast for a failed credential operation
fn failure_notification(title: &str, error: &BackendError) -> Notification {
    if error.is_transient() {
        Notification::failure("Connection error", "Could not reach the server")
    } else {
        Notification::failure(title, error.to_string())
    }
}

impl SessionRoleManager {
    /// Create a manager in the `Initializing` state.
    ///
    /// Must be called from within a tokio runtime; role lookups are spawned on it.
    pub fn new(
        backend: Arc<dyn IdentityBackend>,
        roles: Arc<dyn RoleTable>,
        notifier: Arc<dyn Notifier>,
        config: SessionConfig,
    ) -> shared::Result<Self> {
        let runtime = Handle::try_current().map_err(|e| CampusError::Runtime(e.to_string()))?;
        let (state, _) = watch::channel(AuthState::default());

        Ok(Self {
            inner: Arc::new(ManagerInner {
                backend,
                resolver: RoleResolver::new(roles, config.default_role),
                notifier,
                config,
                runtime,
                state,
                lookup_in_flight: AtomicBool::new(false),
                alive: AtomicBool::new(true),
                subscription: Mutex::new(None),
                writes: AtomicU64::new(0),
            }),
        })
    }

    /// Register the change listener (once) and restore any persisted session
    pub async fn start(&self) {
        self.attach();
        self.initialize().await;
    }

    /// Register the backend change listener. Idempotent.
    pub fn attach(&self) {
        if !self.inner.is_alive() {
            return;
        }

        let mut slot = match self.inner.subscription.lock() {
            Ok(slot) => slot,
            Err(_) => {
                tracing::error!("subscription slot poisoned, listener not attached");
                return;
            }
        };
        if slot.is_some() {
            return;
        }

        tracing::debug!("setting up auth state listener");
        let listener = Arc::new(ManagerListener {
            inner: Arc::downgrade(&self.inner),
        });
        *slot = Some(self.inner.backend.on_change(listener));
    }

    /// Best-effort restore of a persisted session. Never fails.
    ///
    /// When a session exists, returns after its role lookup has run (unless the
    /// lookup was folded into one already in flight).
    pub async fn initialize(&self) {
        let inner = &self.inner;
        if !inner.is_alive() {
            return;
        }

        let session = match inner.backend.get_current_session().await {
            Ok(session) => session,
            Err(error) => {
                tracing::error!(%error, "failed to get initial session");
                None
            }
        };

        let Some(subject) = session.as_ref().and_then(|s| s.subject().cloned()) else {
            tracing::debug!("no existing session found");
            inner.update(|state| {
                // A session delivered by the listener in the meantime wins
                let modified = state.status != AuthStatus::Ready;
                state.status = AuthStatus::Ready;
                modified
            });
            return;
        };

        tracing::debug!(user_id = %subject, "found existing session, fetching role");

        let mut needs_role = false;
        inner.update(|state| {
            store_session(state, session);
            needs_role = state.role.is_none();
            true
        });

        if needs_role {
            if let Err(error) = inner.schedule_role_lookup(subject).await {
                tracing::error!(%error, "initial role lookup task failed");
            }
        } else {
            inner.update(|state| {
                let modified = state.status != AuthStatus::Ready;
                state.status = AuthStatus::Ready;
                modified
            });
        }
    }

    /// Entry point for the backend's notification channel
    pub fn on_session_change(&self, event: AuthEvent, session: Option<Session>) {
        self.inner.on_session_change(event, session);
    }

    /// Look up the role of a subject; never fails
    pub async fn resolve_role(&self, subject: &UserId) -> Role {
        self.inner.resolver.resolve(subject).await.role
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, BackendError> {
        tracing::info!(email, "attempting sign in");

        match self.inner.backend.sign_in_with_password(email, password).await {
            Ok(session) => {
                tracing::info!(user_id = ?session.subject(), "sign in successful");
                self.inner.notify(Notification::success(
                    "Signed in",
                    "You have signed in successfully",
                ));
                Ok(session)
            }
            Err(error) => {
                tracing::error!(%error, "sign in failed");
                self.inner.notify(failure_notification("Sign-in failed", &error));
                Err(error)
            }
        }
    }

    /// Register a new account; `Ok(None)` means email confirmation is pending
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Option<Session>, BackendError> {
        tracing::info!(email, "attempting sign up");

        let request = SignUpRequest {
            email: email.to_string(),
            password: password.to_string(),
            metadata: HashMap::from([("full_name".to_string(), display_name.to_string())]),
            email_redirect_to: self.inner.config.email_redirect_to.clone(),
        };

        match self.inner.backend.sign_up(request).await {
            Ok(session) => {
                tracing::info!(confirmed = session.is_some(), "sign up successful");
                let description = if session.is_some() {
                    "Your account is ready."
                } else {
                    "Check your email to confirm your account."
                };
                self.inner
                    .notify(Notification::success("Registration successful", description));
                Ok(session)
            }
            Err(error) => {
                tracing::error!(%error, "sign up failed");
                self.inner.notify(failure_notification("Registration failed", &error));
                Err(error)
            }
        }
    }

    /// Sign out. Local state is cleared even when the backend call fails.
    pub async fn sign_out(&self) -> Result<(), BackendError> {
        tracing::info!("signing out");

        let result = self.inner.backend.sign_out().await;

        self.inner.update(|state| {
            store_session(state, None);
            state.status = AuthStatus::Ready;
            true
        });

        match result {
            Ok(()) => {
                self.inner.notify(Notification::success(
                    "Signed out",
                    "You have signed out successfully.",
                ));
                Ok(())
            }
            Err(error) => {
                tracing::error!(%error, "sign out failed");
                self.inner.notify(failure_notification("Sign-out failed", &error));
                Err(error)
            }
        }
    }

    /// Detach the listener. Later notifications and lookups are no-ops.
    pub fn teardown(&self) {
        let mut was_alive = false;
        // Serialized with writers so no write lands after this returns
        self.inner.state.send_if_modified(|_| {
            was_alive = self.inner.alive.swap(false, Ordering::AcqRel);
            false
        });
        if !was_alive {
            return;
        }

        let subscription = self.inner.subscription.lock().ok().and_then(|mut s| s.take());
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }
        tracing::debug!("auth subscription cleaned up");
    }

    // ============== Read side ==============

    /// Current snapshot
    pub fn state(&self) -> AuthState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthState> {
        self.inner.state.subscribe()
    }

    /// Wait until the state is ready and, when signed in, the role is known.
    ///
    /// State is frozen after teardown, so pair this with a timeout there.
    pub async fn wait_until_settled(&self) -> AuthState {
        let mut receiver = self.subscribe();
        let settled = receiver.wait_for(|state| state.is_settled()).await;
        match settled {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        }
    }

    /// Number of passes through the state write path
    pub fn state_writes(&self) -> u64 {
        self.inner.writes.load(Ordering::Relaxed)
    }

    pub fn is_alive(&self) -> bool {
        self.inner.is_alive()
    }

    pub fn is_role_lookup_in_flight(&self) -> bool {
        self.inner.lookup_in_flight.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }
}

impl core::fmt::Debug for SessionRoleManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionRoleManager")
            .field("state", &*self.inner.state.borrow())
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backend::{BackendOptions, InMemoryBackend};
    use shared::{RecordingNotifier, RoleSource, SessionUser};
    use std::time::Duration;

    const DELAY: Duration = Duration::from_millis(10);
    const SETTLE: Duration = Duration::from_secs(2);

    struct Harness {
        backend: InMemoryBackend,
        notifier: Arc<RecordingNotifier>,
        manager: SessionRoleManager,
    }

    fn harness_with(options: BackendOptions) -> Harness {
        let backend = InMemoryBackend::new(options);
        let notifier = Arc::new(RecordingNotifier::new());
        let config = SessionConfig::default().with_role_lookup_delay(DELAY);
        let manager = SessionRoleManager::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            notifier.clone(),
            config,
        )
        .unwrap();

        Harness {
            backend,
            notifier,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with(BackendOptions::default())
    }

    async fn settle(manager: &SessionRoleManager) -> AuthState {
        tokio::time::timeout(SETTLE, manager.wait_until_settled())
            .await
            .expect("state did not settle")
    }

    fn assert_invariant(state: &AuthState) {
        if state.session.is_none() {
            assert!(state.role.is_none(), "role without session: {:?}", state);
        }
    }

    fn session_for(id: &str) -> Session {
        Session {
            access_token: format!("token-{}", id),
            refresh_token: "refresh".to_string(),
            expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
            user: Some(SessionUser {
                id: UserId::new(id),
                email: format!("{}@campus.test", id),
                metadata: HashMap::new(),
            }),
        }
    }

    // ============== Initialization ==============

    #[tokio::test]
    async fn test_new_manager_is_initializing() {
        let h = harness();
        let state = h.manager.state();
        assert_eq!(state.status, AuthStatus::Initializing);
        assert!(state.session.is_none());
        assert!(state.role.is_none());
    }

    #[test]
    fn test_new_outside_runtime_fails() {
        let backend = InMemoryBackend::default();
        let result = SessionRoleManager::new(
            Arc::new(backend.clone()),
            Arc::new(backend),
            Arc::new(shared::NullNotifier),
            SessionConfig::default(),
        );
        assert!(matches!(result, Err(CampusError::Runtime(_))));
    }

    #[tokio::test]
    async fn test_initialize_without_session() {
        let h = harness();
        h.manager.initialize().await;

        let state = h.manager.state();
        assert_eq!(state.status, AuthStatus::Ready);
        assert!(state.session.is_none());
        assert!(state.role.is_none());
    }

    #[tokio::test]
    async fn test_initialize_backend_error_proceeds_as_signed_out() {
        let h = harness();
        h.backend
            .fail_next_session_fetch(BackendError::Network("offline".to_string()));

        h.manager.initialize().await;

        let state = h.manager.state();
        assert_eq!(state.status, AuthStatus::Ready);
        assert!(state.session.is_none());
        assert!(state.role.is_none());
    }

    #[tokio::test]
    async fn test_persisted_session_without_role_row_resolves_to_student() {
        let h = harness();
        let u1 = h.backend.add_user("u1@campus.test", "secret1", None).unwrap();
        h.backend.restore_session("u1@campus.test").unwrap();

        h.manager.initialize().await;

        let state = settle(&h.manager).await;
        assert_eq!(state.subject(), Some(&u1));
        assert_eq!(state.role, Some(Role::Student));
        assert_eq!(state.status, AuthStatus::Ready);
    }

    #[tokio::test]
    async fn test_initialize_waits_for_role_before_ready() {
        let h = harness();
        let id = h.backend.add_user("t@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&id, Role::Teacher).unwrap();
        h.backend.restore_session("t@campus.test").unwrap();

        // No listener attached: only initialize drives the state
        h.manager.initialize().await;

        let state = h.manager.state();
        assert_eq!(state.role, Some(Role::Teacher));
        assert_eq!(state.status, AuthStatus::Ready);
    }

    #[tokio::test]
    async fn test_start_with_listener_and_initialize_converge() {
        let h = harness();
        let id = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&id, Role::Admin).unwrap();
        h.backend.restore_session("a@campus.test").unwrap();

        h.manager.start().await;

        let state = settle(&h.manager).await;
        assert_eq!(state.subject(), Some(&id));
        assert_eq!(state.role, Some(Role::Admin));
        assert!(h.backend.max_concurrent_role_queries() <= 1);
    }

    #[tokio::test]
    async fn test_attach_is_idempotent() {
        let h = harness();
        h.manager.attach();
        h.manager.attach();
        assert_eq!(h.backend.listener_count(), 1);
    }

    // ============== Session changes ==============

    #[tokio::test]
    async fn test_session_change_sets_ready_before_role() {
        let h = harness();
        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));

        let state = h.manager.state();
        assert_eq!(state.status, AuthStatus::Ready);
        assert!(state.session.is_some());
        assert!(state.role.is_none());

        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Student));
    }

    #[tokio::test]
    async fn test_sign_out_notification_clears_role_immediately() {
        let h = harness();
        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        settle(&h.manager).await;

        h.manager.on_session_change(AuthEvent::SignedOut, None);

        let state = h.manager.state();
        assert!(state.session.is_none());
        assert!(state.role.is_none());
        assert_eq!(state.status, AuthStatus::Ready);
    }

    #[tokio::test]
    async fn test_token_refresh_does_not_trigger_lookup() {
        let h = harness();
        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        settle(&h.manager).await;
        let queries = h.backend.role_query_count();

        h.manager
            .on_session_change(AuthEvent::TokenRefreshed, Some(session_for("u1")));
        tokio::time::sleep(DELAY * 5).await;

        assert_eq!(h.backend.role_query_count(), queries);
        assert_eq!(h.manager.state().role, Some(Role::Student));
    }

    #[tokio::test]
    async fn test_subject_change_drops_previous_role() {
        let h = harness();
        let admin = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&admin, Role::Admin).unwrap();

        h.manager.on_session_change(
            AuthEvent::SignedIn,
            Some(session_for(admin.as_str())),
        );
        assert_eq!(settle(&h.manager).await.role, Some(Role::Admin));

        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("someone-else")));
        assert_eq!(h.manager.state().role, None);

        assert_eq!(settle(&h.manager).await.role, Some(Role::Student));
    }

    #[tokio::test]
    async fn test_rapid_notifications_single_lookup_in_flight() {
        let h = harness();
        h.backend.set_role_lookup_latency(Duration::from_millis(50));

        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        h.manager
            .on_session_change(AuthEvent::UserUpdated, Some(session_for("u1")));

        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Student));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(h.backend.max_concurrent_role_queries(), 1);
        assert_eq!(h.backend.role_query_count(), 1);
        assert!(!h.manager.is_role_lookup_in_flight());
    }

    #[tokio::test]
    async fn test_stale_lookup_after_sign_out_is_discarded() {
        let h = harness();
        h.backend.set_role_lookup_latency(Duration::from_millis(50));

        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        tokio::time::sleep(DELAY * 2).await;
        assert!(h.manager.is_role_lookup_in_flight());

        h.manager.on_session_change(AuthEvent::SignedOut, None);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let state = h.manager.state();
        assert!(state.session.is_none());
        assert!(state.role.is_none());
    }

    #[tokio::test]
    async fn test_stale_lookup_for_other_subject_retriggers() {
        let h = harness();
        let teacher = h.backend.add_user("t@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&teacher, Role::Teacher).unwrap();
        h.backend.set_role_lookup_latency(Duration::from_millis(50));

        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        tokio::time::sleep(DELAY * 2).await;

        // Suppressed by the in-flight lookup for u1
        h.manager.on_session_change(
            AuthEvent::SignedIn,
            Some(session_for(teacher.as_str())),
        );

        let state = settle(&h.manager).await;
        assert_eq!(state.subject(), Some(&teacher));
        assert_eq!(state.role, Some(Role::Teacher));
    }

    #[tokio::test]
    async fn test_role_lookup_failure_defaults_to_student() {
        let h = harness();
        let admin = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&admin, Role::Admin).unwrap();
        h.backend
            .set_role_lookup_failure(Some(BackendError::Permission("rls".to_string())));

        h.manager.on_session_change(
            AuthEvent::SignedIn,
            Some(session_for(admin.as_str())),
        );

        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Student));
    }

    #[tokio::test]
    async fn test_invariant_holds_across_sequences() {
        let h = harness();
        let mut receiver = h.manager.subscribe();
        let observer = tokio::spawn(async move {
            let mut seen = 0usize;
            let quiet = Duration::from_millis(200);
            while let Ok(Ok(())) = tokio::time::timeout(quiet, receiver.changed()).await {
                let state = receiver.borrow_and_update().clone();
                if state.session.is_none() {
                    assert!(state.role.is_none());
                }
                seen += 1;
            }
            seen
        });

        let events = [
            (AuthEvent::InitialSession, None),
            (AuthEvent::SignedIn, Some(session_for("u1"))),
            (AuthEvent::TokenRefreshed, Some(session_for("u1"))),
            (AuthEvent::SignedOut, None),
            (AuthEvent::SignedIn, Some(session_for("u2"))),
            (AuthEvent::SignedIn, Some(session_for("u1"))),
            (AuthEvent::SignedOut, None),
        ];
        for (event, session) in events {
            h.manager.on_session_change(event, session);
            assert_invariant(&h.manager.state());
            tokio::time::sleep(Duration::from_millis(3)).await;
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_invariant(&h.manager.state());

        let seen = observer.await.unwrap();
        assert!(seen > 0);
    }

    // ============== Credential operations ==============

    #[tokio::test]
    async fn test_sign_in_success_updates_state_via_listener() {
        let h = harness();
        let id = h.backend.add_user("t@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&id, Role::Teacher).unwrap();
        h.manager.start().await;

        let session = h.manager.sign_in("t@campus.test", "secret1").await.unwrap();
        assert_eq!(session.subject(), Some(&id));

        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Teacher));

        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert!(!notifications[0].is_failure());
    }

    #[tokio::test]
    async fn test_sign_in_invalid_credentials() {
        let h = harness();
        h.manager.start().await;

        let result = h.manager.sign_in("a@b.com", "x").await;
        assert_eq!(result.unwrap_err(), BackendError::InvalidCredentials);

        let state = h.manager.state();
        assert!(state.session.is_none());
        assert!(state.role.is_none());

        let failures = h.notifier.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].title, "Sign-in failed");
    }

    #[tokio::test]
    async fn test_sign_up_pending_confirmation() {
        let h = harness();
        h.manager.start().await;

        let session = h
            .manager
            .sign_up("new@campus.test", "secret1", "New Student")
            .await
            .unwrap();
        assert!(session.is_none());
        assert!(h.manager.state().session.is_none());

        let notifications = h.notifier.notifications();
        assert_eq!(notifications[0].title, "Registration successful");
    }

    #[tokio::test]
    async fn test_sign_up_auto_confirm_signs_in_as_student() {
        let h = harness_with(BackendOptions {
            auto_confirm: true,
            ..Default::default()
        });
        h.manager.start().await;

        let session = h
            .manager
            .sign_up("new@campus.test", "secret1", "New Student")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            session.user.as_ref().and_then(|u| u.full_name()),
            Some("New Student")
        );

        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Student));
    }

    #[tokio::test]
    async fn test_sign_up_failure_notifies() {
        let h = harness();
        let result = h.manager.sign_up("bad-email", "secret1", "X").await;
        assert!(matches!(result, Err(BackendError::InvalidEmail { .. })));
        assert_eq!(h.notifier.failures()[0].title, "Registration failed");
    }

    #[tokio::test]
    async fn test_sign_out_clears_state() {
        let h = harness();
        let id = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&id, Role::Admin).unwrap();
        h.manager.start().await;
        h.manager.sign_in("a@campus.test", "secret1").await.unwrap();
        settle(&h.manager).await;

        h.manager.sign_out().await.unwrap();

        let state = h.manager.state();
        assert!(state.session.is_none());
        assert!(state.role.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_clears_state_even_when_backend_fails() {
        let h = harness();
        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        settle(&h.manager).await;

        h.backend
            .fail_next_sign_out(BackendError::Network("offline".to_string()));
        let result = h.manager.sign_out().await;
        assert!(result.is_err());

        let state = h.manager.state();
        assert!(state.session.is_none());
        assert!(state.role.is_none());
        assert_eq!(h.notifier.failures()[0].title, "Connection error");
    }

    #[tokio::test]
    async fn test_sign_out_when_already_signed_out() {
        let h = harness();
        assert!(h.manager.sign_out().await.is_ok());
        assert!(h.manager.state().session.is_none());
    }

    #[tokio::test]
    async fn test_refresh_after_failed_sign_out_resolves_role() {
        let h = harness();
        let id = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&id, Role::Admin).unwrap();
        h.manager.start().await;
        h.manager.sign_in("a@campus.test", "secret1").await.unwrap();
        settle(&h.manager).await;

        // Local state is cleared but the backend keeps its session
        h.backend
            .fail_next_sign_out(BackendError::Network("offline".to_string()));
        assert!(h.manager.sign_out().await.is_err());
        assert!(h.manager.state().session.is_none());

        h.backend.refresh_session().unwrap();

        let state = settle(&h.manager).await;
        assert_eq!(state.subject(), Some(&id));
        assert_eq!(state.role, Some(Role::Admin));
    }

    #[tokio::test]
    async fn test_resolve_role_defaults_without_row() {
        let h = harness();
        let teacher = h.backend.add_user("t@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&teacher, Role::Teacher).unwrap();

        assert_eq!(h.manager.resolve_role(&teacher).await, Role::Teacher);
        assert_eq!(h.manager.resolve_role(&UserId::new("nobody")).await, Role::Student);
        assert!(h.manager.state().role.is_none());
    }

    #[tokio::test]
    async fn test_role_source_marks_fallback() {
        let h = harness();
        let admin = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&admin, Role::Admin).unwrap();
        h.backend
            .set_role_lookup_failure(Some(BackendError::Network("offline".to_string())));

        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for(admin.as_str())));
        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Student));
        assert!(matches!(state.role_source, Some(RoleSource::LookupFailed(_))));
        assert!(state.is_default_role());

        h.backend.set_role_lookup_failure(None);
        h.manager
            .on_session_change(AuthEvent::UserUpdated, Some(session_for(admin.as_str())));
        tokio::time::sleep(DELAY * 5).await;

        let state = h.manager.state();
        assert_eq!(state.role, Some(Role::Admin));
        assert_eq!(state.role_source, Some(RoleSource::Table));

        h.manager.on_session_change(AuthEvent::SignedOut, None);
        assert_eq!(h.manager.state().role_source, None);
    }

    // ============== Teardown ==============

    #[tokio::test]
    async fn test_teardown_ignores_late_notifications() {
        let h = harness();
        h.manager.start().await;
        h.manager.teardown();
        assert_eq!(h.backend.listener_count(), 0);

        let writes = h.manager.state_writes();
        let before = h.manager.state();

        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("late")));
        h.backend.emit(AuthEvent::SignedIn, Some(session_for("late")));
        tokio::time::sleep(DELAY * 5).await;

        assert_eq!(h.manager.state_writes(), writes);
        assert_eq!(h.manager.state(), before);
        assert!(!h.manager.is_alive());
    }

    #[tokio::test]
    async fn test_teardown_drops_in_flight_lookup_result() {
        let h = harness();
        h.manager
            .on_session_change(AuthEvent::SignedIn, Some(session_for("u1")));
        let writes = h.manager.state_writes();

        h.manager.teardown();
        tokio::time::sleep(DELAY * 5).await;

        assert_eq!(h.manager.state_writes(), writes);
        assert!(h.manager.state().role.is_none());
        assert_eq!(h.backend.role_query_count(), 0);
    }

    #[tokio::test]
    async fn test_teardown_twice_is_noop() {
        let h = harness();
        h.manager.attach();
        h.manager.teardown();
        h.manager.teardown();
        assert_eq!(h.backend.listener_count(), 0);
    }

    // ============== Deferral ==============

    #[tokio::test]
    async fn test_role_lookup_runs_after_callback_returns() {
        let h = harness();
        let id = h.backend.add_user("a@campus.test", "secret1", None).unwrap();
        h.backend.assign_role(&id, Role::Admin).unwrap();
        h.manager.attach();
        let baseline = h.backend.role_query_count();

        h.backend.restore_session("a@campus.test").unwrap();
        h.backend
            .emit(AuthEvent::SignedIn, h.backend.get_current_session().await.unwrap());

        // Delivery is over, the lookup has not been issued yet
        assert_eq!(h.backend.role_query_count(), baseline);
        assert!(h.manager.state().role.is_none());

        tokio::time::sleep(DELAY / 2).await;
        assert_eq!(h.backend.role_query_count(), baseline);

        let state = settle(&h.manager).await;
        assert_eq!(state.role, Some(Role::Admin));
        assert_eq!(h.backend.role_query_count(), baseline + 1);
    }
}
