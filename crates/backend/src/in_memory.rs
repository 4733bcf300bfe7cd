//! In-Memory Backend
//!
//! Thread-safe stand-in for the hosted auth service and its role table.
//! Used by tests and by the command-line front-end.
//!
//! Like the hosted client, it refuses requests issued from inside its own
//! notification callback ([`BackendError::Reentrant`]).

use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use shared::{
    AuthEvent, BackendError, BackendResult, IdentityBackend, Role, RoleTable, Session,
    SessionListener, SessionUser, SignUpRequest, Subscription, UserId,
};
use uuid::Uuid;

thread_local! {
    static DISPATCHING: Cell<bool> = const { Cell::new(false) };
}

/// Marks the current thread as delivering notifications
struct DispatchGuard {
    previous: bool,
}

impl DispatchGuard {
    fn enter() -> Self {
        let previous = DISPATCHING.with(|d| d.replace(true));
        Self { previous }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(self.previous));
    }
}

fn ensure_not_dispatching(operation: &str) -> BackendResult<()> {
    if DISPATCHING.with(|d| d.get()) {
        tracing::error!(operation, "request issued from within a session-change callback");
        return Err(BackendError::Reentrant {
            operation: operation.to_string(),
        });
    }
    Ok(())
}

fn lock_error(what: &str) -> BackendError {
    BackendError::Other(format!("Failed to acquire {} lock", what))
}

/// Behaviour switches for the in-memory backend
#[derive(Debug, Clone)]
pub struct BackendOptions {
    /// Sign-ups are usable immediately (no email confirmation step)
    pub auto_confirm: bool,
    pub min_password_length: usize,
    pub session_ttl: chrono::Duration,
    /// Deliver `INITIAL_SESSION` to every new listener
    pub emit_initial_session: bool,
}

impl Default for BackendOptions {
    fn default() -> Self {
        Self {
            auto_confirm: false,
            min_password_length: 6,
            session_ttl: chrono::Duration::hours(1),
            emit_initial_session: true,
        }
    }
}

#[derive(Debug, Clone)]
struct UserRecord {
    id: UserId,
    email: String,
    password: String,
    metadata: HashMap<String, String>,
    confirmed: bool,
}

impl UserRecord {
    fn session_user(&self) -> SessionUser {
        SessionUser {
            id: self.id.clone(),
            email: self.email.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

/// Injected failures, consumed by the next matching call
#[derive(Debug, Default)]
struct Faults {
    session_fetch: Option<BackendError>,
    sign_out: Option<BackendError>,
    /// Sticky: every role query fails while set
    role_lookup: Option<BackendError>,
    role_latency: Duration,
}

#[derive(Default)]
struct Listeners {
    next_id: u64,
    entries: Vec<(u64, Arc<dyn SessionListener>)>,
}

/// Role-query counters
#[derive(Debug, Default)]
struct QueryStats {
    total: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct Inner {
    options: BackendOptions,
    users: RwLock<HashMap<String, UserRecord>>,
    roles: RwLock<HashMap<UserId, Role>>,
    current: RwLock<Option<Session>>,
    listeners: Mutex<Listeners>,
    faults: Mutex<Faults>,
    stats: QueryStats,
    email_pattern: Regex,
}

/// In-memory identity backend and role table
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl core::fmt::Debug for InMemoryBackend {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryBackend")
            .field("options", &self.inner.options)
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new(BackendOptions::default())
    }
}

impl InMemoryBackend {
    pub fn new(options: BackendOptions) -> Self {
        let email_pattern =
            Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid");

        Self {
            inner: Arc::new(Inner {
                options,
                users: RwLock::new(HashMap::new()),
                roles: RwLock::new(HashMap::new()),
                current: RwLock::new(None),
                listeners: Mutex::new(Listeners::default()),
                faults: Mutex::new(Faults::default()),
                stats: QueryStats::default(),
                email_pattern,
            }),
        }
    }

    pub fn options(&self) -> &BackendOptions {
        &self.inner.options
    }

    // ============== Seeding ==============

    /// Register a confirmed user directly, bypassing sign-up validation
    pub fn add_user(
        &self,
        email: &str,
        password: &str,
        full_name: Option<&str>,
    ) -> BackendResult<UserId> {
        let key = email.to_lowercase();
        let mut users = self.inner.users.write().map_err(|_| lock_error("users"))?;
        if users.contains_key(&key) {
            return Err(BackendError::UserAlreadyExists {
                email: email.to_string(),
            });
        }

        let id = UserId::new(Uuid::new_v4().to_string());
        let mut metadata = HashMap::new();
        if let Some(name) = full_name {
            metadata.insert("full_name".to_string(), name.to_string());
        }

        users.insert(
            key,
            UserRecord {
                id: id.clone(),
                email: email.to_string(),
                password: password.to_string(),
                metadata,
                confirmed: true,
            },
        );
        Ok(id)
    }

    /// Write (or overwrite) the role row of a user
    pub fn assign_role(&self, user_id: &UserId, role: Role) -> BackendResult<()> {
        let mut roles = self.inner.roles.write().map_err(|_| lock_error("roles"))?;
        roles.insert(user_id.clone(), role);
        Ok(())
    }

    pub fn user_id_for(&self, email: &str) -> Option<UserId> {
        self.inner
            .users
            .read()
            .ok()
            .and_then(|users| users.get(&email.to_lowercase()).map(|u| u.id.clone()))
    }

    /// Store a session as if it had been persisted by an earlier visit.
    /// No notification is delivered.
    pub fn restore_session(&self, email: &str) -> BackendResult<Session> {
        let user = {
            let users = self.inner.users.read().map_err(|_| lock_error("users"))?;
            users
                .get(&email.to_lowercase())
                .cloned()
                .ok_or(BackendError::InvalidCredentials)?
        };

        let session = self.issue_session(&user);
        self.set_current(Some(session.clone()))?;
        Ok(session)
    }

    // ============== Fault injection ==============

    pub fn fail_next_session_fetch(&self, error: BackendError) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.session_fetch = Some(error);
        }
    }

    pub fn fail_next_sign_out(&self, error: BackendError) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.sign_out = Some(error);
        }
    }

    /// Make every role query fail until cleared with `None`
    pub fn set_role_lookup_failure(&self, error: Option<BackendError>) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.role_lookup = error;
        }
    }

    pub fn set_role_lookup_latency(&self, latency: Duration) {
        if let Ok(mut faults) = self.inner.faults.lock() {
            faults.role_latency = latency;
        }
    }

    // ============== Notifications ==============

    /// Deliver a change notification to every listener.
    ///
    /// Public so callers can replay notifications; delivery is at-least-once.
    pub fn emit(&self, event: AuthEvent, session: Option<Session>) {
        let listeners: Vec<Arc<dyn SessionListener>> = match self.inner.listeners.lock() {
            Ok(listeners) => listeners.entries.iter().map(|(_, l)| l.clone()).collect(),
            Err(_) => return,
        };

        tracing::debug!(%event, listeners = listeners.len(), "delivering session change");

        let _guard = DispatchGuard::enter();
        for listener in listeners {
            listener.on_session_change(event, session.clone());
        }
    }

    /// Rotate the access token of the current session
    pub fn refresh_session(&self) -> BackendResult<Session> {
        ensure_not_dispatching("refresh_session")?;

        let refreshed = {
            let mut current = self.inner.current.write().map_err(|_| lock_error("session"))?;
            let session = current.as_mut().ok_or(BackendError::InvalidCredentials)?;
            session.access_token = Uuid::new_v4().to_string();
            session.expires_at = Utc::now() + self.inner.options.session_ttl;
            session.clone()
        };

        self.emit(AuthEvent::TokenRefreshed, Some(refreshed.clone()));
        Ok(refreshed)
    }

    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .lock()
            .map(|l| l.entries.len())
            .unwrap_or(0)
    }

    // ============== Stats ==============

    pub fn role_query_count(&self) -> usize {
        self.inner.stats.total.load(Ordering::SeqCst)
    }

    /// Highest number of role queries observed running at the same time
    pub fn max_concurrent_role_queries(&self) -> usize {
        self.inner.stats.max_in_flight.load(Ordering::SeqCst)
    }

    // ============== Internals ==============

    fn issue_session(&self, user: &UserRecord) -> Session {
        Session {
            access_token: Uuid::new_v4().to_string(),
            refresh_token: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + self.inner.options.session_ttl,
            user: Some(user.session_user()),
        }
    }

    fn set_current(&self, session: Option<Session>) -> BackendResult<()> {
        let mut current = self.inner.current.write().map_err(|_| lock_error("session"))?;
        *current = session;
        Ok(())
    }

    fn validate_sign_up(&self, request: &SignUpRequest) -> BackendResult<()> {
        if !self.inner.email_pattern.is_match(&request.email) {
            return Err(BackendError::InvalidEmail {
                email: request.email.clone(),
            });
        }
        if request.password.chars().count() < self.inner.options.min_password_length {
            return Err(BackendError::WeakPassword {
                min_length: self.inner.options.min_password_length,
            });
        }
        Ok(())
    }
}

/// Decrements the in-flight counter when a role query ends
struct InFlight<'a>(&'a QueryStats);

impl<'a> InFlight<'a> {
    fn start(stats: &'a QueryStats) -> Self {
        stats.total.fetch_add(1, Ordering::SeqCst);
        let now = stats.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(stats)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityBackend for InMemoryBackend {
    async fn get_current_session(&self) -> BackendResult<Option<Session>> {
        ensure_not_dispatching("get_current_session")?;

        let fault = self
            .inner
            .faults
            .lock()
            .map_err(|_| lock_error("faults"))?
            .session_fetch
            .take();
        if let Some(error) = fault {
            return Err(error);
        }

        let current = self.inner.current.read().map_err(|_| lock_error("session"))?;
        Ok(current.clone())
    }

    fn on_change(&self, listener: Arc<dyn SessionListener>) -> Subscription {
        let id = match self.inner.listeners.lock() {
            Ok(mut listeners) => {
                listeners.next_id += 1;
                let id = listeners.next_id;
                listeners.entries.push((id, listener.clone()));
                id
            }
            Err(_) => 0,
        };

        if self.inner.options.emit_initial_session {
            let session = self.inner.current.read().ok().and_then(|c| c.clone());
            let _guard = DispatchGuard::enter();
            listener.on_session_change(AuthEvent::InitialSession, session);
        }

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Subscription::new(id, move || {
            if let Some(inner) = weak.upgrade() {
                if let Ok(mut listeners) = inner.listeners.lock() {
                    listeners.entries.retain(|(entry_id, _)| *entry_id != id);
                }
            }
        })
    }

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session> {
        ensure_not_dispatching("sign_in_with_password")?;

        let user = {
            let users = self.inner.users.read().map_err(|_| lock_error("users"))?;
            users.get(&email.to_lowercase()).cloned()
        };

        let user = match user {
            Some(user) if user.password == password && user.confirmed => user,
            _ => return Err(BackendError::InvalidCredentials),
        };

        let session = self.issue_session(&user);
        self.set_current(Some(session.clone()))?;
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, request: SignUpRequest) -> BackendResult<Option<Session>> {
        ensure_not_dispatching("sign_up")?;
        self.validate_sign_up(&request)?;

        let record = {
            let key = request.email.to_lowercase();
            let mut users = self.inner.users.write().map_err(|_| lock_error("users"))?;
            if users.contains_key(&key) {
                return Err(BackendError::UserAlreadyExists {
                    email: request.email.clone(),
                });
            }
            let record = UserRecord {
                id: UserId::new(Uuid::new_v4().to_string()),
                email: request.email.clone(),
                password: request.password.clone(),
                metadata: request.metadata.clone(),
                confirmed: self.inner.options.auto_confirm,
            };
            users.insert(key, record.clone());
            record
        };

        tracing::debug!(
            user_id = %record.id,
            redirect = ?request.email_redirect_to,
            "user registered"
        );

        if !record.confirmed {
            return Ok(None);
        }

        let session = self.issue_session(&record);
        self.set_current(Some(session.clone()))?;
        self.emit(AuthEvent::SignedIn, Some(session.clone()));
        Ok(Some(session))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        ensure_not_dispatching("sign_out")?;

        let fault = self
            .inner
            .faults
            .lock()
            .map_err(|_| lock_error("faults"))?
            .sign_out
            .take();
        if let Some(error) = fault {
            return Err(error);
        }

        self.set_current(None)?;
        self.emit(AuthEvent::SignedOut, None);
        Ok(())
    }
}

#[async_trait]
impl RoleTable for InMemoryBackend {
    async fn find_role(&self, user_id: &UserId) -> BackendResult<Option<Role>> {
        ensure_not_dispatching("find_role")?;

        let _in_flight = InFlight::start(&self.inner.stats);

        let (failure, latency) = {
            let faults = self.inner.faults.lock().map_err(|_| lock_error("faults"))?;
            (faults.role_lookup.clone(), faults.role_latency)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if let Some(error) = failure {
            return Err(error);
        }

        let roles = self.inner.roles.read().map_err(|_| lock_error("roles"))?;
        Ok(roles.get(user_id).copied())
    }
}
