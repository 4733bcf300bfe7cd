//! Backend ports - what the session manager needs from the hosted backend
//!
//! ```text
//! Session layer         │  Backend layer
//! ──────────────────────┼────────────────────────
//! trait IdentityBackend │  InMemoryBackend
//! trait RoleTable       │  (hosted auth + tables)
//! ```

use crate::error::BackendError;
use crate::role::Role;
use crate::session::{AuthEvent, Session, UserId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Receives session-change notifications
///
/// Called synchronously from inside the backend's delivery loop. Implementors
/// must not issue backend requests from within this call.
pub trait SessionListener: Send + Sync {
    fn on_session_change(&self, event: AuthEvent, session: Option<Session>);
}

/// Sign-up request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    /// Stored as user metadata (`full_name` is the display name)
    pub metadata: HashMap<String, String>,
    pub email_redirect_to: Option<String>,
}

/// Handle to a registered listener
///
/// Detaches at most once: either through [`Subscription::unsubscribe`] or on drop.
pub struct Subscription {
    id: u64,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(id: u64, detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl core::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Identity backend (auth service)
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    /// Persisted session, if any
    async fn get_current_session(&self) -> BackendResult<Option<Session>>;

    /// Register a session-change listener
    fn on_change(&self, listener: Arc<dyn SessionListener>) -> Subscription;

    async fn sign_in_with_password(&self, email: &str, password: &str) -> BackendResult<Session>;

    /// Returns the session when the account is usable immediately,
    /// `None` when email confirmation is pending
    async fn sign_up(&self, request: SignUpRequest) -> BackendResult<Option<Session>>;

    async fn sign_out(&self) -> BackendResult<()>;
}

/// Role assignment table: at most one row per user
#[async_trait]
pub trait RoleTable: Send + Sync {
    async fn find_role(&self, user_id: &UserId) -> BackendResult<Option<Role>>;
}
