//! Session and auth state types

use crate::role::{Role, RoleSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Subject identifier issued by the identity backend
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for UserId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authenticated user as seen inside a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    pub id: UserId,
    pub email: String,

    /// Free-form metadata supplied at sign-up (e.g. `full_name`)
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl SessionUser {
    pub fn full_name(&self) -> Option<&str> {
        self.metadata.get("full_name").map(|s| s.as_str())
    }
}

/// Backend-issued credential bundle. Read-only for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    /// A session without a user carries no subject
    pub user: Option<SessionUser>,
}

impl Session {
    /// Subject of this session, if any
    pub fn subject(&self) -> Option<&UserId> {
        self.user.as_ref().map(|u| &u.id)
    }

    pub fn email(&self) -> Option<&str> {
        self.user.as_ref().map(|u| u.email.as_str())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Kind of session change delivered by the backend's notification channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthEvent {
    InitialSession,
    SignedIn,
    SignedOut,
    TokenRefreshed,
    UserUpdated,
    PasswordRecovery,
}

impl AuthEvent {
    /// A pure token refresh keeps the subject, so the role stays valid
    pub fn is_token_refresh(&self) -> bool {
        matches!(self, AuthEvent::TokenRefreshed)
    }
}

impl core::fmt::Display for AuthEvent {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            AuthEvent::InitialSession => "INITIAL_SESSION",
            AuthEvent::SignedIn => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed => "TOKEN_REFRESHED",
            AuthEvent::UserUpdated => "USER_UPDATED",
            AuthEvent::PasswordRecovery => "PASSWORD_RECOVERY",
        };
        f.write_str(name)
    }
}

/// Whether the first session check has completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthStatus {
    #[default]
    Initializing,
    Ready,
}

/// Reactive snapshot of who is logged in and what they can do
///
/// `role` is only meaningful once `status` is [`AuthStatus::Ready`], and is
/// always `None` while `session` is `None`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub session: Option<Session>,
    pub role: Option<Role>,
    /// Set together with `role`
    #[serde(default)]
    pub role_source: Option<RoleSource>,
    pub status: AuthStatus,
}

impl AuthState {
    pub fn is_ready(&self) -> bool {
        self.status == AuthStatus::Ready
    }

    pub fn subject(&self) -> Option<&UserId> {
        self.session.as_ref().and_then(|s| s.subject())
    }

    pub fn is_authenticated(&self) -> bool {
        self.subject().is_some()
    }

    /// Role, but only once the state is ready
    pub fn effective_role(&self) -> Option<Role> {
        if self.is_ready() {
            self.role
        } else {
            None
        }
    }

    /// The role was assigned by fail-open fallback, not read from the table
    pub fn is_default_role(&self) -> bool {
        self.role_source.as_ref().is_some_and(|s| s.is_default())
    }

    /// Ready and, when signed in, with a resolved role
    pub fn is_settled(&self) -> bool {
        self.is_ready() && (!self.is_authenticated() || self.role.is_some())
    }
}
