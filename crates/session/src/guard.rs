//! RouteGuard - gates protected routes on the auth state

use shared::{AuthState, Role, SessionConfig};

/// Outcome of a guard check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Auth state not settled yet; show a loading affordance
    Loading,
    /// Send the visitor elsewhere. `from` is the path they asked for.
    Redirect { to: String, from: Option<String> },
    Allow,
}

impl GuardDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, GuardDecision::Allow)
    }
}

/// Route guard for protected views
#[derive(Debug, Clone)]
pub struct RouteGuard {
    login_path: String,
    default_path: String,
}

impl RouteGuard {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            login_path: config.login_path.clone(),
            default_path: config.default_path.clone(),
        }
    }

    pub fn login_path(&self) -> &str {
        &self.login_path
    }

    pub fn default_path(&self) -> &str {
        &self.default_path
    }

    /// Check access to `requested_path`, optionally requiring a role
    pub fn check(
        &self,
        state: &AuthState,
        requested_path: &str,
        required_role: Option<Role>,
    ) -> GuardDecision {
        if !state.is_ready() {
            return GuardDecision::Loading;
        }

        if !state.is_authenticated() {
            tracing::debug!(path = requested_path, "no user found, redirecting to login");
            return GuardDecision::Redirect {
                to: self.login_path.clone(),
                from: Some(requested_path.to_string()),
            };
        }

        let Some(required) = required_role else {
            return GuardDecision::Allow;
        };

        match state.role {
            // Signed in, role still on its way
            None => GuardDecision::Loading,
            Some(role) if role == required => GuardDecision::Allow,
            Some(role) => {
                tracing::debug!(
                    path = requested_path,
                    %role,
                    %required,
                    "insufficient role, redirecting"
                );
                GuardDecision::Redirect {
                    to: self.default_path.clone(),
                    from: None,
                }
            }
        }
    }
}

impl Default for RouteGuard {
    fn default() -> Self {
        Self::new(&SessionConfig::default())
    }
}
