//! Wiring: config, backend, session manager and router

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use backend::{BackendFixture, FixtureUser, InMemoryBackend};
use indicatif::{ProgressBar, ProgressStyle};
use session::{Router, SessionRoleManager};
use shared::{AuthState, Notifier, Role, SessionConfig};

/// Upper bound on the wait for the first settled state
const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Accounts available when no fixture file is given
pub fn demo_fixture() -> BackendFixture {
    let user = |email: &str, full_name: &str, role: Option<Role>| FixtureUser {
        email: email.to_string(),
        password: "campus123".to_string(),
        full_name: Some(full_name.to_string()),
        role,
    };

    BackendFixture {
        users: vec![
            user("admin@campus.test", "Campus Admin", Some(Role::Admin)),
            user("teacher@campus.test", "Tomas Teacher", Some(Role::Teacher)),
            user("student@campus.test", "Sofia Student", Some(Role::Student)),
            user("newcomer@campus.test", "Nora Newcomer", None),
        ],
        signed_in_as: None,
        auto_confirm: true,
    }
}

/// A running Campus session
pub struct App {
    pub backend: InMemoryBackend,
    pub manager: SessionRoleManager,
    pub router: Router,
}

impl App {
    pub fn new(
        config: SessionConfig,
        fixture: BackendFixture,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        let router = Router::new(&config)?;
        let backend = fixture.into_backend()?;
        let manager = SessionRoleManager::new(
            Arc::new(backend.clone()),
            Arc::new(backend.clone()),
            notifier,
            config,
        )?;

        Ok(Self {
            backend,
            manager,
            router,
        })
    }

    /// Build from optional config and fixture files
    pub fn load(
        config_path: Option<&Path>,
        fixture_path: Option<&Path>,
        notifier: Arc<dyn Notifier>,
    ) -> anyhow::Result<Self> {
        let config = match config_path {
            Some(path) => SessionConfig::from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => SessionConfig::default(),
        };

        let fixture = match fixture_path {
            Some(path) => BackendFixture::from_file(path)
                .with_context(|| format!("Failed to load fixture from {}", path.display()))?,
            None => demo_fixture(),
        };

        tracing::debug!(users = fixture.users.len(), "backend fixture loaded");
        Self::new(config, fixture, notifier)
    }

    /// Attach, restore the persisted session and wait for the state to settle
    pub async fn start(&self, animate: bool) -> AuthState {
        let spinner = animate.then(create_spinner);

        self.manager.start().await;
        let state = match tokio::time::timeout(SETTLE_TIMEOUT, self.manager.wait_until_settled())
            .await
        {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!("auth state did not settle in time");
                self.manager.state()
            }
        };

        if let Some(spinner) = spinner {
            spinner.finish_and_clear();
        }
        state
    }

    /// Wait for the role lookup that follows a sign-in
    pub async fn settle(&self) -> AuthState {
        tokio::time::timeout(SETTLE_TIMEOUT, self.manager.wait_until_settled())
            .await
            .unwrap_or_else(|_| self.manager.state())
    }
}

fn create_spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message("Loading session...");
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}
