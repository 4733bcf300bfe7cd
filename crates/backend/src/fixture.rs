//! Fixture files - seed data for the in-memory backend
//!
//! ```yaml
//! users:
//!   - email: admin@campus.test
//!     password: secret1
//!     fullName: Campus Admin
//!     role: admin
//!   - email: ana@campus.test
//!     password: secret1
//! signedInAs: ana@campus.test
//! ```

use crate::in_memory::{BackendOptions, InMemoryBackend};
use serde::{Deserialize, Serialize};
use shared::{read_document, BackendResult, Role};
use std::path::Path;

/// A seeded account
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureUser {
    pub email: String,
    pub password: String,
    pub full_name: Option<String>,
    /// Users without a role have no row in the role table
    pub role: Option<Role>,
}

/// Seed data for [`InMemoryBackend`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendFixture {
    #[serde(default)]
    pub users: Vec<FixtureUser>,

    /// Email of the user whose session was persisted by an earlier visit
    pub signed_in_as: Option<String>,

    /// Sign-ups skip email confirmation
    #[serde(default)]
    pub auto_confirm: bool,
}

impl BackendFixture {
    /// Load a fixture from a JSON or YAML file (chosen by extension)
    pub fn from_file(path: &Path) -> shared::Result<Self> {
        read_document(path)
    }

    /// Build a backend holding the fixture's users, roles and persisted session
    pub fn into_backend(self) -> BackendResult<InMemoryBackend> {
        let backend = InMemoryBackend::new(BackendOptions {
            auto_confirm: self.auto_confirm,
            ..Default::default()
        });

        for user in &self.users {
            let id = backend.add_user(&user.email, &user.password, user.full_name.as_deref())?;
            if let Some(role) = user.role {
                backend.assign_role(&id, role)?;
            }
        }

        if let Some(email) = &self.signed_in_as {
            backend.restore_session(email)?;
        }

        tracing::debug!(users = self.users.len(), "backend seeded from fixture");
        Ok(backend)
    }
}
