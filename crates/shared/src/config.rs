//! Configuration types for Campus

use crate::error::{CampusError, Result};
use crate::role::Role;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

fn default_role_lookup_delay_ms() -> u64 {
    100
}

fn default_login_path() -> String {
    "/auth".to_string()
}

fn default_default_path() -> String {
    "/dashboard".to_string()
}

/// Session manager and route guard configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Delay between a session change and the role lookup it triggers
    #[serde(default = "default_role_lookup_delay_ms")]
    pub role_lookup_delay_ms: u64,

    /// Role assigned when the lookup finds no row or fails
    #[serde(default)]
    pub default_role: Role,

    /// Where unauthenticated visitors are sent
    #[serde(default = "default_login_path")]
    pub login_path: String,

    /// Where authenticated users without the required role are sent
    #[serde(default = "default_default_path")]
    pub default_path: String,

    /// Passed to the backend on sign-up for the confirmation email link
    #[serde(default)]
    pub email_redirect_to: Option<String>,
}

/// Deserialize a JSON or YAML document, chosen by file extension.
/// Files without an extension are read as JSON.
pub fn read_document<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    match path.extension().and_then(|e| e.to_str()) {
        Some("yaml") | Some("yml") => Ok(serde_yaml::from_str(&content)?),
        Some("json") | None => Ok(serde_json::from_str(&content)?),
        Some(other) => Err(CampusError::Config(format!(
            "Unsupported file extension '.{}' for {}",
            other,
            path.display()
        ))),
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            role_lookup_delay_ms: default_role_lookup_delay_ms(),
            default_role: Role::default(),
            login_path: default_login_path(),
            default_path: default_default_path(),
            email_redirect_to: None,
        }
    }
}

impl SessionConfig {
    /// Load configuration from a JSON or YAML file (chosen by extension)
    pub fn from_file(path: &Path) -> Result<Self> {
        let config: Self = read_document(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject paths the router could never match
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [("loginPath", &self.login_path), ("defaultPath", &self.default_path)] {
            if !value.starts_with('/') {
                return Err(CampusError::Config(format!(
                    "{} must be an absolute path, got '{}'",
                    name, value
                )));
            }
        }
        Ok(())
    }

    pub fn role_lookup_delay(&self) -> Duration {
        Duration::from_millis(self.role_lookup_delay_ms)
    }

    /// Builder: set the role lookup delay
    pub fn with_role_lookup_delay(mut self, delay: Duration) -> Self {
        self.role_lookup_delay_ms = delay.as_millis() as u64;
        self
    }
}
