//! Role - what a signed-in user is allowed to see
//!
//! Role is a Value Object - two roles with the same variant are equal.
//! Assignments live in the backend's role table, one row per user.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// The three roles of the campus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Manages users, courses and course assignments
    Admin,

    /// Creates courses and follows student progress
    Teacher,

    /// Takes assigned courses. Assigned when no row exists.
    #[default]
    Student,
}

/// Badge style used when a role is rendered next to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadgeVariant {
    Destructive,
    Default,
    Secondary,
    Outline,
}

impl BadgeVariant {
    /// Badge for an optional role; unresolved roles render as an outline
    pub fn for_role(role: Option<Role>) -> Self {
        role.map(|r| r.badge()).unwrap_or(BadgeVariant::Outline)
    }
}

impl Role {
    /// Wire name as stored in the role table
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    /// Get the display name of this role
    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Admin => "Administrator",
            Role::Teacher => "Teacher",
            Role::Student => "Student",
        }
    }

    /// Get a description of what this role can do
    pub fn description(&self) -> &'static str {
        match self {
            Role::Admin => "Manages users, roles, courses and course assignments",
            Role::Teacher => "Creates courses and monitors student progress",
            Role::Student => "Follows assigned courses and tracks own progress",
        }
    }

    pub fn badge(&self) -> BadgeVariant {
        match self {
            Role::Admin => BadgeVariant::Destructive,
            Role::Teacher => BadgeVariant::Default,
            Role::Student => BadgeVariant::Secondary,
        }
    }

    /// Get all roles (useful for iteration)
    pub fn all() -> &'static [Role] {
        &[Role::Admin, Role::Teacher, Role::Student]
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a string is not one of the known roles
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown role '{value}'. Available roles: admin, teacher, student")]
pub struct UnknownRoleError {
    pub value: String,
}

/// Where a resolved role came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind", content = "error")]
pub enum RoleSource {
    /// A row in the role table
    Table,
    /// No row for the user; the default role was assigned
    MissingRow,
    /// The query failed; carries the backend error message
    LookupFailed(String),
}

impl RoleSource {
    /// Whether the role is the fail-open default rather than a table row
    pub fn is_default(&self) -> bool {
        !matches!(self, RoleSource::Table)
    }
}

impl FromStr for Role {
    type Err = UnknownRoleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "teacher" => Ok(Role::Teacher),
            "student" => Ok(Role::Student),
            _ => Err(UnknownRoleError {
                value: s.to_string(),
            }),
        }
    }
}
