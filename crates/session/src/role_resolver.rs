//! RoleResolver - role lookup with a fail-open default

use shared::{Role, RoleSource, RoleTable, UserId};
use std::sync::Arc;

/// Role resolution result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleResolution {
    pub user_id: UserId,
    pub role: Role,
    pub source: RoleSource,
}

/// Resolves the role of a subject against the role table
///
/// Never fails: a missing row or a failed query yields the default role.
#[derive(Clone)]
pub struct RoleResolver {
    table: Arc<dyn RoleTable>,
    default_role: Role,
}

impl RoleResolver {
    pub fn new(table: Arc<dyn RoleTable>, default_role: Role) -> Self {
        Self {
            table,
            default_role,
        }
    }

    pub fn default_role(&self) -> Role {
        self.default_role
    }

    pub async fn resolve(&self, user_id: &UserId) -> RoleResolution {
        tracing::debug!(%user_id, "fetching user role");

        let (role, source) = match self.table.find_role(user_id).await {
            Ok(Some(role)) => (role, RoleSource::Table),
            Ok(None) => (self.default_role, RoleSource::MissingRow),
            Err(error) => {
                tracing::warn!(
                    %user_id,
                    %error,
                    fallback = %self.default_role,
                    "role lookup failed, using default role"
                );
                (self.default_role, RoleSource::LookupFailed(error.to_string()))
            }
        };

        tracing::debug!(%user_id, %role, ?source, "user role resolved");

        RoleResolution {
            user_id: user_id.clone(),
            role,
            source,
        }
    }
}

impl core::fmt::Debug for RoleResolver {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RoleResolver")
            .field("default_role", &self.default_role)
            .finish_non_exhaustive()
    }
}
