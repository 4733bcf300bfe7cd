//! # Campus Session
//!
//! Session lifecycle, role resolution and route guarding for Campus.
//!
//! ## Components
//!
//! - `SessionRoleManager` - Owns the auth state and keeps session and role consistent
//! - `RoleResolver` - Role table lookup with a fail-open default
//! - `RouteGuard` - Gates protected views on the auth state
//! - `Router` - The application route table

pub mod guard;
pub mod manager;
pub mod role_resolver;
pub mod router;

pub use guard::{GuardDecision, RouteGuard};
pub use manager::SessionRoleManager;
pub use role_resolver::{RoleResolution, RoleResolver};
pub use router::{Dashboard, Navigation, Page, RouteAccess, RouteDefinition, Router};
