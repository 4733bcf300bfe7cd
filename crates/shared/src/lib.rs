//! # Campus Shared
//!
//! Common types and interfaces used across all Campus packages.

pub mod backend;
pub mod config;
pub mod error;
pub mod notify;
pub mod role;
pub mod session;

// Re-exports
pub use backend::*;
pub use config::*;
pub use error::*;
pub use notify::*;
pub use role::*;
pub use session::*;
