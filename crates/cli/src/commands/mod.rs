//! CLI Commands
//!
//! One-shot commands only read state. Signing in and out needs the REPL,
//! since every process starts a fresh in-memory backend.

pub mod open;
pub mod status;

pub use open::OpenCommand;
pub use status::{RolesCommand, StatusCommand};
