//! # Campus CLI
//!
//! Command-line front end for the Campus session layer.

pub mod app;
pub mod commands;
pub mod interactive;
pub mod notifier;
