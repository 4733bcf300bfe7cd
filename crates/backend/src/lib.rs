//! # Campus Backend
//!
//! Implementations of the backend ports defined in `shared`.
//!
//! ## Components
//!
//! - `InMemoryBackend` - Identity backend, role table and change channel
//! - `BackendFixture` - Seed data loaded from YAML/JSON

pub mod fixture;
pub mod in_memory;

pub use fixture::{BackendFixture, FixtureUser};
pub use in_memory::{BackendOptions, InMemoryBackend};
