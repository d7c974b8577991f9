//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Engine: the context object every front end talks to
//! - Services: ledger, constitution, debate, proposals and text commands
//! - Locks: keyed exclusive sections for voters and proposals
//! - Errors: engine, command, storage and config errors
//! - Messaging: parsing raw lines into commands

pub mod engine;
pub mod errors;
pub mod locks;
pub mod messaging;
pub mod services;

pub use engine::Engine;
