//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Storage: Snapshot persistence
//! - Logging: Subscriber setup for the binary
//! - Adapters: Front ends (console)

pub mod adapters;
pub mod config;
pub mod logging;
pub mod storage;
