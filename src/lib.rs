//! Liquid-democracy engine: a point ledger with delegation and cycle
//! resolution, proposals with logarithmic quorums, and a debate workflow,
//! driven by a text command layer.

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::errors::{CommandError, EngineError, EngineResult};
pub use application::Engine;
pub use infrastructure::config::Config;
