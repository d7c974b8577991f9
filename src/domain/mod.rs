//! Domain layer - Core business logic with no external dependencies
//! 
//! This layer contains:
//! - Entities: Core business objects (Voter, Article, Proposal, Message)
//! - Rules: Delegation ledger, requirement formulas, lifecycle table
//! - Traits: Abstractions for infrastructure (SnapshotStore, Clock, Bot)

pub mod entities;
pub mod rules;
pub mod traits;
