//! Business rules - pure algorithms over domain entities

pub mod ledger;
pub mod lifecycle;
pub mod requirements;

pub use ledger::{DelegationGraph, ResolvedCycle};
pub use lifecycle::ProposalState;
pub use requirements::{Requirement, Threshold};
