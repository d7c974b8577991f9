//! Application services - Business logic orchestration

pub mod command_service;
pub mod constitution_service;
pub mod debate_service;
pub mod delegation_service;
pub mod proposal_service;

pub use command_service::CommandService;
pub use constitution_service::{ConstitutionService, ProposalRequirements};
pub use debate_service::DebateService;
pub use delegation_service::DelegationService;
pub use proposal_service::ProposalService;
