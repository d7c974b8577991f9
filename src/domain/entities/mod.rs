//! Domain entities - Core business objects with no external dependencies

pub mod article;
pub mod command;
pub mod message;
pub mod modification;
pub mod proposal;
pub mod snapshot;
pub mod voter;

pub use article::{is_immutable_article, Article, VoteRecord, IMMUTABLE_ARTICLE_ID};
pub use command::{Command, CommandRegistry};
pub use message::{Content, Message};
pub use modification::{ArticleModification, Comment, DebateState, DebateWorkspace, ModificationResult};
pub use proposal::{Proposal, ProposedArticle, Tally};
pub use snapshot::Snapshot;
pub use voter::{DelegationEntry, Voter, VoterSnapshot, BASE_POINTS, RESERVED_POINTS};
