use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Article, Proposal, Voter};

pub const SNAPSHOT_VERSION: u32 = 1;

/// Complete engine state as handed to the persistence collaborator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    pub voters: Vec<Voter>,
    pub articles: Vec<Article>,
    pub proposals: Vec<Proposal>,
    /// Sequence number of the last proposal id handed out
    pub proposal_seq: u64,
}

impl Snapshot {
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: now,
            voters: Vec::new(),
            articles: Vec::new(),
            proposals: Vec::new(),
            proposal_seq: 0,
        }
    }
}
