use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::rules::requirements::Requirement;

/// Id of the sentinel article nobody can modify
pub const IMMUTABLE_ARTICLE_ID: &str = "0";

pub fn is_immutable_article(id: &str) -> bool {
    id == IMMUTABLE_ARTICLE_ID
}

/// Outcome of one finished vote on an article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub date: DateTime<Utc>,
    pub voters_participated: u64,
    pub support: i64,
    pub opposition: i64,
    pub passed: bool,
}

/// Requirement computed for the article's history at a given time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedRequirement {
    pub requirement: Requirement,
    pub previous_voters: u64,
    pub computed_at: DateTime<Utc>,
    /// History length the entry was computed from
    pub history_len: usize,
}

/// A constitutional article
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Article {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub previous_text: String,
    /// Quorum multiplier
    pub weight: f64,
    #[serde(default)]
    pub history: Vec<VoteRecord>,
    #[serde(default)]
    pub cached: Option<CachedRequirement>,
    pub last_modified: DateTime<Utc>,
}

impl Article {
    pub fn new(id: impl Into<String>, text: impl Into<String>, weight: f64, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            previous_text: String::new(),
            weight,
            history: Vec::new(),
            cached: None,
            last_modified: now,
        }
    }

    pub fn is_immutable(&self) -> bool {
        is_immutable_article(&self.id)
    }

    /// Turnout of the most recent recorded vote, 0 without history
    pub fn last_turnout(&self) -> u64 {
        self.history.last().map(|r| r.voters_participated).unwrap_or(0)
    }
}
