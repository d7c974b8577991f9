use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Phase of a single article modification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebateState {
    Discussion,
    Voting,
    Reviewing,
}

impl fmt::Display for DebateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DebateState::Discussion => "discussion",
            DebateState::Voting => "voting",
            DebateState::Reviewing => "reviewing",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub author_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// A proposed change to one article, debated inside a proposal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArticleModification {
    pub id: String,
    pub article_id: String,
    pub author_id: String,
    pub changes: String,
    pub votes: BTreeMap<String, i64>,
    pub state: DebateState,
    pub voting_deadline: Option<DateTime<Utc>>,
    pub required_points: i64,
    pub comments: Vec<Comment>,
    pub created_at: DateTime<Utc>,
}

impl ArticleModification {
    pub fn result(&self) -> ModificationResult {
        let total_points: i64 = self.votes.values().sum();
        ModificationResult {
            passed: total_points >= self.required_points,
            total_points,
            total_voters: self.votes.len(),
            created_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModificationResult {
    pub passed: bool,
    pub total_points: i64,
    pub total_voters: usize,
    pub created_at: DateTime<Utc>,
}

/// Modification workspace owned by one proposal
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateWorkspace {
    pub articles: BTreeSet<String>,
    pub modifications: BTreeMap<String, ArticleModification>,
    pub next_id: u64,
}

impl DebateWorkspace {
    pub fn new(articles: impl IntoIterator<Item = String>) -> Self {
        Self {
            articles: articles.into_iter().collect(),
            modifications: BTreeMap::new(),
            next_id: 1,
        }
    }

    pub fn covers(&self, article_id: &str) -> bool {
        self.articles.contains(article_id)
    }

    pub fn get(&self, mod_id: &str) -> Option<&ArticleModification> {
        self.modifications.get(mod_id)
    }

    pub fn get_mut(&mut self, mod_id: &str) -> Option<&mut ArticleModification> {
        self.modifications.get_mut(mod_id)
    }

    pub(crate) fn allocate_id(&mut self) -> String {
        let id = format!("mod_{}", self.next_id.max(1));
        self.next_id = self.next_id.max(1) + 1;
        id
    }
}
