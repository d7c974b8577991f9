use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::modification::DebateWorkspace;
use crate::domain::rules::lifecycle::ProposalState;
use crate::domain::rules::requirements::{Requirement, Threshold};

/// Change a proposal makes to one article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposedArticle {
    pub id: String,
    pub new_text: String,
    #[serde(default)]
    pub justification: String,
}

impl ProposedArticle {
    pub fn new(id: impl Into<String>, new_text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            new_text: new_text.into(),
            justification: String::new(),
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = justification.into();
        self
    }
}

/// Support and opposition totals of a proposal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub support: i64,
    pub opposition: i64,
}

impl Tally {
    pub fn participation(&self) -> i64 {
        self.support + self.opposition
    }
}

/// A proposal to modify and/or add constitutional articles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub state: ProposalState,
    pub existing_articles: Vec<ProposedArticle>,
    #[serde(default)]
    pub new_articles: Vec<ProposedArticle>,
    /// Voters who backed the proposal while it was gathering
    #[serde(default)]
    pub supporters: BTreeSet<String>,
    /// article id -> voter id -> signed points (positive supports)
    #[serde(default)]
    pub article_votes: BTreeMap<String, BTreeMap<String, i64>>,
    #[serde(default)]
    pub article_groups: Vec<Vec<String>>,
    /// Requirement of every existing article, fixed at creation
    #[serde(default)]
    pub article_requirements: BTreeMap<String, Requirement>,
    pub required_voters: Threshold,
    pub min_participation: Threshold,
    pub governing_article: Option<String>,
    pub creation_date: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub last_state_change: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    #[serde(default)]
    pub debate: DebateWorkspace,
}

impl Proposal {
    pub fn new(
        id: impl Into<String>,
        owner_id: impl Into<String>,
        title: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            owner_id: owner_id.into(),
            title: title.into(),
            state: ProposalState::Draft,
            existing_articles: Vec::new(),
            new_articles: Vec::new(),
            supporters: BTreeSet::new(),
            article_votes: BTreeMap::new(),
            article_groups: Vec::new(),
            article_requirements: BTreeMap::new(),
            required_voters: Threshold::Unreachable,
            min_participation: Threshold::Unreachable,
            governing_article: None,
            creation_date: now,
            last_activity: now,
            last_state_change: now,
            deadline: None,
            debate: DebateWorkspace::default(),
        }
    }

    /// Existing ids first, then new ids, each in submission order
    pub fn article_ids(&self) -> Vec<String> {
        self.existing_articles
            .iter()
            .chain(self.new_articles.iter())
            .map(|a| a.id.clone())
            .collect()
    }

    pub fn has_article(&self, article_id: &str) -> bool {
        self.existing_articles
            .iter()
            .chain(self.new_articles.iter())
            .any(|a| a.id == article_id)
    }

    /// Owner and supporters may shape the text during debate
    pub fn can_modify(&self, voter_id: &str) -> bool {
        voter_id == self.owner_id || self.supporters.contains(voter_id)
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_activity = now;
    }

    pub fn tally(&self) -> Tally {
        self.article_votes
            .values()
            .flat_map(|votes| votes.values())
            .fold(Tally::default(), |mut tally, points| {
                if *points >= 0 {
                    tally.support += points;
                } else {
                    tally.opposition += -points;
                }
                tally
            })
    }

    /// Distinct voters that voted on the article
    pub fn turnout(&self, article_id: &str) -> u64 {
        self.article_votes
            .get(article_id)
            .map(|votes| votes.len() as u64)
            .unwrap_or(0)
    }

    pub fn voters(&self) -> BTreeSet<String> {
        self.article_votes
            .values()
            .flat_map(|votes| votes.keys().cloned())
            .collect()
    }

    pub fn deadline_passed(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now >= d).unwrap_or(false)
    }

    /// Voting window over, support and turnout both at their thresholds
    pub fn is_closable(&self, now: DateTime<Utc>) -> bool {
        if self.state != ProposalState::Voting || !self.deadline_passed(now) {
            return false;
        }
        let tally = self.tally();
        self.required_voters.is_met_by(tally.support)
            && self.min_participation.is_met_by(tally.participation())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voting_proposal(now: DateTime<Utc>) -> Proposal {
        let mut p = Proposal::new("prop_1", "owner", "title", now);
        p.state = ProposalState::Voting;
        p.required_voters = Threshold::Finite(10);
        p.min_participation = Threshold::Finite(15);
        p.deadline = Some(now);
        p
    }

    #[test]
    fn test_tally_splits_signs() {
        let now = Utc::now();
        let mut p = voting_proposal(now);
        p.article_votes
            .entry("1".to_string())
            .or_default()
            .insert("a".to_string(), 12);
        p.article_votes
            .entry("2".to_string())
            .or_default()
            .insert("b".to_string(), -4);
        assert_eq!(p.tally(), Tally { support: 12, opposition: 4 });
        assert_eq!(p.turnout("1"), 1);
        assert_eq!(p.voters().len(), 2);
        assert!(p.is_closable(now));
    }

    #[test]
    fn test_not_closable_before_deadline_or_below_participation() {
        let now = Utc::now();
        let mut p = voting_proposal(now + chrono::Duration::hours(1));
        p.deadline = Some(now + chrono::Duration::hours(1));
        p.article_votes
            .entry("1".to_string())
            .or_default()
            .insert("a".to_string(), 12);
        assert!(!p.is_closable(now));
        // after deadline, support 12 >= 10 but participation 12 < 15
        assert!(!p.is_closable(now + chrono::Duration::hours(2)));
    }
}
