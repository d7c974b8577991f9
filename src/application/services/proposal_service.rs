use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::constitution_service::ConstitutionService;
use super::debate_service::DebateService;
use crate::application::errors::{EngineError, EngineResult};
use crate::application::locks::KeyedLocks;
use crate::domain::entities::{
    is_immutable_article, ArticleModification, DebateWorkspace, ModificationResult, Proposal,
    ProposedArticle, VoteRecord,
};
use crate::domain::rules::{ProposalState, Threshold};
use crate::domain::traits::{Clock, VoterDirectory};

/// Proposal service - lifecycle, point commitment and the debate passthroughs
///
/// Every read-modify-write of a proposal happens inside that proposal's
/// exclusive section; the map lock is only held to copy a proposal out or
/// store it back, so distinct proposals never wait on each other.
pub struct ProposalService {
    proposals: RwLock<HashMap<String, Proposal>>,
    locks: KeyedLocks,
    seq: AtomicU64,
    constitution: Arc<ConstitutionService>,
    debate: DebateService,
    directory: Arc<dyn VoterDirectory>,
    clock: Arc<dyn Clock>,
    voting_duration: Duration,
    abandon_after: Duration,
}

impl ProposalService {
    pub fn new(
        locks: KeyedLocks,
        constitution: Arc<ConstitutionService>,
        debate: DebateService,
        directory: Arc<dyn VoterDirectory>,
        clock: Arc<dyn Clock>,
        voting_duration: Duration,
        abandon_after: Duration,
    ) -> Self {
        Self {
            proposals: RwLock::new(HashMap::new()),
            locks,
            seq: AtomicU64::new(0),
            constitution,
            debate,
            directory,
            clock,
            voting_duration,
            abandon_after,
        }
    }

    pub async fn get(&self, proposal_id: &str) -> Option<Proposal> {
        self.proposals.read().await.get(proposal_id).cloned()
    }

    /// All proposals ordered by creation
    pub async fn list(&self) -> Vec<Proposal> {
        let mut proposals: Vec<Proposal> = self.proposals.read().await.values().cloned().collect();
        proposals.sort_by(|a, b| a.creation_date.cmp(&b.creation_date).then_with(|| a.id.cmp(&b.id)));
        proposals
    }

    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    pub async fn restore(&self, proposals: Vec<Proposal>, seq: u64) {
        let highest = proposals
            .iter()
            .filter_map(|p| p.id.strip_prefix("prop_").and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        self.seq.store(seq.max(highest), Ordering::SeqCst);
        *self.proposals.write().await = proposals.into_iter().map(|p| (p.id.clone(), p)).collect();
    }

    pub async fn create_proposal(
        &self,
        owner_id: &str,
        title: &str,
        existing: Vec<ProposedArticle>,
        new: Vec<ProposedArticle>,
    ) -> EngineResult<String> {
        let owner_id = owner_id.trim();
        let title = title.trim();
        if owner_id.is_empty() || title.is_empty() {
            return Err(EngineError::validation("a proposal needs an owner and a title"));
        }
        if existing.is_empty() {
            return Err(EngineError::validation("a proposal must target at least one existing article"));
        }
        if !self.directory.is_known(owner_id).await {
            return Err(EngineError::validation(format!("unknown voter {}", owner_id)));
        }

        let mut ids: Vec<String> = Vec::with_capacity(existing.len() + new.len());
        for article in existing.iter().chain(new.iter()) {
            if is_immutable_article(&article.id) {
                return Err(EngineError::immutable("article 0 cannot be the target of a proposal"));
            }
            if article.id.trim().is_empty() || article.new_text.trim().is_empty() {
                return Err(EngineError::validation("every article needs an id and a text"));
            }
            if ids.contains(&article.id) {
                return Err(EngineError::validation(format!("article {} listed twice", article.id)));
            }
            ids.push(article.id.clone());
        }
        for article in &existing {
            if !self.constitution.contains(&article.id).await {
                return Err(EngineError::validation(format!("article {} does not exist", article.id)));
            }
        }
        for article in &new {
            if self.constitution.contains(&article.id).await {
                return Err(EngineError::validation(format!("article {} already exists", article.id)));
            }
        }

        let requirements = self.constitution.calculate_proposal_requirements(&ids).await;
        let proposal_id = format!("prop_{}", self.seq.fetch_add(1, Ordering::SeqCst) + 1);

        let mut proposal = Proposal::new(&proposal_id, owner_id, title, self.clock.now());
        proposal.existing_articles = existing;
        proposal.new_articles = new;
        proposal.article_requirements = requirements.per_article;
        proposal.required_voters = requirements.requirement.required_voters;
        proposal.min_participation = requirements.requirement.min_participation;
        proposal.governing_article = requirements.governing_article;

        tracing::info!(
            "Proposal {} created by {} ({} existing, {} new articles, governed by {:?})",
            proposal_id,
            owner_id,
            requirements.existing_articles,
            requirements.new_articles,
            proposal.governing_article
        );
        self.proposals.write().await.insert(proposal_id.clone(), proposal);
        Ok(proposal_id)
    }

    /// Moves a proposal along the transition table. Illegal moves leave the
    /// proposal untouched.
    pub async fn transition(&self, proposal_id: &str, target: ProposalState) -> EngineResult<()> {
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        let now = self.clock.now();

        if !proposal.state.can_transition_to(target) {
            return Err(EngineError::state(format!(
                "{} cannot go from {} to {}",
                proposal_id, proposal.state, target
            )));
        }

        match target {
            ProposalState::Approved | ProposalState::Rejected => {
                let approved = target == ProposalState::Approved;
                if approved && !proposal.is_closable(now) {
                    return Err(EngineError::state(format!("{} has not met its thresholds", proposal_id)));
                }
                if !proposal.deadline_passed(now) {
                    return Err(EngineError::state(format!("{} is still voting", proposal_id)));
                }
                self.settle(&mut proposal, approved, now).await;
            }
            ProposalState::Debate => {
                proposal.debate = DebateWorkspace::new(proposal.article_ids());
                self.enter(&mut proposal, target, now);
            }
            ProposalState::Voting => {
                proposal.deadline = Some(now + self.voting_duration);
                self.enter(&mut proposal, target, now);
            }
            ProposalState::Abandoned => {
                release(&mut proposal);
                self.enter(&mut proposal, target, now);
            }
            _ => self.enter(&mut proposal, target, now),
        }

        self.store(proposal).await;
        Ok(())
    }

    /// Approves the proposal if voting is over and both thresholds are met.
    /// Returns whether it closed.
    pub async fn close_if_eligible(&self, proposal_id: &str) -> EngineResult<bool> {
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        let now = self.clock.now();
        if !proposal.is_closable(now) {
            tracing::debug!("Proposal {} not eligible to close", proposal_id);
            return Ok(false);
        }
        self.settle(&mut proposal, true, now).await;
        self.store(proposal).await;
        Ok(true)
    }

    /// Ends voting after the deadline: approved when eligible, otherwise
    /// rejected. Returns the final state.
    pub async fn finalize(&self, proposal_id: &str) -> EngineResult<ProposalState> {
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        let now = self.clock.now();
        if proposal.state != ProposalState::Voting {
            return Err(EngineError::state(format!("{} is not voting", proposal_id)));
        }
        if !proposal.deadline_passed(now) {
            return Err(EngineError::state(format!("{} is still voting", proposal_id)));
        }
        let approved = proposal.is_closable(now);
        self.settle(&mut proposal, approved, now).await;
        let state = proposal.state;
        self.store(proposal).await;
        Ok(state)
    }

    /// Commits `points` of a voter to a group of the proposal's articles,
    /// split evenly with the remainder going to the first articles.
    pub async fn commit_points(
        &self,
        proposal_id: &str,
        voter_id: &str,
        group: &[String],
        points: i64,
        support: bool,
    ) -> EngineResult<()> {
        if points <= 0 {
            return Err(EngineError::validation("points must be positive"));
        }
        let voting_power = self
            .directory
            .voting_power(voter_id)
            .await
            .ok_or_else(|| EngineError::validation(format!("unknown voter {}", voter_id)))?;

        let mut articles: Vec<String> = Vec::with_capacity(group.len());
        for id in group {
            if !articles.contains(id) {
                articles.push(id.clone());
            }
        }
        if articles.is_empty() {
            return Err(EngineError::validation("article group cannot be empty"));
        }
        if points < articles.len() as i64 {
            return Err(EngineError::validation(format!(
                "{} points cannot cover {} articles",
                points,
                articles.len()
            )));
        }

        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        let now = self.clock.now();

        if proposal.state != ProposalState::Voting {
            return Err(EngineError::state(format!("{} is not in voting", proposal_id)));
        }
        if proposal.deadline_passed(now) {
            return Err(EngineError::state(format!("voting on {} has ended", proposal_id)));
        }
        if let Some(missing) = articles.iter().find(|id| !proposal.has_article(id)) {
            return Err(EngineError::validation(format!(
                "article {} is not part of {}",
                missing, proposal_id
            )));
        }

        match group_requirement(&proposal, &articles) {
            Threshold::Unreachable => {
                return Err(EngineError::immutable(format!(
                    "article group {:?} has an unreachable requirement",
                    articles
                )));
            }
            Threshold::Finite(required) if (points as u64) < required => {
                return Err(EngineError::validation(format!(
                    "{} points are below the group requirement of {}",
                    points, required
                )));
            }
            Threshold::Finite(_) => {}
        }

        let committed_elsewhere: i64 = proposal
            .article_votes
            .iter()
            .filter(|(article, _)| !articles.contains(article))
            .filter_map(|(_, votes)| votes.get(voter_id))
            .map(|p| p.abs())
            .sum();
        if committed_elsewhere + points > voting_power {
            return Err(EngineError::validation(format!(
                "{} has {} voting power, {} already committed",
                voter_id, voting_power, committed_elsewhere
            )));
        }

        let count = articles.len() as i64;
        let (base, remainder) = (points / count, points % count);
        for (i, article) in articles.iter().enumerate() {
            let share = base + if (i as i64) < remainder { 1 } else { 0 };
            let signed = if support { share } else { -share };
            proposal
                .article_votes
                .entry(article.clone())
                .or_default()
                .insert(voter_id.to_string(), signed);
        }
        if !proposal.article_groups.contains(&articles) {
            proposal.article_groups.push(articles);
        }
        proposal.touch(now);

        tracing::info!(
            "{} committed {} points {} {}",
            voter_id,
            points,
            if support { "for" } else { "against" },
            proposal_id
        );
        self.store(proposal).await;
        Ok(())
    }

    /// Backs a gathering proposal. Returns whether the voter was newly
    /// added; the owner counts as a supporter already.
    pub async fn support(&self, proposal_id: &str, voter_id: &str) -> EngineResult<bool> {
        if !self.directory.is_known(voter_id).await {
            return Err(EngineError::validation(format!("unknown voter {}", voter_id)));
        }
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        if proposal.state != ProposalState::Gathering {
            return Err(EngineError::state(format!("{} is not gathering support", proposal_id)));
        }
        if proposal.can_modify(voter_id) {
            return Ok(false);
        }
        proposal.supporters.insert(voter_id.to_string());
        proposal.touch(self.clock.now());
        tracing::info!(
            "{} supports proposal {} ({} supporters)",
            voter_id,
            proposal_id,
            proposal.supporters.len()
        );
        self.store(proposal).await;
        Ok(true)
    }

    /// Only the owner and the supporters gathered before the debate may
    /// propose modifications
    pub async fn add_modification(
        &self,
        proposal_id: &str,
        article_id: &str,
        author_id: &str,
        changes: &str,
    ) -> EngineResult<String> {
        if !self.directory.is_known(author_id).await {
            return Err(EngineError::validation(format!("unknown voter {}", author_id)));
        }
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        if proposal.state != ProposalState::Debate {
            return Err(EngineError::state(format!("{} is not in debate", proposal_id)));
        }
        if !proposal.can_modify(author_id) {
            return Err(EngineError::validation(format!(
                "{} is neither the owner nor a supporter of {}",
                author_id, proposal_id
            )));
        }
        let mod_id = self
            .debate
            .propose_modification(&mut proposal.debate, article_id, author_id, changes)?;
        proposal.touch(self.clock.now());
        self.store(proposal).await;
        Ok(mod_id)
    }

    pub async fn start_modification_vote(
        &self,
        proposal_id: &str,
        mod_id: &str,
        duration: Option<Duration>,
    ) -> EngineResult<DateTime<Utc>> {
        self.in_debate(proposal_id, |debate, workspace| debate.start_vote(workspace, mod_id, duration))
            .await
    }

    pub async fn vote_modification(
        &self,
        proposal_id: &str,
        mod_id: &str,
        voter_id: &str,
        points: i64,
    ) -> EngineResult<()> {
        if !self.directory.is_known(voter_id).await {
            return Err(EngineError::validation(format!("unknown voter {}", voter_id)));
        }
        self.in_debate(proposal_id, |debate, workspace| debate.vote(workspace, mod_id, voter_id, points))
            .await
    }

    /// Current result of a modification, and whether reading it moved the
    /// modification to review
    pub async fn modification_result(
        &self,
        proposal_id: &str,
        mod_id: &str,
    ) -> EngineResult<(ModificationResult, bool)> {
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        let before = proposal.debate.get(mod_id).map(|m| m.state);
        let result = self.debate.result(&mut proposal.debate, mod_id)?;
        let moved = proposal.debate.get(mod_id).map(|m| m.state) != before;
        if moved {
            self.store(proposal).await;
        }
        Ok((result, moved))
    }

    pub async fn add_comment(
        &self,
        proposal_id: &str,
        mod_id: &str,
        author_id: &str,
        content: &str,
    ) -> EngineResult<()> {
        self.in_debate(proposal_id, |debate, workspace| {
            debate.add_comment(workspace, mod_id, author_id, content)
        })
        .await
    }

    pub async fn article_modifications(
        &self,
        proposal_id: &str,
        article_id: &str,
    ) -> EngineResult<Vec<ArticleModification>> {
        let proposal = self.load(proposal_id).await?;
        Ok(self.debate.article_modifications(&proposal.debate, article_id))
    }

    /// Abandons every unsettled proposal idle for longer than the threshold.
    /// Returns the ids that were abandoned.
    pub async fn reap_abandoned(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut candidates: Vec<String> = self
            .proposals
            .read()
            .await
            .values()
            .filter(|p| self.is_idle(p, now))
            .map(|p| p.id.clone())
            .collect();
        candidates.sort();

        let mut abandoned = Vec::new();
        for proposal_id in candidates {
            let _section = match self.locks.acquire(&proposal_id).await {
                Ok(section) => section,
                Err(e) => {
                    tracing::warn!("Skipping {} during cleanup: {}", proposal_id, e);
                    continue;
                }
            };
            let Some(mut proposal) = self.get(&proposal_id).await else {
                continue;
            };
            // activity may have happened while waiting for the section
            if !self.is_idle(&proposal, now) {
                continue;
            }

            proposal.state = ProposalState::Cleanup;
            let released = release(&mut proposal);
            tracing::info!("Proposal {} cleanup released {} committed points", proposal_id, released);
            if proposal.state.can_transition_to(ProposalState::Abandoned) {
                proposal.state = ProposalState::Abandoned;
                proposal.last_state_change = now;
            }
            tracing::info!("Proposal {} abandoned after inactivity", proposal_id);
            self.store(proposal).await;
            abandoned.push(proposal_id);
        }
        abandoned
    }

    fn is_idle(&self, proposal: &Proposal, now: DateTime<Utc>) -> bool {
        !proposal.state.is_settled() && now - proposal.last_activity > self.abandon_after
    }

    async fn in_debate<T>(
        &self,
        proposal_id: &str,
        f: impl FnOnce(&DebateService, &mut DebateWorkspace) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let _section = self.locks.acquire(proposal_id).await?;
        let mut proposal = self.load(proposal_id).await?;
        if proposal.state != ProposalState::Debate {
            return Err(EngineError::state(format!("{} is not in debate", proposal_id)));
        }
        let out = f(&self.debate, &mut proposal.debate)?;
        proposal.touch(self.clock.now());
        self.store(proposal).await;
        Ok(out)
    }

    fn enter(&self, proposal: &mut Proposal, target: ProposalState, now: DateTime<Utc>) {
        tracing::info!("Proposal {}: {} -> {}", proposal.id, proposal.state, target);
        proposal.state = target;
        proposal.last_state_change = now;
        proposal.touch(now);
    }

    /// Records the outcome into the constitution and closes the proposal
    async fn settle(&self, proposal: &mut Proposal, approved: bool, now: DateTime<Utc>) {
        for article in &proposal.existing_articles {
            let record = vote_record(proposal, &article.id, approved, now);
            if let Err(e) = self.constitution.record_vote(&article.id, record).await {
                tracing::warn!("Could not record vote on article {}: {}", article.id, e);
            }
            if approved {
                if let Err(e) = self.constitution.update_article_text(&article.id, &article.new_text).await {
                    tracing::warn!("Could not update article {}: {}", article.id, e);
                }
            }
        }
        if approved {
            for article in &proposal.new_articles {
                let turnout = proposal.turnout(&article.id);
                if let Err(e) = self.constitution.add_article(&article.id, &article.new_text, 1.0, turnout).await {
                    tracing::warn!("Could not add article {}: {}", article.id, e);
                }
            }
        }

        let target = if approved { ProposalState::Approved } else { ProposalState::Rejected };
        let tally = proposal.tally();
        tracing::info!(
            "Proposal {} closed as {} (support {}, opposition {})",
            proposal.id,
            target,
            tally.support,
            tally.opposition
        );
        self.enter(proposal, target, now);
    }

    async fn load(&self, proposal_id: &str) -> EngineResult<Proposal> {
        self.get(proposal_id)
            .await
            .ok_or_else(|| EngineError::validation(format!("unknown proposal {}", proposal_id)))
    }

    async fn store(&self, proposal: Proposal) {
        self.proposals.write().await.insert(proposal.id.clone(), proposal);
    }
}

/// Most demanding requirement among the group's existing articles; new
/// articles carry none
fn group_requirement(proposal: &Proposal, articles: &[String]) -> Threshold {
    articles
        .iter()
        .filter_map(|id| proposal.article_requirements.get(id))
        .map(|r| r.required_voters)
        .max()
        .unwrap_or(Threshold::Finite(0))
}

/// Drops every committed tally. Returns the points released.
fn release(proposal: &mut Proposal) -> i64 {
    let released = proposal.tally().participation();
    proposal.article_votes.clear();
    proposal.article_groups.clear();
    released
}

fn vote_record(proposal: &Proposal, article_id: &str, passed: bool, now: DateTime<Utc>) -> VoteRecord {
    let (support, opposition) = proposal
        .article_votes
        .get(article_id)
        .map(|votes| {
            votes.values().fold((0, 0), |(s, o), p| if *p >= 0 { (s + p, o) } else { (s, o - p) })
        })
        .unwrap_or((0, 0));
    VoteRecord {
        date: now,
        voters_participated: proposal.turnout(article_id),
        support,
        opposition,
        passed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::DelegationService;
    use crate::domain::traits::ManualClock;
    use std::time::Duration as StdDuration;

    struct Fixture {
        proposals: ProposalService,
        constitution: Arc<ConstitutionService>,
        clock: Arc<ManualClock>,
    }

    async fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let constitution = Arc::new(ConstitutionService::new(Duration::days(7), clock.clone()));
        constitution.add_article("1", "Free speech", 1.0, 100).await.unwrap();
        constitution.add_article("2", "Assembly", 1.0, 100).await.unwrap();

        let ledger = Arc::new(DelegationService::new(KeyedLocks::new("voter", StdDuration::from_millis(200), 2)));
        for id in ["alice", "bob", "carol"] {
            ledger.add_voter(id).await.unwrap();
        }
        let proposals = ProposalService::new(
            KeyedLocks::new("proposal", StdDuration::from_millis(200), 2),
            constitution.clone(),
            DebateService::new(100, Duration::hours(24), clock.clone()),
            ledger,
            clock.clone(),
            Duration::hours(168),
            Duration::days(30),
        );
        Fixture {
            proposals,
            constitution,
            clock,
        }
    }

    fn article(id: &str, text: &str) -> ProposedArticle {
        ProposedArticle::new(id, text)
    }

    fn ids(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    async fn voting(f: &Fixture) -> String {
        let id = f
            .proposals
            .create_proposal(
                "alice",
                "Reform",
                vec![article("1", "Free speech, revised"), article("2", "Assembly, revised")],
                vec![article("9", "Brand new")],
            )
            .await
            .unwrap();
        for state in [ProposalState::Gathering, ProposalState::Debate, ProposalState::Voting] {
            f.proposals.transition(&id, state).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn test_only_owner_and_supporters_modify() {
        let f = fixture().await;
        let p = &f.proposals;
        let id = p.create_proposal("alice", "Reform", vec![article("1", "x")], vec![]).await.unwrap();

        assert!(matches!(p.support(&id, "bob").await, Err(EngineError::State(_))));
        p.transition(&id, ProposalState::Gathering).await.unwrap();
        assert!(p.support(&id, "bob").await.unwrap());
        assert!(!p.support(&id, "bob").await.unwrap());
        assert!(!p.support(&id, "alice").await.unwrap());
        assert!(p.support(&id, "zed").await.is_err());

        p.transition(&id, ProposalState::Debate).await.unwrap();
        assert!(matches!(p.support(&id, "carol").await, Err(EngineError::State(_))));

        assert_eq!(p.add_modification(&id, "1", "bob", "shorter").await.unwrap(), "mod_1");
        assert_eq!(p.add_modification(&id, "1", "alice", "clearer").await.unwrap(), "mod_2");
        assert!(matches!(
            p.add_modification(&id, "1", "carol", "longer").await,
            Err(EngineError::Validation(_))
        ));

        let proposal = p.get(&id).await.unwrap();
        assert_eq!(proposal.supporters.len(), 1);
        assert!(proposal.supporters.contains("bob"));
        assert_eq!(proposal.debate.modifications.len(), 2);
    }

    #[tokio::test]
    async fn test_create_validates_input() {
        let f = fixture().await;
        let p = &f.proposals;
        assert!(p.create_proposal("", "t", vec![article("1", "x")], vec![]).await.is_err());
        assert!(p.create_proposal("alice", "t", vec![], vec![article("9", "x")]).await.is_err());
        assert!(p.create_proposal("alice", "t", vec![article("1", "x")], vec![article("9", " ")]).await.is_err());
        assert!(p.create_proposal("zed", "t", vec![article("1", "x")], vec![]).await.is_err());
        assert!(matches!(
            p.create_proposal("alice", "t", vec![article("0", "x")], vec![]).await,
            Err(EngineError::Immutability(_))
        ));

        let id = p.create_proposal("alice", "t", vec![article("1", "x")], vec![]).await.unwrap();
        assert_eq!(id, "prop_1");
        let proposal = p.get(&id).await.unwrap();
        assert_eq!(proposal.state, ProposalState::Draft);
        assert_eq!(proposal.required_voters, Threshold::Finite(4));
        assert_eq!(proposal.governing_article.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_commit_splits_points_and_overwrites() {
        let f = fixture().await;
        let id = voting(&f).await;

        f.proposals
            .commit_points(&id, "bob", &ids(&["1", "2", "9"]), 11, true)
            .await
            .unwrap();
        let p = f.proposals.get(&id).await.unwrap();
        assert_eq!(p.article_votes["1"]["bob"], 4);
        assert_eq!(p.article_votes["2"]["bob"], 4);
        assert_eq!(p.article_votes["9"]["bob"], 3);

        f.proposals.commit_points(&id, "bob", &ids(&["1"]), 5, false).await.unwrap();
        let p = f.proposals.get(&id).await.unwrap();
        assert_eq!(p.article_votes["1"]["bob"], -5);
        assert_eq!(p.tally().support, 7);
        assert_eq!(p.tally().opposition, 5);
    }

    #[tokio::test]
    async fn test_commit_rejections() {
        let f = fixture().await;
        let id = voting(&f).await;
        let p = &f.proposals;
        // below the requirement of 4
        assert!(p.commit_points(&id, "bob", &ids(&["1"]), 3, true).await.is_err());
        // beyond voting power
        assert!(p.commit_points(&id, "bob", &ids(&["1"]), 1001, true).await.is_err());
        assert!(p.commit_points(&id, "bob", &ids(&["7"]), 10, true).await.is_err());
        assert!(p.commit_points(&id, "bob", &[], 10, true).await.is_err());
        assert!(p.commit_points(&id, "nobody", &ids(&["1"]), 10, true).await.is_err());
    }

    #[tokio::test]
    async fn test_illegal_transition_leaves_state() {
        let f = fixture().await;
        let id = f
            .proposals
            .create_proposal("alice", "t", vec![article("1", "x")], vec![])
            .await
            .unwrap();
        let err = f.proposals.transition(&id, ProposalState::Voting).await.unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
        assert_eq!(f.proposals.get(&id).await.unwrap().state, ProposalState::Draft);
    }

    #[tokio::test]
    async fn test_finalize_records_turnout_and_applies_text() {
        let f = fixture().await;
        let id = voting(&f).await;
        // thresholds from 100 previous voters: 4 support, 95 participation
        for voter in ["alice", "bob"] {
            f.proposals
                .commit_points(&id, voter, &ids(&["1", "2", "9"]), 60, true)
                .await
                .unwrap();
        }
        assert!(f.proposals.finalize(&id).await.is_err());

        f.clock.advance(Duration::hours(169));
        assert_eq!(f.proposals.finalize(&id).await.unwrap(), ProposalState::Approved);

        let article = f.constitution.article("1").await.unwrap();
        assert_eq!(article.text, "Free speech, revised");
        assert_eq!(article.last_turnout(), 2);
        assert_eq!(f.constitution.article("9").await.unwrap().last_turnout(), 2);
    }

    #[tokio::test]
    async fn test_reaper_abandons_idle_proposals() {
        let f = fixture().await;
        let idle = voting(&f).await;
        f.proposals.commit_points(&idle, "bob", &ids(&["1"]), 10, true).await.unwrap();

        f.clock.advance(Duration::days(29));
        let active = f
            .proposals
            .create_proposal("carol", "t", vec![article("2", "x")], vec![])
            .await
            .unwrap();
        f.clock.advance(Duration::days(2));

        assert_eq!(f.proposals.reap_abandoned().await, vec![idle.clone()]);
        let p = f.proposals.get(&idle).await.unwrap();
        assert_eq!(p.state, ProposalState::Abandoned);
        assert!(p.article_votes.is_empty());
        assert_eq!(f.proposals.get(&active).await.unwrap().state, ProposalState::Draft);
    }
}
