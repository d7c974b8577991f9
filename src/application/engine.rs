//! Engine context object
//!
//! Built once at process start, loaded from the snapshot store, shared by
//! `Arc` with every front end and flushed at shutdown.

use chrono::Duration;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::application::errors::{EngineResult, StorageError};
use crate::application::locks::KeyedLocks;
use crate::application::services::{
    ConstitutionService, DebateService, DelegationService, ProposalRequirements, ProposalService,
};
use crate::domain::entities::snapshot::SNAPSHOT_VERSION;
use crate::domain::entities::{
    Article, ArticleModification, ModificationResult, Proposal, ProposedArticle, Snapshot, VoteRecord,
    VoterSnapshot,
};
use crate::domain::rules::{ProposalState, Requirement, ResolvedCycle};
use crate::domain::traits::{Clock, SnapshotStore};
use crate::infrastructure::config::Config;

pub struct Engine {
    config: Config,
    store: Arc<dyn SnapshotStore>,
    state: EngineState,
    saves: SaveQueue,
}

/// Shared handles to the services, cheap to clone into background tasks
#[derive(Clone)]
struct EngineState {
    clock: Arc<dyn Clock>,
    ledger: Arc<DelegationService>,
    constitution: Arc<ConstitutionService>,
    proposals: Arc<ProposalService>,
}

impl EngineState {
    async fn snapshot(&self) -> Snapshot {
        Snapshot {
            version: SNAPSHOT_VERSION,
            saved_at: self.clock.now(),
            voters: self.ledger.export().await,
            articles: self.constitution.articles().await,
            proposals: self.proposals.list().await,
            proposal_seq: self.proposals.sequence(),
        }
    }
}

/// Serialized background writes. Snapshots are taken inside the write gate,
/// and a save whose generation was already covered by a later one is skipped.
struct SaveQueue {
    gate: Arc<AsyncMutex<u64>>,
    generation: AtomicU64,
    pending: Mutex<Vec<JoinHandle<()>>>,
    last_error: Arc<Mutex<Option<String>>>,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn SnapshotStore>, clock: Arc<dyn Clock>) -> Self {
        let timeout = config.concurrency.lock_timeout();
        let retries = config.concurrency.lock_retries;

        let ledger = Arc::new(DelegationService::new(KeyedLocks::new("voter", timeout, retries)));
        let constitution = Arc::new(ConstitutionService::new(config.requirements.cache_ttl(), clock.clone()));
        let debate = DebateService::new(
            config.debate.required_points,
            config.debate.vote_duration(),
            clock.clone(),
        );
        let proposals = Arc::new(ProposalService::new(
            KeyedLocks::new("proposal", timeout, retries),
            constitution.clone(),
            debate,
            ledger.clone(),
            clock.clone(),
            config.proposals.voting_duration(),
            config.proposals.abandon_after(),
        ));

        Self {
            config,
            store,
            state: EngineState {
                clock,
                ledger,
                constitution,
                proposals,
            },
            saves: SaveQueue {
                gate: Arc::new(AsyncMutex::new(0)),
                generation: AtomicU64::new(0),
                pending: Mutex::new(Vec::new()),
                last_error: Arc::new(Mutex::new(None)),
            },
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Restores the last snapshot, then adds configured articles that are
    /// missing
    pub async fn load(&self) -> EngineResult<()> {
        if let Some(snapshot) = self.store.load().await? {
            if snapshot.version != SNAPSHOT_VERSION {
                tracing::warn!(
                    "Snapshot version {} differs from {}, loading anyway",
                    snapshot.version,
                    SNAPSHOT_VERSION
                );
            }
            tracing::info!(
                "Loaded snapshot from {}: {} voters, {} articles, {} proposals",
                snapshot.saved_at,
                snapshot.voters.len(),
                snapshot.articles.len(),
                snapshot.proposals.len()
            );
            self.state.ledger.restore(snapshot.voters).await;
            self.state.constitution.restore(snapshot.articles).await;
            self.state.proposals.restore(snapshot.proposals, snapshot.proposal_seq).await;
        } else {
            tracing::info!("No snapshot found, starting empty");
        }

        let seeded = self.state.constitution.seed(&self.config.constitution.articles).await?;
        if seeded > 0 {
            tracing::info!("Seeded {} articles from configuration", seeded);
            self.persist();
        }
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.state.snapshot().await
    }

    /// Waits for queued saves, then writes the current state and reports the
    /// outcome
    pub async fn flush(&self) -> EngineResult<()> {
        let pending: Vec<JoinHandle<()>> = {
            let mut pending = self.saves.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.drain(..).collect()
        };
        for handle in pending {
            if let Err(e) = handle.await {
                tracing::error!("Save task failed: {}", e);
            }
        }

        let generation = self.saves.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut written = self.saves.gate.lock().await;
        let snapshot = self.state.snapshot().await;
        if let Err(e) = self.store.save(&snapshot).await {
            tracing::error!("Failed to flush snapshot: {}", e);
            *self.saves.last_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(e.to_string());
            return Err(e.into());
        }
        *written = generation;
        *self.saves.last_error.lock().unwrap_or_else(|e| e.into_inner()) = None;
        tracing::debug!("Snapshot flushed");
        Ok(())
    }

    /// Message of the most recent failed save or flush, cleared by the
    /// next successful one
    pub fn last_save_error(&self) -> Option<String> {
        self.saves.last_error.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Queues a background save of the current state
    fn persist(&self) {
        let generation = self.saves.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = tokio::spawn(write_snapshot(
            self.state.clone(),
            self.store.clone(),
            self.saves.gate.clone(),
            self.saves.last_error.clone(),
            generation,
        ));

        let mut pending = self.saves.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    // --- delegation ---

    pub async fn add_voter(&self, voter_id: &str) -> EngineResult<bool> {
        let created = self.state.ledger.add_voter(voter_id).await?;
        if created {
            self.persist();
        }
        Ok(created)
    }

    pub async fn delegate(
        &self,
        from: &str,
        to: &str,
        points: i64,
        subdelegable: bool,
    ) -> EngineResult<Vec<ResolvedCycle>> {
        let resolved = self.state.ledger.delegate(from, to, points, subdelegable).await?;
        self.persist();
        Ok(resolved)
    }

    pub async fn subdelegate(&self, from: &str, to: &str, points: i64) -> EngineResult<Vec<ResolvedCycle>> {
        let resolved = self.state.ledger.subdelegate(from, to, points).await?;
        self.persist();
        Ok(resolved)
    }

    pub async fn revoke(&self, from: &str, to: &str) -> EngineResult<i64> {
        let recovered = self.state.ledger.revoke(from, to).await?;
        self.persist();
        Ok(recovered)
    }

    pub async fn get_voter_snapshot(&self, voter_id: &str) -> Option<VoterSnapshot> {
        self.state.ledger.voter_snapshot(voter_id).await
    }

    pub async fn detect_cycles(&self, start: &str) -> Vec<Vec<String>> {
        self.state.ledger.detect_cycles(start).await
    }

    pub async fn total_delegated_under(&self, voter_id: &str) -> i64 {
        self.state.ledger.total_delegated_under(voter_id).await
    }

    pub async fn delegation_chain(&self, voter_id: &str) -> Vec<(String, i64)> {
        self.state.ledger.delegation_chain(voter_id).await
    }

    pub async fn subdelegable_by_source(&self, voter_id: &str) -> BTreeMap<String, i64> {
        self.state.ledger.subdelegable_by_source(voter_id).await
    }

    pub async fn ledger_is_consistent(&self) -> bool {
        self.state.ledger.is_consistent().await
    }

    pub async fn voter_count(&self) -> usize {
        self.state.ledger.voter_count().await
    }

    // --- constitution ---

    pub async fn get_article_requirements(&self, article_id: &str) -> EngineResult<Requirement> {
        self.state.constitution.get_article_requirements(article_id).await
    }

    pub async fn calculate_proposal_requirements(&self, article_ids: &[String]) -> ProposalRequirements {
        self.state.constitution.calculate_proposal_requirements(article_ids).await
    }

    pub async fn add_article(&self, article_id: &str, text: &str, weight: f64, baseline_voters: u64) -> EngineResult<()> {
        self.state.constitution.add_article(article_id, text, weight, baseline_voters).await?;
        self.persist();
        Ok(())
    }

    pub async fn record_vote(&self, article_id: &str, record: VoteRecord) -> EngineResult<()> {
        self.state.constitution.record_vote(article_id, record).await?;
        self.persist();
        Ok(())
    }

    pub async fn update_article_text(&self, article_id: &str, text: &str) -> EngineResult<()> {
        self.state.constitution.update_article_text(article_id, text).await?;
        self.persist();
        Ok(())
    }

    pub async fn article(&self, article_id: &str) -> Option<Article> {
        self.state.constitution.article(article_id).await
    }

    pub async fn articles(&self) -> Vec<Article> {
        self.state.constitution.articles().await
    }

    // --- proposals ---

    pub async fn create_proposal(
        &self,
        owner_id: &str,
        title: &str,
        existing: Vec<ProposedArticle>,
        new: Vec<ProposedArticle>,
    ) -> EngineResult<String> {
        let id = self.state.proposals.create_proposal(owner_id, title, existing, new).await?;
        self.persist();
        Ok(id)
    }

    pub async fn transition(&self, proposal_id: &str, target: ProposalState) -> EngineResult<()> {
        self.state.proposals.transition(proposal_id, target).await?;
        self.persist();
        Ok(())
    }

    pub async fn support(&self, proposal_id: &str, voter_id: &str) -> EngineResult<bool> {
        let added = self.state.proposals.support(proposal_id, voter_id).await?;
        if added {
            self.persist();
        }
        Ok(added)
    }

    pub async fn close_if_eligible(&self, proposal_id: &str) -> EngineResult<bool> {
        let closed = self.state.proposals.close_if_eligible(proposal_id).await?;
        if closed {
            self.persist();
        }
        Ok(closed)
    }

    pub async fn finalize(&self, proposal_id: &str) -> EngineResult<ProposalState> {
        let state = self.state.proposals.finalize(proposal_id).await?;
        self.persist();
        Ok(state)
    }

    pub async fn commit_points(
        &self,
        proposal_id: &str,
        voter_id: &str,
        group: &[String],
        points: i64,
        support: bool,
    ) -> EngineResult<()> {
        self.state.proposals
            .commit_points(proposal_id, voter_id, group, points, support)
            .await?;
        self.persist();
        Ok(())
    }

    pub async fn proposal(&self, proposal_id: &str) -> Option<Proposal> {
        self.state.proposals.get(proposal_id).await
    }

    pub async fn proposals(&self) -> Vec<Proposal> {
        self.state.proposals.list().await
    }

    // --- debate ---

    pub async fn add_modification(
        &self,
        proposal_id: &str,
        article_id: &str,
        author_id: &str,
        changes: &str,
    ) -> EngineResult<String> {
        let mod_id = self
            .state
            .proposals
            .add_modification(proposal_id, article_id, author_id, changes)
            .await?;
        self.persist();
        Ok(mod_id)
    }

    pub async fn start_modification_vote(
        &self,
        proposal_id: &str,
        mod_id: &str,
        duration: Option<Duration>,
    ) -> EngineResult<chrono::DateTime<chrono::Utc>> {
        let deadline = self
            .state
            .proposals
            .start_modification_vote(proposal_id, mod_id, duration)
            .await?;
        self.persist();
        Ok(deadline)
    }

    pub async fn vote_modification(&self, proposal_id: &str, mod_id: &str, voter_id: &str, points: i64) -> EngineResult<()> {
        self.state.proposals
            .vote_modification(proposal_id, mod_id, voter_id, points)
            .await?;
        self.persist();
        Ok(())
    }

    pub async fn modification_result(&self, proposal_id: &str, mod_id: &str) -> EngineResult<ModificationResult> {
        let (result, moved) = self.state.proposals.modification_result(proposal_id, mod_id).await?;
        if moved {
            self.persist();
        }
        Ok(result)
    }

    pub async fn add_comment(&self, proposal_id: &str, mod_id: &str, author_id: &str, content: &str) -> EngineResult<()> {
        self.state.proposals
            .add_comment(proposal_id, mod_id, author_id, content)
            .await?;
        self.persist();
        Ok(())
    }

    pub async fn article_modifications(
        &self,
        proposal_id: &str,
        article_id: &str,
    ) -> EngineResult<Vec<ArticleModification>> {
        self.state.proposals.article_modifications(proposal_id, article_id).await
    }

    // --- maintenance ---

    pub async fn reap_abandoned(&self) -> Vec<String> {
        let abandoned = self.state.proposals.reap_abandoned().await;
        if !abandoned.is_empty() {
            self.persist();
        }
        abandoned
    }

    /// Runs the abandonment sweep on the configured interval until the
    /// returned handle is aborted
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        let period = self.config.proposals.reaper_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let abandoned = engine.reap_abandoned().await;
                tracing::debug!("Reaper pass abandoned {} proposals", abandoned.len());
            }
        })
    }
}

async fn write_snapshot(
    state: EngineState,
    store: Arc<dyn SnapshotStore>,
    gate: Arc<AsyncMutex<u64>>,
    last_error: Arc<Mutex<Option<String>>>,
    generation: u64,
) {
    let mut written = gate.lock().await;
    if *written >= generation {
        return;
    }
    let snapshot = state.snapshot().await;
    let outcome: Result<(), StorageError> = store.save(&snapshot).await;
    let message = match outcome {
        Ok(()) => {
            *written = generation;
            None
        }
        Err(e) => {
            tracing::error!("Failed to save snapshot: {}", e);
            Some(e.to_string())
        }
    };
    *last_error.lock().unwrap_or_else(|e| e.into_inner()) = message;
}
