use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use crate::application::errors::{EngineError, EngineResult};
use crate::application::locks::KeyedLocks;
use crate::domain::entities::{Voter, VoterSnapshot};
use crate::domain::rules::{DelegationGraph, ResolvedCycle};
use crate::domain::traits::VoterDirectory;

/// Service owning the delegation ledger
///
/// Every mutation holds the sections of the voters it names (taken in id
/// order) and performs the ledger change plus cycle resolution inside one
/// write lock on the arena, so no caller ever observes a cyclic state.
pub struct DelegationService {
    graph: RwLock<DelegationGraph>,
    locks: KeyedLocks,
}

impl DelegationService {
    pub fn new(locks: KeyedLocks) -> Self {
        Self {
            graph: RwLock::new(DelegationGraph::new()),
            locks,
        }
    }

    pub async fn add_voter(&self, id: &str) -> EngineResult<bool> {
        let id = id.trim();
        if id.is_empty() {
            return Err(EngineError::validation("voter id cannot be empty"));
        }
        let _guard = self.locks.acquire(id).await?;
        let created = self.graph.write().await.add_voter(id);
        if created {
            tracing::info!("Voter {} registered", id);
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
        let _guards = self.locks.acquire_all(&[from, to]).await?;
        let resolved = self.graph.write().await.delegate(from, to, points, subdelegable)?;
        tracing::info!(
            "{} delegated {} points to {} (subdelegable: {}, cycles resolved: {})",
            from,
            points,
            to,
            subdelegable,
            resolved.len()
        );
        Ok(resolved)
    }

    pub async fn subdelegate(&self, from: &str, to: &str, points: i64) -> EngineResult<Vec<ResolvedCycle>> {
        let _guards = self.locks.acquire_all(&[from, to]).await?;
        let resolved = self.graph.write().await.subdelegate(from, to, points)?;
        tracing::info!("{} subdelegated {} points to {}", from, points, to);
        Ok(resolved)
    }

    /// Returns the points recovered by `from`
    pub async fn revoke(&self, from: &str, to: &str) -> EngineResult<i64> {
        let _guards = self.locks.acquire_all(&[from, to]).await?;
        self.graph.write().await.revoke(from, to)
    }

    pub async fn voter_snapshot(&self, id: &str) -> Option<VoterSnapshot> {
        self.graph.read().await.get(id).map(Voter::snapshot)
    }

    pub async fn detect_cycles(&self, start: &str) -> Vec<Vec<String>> {
        self.graph.read().await.detect_cycles(start)
    }

    pub async fn total_delegated_under(&self, id: &str) -> i64 {
        self.graph.read().await.total_delegated_under(id)
    }

    pub async fn delegation_chain(&self, id: &str) -> Vec<(String, i64)> {
        self.graph.read().await.delegation_chain(id)
    }

    pub async fn subdelegable_by_source(&self, id: &str) -> BTreeMap<String, i64> {
        self.graph
            .read()
            .await
            .get(id)
            .map(Voter::subdelegable_by_source)
            .unwrap_or_default()
    }

    pub async fn voter_count(&self) -> usize {
        self.graph.read().await.len()
    }

    pub async fn is_consistent(&self) -> bool {
        self.graph.read().await.is_consistent()
    }

    pub async fn export(&self) -> Vec<Voter> {
        self.graph.read().await.voters().cloned().collect()
    }

    pub async fn restore(&self, voters: Vec<Voter>) {
        let graph = DelegationGraph::from_voters(voters);
        if !graph.is_consistent() {
            tracing::warn!("Loaded delegation ledger is not balanced");
        }
        *self.graph.write().await = graph;
    }
}

#[async_trait]
impl VoterDirectory for DelegationService {
    async fn is_known(&self, voter_id: &str) -> bool {
        self.graph.read().await.contains(voter_id)
    }

    async fn voting_power(&self, voter_id: &str) -> Option<i64> {
        self.graph.read().await.get(voter_id).map(Voter::voting_power)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn service() -> DelegationService {
        DelegationService::new(KeyedLocks::new("voter", Duration::from_millis(500), 3))
    }

    #[tokio::test]
    async fn test_add_voter_rejects_blank_id() {
        let svc = service();
        assert!(svc.add_voter("  ").await.is_err());
        assert!(svc.add_voter("alice").await.unwrap());
        assert!(!svc.add_voter("alice").await.unwrap());
        assert_eq!(svc.voting_power("alice").await, Some(1000));
        assert_eq!(svc.voting_power("bob").await, None);
    }

    #[tokio::test]
    async fn test_concurrent_delegations_keep_ledger_balanced() {
        let svc = Arc::new(service());
        for id in ["a", "b", "c", "d"] {
            svc.add_voter(id).await.unwrap();
        }
        let pairs = [("a", "b"), ("b", "c"), ("c", "d"), ("d", "a"), ("a", "c"), ("b", "d")];
        let mut handles = Vec::new();
        for (from, to) in pairs {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move { svc.delegate(from, to, 100, false).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(svc.is_consistent().await);
        for id in ["a", "b", "c", "d"] {
            assert!(svc.detect_cycles(id).await.is_empty());
        }
    }
}
