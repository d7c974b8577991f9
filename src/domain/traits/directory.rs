use async_trait::async_trait;

/// Read-only voter lookups the proposal side needs from the ledger
#[async_trait]
pub trait VoterDirectory: Send + Sync {
    async fn is_known(&self, voter_id: &str) -> bool;

    /// Own retained points plus received points; `None` for unknown voters
    async fn voting_power(&self, voter_id: &str) -> Option<i64>;
}
