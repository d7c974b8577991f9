//! Delegation ledger
//!
//! Voters live in a single arena keyed by id; edges are id pairs stored on
//! both endpoints (`delegations` on the delegator, `received` on the
//! delegate). Every mutation keeps, for every voter,
//! `available + reserved + Σdelegations == base`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::application::errors::{EngineError, EngineResult};
use crate::domain::entities::voter::{DelegationEntry, Voter};

/// A cycle that was broken and the points returned to its first voter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCycle {
    pub voters: Vec<String>,
    pub points: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationGraph {
    voters: BTreeMap<String, Voter>,
}

impl DelegationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_voters(voters: impl IntoIterator<Item = Voter>) -> Self {
        Self {
            voters: voters.into_iter().map(|v| (v.id.clone(), v)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Voter> {
        self.voters.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.voters.contains_key(id)
    }

    pub fn voters(&self) -> impl Iterator<Item = &Voter> {
        self.voters.values()
    }

    pub fn len(&self) -> usize {
        self.voters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voters.is_empty()
    }

    /// Creates the voter if absent. Returns whether it was created.
    pub fn add_voter(&mut self, id: &str) -> bool {
        if self.voters.contains_key(id) {
            return false;
        }
        self.voters.insert(id.to_string(), Voter::new(id));
        true
    }

    /// Delegates `points` of `from`'s own budget to `to`, then breaks any
    /// cycle the new edge closed.
    pub fn delegate(
        &mut self,
        from: &str,
        to: &str,
        points: i64,
        subdelegable: bool,
    ) -> EngineResult<Vec<ResolvedCycle>> {
        self.check_pair(from, to)?;
        let delegator = &self.voters[from];
        if points <= 0 || points > delegator.delegatable_points() {
            return Err(EngineError::validation(format!(
                "{} cannot delegate {} points ({} delegatable)",
                from,
                points,
                delegator.delegatable_points()
            )));
        }

        self.apply_edge(from, to, points, subdelegable, BTreeMap::new());
        Ok(self.resolve_cycles_from(from))
    }

    /// Passes on points received through subdelegable grants. The new edge is
    /// never subdelegable itself.
    pub fn subdelegate(&mut self, from: &str, to: &str, points: i64) -> EngineResult<Vec<ResolvedCycle>> {
        self.check_pair(from, to)?;
        let delegator = &self.voters[from];

        if delegator.delegations.get(to).map(|e| e.subdelegable).unwrap_or(false) {
            return Err(EngineError::validation(format!(
                "{} already holds a subdelegable delegation from {}",
                to, from
            )));
        }

        let by_source = delegator.subdelegable_by_source();
        let subdelegable: i64 = by_source.values().sum();
        let limit = subdelegable.min(delegator.delegatable_points());
        if points <= 0 || points > limit {
            return Err(EngineError::validation(format!(
                "{} cannot subdelegate {} points ({} subdelegable)",
                from, points, limit
            )));
        }

        let mut sources = BTreeMap::new();
        let mut remaining = points;
        for (grantor, available) in by_source {
            if remaining == 0 {
                break;
            }
            let take = remaining.min(available);
            sources.insert(grantor, take);
            remaining -= take;
        }

        self.apply_edge(from, to, points, false, sources);
        Ok(self.resolve_cycles_from(from))
    }

    /// Removes the edge `from -> to` and everything `to` passed on out of
    /// that grant. Returns the points credited back to `from`.
    pub fn revoke(&mut self, from: &str, to: &str) -> EngineResult<i64> {
        self.check_pair(from, to)?;
        let entry = self
            .voters
            .get_mut(from)
            .and_then(|v| v.delegations.remove(to))
            .ok_or_else(|| EngineError::validation(format!("{} has no delegation to {}", from, to)))?;

        if let Some(delegate) = self.voters.get_mut(to) {
            delegate.received.remove(from);
        }
        if let Some(delegator) = self.voters.get_mut(from) {
            delegator.available_points += entry.points;
        }

        let torn_down = self.release_excess(to, from);
        tracing::info!(
            "Revoked {} -> {}: {} points returned, {} subdelegated points torn down",
            from,
            to,
            entry.points,
            torn_down
        );
        Ok(entry.points)
    }

    /// Every cycle through `start`, each as the path suffix from the first
    /// occurrence of the revisited voter. Only voters that can reach `start`
    /// are explored; a voter may appear in several cycles.
    pub fn detect_cycles(&self, start: &str) -> Vec<Vec<String>> {
        let reach = self.reaching(start);
        let mut cycles = Vec::new();
        let mut seen = BTreeSet::new();
        let mut stack: Vec<(String, Vec<String>)> = vec![(start.to_string(), Vec::new())];

        while let Some((current, mut path)) = stack.pop() {
            if let Some(pos) = path.iter().position(|v| *v == current) {
                let cycle = path[pos..].to_vec();
                if seen.insert(canonical(&cycle)) {
                    cycles.push(cycle);
                }
                continue;
            }
            path.push(current.clone());
            if let Some(voter) = self.voters.get(&current) {
                for delegate in voter.delegations.keys().rev() {
                    if reach.contains(delegate) {
                        stack.push((delegate.clone(), path.clone()));
                    }
                }
            }
        }
        cycles
    }

    /// First cycle through `start` in id order. Each voter is expanded at
    /// most once.
    fn first_cycle(&self, start: &str) -> Option<Vec<String>> {
        let reach = self.reaching(start);
        if reach.len() < 2 {
            return None;
        }
        let mut done: BTreeSet<&str> = BTreeSet::new();
        let mut path: Vec<&str> = vec![start];
        let mut frames = vec![self.successors(start)];

        while let Some(frame) = frames.last_mut() {
            let Some(next) = frame.next() else {
                frames.pop();
                if let Some(finished) = path.pop() {
                    done.insert(finished);
                }
                continue;
            };
            if next == start {
                return Some(path.iter().map(|v| v.to_string()).collect());
            }
            if !reach.contains(next) || done.contains(next) || path.contains(&next) {
                continue;
            }
            path.push(next);
            frames.push(self.successors(next));
        }
        None
    }

    fn successors<'a>(&'a self, id: &str) -> std::vec::IntoIter<&'a str> {
        self.voters
            .get(id)
            .map(|v| v.delegations.keys().map(String::as_str).collect::<Vec<_>>())
            .unwrap_or_default()
            .into_iter()
    }

    /// `target` and every voter with a delegation path into it
    fn reaching(&self, target: &str) -> BTreeSet<String> {
        let mut reach = BTreeSet::new();
        let mut queue = std::collections::VecDeque::from([target.to_string()]);
        while let Some(current) = queue.pop_front() {
            if !reach.insert(current.clone()) {
                continue;
            }
            if let Some(voter) = self.voters.get(&current) {
                queue.extend(voter.received.keys().filter(|d| !reach.contains(*d)).cloned());
            }
        }
        reach
    }

    /// Returns the cycle's minimum edge weight `m` to its first voter: the
    /// first voter's edge into the cycle shrinks by `m` and its available
    /// points grow by `m`. `None` if the cycle is no longer intact.
    pub fn resolve_cycle(&mut self, cycle: &[String]) -> Option<i64> {
        let k = cycle.len();
        if k == 0 {
            return None;
        }
        let mut min = i64::MAX;
        for i in 0..k {
            let points = self
                .voters
                .get(&cycle[i])?
                .delegations
                .get(&cycle[(i + 1) % k])?
                .points;
            min = min.min(points);
        }
        if min <= 0 || min == i64::MAX {
            return None;
        }

        let origin = &cycle[0];
        let next = &cycle[1 % k];
        self.shrink_edge(origin, next, min);
        if let Some(voter) = self.voters.get_mut(origin) {
            voter.available_points += min;
        }
        self.release_excess(next, origin);

        tracing::info!("Cycle {:?} resolved: {} points return to {}", cycle, min, origin);
        Some(min)
    }

    /// Sum of every edge pointing into `voter`, and transitively into its
    /// delegators. Each voter is expanded once, so a voter reachable through
    /// two paths contributes its incoming edges only once.
    pub fn total_delegated_under(&self, voter: &str) -> i64 {
        let mut visited = BTreeSet::new();
        let mut stack = vec![voter.to_string()];
        let mut total = 0;

        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(v) = self.voters.get(&current) {
                for (delegator, entry) in &v.received {
                    total += entry.points;
                    stack.push(delegator.clone());
                }
            }
        }
        total
    }

    /// Downstream `(delegate, points)` edges in depth-first order
    pub fn delegation_chain(&self, voter: &str) -> Vec<(String, i64)> {
        let mut chain = Vec::new();
        let mut visited = BTreeSet::new();
        self.collect_chain(voter, &mut visited, &mut chain);
        chain
    }

    fn collect_chain(&self, current: &str, visited: &mut BTreeSet<String>, chain: &mut Vec<(String, i64)>) {
        if !visited.insert(current.to_string()) {
            return;
        }
        if let Some(voter) = self.voters.get(current) {
            for (delegate, entry) in &voter.delegations {
                chain.push((delegate.clone(), entry.points));
                self.collect_chain(delegate, visited, chain);
            }
        }
    }

    /// Point conservation and edge symmetry across the whole arena
    pub fn is_consistent(&self) -> bool {
        self.voters.values().all(|voter| {
            voter.is_balanced()
                && voter.available_points >= 0
                && voter.delegations.iter().all(|(to, out)| {
                    out.points > 0
                        && self
                            .voters
                            .get(to)
                            .and_then(|d| d.received.get(&voter.id))
                            .map(|inc| inc.points == out.points)
                            .unwrap_or(false)
                })
        })
    }

    fn check_pair(&self, from: &str, to: &str) -> EngineResult<()> {
        for id in [from, to] {
            if !self.voters.contains_key(id) {
                return Err(EngineError::validation(format!("unknown voter: {}", id)));
            }
        }
        if from == to {
            return Err(EngineError::validation("a voter cannot delegate to itself"));
        }
        Ok(())
    }

    fn apply_edge(&mut self, from: &str, to: &str, points: i64, subdelegable: bool, sources: BTreeMap<String, i64>) {
        if let Some(delegator) = self.voters.get_mut(from) {
            delegator.available_points -= points;
            let entry = delegator
                .delegations
                .entry(to.to_string())
                .or_insert_with(|| DelegationEntry::new(0, subdelegable));
            entry.points += points;
            for (grantor, amount) in sources {
                *entry.sources.entry(grantor).or_insert(0) += amount;
            }
        }
        if let Some(delegate) = self.voters.get_mut(to) {
            delegate
                .received
                .entry(from.to_string())
                .or_insert_with(|| DelegationEntry::new(0, subdelegable))
                .points += points;
        }
        tracing::debug!("Delegated {} points {} -> {} (subdelegable: {})", points, from, to, subdelegable);
    }

    /// Lowers both sides of `from -> to` by `amount`, dropping the edge at 0
    fn shrink_edge(&mut self, from: &str, to: &str, amount: i64) {
        if let Some(delegator) = self.voters.get_mut(from) {
            if let Some(entry) = delegator.delegations.get_mut(to) {
                entry.points -= amount;
                entry.trim_sources();
                if entry.points <= 0 {
                    delegator.delegations.remove(to);
                }
            }
        }
        if let Some(delegate) = self.voters.get_mut(to) {
            if let Some(entry) = delegate.received.get_mut(from) {
                entry.points -= amount;
                if entry.points <= 0 {
                    delegate.received.remove(from);
                }
            }
        }
    }

    /// Tears down subdelegations of `holder` that draw on more of
    /// `grantor`'s grant than `holder` still holds, refunding `holder`, and
    /// follows the teardown downstream. Returns the points torn down.
    fn release_excess(&mut self, holder: &str, grantor: &str) -> i64 {
        let mut torn_down = 0;
        let mut visited = BTreeSet::new();
        let mut stack = vec![(holder.to_string(), grantor.to_string())];

        while let Some((holder, grantor)) = stack.pop() {
            if !visited.insert((holder.clone(), grantor.clone())) {
                continue;
            }
            let Some(voter) = self.voters.get(&holder) else {
                continue;
            };
            let allowed = voter
                .received
                .get(&grantor)
                .filter(|e| e.subdelegable)
                .map(|e| e.points)
                .unwrap_or(0);
            let mut excess = voter.subdelegated_from(&grantor) - allowed;
            if excess <= 0 {
                continue;
            }

            let funded: Vec<(String, i64)> = voter
                .delegations
                .iter()
                .filter_map(|(to, e)| {
                    let amount = e.funded_by(&grantor);
                    (amount > 0).then(|| (to.clone(), amount))
                })
                .collect();

            for (delegate, amount) in funded {
                if excess == 0 {
                    break;
                }
                let cut = excess.min(amount);
                if let Some(entry) = self
                    .voters
                    .get_mut(&holder)
                    .and_then(|v| v.delegations.get_mut(&delegate))
                {
                    if let Some(src) = entry.sources.get_mut(&grantor) {
                        *src -= cut;
                        if *src == 0 {
                            entry.sources.remove(&grantor);
                        }
                    }
                }
                self.shrink_edge(&holder, &delegate, cut);
                if let Some(v) = self.voters.get_mut(&holder) {
                    v.available_points += cut;
                }
                excess -= cut;
                torn_down += cut;
                stack.push((delegate, holder.clone()));
            }
        }
        torn_down
    }

    /// Detects and resolves until no cycle runs through `start`. Before the
    /// triggering edge the graph is acyclic, so every new cycle passes
    /// through `start` and one is broken per pass.
    fn resolve_cycles_from(&mut self, start: &str) -> Vec<ResolvedCycle> {
        let mut resolved = Vec::new();
        while let Some(cycle) = self.first_cycle(start) {
            tracing::info!("Detected delegation cycle {:?} from {}", cycle, start);
            match self.resolve_cycle(&cycle) {
                Some(points) => resolved.push(ResolvedCycle { voters: cycle, points }),
                None => break,
            }
        }
        resolved
    }
}

/// Rotation-independent key for deduplicating cycles
fn canonical(cycle: &[String]) -> Vec<String> {
    let Some(pos) = cycle.iter().enumerate().min_by_key(|(_, v)| *v).map(|(i, _)| i) else {
        return Vec::new();
    };
    cycle[pos..].iter().chain(cycle[..pos].iter()).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with(ids: &[&str]) -> DelegationGraph {
        let mut graph = DelegationGraph::new();
        for id in ids {
            graph.add_voter(id);
        }
        graph
    }

    fn edge(graph: &DelegationGraph, from: &str, to: &str) -> Option<i64> {
        graph.get(from)?.delegations.get(to).map(|e| e.points)
    }

    #[test]
    fn test_add_voter_is_idempotent() {
        let mut graph = graph_with(&["a", "b"]);
        graph.delegate("a", "b", 100, false).unwrap();
        assert!(!graph.add_voter("a"));
        assert_eq!(graph.get("a").unwrap().available_points, 898);
    }

    #[test]
    fn test_delegate_bounds() {
        let mut graph = graph_with(&["a", "b"]);
        assert!(graph.delegate("a", "b", 0, false).is_err());
        assert!(graph.delegate("a", "b", -5, false).is_err());
        assert!(graph.delegate("a", "b", 997, false).is_err());
        assert!(graph.delegate("a", "ghost", 10, false).is_err());
        assert!(graph.delegate("a", "a", 10, false).is_err());
        graph.delegate("a", "b", 996, false).unwrap();
        assert_eq!(graph.get("a").unwrap().available_points, 2);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_existing_edge_keeps_its_flag() {
        let mut graph = graph_with(&["a", "b"]);
        graph.delegate("a", "b", 100, true).unwrap();
        graph.delegate("a", "b", 50, false).unwrap();
        let entry = &graph.get("a").unwrap().delegations["b"];
        assert_eq!(entry.points, 150);
        assert!(entry.subdelegable);
        assert!(graph.get("b").unwrap().received["a"].subdelegable);
    }

    #[test]
    fn test_three_way_cycle_returns_to_trigger() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.delegate("a", "b", 500, true).unwrap();
        graph.delegate("b", "c", 300, false).unwrap();
        let before = graph.get("c").unwrap().available_points;

        let resolved = graph.delegate("c", "a", 200, false).unwrap();

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].voters, vec!["c", "a", "b"]);
        assert_eq!(resolved[0].points, 200);
        assert_eq!(edge(&graph, "a", "b"), Some(500));
        assert_eq!(edge(&graph, "b", "c"), Some(300));
        assert_eq!(edge(&graph, "c", "a"), None);
        assert!(!graph.get("a").unwrap().received.contains_key("c"));
        // 200 debited by the delegation, 200 credited by the resolution
        assert_eq!(graph.get("c").unwrap().available_points, before);
        assert!(graph.detect_cycles("c").is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_closing_edge_larger_than_cycle_minimum() {
        let mut graph = graph_with(&["a", "b"]);
        graph.delegate("a", "b", 100, false).unwrap();
        let resolved = graph.delegate("b", "a", 400, false).unwrap();
        // each pass returns the cycle minimum (100) until b -> a is gone
        assert_eq!(resolved.len(), 4);
        assert_eq!(resolved.iter().map(|r| r.points).sum::<i64>(), 400);
        assert_eq!(edge(&graph, "a", "b"), Some(100));
        assert_eq!(edge(&graph, "b", "a"), None);
        assert_eq!(graph.get("b").unwrap().available_points, 998);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_detect_cycles_finds_multiple() {
        let mut graph = graph_with(&["a", "b", "c"]);
        // build a -> b, b -> a and b -> c, c -> a without resolution
        graph.apply_edge("a", "b", 10, false, BTreeMap::new());
        graph.apply_edge("b", "a", 10, false, BTreeMap::new());
        graph.apply_edge("b", "c", 10, false, BTreeMap::new());
        graph.apply_edge("c", "a", 10, false, BTreeMap::new());
        let cycles = graph.detect_cycles("a");
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["a".to_string(), "b".to_string()]));
        assert!(cycles.contains(&vec!["a".to_string(), "b".to_string(), "c".to_string()]));
    }

    fn ladder(n: usize) -> (DelegationGraph, Vec<String>) {
        let ids: Vec<String> = (0..n).map(|i| format!("v{:02}", i)).collect();
        let mut graph = DelegationGraph::new();
        for id in &ids {
            graph.add_voter(id);
        }
        for i in 0..n {
            for step in [1, 2] {
                if i + step < n {
                    graph.delegate(&ids[i], &ids[i + step], 1, false).unwrap();
                }
            }
        }
        (graph, ids)
    }

    #[test]
    fn test_ladder_without_cycle_is_cheap() {
        let (mut graph, ids) = ladder(40);
        let started = std::time::Instant::now();

        let resolved = graph.delegate(&ids[0], &ids[39], 1, false).unwrap();

        assert!(resolved.is_empty());
        assert!(graph.detect_cycles(&ids[0]).is_empty());
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_ladder_closing_edge_is_resolved() {
        let (mut graph, ids) = ladder(40);
        let before = graph.get(&ids[39]).unwrap().available_points;
        let started = std::time::Instant::now();

        // every ladder path back to v39 is a cycle; each pass takes 1 point
        let resolved = graph.delegate(&ids[39], &ids[0], 5, false).unwrap();

        assert_eq!(resolved.len(), 5);
        assert!(resolved.iter().all(|r| r.points == 1 && r.voters[0] == ids[39]));
        assert_eq!(edge(&graph, &ids[39], &ids[0]), None);
        assert_eq!(graph.get(&ids[39]).unwrap().available_points, before);
        assert_eq!(edge(&graph, &ids[0], &ids[1]), Some(1));
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_subdelegate_draws_on_grants() {
        let mut graph = graph_with(&["a", "b", "c", "d"]);
        graph.delegate("a", "b", 300, true).unwrap();
        graph.delegate("d", "b", 100, false).unwrap();

        assert!(graph.subdelegate("b", "c", 301).is_err());
        graph.subdelegate("b", "c", 250).unwrap();
        assert!(graph.subdelegate("b", "c", 51).is_err());

        let entry = &graph.get("b").unwrap().delegations["c"];
        assert!(!entry.subdelegable);
        assert_eq!(entry.funded_by("a"), 250);
        assert_eq!(graph.get("b").unwrap().available_points, 748);
        // c received non-subdelegable points and cannot pass them on
        assert!(graph.subdelegate("c", "d", 1).is_err());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_revoke_tears_down_funded_subtree() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.delegate("a", "b", 600, true).unwrap();
        graph.subdelegate("b", "c", 400).unwrap();

        let recovered = graph.revoke("a", "b").unwrap();

        assert_eq!(recovered, 600);
        assert_eq!(edge(&graph, "a", "b"), None);
        assert_eq!(edge(&graph, "b", "c"), None);
        assert!(graph.get("c").unwrap().received.is_empty());
        assert_eq!(graph.get("a").unwrap().available_points, 998);
        assert_eq!(graph.get("b").unwrap().available_points, 998);
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_revoke_keeps_own_delegations_of_delegate() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.delegate("a", "b", 600, true).unwrap();
        graph.delegate("b", "c", 100, false).unwrap();
        graph.revoke("a", "b").unwrap();
        assert_eq!(edge(&graph, "b", "c"), Some(100));
        assert!(graph.revoke("a", "b").is_err());
    }

    #[test]
    fn test_total_delegated_under_counts_each_voter_once() {
        let mut graph = graph_with(&["a", "b", "c", "d"]);
        graph.delegate("a", "b", 100, false).unwrap();
        graph.delegate("a", "c", 50, false).unwrap();
        graph.delegate("b", "d", 20, false).unwrap();
        graph.delegate("c", "d", 30, false).unwrap();
        // d <- b (20), d <- c (30), b <- a (100), c <- a (50); a expanded once
        assert_eq!(graph.total_delegated_under("d"), 200);
        assert_eq!(graph.total_delegated_under("a"), 0);
    }

    #[test]
    fn test_delegation_chain() {
        let mut graph = graph_with(&["a", "b", "c"]);
        graph.delegate("a", "b", 100, false).unwrap();
        graph.delegate("b", "c", 40, false).unwrap();
        assert_eq!(
            graph.delegation_chain("a"),
            vec![("b".to_string(), 100), ("c".to_string(), 40)]
        );
    }
}
