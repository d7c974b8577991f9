use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Points every voter starts with (1000 points = 1 vote)
pub const BASE_POINTS: i64 = 1000;

/// Points a voter always keeps; never delegable
pub const RESERVED_POINTS: i64 = 2;

/// One side of a delegation edge, as seen from either endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationEntry {
    pub points: i64,
    pub subdelegable: bool,
    /// Subdelegable grants funding this edge (delegator id -> points).
    /// Empty for delegations of the voter's own points.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub sources: BTreeMap<String, i64>,
}

impl DelegationEntry {
    pub fn new(points: i64, subdelegable: bool) -> Self {
        Self {
            points,
            subdelegable,
            sources: BTreeMap::new(),
        }
    }

    pub fn funded_by(&self, delegator: &str) -> i64 {
        self.sources.get(delegator).copied().unwrap_or(0)
    }

    /// Drop source allotments until they fit inside `points`
    pub(crate) fn trim_sources(&mut self) {
        let mut excess = self.sources.values().sum::<i64>() - self.points;
        if excess <= 0 {
            return;
        }
        let keys: Vec<String> = self.sources.keys().rev().cloned().collect();
        for key in keys {
            if excess <= 0 {
                break;
            }
            if let Some(amount) = self.sources.get_mut(&key) {
                let cut = excess.min(*amount);
                *amount -= cut;
                excess -= cut;
                if *amount == 0 {
                    self.sources.remove(&key);
                }
            }
        }
    }
}

/// A participant holding a fixed budget of voting points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voter {
    pub id: String,
    pub base_points: i64,
    pub reserved_points: i64,
    pub available_points: i64,
    /// Outgoing edges: delegate id -> entry
    pub delegations: BTreeMap<String, DelegationEntry>,
    /// Incoming edges: delegator id -> entry
    pub received: BTreeMap<String, DelegationEntry>,
}

impl Voter {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_points: BASE_POINTS,
            reserved_points: RESERVED_POINTS,
            available_points: BASE_POINTS - RESERVED_POINTS,
            delegations: BTreeMap::new(),
            received: BTreeMap::new(),
        }
    }

    /// Points that may still be handed out by `delegate`
    pub fn delegatable_points(&self) -> i64 {
        self.available_points - self.reserved_points
    }

    pub fn total_delegated(&self) -> i64 {
        self.delegations.values().map(|d| d.points).sum()
    }

    pub fn total_received(&self) -> i64 {
        self.received.values().map(|d| d.points).sum()
    }

    /// (subdelegable, non-subdelegable) received totals
    pub fn received_split(&self) -> (i64, i64) {
        self.received.values().fold((0, 0), |(sub, fixed), entry| {
            if entry.subdelegable {
                (sub + entry.points, fixed)
            } else {
                (sub, fixed + entry.points)
            }
        })
    }

    /// Own retained points plus everything received
    pub fn voting_power(&self) -> i64 {
        self.available_points + self.reserved_points + self.total_received()
    }

    /// `available + reserved + Σdelegations == base`
    pub fn is_balanced(&self) -> bool {
        self.available_points + self.reserved_points + self.total_delegated() == self.base_points
    }

    /// Points from `delegator`'s subdelegable grant already passed on
    pub fn subdelegated_from(&self, delegator: &str) -> i64 {
        self.delegations.values().map(|d| d.funded_by(delegator)).sum()
    }

    /// Unconsumed subdelegable points per granting delegator
    pub fn subdelegable_by_source(&self) -> BTreeMap<String, i64> {
        self.received
            .iter()
            .filter(|(_, entry)| entry.subdelegable)
            .map(|(from, entry)| (from.clone(), entry.points - self.subdelegated_from(from)))
            .filter(|(_, remaining)| *remaining > 0)
            .collect()
    }

    pub fn snapshot(&self) -> VoterSnapshot {
        let (subdelegable_received, fixed_received) = self.received_split();
        VoterSnapshot {
            id: self.id.clone(),
            base: self.base_points,
            available: self.available_points,
            reserved: self.reserved_points,
            delegations: self.delegations.clone(),
            received: self.received.clone(),
            subdelegable_received,
            fixed_received,
            voting_power: self.voting_power(),
        }
    }
}

impl fmt::Display for Voter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}/{} available)", self.id, self.available_points, self.base_points)
    }
}

/// Read-only view of a voter handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterSnapshot {
    pub id: String,
    pub base: i64,
    pub available: i64,
    pub reserved: i64,
    pub delegations: BTreeMap<String, DelegationEntry>,
    pub received: BTreeMap<String, DelegationEntry>,
    pub subdelegable_received: i64,
    pub fixed_received: i64,
    pub voting_power: i64,
}
