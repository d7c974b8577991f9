//! Proposal lifecycle states and the static transition table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalState {
    /// Initial drafting
    Draft,
    /// Collecting initial supporters
    Gathering,
    /// Discussing and amending articles
    Debate,
    /// Final vote
    Voting,
    Approved,
    Rejected,
    /// In force
    Published,
    /// Dropped for inactivity
    Abandoned,
    /// Transient, while an abandoned proposal releases its commitments
    Cleanup,
}

impl ProposalState {
    pub const ALL: [ProposalState; 9] = [
        ProposalState::Draft,
        ProposalState::Gathering,
        ProposalState::Debate,
        ProposalState::Voting,
        ProposalState::Approved,
        ProposalState::Rejected,
        ProposalState::Published,
        ProposalState::Abandoned,
        ProposalState::Cleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalState::Draft => "draft",
            ProposalState::Gathering => "gathering",
            ProposalState::Debate => "debate",
            ProposalState::Voting => "voting",
            ProposalState::Approved => "approved",
            ProposalState::Rejected => "rejected",
            ProposalState::Published => "published",
            ProposalState::Abandoned => "abandoned",
            ProposalState::Cleanup => "cleanup",
        }
    }

    /// Allowed targets from this state
    pub fn successors(&self) -> &'static [ProposalState] {
        use ProposalState::*;
        match self {
            Draft => &[Gathering, Abandoned],
            Gathering => &[Debate, Abandoned],
            Debate => &[Voting, Abandoned],
            Voting => &[Approved, Rejected, Abandoned],
            Cleanup => &[Abandoned],
            Approved | Rejected | Published | Abandoned => &[],
        }
    }

    pub fn can_transition_to(&self, next: ProposalState) -> bool {
        self.successors().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }

    /// States the reaper leaves alone
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            ProposalState::Approved
                | ProposalState::Rejected
                | ProposalState::Published
                | ProposalState::Abandoned
        )
    }
}

impl fmt::Display for ProposalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        ProposalState::ALL
            .iter()
            .find(|state| state.as_str() == lower)
            .copied()
            .ok_or_else(|| format!("unknown proposal state: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProposalState::*;

    #[test]
    fn test_listed_transitions_are_allowed() {
        let allowed = [
            (Draft, Gathering),
            (Draft, Abandoned),
            (Gathering, Debate),
            (Gathering, Abandoned),
            (Debate, Voting),
            (Debate, Abandoned),
            (Voting, Approved),
            (Voting, Rejected),
            (Voting, Abandoned),
            (Cleanup, Abandoned),
        ];
        for from in ProposalState::ALL {
            for to in ProposalState::ALL {
                assert_eq!(
                    from.can_transition_to(to),
                    allowed.contains(&(from, to)),
                    "{} -> {}",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_terminal_states() {
        for state in [Approved, Rejected, Published, Abandoned] {
            assert!(state.is_terminal());
            assert!(state.is_settled());
        }
        assert!(!Cleanup.is_terminal());
        assert!(!Cleanup.is_settled());
        assert!(!Voting.is_terminal());
    }

    #[test]
    fn test_parse_state() {
        assert_eq!("VOTING".parse::<ProposalState>(), Ok(Voting));
        assert!("closed".parse::<ProposalState>().is_err());
    }
}
