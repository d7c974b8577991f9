//! Logarithmic quorum and participation formulas
//!
//! With `V0` the turnout of an article's last vote:
//! - required voters:     `V = V0 * ln(V0) / 100`
//! - minimum turnout:     `Vm = V0 * (1 - ln(V0) / 100)`
//!
//! `V0 = 0` has no finite answer (`ln 0 = -inf`), which is what makes an
//! article without turnout, and article 0 in particular, unmodifiable.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A vote count that must be reached, or a barrier nothing can reach
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Threshold {
    Finite(u64),
    Unreachable,
}

impl Threshold {
    pub fn is_met_by(&self, value: i64) -> bool {
        match self {
            Threshold::Finite(required) => value >= 0 && value as u64 >= *required,
            Threshold::Unreachable => false,
        }
    }

    pub fn is_unreachable(&self) -> bool {
        matches!(self, Threshold::Unreachable)
    }

    pub fn finite(&self) -> Option<u64> {
        match self {
            Threshold::Finite(v) => Some(*v),
            Threshold::Unreachable => None,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Finite(v) => write!(f, "{}", v),
            Threshold::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Quorum and participation thresholds for one article
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirement {
    pub required_voters: Threshold,
    pub min_participation: Threshold,
}

impl Requirement {
    pub const UNREACHABLE: Requirement = Requirement {
        required_voters: Threshold::Unreachable,
        min_participation: Threshold::Unreachable,
    };

    pub fn from_turnout(previous_voters: u64, weight: f64) -> Self {
        Self {
            required_voters: scale(required_voters(previous_voters), weight),
            min_participation: min_participation(previous_voters),
        }
    }

    pub fn is_unreachable(&self) -> bool {
        self.required_voters.is_unreachable()
    }
}

/// `floor(V0 * ln(V0) / 100)`, unreachable for `V0 = 0`
pub fn required_voters(previous_voters: u64) -> Threshold {
    if previous_voters == 0 {
        return Threshold::Unreachable;
    }
    let v0 = previous_voters as f64;
    Threshold::Finite(saturate(v0 * v0.ln() / 100.0))
}

/// `floor(V0 * (1 - ln(V0) / 100))`, unreachable for `V0 = 0`
pub fn min_participation(previous_voters: u64) -> Threshold {
    if previous_voters == 0 {
        return Threshold::Unreachable;
    }
    let v0 = previous_voters as f64;
    Threshold::Finite(saturate(v0 * (1.0 - v0.ln() / 100.0)))
}

fn scale(threshold: Threshold, weight: f64) -> Threshold {
    match threshold {
        Threshold::Finite(v) if weight.is_finite() && weight > 0.0 => {
            Threshold::Finite(saturate(v as f64 * weight))
        }
        other => other,
    }
}

// Float-to-int `as` saturates: negatives and NaN become 0, overflow becomes u64::MAX
fn saturate(value: f64) -> u64 {
    value.floor() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_turnout_is_unreachable() {
        assert_eq!(required_voters(0), Threshold::Unreachable);
        assert_eq!(min_participation(0), Threshold::Unreachable);
        assert!(!Threshold::Unreachable.is_met_by(i64::MAX));
    }

    #[test]
    fn test_formula_values() {
        // 100 * ln(100) / 100 = 4.605...
        assert_eq!(required_voters(100), Threshold::Finite(4));
        // 100 * (1 - 0.04605) = 95.39...
        assert_eq!(min_participation(100), Threshold::Finite(95));
        // ln(1) = 0
        assert_eq!(required_voters(1), Threshold::Finite(0));
        assert_eq!(min_participation(1), Threshold::Finite(1));
        // 1000 * 6.9077 / 100 = 69.07...
        assert_eq!(required_voters(1000), Threshold::Finite(69));
    }

    #[test]
    fn test_absurd_turnout_stays_finite() {
        let huge = u64::MAX;
        let required = required_voters(huge);
        assert!(matches!(required, Threshold::Finite(_)));
        assert_eq!(required, required_voters(huge));
        // ln(u64::MAX) ~ 44 < 100, so participation stays positive and finite
        assert!(matches!(min_participation(huge), Threshold::Finite(v) if v > 0));
    }

    #[test]
    fn test_weight_scales_quorum_only() {
        let req = Requirement::from_turnout(1000, 2.0);
        assert_eq!(req.required_voters, Threshold::Finite(138));
        assert_eq!(req.min_participation, min_participation(1000));
        assert!(Requirement::from_turnout(0, 2.0).is_unreachable());
    }

    #[test]
    fn test_unreachable_orders_above_finite() {
        assert!(Threshold::Unreachable > Threshold::Finite(u64::MAX));
        assert!(Threshold::Finite(5) > Threshold::Finite(4));
    }
}
