//! FRP-based fire risk label.

use serde::{Deserialize, Serialize};

pub const MEDIUM_RISK_MIN_FRP: f64 = 100.0;
pub const HIGH_RISK_MIN_FRP: f64 = 500.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskCategory {
    Low,
    Medium,
    High,
}

impl RiskCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

/// Negative FRP falls into `Low` like any other value under 100.
pub fn categorize(frp: f64) -> RiskCategory {
    if frp < MEDIUM_RISK_MIN_FRP {
        RiskCategory::Low
    } else if frp < HIGH_RISK_MIN_FRP {
        RiskCategory::Medium
    } else {
        RiskCategory::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds() {
        assert_eq!(categorize(99.9), RiskCategory::Low);
        assert_eq!(categorize(100.0), RiskCategory::Medium);
        assert_eq!(categorize(499.9), RiskCategory::Medium);
        assert_eq!(categorize(500.0), RiskCategory::High);
        assert_eq!(categorize(-5.0), RiskCategory::Low);
        assert_eq!(categorize(0.0), RiskCategory::Low);
    }

    #[test]
    fn categorize_is_stable() {
        for frp in [0.0, 99.9, 100.0, 250.0, 500.0, 10_000.0] {
            assert_eq!(categorize(frp), categorize(frp));
        }
    }

    #[test]
    fn labels() {
        assert_eq!(RiskCategory::Low.as_str(), "Low");
        assert_eq!(RiskCategory::Medium.as_str(), "Medium");
        assert_eq!(RiskCategory::High.as_str(), "High");
    }
}
