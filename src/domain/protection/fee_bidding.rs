//! Priority fee bidding scaled to profit and congestion

use serde::{Deserialize, Serialize};

/// How much of the simulated profit to offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BiddingStrategy {
    Conservative,
    Balanced,
    Aggressive,
}

/// Chain conditions reported by the submission channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NetworkConditions {
    /// 0.0 (idle) ..= 1.0 (saturated)
    pub congestion: f64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self { congestion: 0.0 }
    }
}

/// Fee bounds are in accounting-token units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeeBidPolicy {
    pub min_priority_fee: f64,
    pub max_priority_fee: f64,
    pub conservative_share: f64,
    pub balanced_share: f64,
    pub aggressive_share: f64,
    /// Bid multiplier per unit of congestion
    pub congestion_weight: f64,
}

impl Default for FeeBidPolicy {
    fn default() -> Self {
        Self {
            min_priority_fee: 0.0,
            max_priority_fee: 0.05,
            conservative_share: 0.1,
            balanced_share: 0.25,
            aggressive_share: 0.5,
            congestion_weight: 1.0,
        }
    }
}

impl FeeBidPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.min_priority_fee >= 0.0 && self.min_priority_fee <= self.max_priority_fee) {
            return Err(format!(
                "fee bounds out of order: min {} max {}",
                self.min_priority_fee, self.max_priority_fee
            ));
        }
        for share in [self.conservative_share, self.balanced_share, self.aggressive_share] {
            if !(0.0..=1.0).contains(&share) {
                return Err(format!("profit share {share} outside [0, 1]"));
            }
        }
        Ok(())
    }

    pub fn share(&self, strategy: BiddingStrategy) -> f64 {
        match strategy {
            BiddingStrategy::Conservative => self.conservative_share,
            BiddingStrategy::Balanced => self.balanced_share,
            BiddingStrategy::Aggressive => self.aggressive_share,
        }
    }

    /// Raw bid in start-token units, clamped to the configured bounds.
    /// `rate` converts accounting units into start-token units.
    pub fn bid(&self, strategy: BiddingStrategy, profit: f64, conditions: NetworkConditions, rate: f64) -> f64 {
        let congestion = conditions.congestion.clamp(0.0, 1.0);
        let raw = self.share(strategy) * profit.max(0.0) * (1.0 + self.congestion_weight * congestion);
        raw.max(self.min_priority_fee * rate).min(self.max_priority_fee * rate)
    }

    /// Bid that still leaves net profit above `threshold`, or `None` if even
    /// the minimum does not fit. Bids are paid out of profit.
    pub fn fit(&self, bid: f64, profit: f64, threshold: f64, rate: f64) -> Option<f64> {
        let headroom = profit - threshold;
        let min = self.min_priority_fee * rate;
        if headroom <= min {
            return None;
        }
        if bid < headroom {
            Some(bid)
        } else {
            Some((min + headroom) / 2.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> FeeBidPolicy {
        FeeBidPolicy {
            min_priority_fee: 0.001,
            max_priority_fee: 0.01,
            ..FeeBidPolicy::default()
        }
    }

    #[test]
    fn test_bid_scales_with_profit_and_congestion() {
        let policy = policy();
        let calm = NetworkConditions { congestion: 0.0 };
        let busy = NetworkConditions { congestion: 1.0 };
        let small = policy.bid(BiddingStrategy::Balanced, 0.01, calm, 1.0);
        let large = policy.bid(BiddingStrategy::Balanced, 0.02, calm, 1.0);
        let congested = policy.bid(BiddingStrategy::Balanced, 0.02, busy, 1.0);
        assert!((small - 0.0025).abs() < 1e-12);
        assert!(large > small);
        assert!(congested > large);
        assert!(policy.bid(BiddingStrategy::Aggressive, 0.02, calm, 1.0) > large);
    }

    #[test]
    fn test_bid_is_bounded() {
        let policy = policy();
        let calm = NetworkConditions::default();
        assert_eq!(policy.bid(BiddingStrategy::Aggressive, 10.0, calm, 1.0), 0.01);
        assert_eq!(policy.bid(BiddingStrategy::Conservative, 0.0001, calm, 1.0), 0.001);
        // bounds follow the accounting rate
        assert_eq!(policy.bid(BiddingStrategy::Aggressive, 10.0, calm, 0.5), 0.005);
    }

    #[test]
    fn test_fit_keeps_profit_above_threshold() {
        let policy = policy();
        assert_eq!(policy.fit(0.002, 0.02, 0.0, 1.0), Some(0.002));

        let lowered = policy.fit(0.009, 0.008, 0.0, 1.0).unwrap();
        assert!(lowered >= 0.001 && lowered < 0.008);

        assert_eq!(policy.fit(0.002, 0.0015, 0.0006, 1.0), None);
    }

    #[test]
    fn test_validate() {
        assert!(policy().validate().is_ok());
        let inverted = FeeBidPolicy {
            min_priority_fee: 0.5,
            max_priority_fee: 0.1,
            ..FeeBidPolicy::default()
        };
        assert!(inverted.validate().is_err());
    }
}
