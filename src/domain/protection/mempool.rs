//! Mempool risk grading from adversarial-pattern signals

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::BiddingStrategy;
use crate::shared::errors::AdapterError;
use crate::shared::types::TokenId;

/// Pending activity observed against one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MempoolSignal {
    pub token: TokenId,
    /// Pending transactions from known searcher / copier addresses
    pub suspicious_txs: u32,
    /// Front-run + back-run pairs bracketing a victim
    pub sandwich_patterns: u32,
}

impl MempoolSignal {
    pub fn score(&self) -> u32 {
        self.suspicious_txs + 2 * self.sandwich_patterns
    }
}

#[async_trait]
pub trait MempoolObserver: Send + Sync {
    async fn signals(&self, tokens: &[TokenId]) -> Result<Vec<MempoolSignal>, AdapterError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MempoolRisk {
    Clear,
    Elevated,
    Hostile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MempoolRiskPolicy {
    pub elevated_score: u32,
    pub hostile_score: u32,
    /// Minimum net profit / trade size to proceed under elevated risk
    pub elevated_min_margin: f64,
    pub hostile_min_margin: f64,
}

impl Default for MempoolRiskPolicy {
    fn default() -> Self {
        Self {
            elevated_score: 1,
            hostile_score: 5,
            elevated_min_margin: 0.002,
            hostile_min_margin: 0.01,
        }
    }
}

/// What to do with an opportunity that passed simulation
#[derive(Debug, Clone, PartialEq)]
pub enum RiskDecision {
    Proceed(BiddingStrategy),
    Abort(String),
}

impl MempoolRiskPolicy {
    pub fn grade(&self, signals: &[MempoolSignal]) -> MempoolRisk {
        let score: u32 = signals.iter().map(MempoolSignal::score).sum();
        if score >= self.hostile_score {
            MempoolRisk::Hostile
        } else if score >= self.elevated_score {
            MempoolRisk::Elevated
        } else {
            MempoolRisk::Clear
        }
    }

    /// Low-margin opportunities are aborted under risk; the rest bid harder
    pub fn decide(&self, risk: MempoolRisk, margin: f64) -> RiskDecision {
        match risk {
            MempoolRisk::Clear => RiskDecision::Proceed(BiddingStrategy::Balanced),
            MempoolRisk::Elevated if margin < self.elevated_min_margin => {
                RiskDecision::Abort(format!("elevated mempool risk, margin {margin:.5}"))
            }
            MempoolRisk::Hostile if margin < self.hostile_min_margin => {
                RiskDecision::Abort(format!("hostile mempool, margin {margin:.5}"))
            }
            MempoolRisk::Elevated | MempoolRisk::Hostile => RiskDecision::Proceed(BiddingStrategy::Aggressive),
        }
    }
}
