//! Trade sizing against the current treasury state

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::arbitrage::Opportunity;
use crate::shared::types::TokenId;

/// Numeric sizing policy, adjustable at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationPolicy {
    pub absolute_min: f64,
    pub absolute_max: f64,
    /// Fractions of available capital; `pct_max` above 1.0 allows borrowed leverage
    pub pct_min: f64,
    pub pct_max: f64,
    /// Fraction of held balance never put at risk
    pub reserve_pct: f64,
    pub concurrent_trade_limit: usize,
}

impl Default for AllocationPolicy {
    fn default() -> Self {
        Self {
            absolute_min: 0.01,
            absolute_max: 100.0,
            pct_min: 0.01,
            pct_max: 0.5,
            reserve_pct: 0.1,
            concurrent_trade_limit: 3,
        }
    }
}

impl AllocationPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.absolute_min >= 0.0 && self.absolute_min <= self.absolute_max) {
            return Err(format!(
                "absolute bounds out of order: min {} max {}",
                self.absolute_min, self.absolute_max
            ));
        }
        if !(self.pct_min >= 0.0 && self.pct_min <= self.pct_max) {
            return Err(format!("percentage bounds out of order: min {} max {}", self.pct_min, self.pct_max));
        }
        if !(0.0..1.0).contains(&self.reserve_pct) {
            return Err(format!("reserve_pct must be in [0, 1), got {}", self.reserve_pct));
        }
        if self.concurrent_trade_limit == 0 {
            return Err("concurrent_trade_limit must be at least 1".to_string());
        }
        Ok(())
    }
}

/// Treasury state for one token at the moment of allocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TreasurySnapshot {
    pub token: TokenId,
    pub held: f64,
    /// Own capital reserved by in-flight attempts
    pub reserved: f64,
    pub in_flight: usize,
}

/// Sizing decision for one opportunity
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AllocationDecision {
    pub amount: f64,
    /// Smallest size the policy would accept
    pub min_amount: f64,
    pub use_borrowed_capital: bool,
    pub reserve_ok: bool,
    /// Own capital to reserve for the attempt
    pub own_capital: f64,
    pub available: f64,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AllocationRefusal {
    #[error("concurrent trade limit reached ({in_flight}/{limit})")]
    ConcurrencyCap { in_flight: usize, limit: usize },

    #[error("no admissible size: lower bound {lower} exceeds upper bound {upper}")]
    EmptyRange { lower: f64, upper: f64 },

    #[error("treasury snapshot is for {snapshot}, opportunity starts at {opportunity}")]
    TokenMismatch { snapshot: TokenId, opportunity: TokenId },
}

impl AllocationRefusal {
    pub fn reason_code(&self) -> &'static str {
        match self {
            AllocationRefusal::ConcurrencyCap { .. } => "concurrency_cap",
            AllocationRefusal::EmptyRange { .. } => "allocation_range_empty",
            AllocationRefusal::TokenMismatch { .. } => "token_mismatch",
        }
    }
}

/// Capital that may be committed: held balance minus the reserve floor and existing reservations
pub fn available_capital(snapshot: &TreasurySnapshot, policy: &AllocationPolicy) -> f64 {
    (snapshot.held * (1.0 - policy.reserve_pct) - snapshot.reserved).max(0.0)
}

/// Size an opportunity. Pure: refusal is returned, nothing is queued or counted.
pub fn allocate(
    opportunity: &Opportunity,
    snapshot: &TreasurySnapshot,
    policy: &AllocationPolicy,
) -> Result<AllocationDecision, AllocationRefusal> {
    if opportunity.start_token() != snapshot.token {
        return Err(AllocationRefusal::TokenMismatch {
            snapshot: snapshot.token.clone(),
            opportunity: opportunity.start_token().to_string(),
        });
    }
    let limit = policy.concurrent_trade_limit.max(1);
    if snapshot.in_flight >= limit {
        return Err(AllocationRefusal::ConcurrencyCap {
            in_flight: snapshot.in_flight,
            limit,
        });
    }

    let available = available_capital(snapshot, policy);
    let lower = policy.absolute_min.max(policy.pct_min * available);
    let upper = policy.absolute_max.min(policy.pct_max * available / limit as f64);
    if !(lower <= upper) || upper <= 0.0 {
        return Err(AllocationRefusal::EmptyRange { lower, upper });
    }

    let amount = upper;
    let use_borrowed_capital = amount > available;
    let own_capital = if use_borrowed_capital { 0.0 } else { amount };
    let reserve_floor = snapshot.held * policy.reserve_pct;
    let reserve_ok = snapshot.held - snapshot.reserved - own_capital >= reserve_floor - 1e-12;

    Ok(AllocationDecision {
        amount,
        min_amount: lower,
        use_borrowed_capital,
        reserve_ok,
        own_capital,
        available,
    })
}
