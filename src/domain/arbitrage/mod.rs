//! Arbitrage domain - paths, opportunities and the path search engine

pub mod path;
pub mod path_finder;

pub use path::{Hop, Path};
pub use path_finder::{PathFinder, SearchPolicy, SearchStats};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::cost::CostEstimate;

/// Cost components of an opportunity, all in start-token units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub swaps: CostEstimate,
    pub submission: CostEstimate,
    /// Borrow + repay operation cost, zero until a lender is chosen
    pub borrowing: CostEstimate,
    /// Fee quoted by the chosen lender
    pub loan_fee: f64,
}

impl CostBreakdown {
    pub fn new(swaps: CostEstimate, submission: CostEstimate) -> Self {
        Self {
            swaps,
            submission,
            borrowing: CostEstimate::zero(),
            loan_fee: 0.0,
        }
    }

    /// Conservative total used for every profitability decision
    pub fn total(&self) -> f64 {
        self.swaps.total() + self.submission.total() + self.borrowing.total() + self.loan_fee
    }

    pub fn expected(&self) -> f64 {
        self.swaps.expected + self.submission.expected + self.borrowing.expected + self.loan_fee
    }
}

/// Scored, sized arbitrage candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub id: String,
    pub path: Path,
    pub amount_in: f64,
    pub expected_output: f64,
    pub gross_profit: f64,
    pub costs: CostBreakdown,
    pub net_profit: f64,
    /// Start-token units per accounting-token unit at discovery
    pub accounting_rate: f64,
    pub discovered_at: DateTime<Utc>,
    /// Past this instant the pricing is considered stale
    pub deadline: DateTime<Utc>,
}

impl Opportunity {
    pub fn new(id: String, path: Path, costs: CostBreakdown, accounting_rate: f64, staleness_ms: u64) -> Self {
        let discovered_at = Utc::now();
        let amount_in = path.amount_in();
        let expected_output = path.expected_output();
        let mut opportunity = Self {
            id,
            path,
            amount_in,
            expected_output,
            gross_profit: 0.0,
            costs,
            net_profit: 0.0,
            accounting_rate,
            discovered_at,
            deadline: discovered_at + ChronoDuration::milliseconds(staleness_ms as i64),
        };
        opportunity.recompute();
        opportunity
    }

    /// gross = output - principal; net = gross - all costs
    pub fn recompute(&mut self) {
        self.gross_profit = self.expected_output - self.amount_in;
        self.net_profit = self.gross_profit - self.costs.total();
    }

    /// Attach the chosen lender's fee and borrowing operation cost
    pub fn with_borrowing(mut self, loan_fee: f64, borrowing: CostEstimate) -> Self {
        self.costs.loan_fee = loan_fee;
        self.costs.borrowing = borrowing;
        self.recompute();
        self
    }

    pub fn start_token(&self) -> &str {
        self.path.start_token()
    }

    pub fn hop_count(&self) -> usize {
        self.path.len()
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        now > self.deadline
    }

    /// Threshold in start-token units for a minimum profit in accounting units
    pub fn threshold(&self, min_profit: f64) -> f64 {
        min_profit * self.accounting_rate
    }

    pub fn clears(&self, min_profit: f64) -> bool {
        self.net_profit > self.threshold(min_profit)
    }
}
