//! Cost domain - self-correcting execution cost estimates

mod cost_model;
mod store;

pub use cost_model::{BaseCosts, CostModel, CostModelConfig, CostModelSummary, VenueBaseCost};
pub use store::{load_records, save_records};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::shared::types::VenueId;

/// Venue key used for costs that belong to the bundle as a whole
pub const BUNDLE_VENUE: &str = "__bundle__";

/// Kind of operation a cost applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Swap,
    Borrow,
    Repay,
    Submission,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Swap => "swap",
            OperationType::Borrow => "borrow",
            OperationType::Repay => "repay",
            OperationType::Submission => "submission",
        }
    }
}

/// Expected cost plus a margin that widens with observed variance
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CostEstimate {
    pub expected: f64,
    pub safety_margin: f64,
}

impl CostEstimate {
    pub fn zero() -> Self {
        Self {
            expected: 0.0,
            safety_margin: 0.0,
        }
    }

    /// Conservative cost used for profitability decisions
    pub fn total(&self) -> f64 {
        self.expected + self.safety_margin
    }

    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            expected: self.expected * factor,
            safety_margin: self.safety_margin * factor,
        }
    }
}

impl std::ops::Add for CostEstimate {
    type Output = CostEstimate;

    fn add(self, rhs: CostEstimate) -> CostEstimate {
        CostEstimate {
            expected: self.expected + rhs.expected,
            safety_margin: self.safety_margin + rhs.safety_margin,
        }
    }
}

/// One observed execution cost. Append-only, owned by [`CostModel`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostSample {
    pub venue: VenueId,
    pub operation: OperationType,
    pub predicted: f64,
    pub actual: f64,
    pub success: bool,
    pub observed_at: DateTime<Utc>,
}

impl CostSample {
    pub fn new(
        venue: impl Into<VenueId>,
        operation: OperationType,
        predicted: f64,
        actual: f64,
        success: bool,
    ) -> Self {
        Self {
            venue: venue.into(),
            operation,
            predicted,
            actual,
            success,
            observed_at: Utc::now(),
        }
    }
}

/// Persisted statistics for one (venue, operation type) key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub venue: VenueId,
    pub operation_type: OperationType,
    pub expected_cost: f64,
    pub variance: f64,
    pub sample_count: u64,
    pub last_updated: DateTime<Utc>,
}
