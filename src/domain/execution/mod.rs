//! Execution domain - atomic operation plans, signing and attempt outcomes

mod nonce;

pub use nonce::NonceAllocator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::arbitrage::Opportunity;
use crate::shared::errors::{AdapterError, EngineError};
use crate::shared::types::TokenId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Borrow,
    Swap,
    Repay,
}

/// One chain-specific operation produced by a venue or lender adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    /// Venue or lender id
    pub target: String,
    /// Token received (swap, borrow) or paid back (repay)
    pub token: TokenId,
    pub amount: f64,
    /// Execution-level floor on the operation's output; 0 for borrow/repay
    pub min_amount_out: f64,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
}

impl Operation {
    pub fn new(kind: OperationKind, target: impl Into<String>, token: impl Into<TokenId>, amount: f64) -> Self {
        Self {
            kind,
            target: target.into(),
            token: token.into(),
            amount,
            min_amount_out: 0.0,
            payload: Vec::new(),
        }
    }

    pub fn with_min_out(mut self, min_amount_out: f64) -> Self {
        self.min_amount_out = min_amount_out;
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }
}

/// Ordered operations that apply together or not at all.
/// Atomicity itself is provided by the execution environment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AtomicPlan {
    operations: Vec<Operation>,
    pub borrowed: bool,
}

impl AtomicPlan {
    /// Swaps only, paid from held capital
    pub fn direct(swaps: Vec<Operation>) -> Result<Self, EngineError> {
        let plan = Self {
            operations: swaps,
            borrowed: false,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// borrows -> swaps -> repays
    pub fn borrowed(borrows: Vec<Operation>, swaps: Vec<Operation>, repays: Vec<Operation>) -> Result<Self, EngineError> {
        if borrows.is_empty() || borrows.len() != repays.len() {
            return Err(EngineError::Infeasible("every borrow needs exactly one repay".to_string()));
        }
        let legs = borrows.len();
        let mut operations = Vec::with_capacity(swaps.len() + 2 * legs);
        operations.extend(borrows);
        operations.extend(swaps);
        operations.extend(repays);
        let plan = Self {
            operations,
            borrowed: true,
        };
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<(), EngineError> {
        let kinds: Vec<OperationKind> = self.operations.iter().map(|op| op.kind).collect();
        let borrows = kinds.iter().take_while(|k| **k == OperationKind::Borrow).count();
        let swaps = kinds[borrows..].iter().take_while(|k| **k == OperationKind::Swap).count();
        let repays = kinds[borrows + swaps..].iter().take_while(|k| **k == OperationKind::Repay).count();

        if swaps == 0 {
            return Err(EngineError::Infeasible("plan has no swaps".to_string()));
        }
        let well_formed = borrows + swaps + repays == kinds.len()
            && borrows == repays
            && (borrows > 0) == self.borrowed;
        if !well_formed {
            return Err(EngineError::Infeasible("malformed atomic plan".to_string()));
        }
        Ok(())
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn swaps(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.kind == OperationKind::Swap)
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Opaque signing capability; secrets never leave the provider
pub trait Signer: Send + Sync {
    fn identity(&self) -> &str;

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AdapterError>;
}

/// What the engine knows when it hands a plan over for protected submission
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub opportunity: Opportunity,
    /// Minimum acceptable net profit, start-token units
    pub threshold: f64,
}

/// Terminal outcome of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Included {
        block: u64,
        realized_profit: f64,
        realized_cost: f64,
    },
    NotIncluded {
        reason: String,
    },
    Expired {
        last_block: u64,
    },
    SimulationFailed {
        reason: String,
    },
    /// Mempool risk aborted the attempt before submission
    Aborted {
        reason: String,
    },
    Infeasible {
        reason: String,
    },
}

impl AttemptOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, AttemptOutcome::Included { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            AttemptOutcome::Included { .. } => "included",
            AttemptOutcome::NotIncluded { .. } => "not_included",
            AttemptOutcome::Expired { .. } => "expired",
            AttemptOutcome::SimulationFailed { .. } => "simulation_failed",
            AttemptOutcome::Aborted { .. } => "aborted",
            AttemptOutcome::Infeasible { .. } => "infeasible",
        }
    }
}

/// Callback that takes an atomic plan to a terminal outcome
#[async_trait]
pub trait PlanExecutor: Send + Sync {
    async fn execute(&self, plan: AtomicPlan, context: ExecutionContext) -> Result<AttemptOutcome, EngineError>;
}

/// Record of one execution attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub opportunity_id: String,
    pub route: String,
    pub amount_in: f64,
    pub expected_net_profit: f64,
    pub lender: Option<String>,
    pub outcome: AttemptOutcome,
    pub finished_at: DateTime<Utc>,
}

impl ExecutionResult {
    pub fn new(opportunity: &Opportunity, lender: Option<String>, outcome: AttemptOutcome) -> Self {
        Self {
            opportunity_id: opportunity.id.clone(),
            route: opportunity.path.describe(),
            amount_in: opportunity.amount_in,
            expected_net_profit: opportunity.net_profit,
            lender,
            outcome,
            finished_at: Utc::now(),
        }
    }

    pub fn realized_profit(&self) -> Option<f64> {
        match self.outcome {
            AttemptOutcome::Included { realized_profit, .. } => Some(realized_profit),
            _ => None,
        }
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn swap(target: &str) -> Operation {
        Operation::new(OperationKind::Swap, target, "weth", 1.0).with_min_out(0.99)
    }

    #[test]
    fn test_borrowed_plan_order() {
        let plan = AtomicPlan::borrowed(
            vec![Operation::new(OperationKind::Borrow, "aave", "weth", 1.0)],
            vec![swap("v1"), swap("v2")],
            vec![Operation::new(OperationKind::Repay, "aave", "weth", 1.0009)],
        )
        .unwrap();
        let kinds: Vec<_> = plan.operations().iter().map(|op| op.kind).collect();
        assert_eq!(
            kinds,
            vec![OperationKind::Borrow, OperationKind::Swap, OperationKind::Swap, OperationKind::Repay]
        );
        assert_eq!(plan.swaps().count(), 2);
    }

    #[test]
    fn test_rejects_malformed_plans() {
        assert!(AtomicPlan::direct(Vec::new()).is_err());
        let repay_first = AtomicPlan::borrowed(
            vec![Operation::new(OperationKind::Repay, "aave", "weth", 1.0)],
            vec![swap("v1")],
            vec![Operation::new(OperationKind::Borrow, "aave", "weth", 1.0)],
        );
        assert!(repay_first.is_err());
        assert!(AtomicPlan::direct(vec![Operation::new(OperationKind::Borrow, "aave", "weth", 1.0)]).is_err());
        let unbalanced = AtomicPlan::borrowed(
            vec![Operation::new(OperationKind::Borrow, "aave", "weth", 1.0)],
            vec![swap("v1")],
            Vec::new(),
        );
        assert!(unbalanced.is_err());
    }

    #[test]
    fn test_operation_payload_serializes_as_hex() {
        let op = swap("v1").with_payload(vec![0xde, 0xad]);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["payload"], "dead");
        let back: Operation = serde_json::from_value(json).unwrap();
        assert_eq!(back, op);
    }
}
