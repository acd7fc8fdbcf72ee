//! Lending domain - atomic borrowing with lender failover

mod orchestrator;

pub use orchestrator::{LenderStats, LendingPolicy, LoanOrchestrator, LoanQuote};

use async_trait::async_trait;
use serde::Serialize;

use crate::domain::execution::Operation;
use crate::shared::errors::AdapterError;
use crate::shared::types::Token;

/// Lender integration consumed by the orchestrator
#[async_trait]
pub trait LenderAdapter: Send + Sync {
    fn id(&self) -> &str;

    async fn max_borrowable(&self, token: &Token) -> Result<f64, AdapterError>;

    async fn fee(&self, token: &Token, amount: f64) -> Result<f64, AdapterError>;

    fn build_borrow(&self, request: &LoanRequest) -> Result<Vec<Operation>, AdapterError>;

    fn build_repay(&self, request: &LoanRequest) -> Result<Vec<Operation>, AdapterError>;
}

/// One token to borrow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanLeg {
    pub token: Token,
    pub amount: f64,
}

/// What the engine wants to borrow for one attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoanSpec {
    pub opportunity_id: String,
    pub legs: Vec<LoanLeg>,
    /// Start-token units per accounting-token unit, for operation costs
    pub cost_rate: f64,
}

impl LoanSpec {
    pub fn single(opportunity_id: impl Into<String>, token: Token, amount: f64, cost_rate: f64) -> Self {
        Self {
            opportunity_id: opportunity_id.into(),
            legs: vec![LoanLeg { token, amount }],
            cost_rate,
        }
    }
}

/// Leg with the fee quoted by the chosen lender
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotedLeg {
    pub token: Token,
    pub amount: f64,
    pub fee: f64,
}

impl QuotedLeg {
    pub fn repayment(&self) -> f64 {
        self.amount + self.fee
    }
}

/// A loan bound to one lender and one attempt, consumed when the plan is built
#[derive(Debug)]
pub struct LoanRequest {
    pub nonce: String,
    pub lender: String,
    pub legs: Vec<QuotedLeg>,
}

impl LoanRequest {
    pub fn total_fee(&self) -> f64 {
        self.legs.iter().map(|l| l.fee).sum()
    }
}
