//! Lender selection and the atomic borrow -> execute -> repay unit

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LenderAdapter, LoanRequest, LoanSpec, QuotedLeg};
use crate::domain::cost::{CostEstimate, CostModel, OperationType};
use crate::domain::execution::{AtomicPlan, AttemptOutcome, ExecutionContext, ExecutionResult, Operation, PlanExecutor};
use crate::shared::errors::EngineError;
use crate::shared::network::NetworkGate;
use crate::shared::utils::{cmp_f64, generate_id};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LendingPolicy {
    /// Total costs closer than this (start-token units) are a tie broken by reliability
    pub near_tie_margin: f64,
}

impl Default for LendingPolicy {
    fn default() -> Self {
        Self { near_tie_margin: 1e-6 }
    }
}

/// Execution history of one lender
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LenderStats {
    pub attempts: u64,
    pub successes: u64,
}

impl LenderStats {
    /// Success rate with a uniform prior, so unknown lenders score 0.5
    pub fn reliability(&self) -> f64 {
        (self.successes as f64 + 1.0) / (self.attempts as f64 + 2.0)
    }
}

/// A lender able to fund every leg, with its full cost
#[derive(Debug, Clone, PartialEq)]
pub struct LoanQuote {
    pub lender: String,
    pub legs: Vec<QuotedLeg>,
    pub fee: f64,
    /// Borrow + repay operation cost from the cost model
    pub operation_cost: CostEstimate,
    pub total_cost: f64,
    pub reliability: f64,
}

pub struct LoanOrchestrator {
    /// Priority order
    lenders: Vec<Arc<dyn LenderAdapter>>,
    gate: NetworkGate,
    cost_model: Arc<CostModel>,
    policy: LendingPolicy,
    stats: RwLock<HashMap<String, LenderStats>>,
}

impl LoanOrchestrator {
    pub fn new(
        lenders: Vec<Arc<dyn LenderAdapter>>,
        gate: NetworkGate,
        cost_model: Arc<CostModel>,
        policy: LendingPolicy,
    ) -> Self {
        Self {
            lenders,
            gate,
            cost_model,
            policy,
            stats: RwLock::new(HashMap::new()),
        }
    }

    pub fn lender_ids(&self) -> Vec<String> {
        self.lenders.iter().map(|l| l.id().to_string()).collect()
    }

    pub fn lender_stats(&self) -> Vec<(String, LenderStats)> {
        let stats = self.stats.read();
        self.lenders
            .iter()
            .map(|l| (l.id().to_string(), stats.get(l.id()).cloned().unwrap_or_default()))
            .collect()
    }

    pub fn record_outcome(&self, lender: &str, success: bool) {
        let mut stats = self.stats.write();
        let entry = stats.entry(lender.to_string()).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
    }

    fn reliability(&self, lender: &str) -> f64 {
        self.stats.read().get(lender).cloned().unwrap_or_default().reliability()
    }

    async fn quote_lender(&self, lender: &Arc<dyn LenderAdapter>, spec: &LoanSpec) -> Result<LoanQuote, String> {
        let mut legs = Vec::with_capacity(spec.legs.len());
        for leg in &spec.legs {
            let available = self
                .gate
                .call(|| lender.max_borrowable(&leg.token))
                .await
                .map_err(|e| e.to_string())?;
            if available < leg.amount {
                return Err(format!(
                    "insufficient liquidity for {}: {} < {}",
                    leg.token.symbol, available, leg.amount
                ));
            }
            let fee = self
                .gate
                .call(|| lender.fee(&leg.token, leg.amount))
                .await
                .map_err(|e| e.to_string())?;
            if !fee.is_finite() || fee < 0.0 {
                return Err(format!("invalid fee {fee} for {}", leg.token.symbol));
            }
            legs.push(QuotedLeg {
                token: leg.token.clone(),
                amount: leg.amount,
                fee,
            });
        }

        let fee: f64 = legs.iter().map(|l| l.fee).sum();
        let operation_cost = (self.cost_model.estimate(lender.id(), OperationType::Borrow)
            + self.cost_model.estimate(lender.id(), OperationType::Repay))
        .scaled(spec.cost_rate);
        Ok(LoanQuote {
            lender: lender.id().to_string(),
            legs,
            fee,
            operation_cost,
            total_cost: fee + operation_cost.total(),
            reliability: self.reliability(lender.id()),
        })
    }

    /// Zero-fee lender with liquidity first, otherwise the cheapest lender with liquidity
    pub async fn select_lender(&self, spec: &LoanSpec) -> Result<LoanQuote, EngineError> {
        if self.lenders.is_empty() {
            return Err(EngineError::FatalConfiguration("no lenders configured".to_string()));
        }
        if spec.legs.is_empty() || spec.legs.iter().any(|l| !(l.amount > 0.0)) {
            return Err(EngineError::Infeasible(format!(
                "loan for {} has no positive amount",
                spec.opportunity_id
            )));
        }

        let mut candidates = Vec::new();
        let mut rejections = Vec::new();
        for lender in &self.lenders {
            match self.quote_lender(lender, spec).await {
                Ok(quote) if quote.fee == 0.0 => {
                    debug!(lender = %quote.lender, opportunity = %spec.opportunity_id, "zero-fee lender has liquidity");
                    return Ok(quote);
                }
                Ok(quote) => candidates.push(quote),
                Err(reason) => {
                    debug!(lender = lender.id(), opportunity = %spec.opportunity_id, %reason, "lender skipped");
                    rejections.push(format!("{}: {}", lender.id(), reason));
                }
            }
        }

        if candidates.is_empty() {
            return Err(EngineError::Infeasible(format!(
                "no lender can fund {}: {}",
                spec.opportunity_id,
                rejections.join("; ")
            )));
        }

        // stable sort keeps priority order among equal costs
        candidates.sort_by(|a, b| cmp_f64(a.total_cost, b.total_cost));
        if candidates.len() >= 2
            && candidates[1].total_cost - candidates[0].total_cost < self.policy.near_tie_margin
            && candidates[1].reliability > candidates[0].reliability
        {
            candidates.swap(0, 1);
        }
        Ok(candidates.swap_remove(0))
    }

    fn lender(&self, id: &str) -> Result<Arc<dyn LenderAdapter>, EngineError> {
        self.lenders
            .iter()
            .find(|l| l.id() == id)
            .cloned()
            .ok_or_else(|| EngineError::FatalConfiguration(format!("lender {id} disappeared")))
    }

    /// Consume the request into borrow -> swaps -> repay. The last swap into each
    /// borrowed token must return at least principal plus fee.
    fn build_plan(lender: &dyn LenderAdapter, request: LoanRequest, mut swaps: Vec<Operation>) -> Result<AtomicPlan, EngineError> {
        let borrows = lender.build_borrow(&request)?;
        let repays = lender.build_repay(&request)?;
        for leg in &request.legs {
            let last = swaps
                .iter_mut()
                .rev()
                .find(|op| op.token == leg.token.id)
                .ok_or_else(|| EngineError::Infeasible(format!("no swap returns borrowed {}", leg.token.symbol)))?;
            last.min_amount_out = last.min_amount_out.max(leg.repayment());
        }
        AtomicPlan::borrowed(borrows, swaps, repays)
    }

    /// Borrow, run `hops` through `executor`, repay. Lender-side infeasibility is a
    /// typed `Infeasible` outcome; missing lenders are fatal.
    pub async fn borrow_and_execute(
        &self,
        spec: &LoanSpec,
        hops: Vec<Operation>,
        context: ExecutionContext,
        executor: &dyn PlanExecutor,
    ) -> Result<ExecutionResult, EngineError> {
        if context.opportunity.is_stale(Utc::now()) {
            return Err(EngineError::Stale(context.opportunity.id.clone()));
        }
        let quote = match self.select_lender(spec).await {
            Ok(quote) => quote,
            Err(EngineError::Infeasible(reason)) => {
                warn!(opportunity = %spec.opportunity_id, %reason, "loan infeasible");
                return Ok(ExecutionResult::new(
                    &context.opportunity,
                    None,
                    AttemptOutcome::Infeasible { reason },
                ));
            }
            Err(e) => return Err(e),
        };

        let opportunity = context
            .opportunity
            .clone()
            .with_borrowing(quote.fee, quote.operation_cost);
        if opportunity.net_profit <= context.threshold {
            let reason = format!(
                "net profit {:.6} after loan fee {:.6} does not clear {:.6}",
                opportunity.net_profit, quote.fee, context.threshold
            );
            warn!(opportunity = %opportunity.id, lender = %quote.lender, %reason, "loan makes attempt unprofitable");
            return Ok(ExecutionResult::new(
                &opportunity,
                Some(quote.lender),
                AttemptOutcome::Infeasible { reason },
            ));
        }

        let lender = self.lender(&quote.lender)?;
        let request = LoanRequest {
            nonce: generate_id(),
            lender: quote.lender.clone(),
            legs: quote.legs.clone(),
        };
        let nonce = request.nonce.clone();
        let total_fee = request.total_fee();
        let plan = match Self::build_plan(lender.as_ref(), request, hops) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(opportunity = %opportunity.id, lender = %quote.lender, error = %e, "loan plan construction failed");
                return Ok(ExecutionResult::new(
                    &opportunity,
                    Some(quote.lender),
                    AttemptOutcome::Infeasible { reason: e.to_string() },
                ));
            }
        };

        info!(
            opportunity = %opportunity.id,
            lender = %quote.lender,
            loan = %nonce,
            fee = total_fee,
            net_profit = opportunity.net_profit,
            "executing borrowed plan"
        );
        let outcome = executor
            .execute(
                plan,
                ExecutionContext {
                    opportunity: opportunity.clone(),
                    threshold: context.threshold,
                },
            )
            .await?;
        self.record_outcome(&quote.lender, outcome.is_success());
        Ok(ExecutionResult::new(&opportunity, Some(quote.lender), outcome))
    }
}
