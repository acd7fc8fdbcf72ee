//! Top-level loop: scan -> size -> borrow -> protect -> observe

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::application::control::{ControlHandle, LivePolicy};
use crate::application::snapshot::{Abandonment, EngineSnapshot, LenderView};
use crate::domain::arbitrage::{Opportunity, PathFinder};
use crate::domain::capital::{
    allocate, available_capital, AllocationDecision, Reservation, TreasuryLedger, TreasuryProvider,
};
use crate::domain::cost::CostModel;
use crate::domain::execution::{AtomicPlan, AttemptOutcome, ExecutionContext, ExecutionResult, Operation};
use crate::domain::lending::{LoanOrchestrator, LoanSpec};
use crate::domain::market::MarketGraph;
use crate::domain::protection::ProtectionOptimizer;
use crate::shared::config::CoordinatorConfig;
use crate::shared::errors::EngineError;
use crate::shared::network::NetworkGate;
use crate::shared::types::bps_to_ratio;

/// Everything the coordinator drives
pub struct EngineParts {
    pub graph: Arc<MarketGraph>,
    pub cost_model: Arc<CostModel>,
    pub lending: Arc<LoanOrchestrator>,
    pub optimizer: Arc<ProtectionOptimizer>,
    pub treasury: Arc<dyn TreasuryProvider>,
    pub gate: NetworkGate,
    pub control: ControlHandle,
    pub config: CoordinatorConfig,
}

/// Why an attempt stopped before it reached the executor
struct Abandon {
    stage: &'static str,
    reason_code: &'static str,
    reason: String,
}

impl Abandon {
    fn new(stage: &'static str, reason_code: &'static str, reason: impl Into<String>) -> Self {
        Self {
            stage,
            reason_code,
            reason: reason.into(),
        }
    }

    fn from_error(stage: &'static str, err: &EngineError) -> Self {
        Self::new(stage, error_code(err), err.to_string())
    }
}

fn error_code(err: &EngineError) -> &'static str {
    match err {
        EngineError::QuoteUnavailable { .. } => "quote_unavailable",
        EngineError::Infeasible(_) => "infeasible",
        EngineError::SimulationRejected(_) => "simulation_rejected",
        EngineError::SubmissionExpired(_) => "submission_expired",
        EngineError::NetworkTransient(_) => "network_transient",
        EngineError::FatalConfiguration(_) => "fatal_configuration",
        EngineError::Stale(_) => "stale",
        EngineError::InvalidTransition { .. } => "invalid_transition",
        EngineError::Adapter(_) => "adapter_error",
    }
}

fn outcome_stage(outcome: &AttemptOutcome) -> &'static str {
    match outcome {
        AttemptOutcome::Included { .. } => "settlement",
        AttemptOutcome::Infeasible { .. } => "lending",
        AttemptOutcome::SimulationFailed { .. } => "simulation",
        AttemptOutcome::Aborted { .. } => "protection",
        AttemptOutcome::NotIncluded { .. } | AttemptOutcome::Expired { .. } => "submission",
    }
}

fn outcome_reason(outcome: &AttemptOutcome) -> String {
    match outcome {
        AttemptOutcome::Included { block, .. } => format!("included in block {block}"),
        AttemptOutcome::NotIncluded { reason }
        | AttemptOutcome::SimulationFailed { reason }
        | AttemptOutcome::Aborted { reason }
        | AttemptOutcome::Infeasible { reason } => reason.clone(),
        AttemptOutcome::Expired { last_block } => format!("target window elapsed at block {last_block}"),
    }
}

pub struct Coordinator {
    graph: Arc<MarketGraph>,
    cost_model: Arc<CostModel>,
    lending: Arc<LoanOrchestrator>,
    optimizer: Arc<ProtectionOptimizer>,
    treasury: Arc<dyn TreasuryProvider>,
    gate: NetworkGate,
    control: ControlHandle,
    config: CoordinatorConfig,
    /// Sole serialization point for treasury state
    ledger: tokio::sync::Mutex<TreasuryLedger>,
    open: RwLock<Vec<Opportunity>>,
    results: Mutex<VecDeque<ExecutionResult>>,
    abandoned: Mutex<VecDeque<Abandonment>>,
    /// Routes with an attempt in flight
    active_routes: Mutex<HashSet<String>>,
    cycles: AtomicU64,
}

impl Coordinator {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            graph: parts.graph,
            cost_model: parts.cost_model,
            lending: parts.lending,
            optimizer: parts.optimizer,
            treasury: parts.treasury,
            gate: parts.gate,
            control: parts.control,
            config: parts.config,
            ledger: tokio::sync::Mutex::new(TreasuryLedger::new()),
            open: RwLock::new(Vec::new()),
            results: Mutex::new(VecDeque::new()),
            abandoned: Mutex::new(VecDeque::new()),
            active_routes: Mutex::new(HashSet::new()),
            cycles: AtomicU64::new(0),
        }
    }

    pub fn control(&self) -> ControlHandle {
        self.control.clone()
    }

    pub fn graph(&self) -> &Arc<MarketGraph> {
        &self.graph
    }

    pub fn cost_model(&self) -> &Arc<CostModel> {
        &self.cost_model
    }

    /// Pull held balances for every start token into the ledger
    pub async fn sync_treasury(&self) {
        let tokens = self.control.policy().search.start_tokens;
        for token in tokens {
            match self.gate.call(|| self.treasury.available_balance(&token)).await {
                Ok(balance) => {
                    self.ledger.lock().await.set_balance(&token, balance);
                    debug!(%token, balance, "treasury balance synced");
                }
                Err(e) => warn!(%token, error = %e, "treasury balance unavailable"),
            }
        }
    }

    /// Refresh quotes and search every start token once
    pub async fn scan(&self) -> Vec<Opportunity> {
        let policy = self.control.policy();
        self.cost_model.prune(Utc::now());
        let report = self.graph.refresh().await;
        if report.quoted == 0 {
            warn!(unavailable = report.unavailable.len(), "no venue could be quoted this cycle");
        }

        let snapshot = self.graph.snapshot();
        let finder = PathFinder::new(Arc::clone(&self.cost_model), policy.search.clone());
        let mut found = Vec::new();
        for token in &policy.search.start_tokens {
            let (opportunities, stats) =
                finder.search_with_stats(&snapshot, token, policy.search.max_hops, policy.search.max_candidates);
            if stats.budget_exhausted {
                debug!(%token, depth = stats.max_depth_searched, "search budget exhausted");
            }
            found.extend(opportunities);
        }
        if !found.is_empty() {
            info!(
                opportunities = found.len(),
                best = found.iter().map(|o| o.net_profit).fold(f64::MIN, f64::max),
                "💰 opportunities found"
            );
        }
        *self.open.write() = found.clone();
        found
    }

    /// Run until stopped, the duration elapses or a fatal error occurs
    pub async fn run(self: Arc<Self>, duration: Option<Duration>) -> Result<EngineSnapshot, EngineError> {
        if self.graph.venues().is_empty() {
            return Err(EngineError::FatalConfiguration("no venues registered".to_string()));
        }
        self.sync_treasury().await;

        info!(
            interval_ms = self.config.scan_interval_ms,
            venues = self.graph.venues().len(),
            lenders = self.lending.lender_ids().len(),
            "🚀 coordinator started"
        );
        let deadline = duration.map(|d| Instant::now() + d);
        let mut ticker = tokio::time::interval(Duration::from_millis(self.config.scan_interval_ms.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts: JoinSet<Result<(), EngineError>> = JoinSet::new();
        let mut fatal: Option<EngineError> = None;

        loop {
            if self.control.is_stopped() {
                info!("stop requested");
                break;
            }
            if deadline.map_or(false, |d| Instant::now() >= d) {
                info!("run duration elapsed");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {
                    if self.control.is_paused() {
                        debug!("paused, skipping cycle");
                    } else {
                        self.cycle(&mut attempts).await;
                    }
                    self.write_snapshot().await;
                }
                Some(joined) = attempts.join_next(), if !attempts.is_empty() => {
                    if let Some(e) = Self::joined(joined) {
                        fatal = Some(e);
                        break;
                    }
                }
                _ = self.control.changed() => {}
                _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {}
            }
        }

        if fatal.is_some() {
            attempts.abort_all();
        }
        while let Some(joined) = attempts.join_next().await {
            if let Some(e) = Self::joined(joined) {
                fatal.get_or_insert(e);
            }
        }

        if let Some(path) = &self.cost_model.config().store_path {
            match self.cost_model.save(path) {
                Ok(()) => info!(path = %path, "cost model persisted"),
                Err(e) => warn!(path = %path, error = %e, "failed to persist cost model"),
            }
        }
        self.write_snapshot().await;
        let snapshot = self.snapshot().await;

        match fatal {
            Some(e) => {
                error!(error = %e, "coordinator halted");
                Err(e)
            }
            None => {
                info!(
                    cycles = snapshot.cycles,
                    results = snapshot.recent_results.len(),
                    realized_profit = snapshot.total_realized_profit(),
                    "coordinator stopped"
                );
                Ok(snapshot)
            }
        }
    }

    /// A fatal error from a finished attempt, if any
    fn joined(joined: Result<Result<(), EngineError>, tokio::task::JoinError>) -> Option<EngineError> {
        match joined {
            Ok(Ok(())) => None,
            Ok(Err(e)) if e.is_fatal() => Some(e),
            Ok(Err(e)) => {
                warn!(error = %e, "attempt failed");
                None
            }
            Err(e) if e.is_cancelled() => None,
            Err(e) => {
                error!(error = %e, "attempt task panicked");
                None
            }
        }
    }

    async fn cycle(self: &Arc<Self>, attempts: &mut JoinSet<Result<(), EngineError>>) {
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;
        let policy = self.control.policy();
        let found = self.scan().await;

        let slots = policy.allocation.concurrent_trade_limit.max(1).saturating_sub(attempts.len());
        let mut spawned = 0;
        for opportunity in found {
            if spawned >= slots {
                break;
            }
            let route = opportunity.path.describe();
            if !self.active_routes.lock().insert(route.clone()) {
                debug!(%route, "route already in flight");
                continue;
            }
            let this = Arc::clone(self);
            let policy = policy.clone();
            attempts.spawn(async move {
                let result = Arc::clone(&this).attempt(opportunity, policy).await;
                this.active_routes.lock().remove(&route);
                result
            });
            spawned += 1;
        }
        debug!(cycle, spawned, in_flight = attempts.len(), "cycle finished");
    }

    /// One opportunity end to end. Only fatal errors escape; everything else is
    /// recorded as a result or an abandonment.
    async fn attempt(self: Arc<Self>, opportunity: Opportunity, policy: LivePolicy) -> Result<(), EngineError> {
        let threshold = opportunity.threshold(policy.search.min_profit);
        let decision = match self.reserve(&opportunity, &policy).await {
            Ok(decision) => decision,
            Err(abandon) => {
                self.abandon(&opportunity, abandon, threshold);
                return Ok(());
            }
        };

        let executed = self.execute(&opportunity, &decision, &policy).await;

        let mut ledger = self.ledger.lock().await;
        ledger.release(&opportunity.id);
        match executed {
            Ok(result) => {
                if let Some(profit) = result.realized_profit() {
                    ledger.settle(opportunity.start_token(), profit);
                }
                drop(ledger);
                self.record_result(&opportunity, result, threshold);
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                drop(ledger);
                let stage = if matches!(e, EngineError::Stale(_)) { "execution" } else { "pricing" };
                self.abandon(&opportunity, Abandon::from_error(stage, &e), threshold);
                Ok(())
            }
        }
    }

    /// Size and reserve capital as one step under the ledger lock
    async fn reserve(&self, opportunity: &Opportunity, policy: &LivePolicy) -> Result<AllocationDecision, Abandon> {
        if opportunity.is_stale(Utc::now()) {
            return Err(Abandon::new("allocation", "stale", "deadline passed before sizing"));
        }
        let mut ledger = self.ledger.lock().await;
        let snapshot = ledger.snapshot(opportunity.start_token());
        let decision = allocate(opportunity, &snapshot, &policy.allocation)
            .map_err(|refusal| Abandon::new("allocation", refusal.reason_code(), refusal.to_string()))?;
        if !decision.reserve_ok {
            return Err(Abandon::new(
                "allocation",
                "reserve_floor",
                format!("{} would breach the reserve floor", decision.own_capital),
            ));
        }
        ledger
            .reserve(Reservation {
                opportunity_id: opportunity.id.clone(),
                token: opportunity.start_token().to_string(),
                amount: decision.own_capital,
                borrowed: decision.use_borrowed_capital,
            })
            .map_err(|e| Abandon::from_error("allocation", &e))?;
        Ok(decision)
    }

    /// Re-price at the allocated size, halving toward the policy minimum until it clears
    fn resize(&self, opportunity: &Opportunity, decision: &AllocationDecision, policy: &LivePolicy) -> Result<Opportunity, EngineError> {
        let finder = PathFinder::new(Arc::clone(&self.cost_model), policy.search.clone());
        let snapshot = self.graph.snapshot();
        let mut amount = decision.amount;
        let mut last = None;
        for _ in 0..=self.config.resize_steps {
            let repriced = finder.reprice(opportunity, amount, &snapshot)?;
            if repriced.clears(policy.search.min_profit) {
                return Ok(repriced);
            }
            last = Some(repriced.net_profit);
            amount /= 2.0;
            if amount < decision.min_amount {
                break;
            }
        }
        Err(EngineError::Infeasible(format!(
            "no size in [{:.6}, {:.6}] clears the threshold (last net {:.6})",
            decision.min_amount,
            decision.amount,
            last.unwrap_or(f64::NAN)
        )))
    }

    /// Whether the re-priced size still needs a loan. A borrowed reservation is
    /// switched to own capital when the smaller size fits in the free balance.
    async fn funding(
        &self,
        reservation_id: &str,
        sized: &Opportunity,
        decision: &AllocationDecision,
        policy: &LivePolicy,
    ) -> bool {
        if !decision.use_borrowed_capital {
            return false;
        }
        let mut ledger = self.ledger.lock().await;
        let Some(borrowed) = ledger.release(reservation_id) else {
            return true;
        };
        let snapshot = ledger.snapshot(&borrowed.token);
        if sized.amount_in <= available_capital(&snapshot, &policy.allocation) {
            let own = Reservation {
                opportunity_id: borrowed.opportunity_id.clone(),
                token: borrowed.token.clone(),
                amount: sized.amount_in,
                borrowed: false,
            };
            if ledger.reserve(own).is_ok() {
                debug!(opportunity = %reservation_id, amount = sized.amount_in, "re-priced size fits own capital, not borrowing");
                return false;
            }
        }
        if let Err(e) = ledger.reserve(borrowed) {
            warn!(opportunity = %reservation_id, error = %e, "borrowed reservation could not be restored");
        }
        true
    }

    /// Swap operations with slippage-bounded minimum outputs
    fn build_hops(&self, opportunity: &Opportunity, slippage_bps: u32) -> Result<Vec<Operation>, EngineError> {
        let tolerance = 1.0 - bps_to_ratio(slippage_bps);
        let hops = opportunity.path.hops();
        let mut ops = Vec::with_capacity(hops.len());
        for (i, hop) in hops.iter().enumerate() {
            let adapter = self
                .graph
                .adapter(&hop.exchange)
                .ok_or_else(|| EngineError::FatalConfiguration(format!("no adapter for exchange {}", hop.exchange)))?;
            let token = |id: &str| {
                self.graph
                    .token(id)
                    .ok_or_else(|| EngineError::Infeasible(format!("unknown token {id}")))
            };
            let mut min_out = hop.expected_out * tolerance;
            if i + 1 == hops.len() {
                min_out = min_out.max(opportunity.amount_in);
            }
            ops.push(adapter.build_hop(hop, &token(&hop.token_in)?, &token(&hop.token_out)?, min_out)?);
        }
        Ok(ops)
    }

    async fn execute(
        &self,
        opportunity: &Opportunity,
        decision: &AllocationDecision,
        policy: &LivePolicy,
    ) -> Result<ExecutionResult, EngineError> {
        let sized = self.resize(opportunity, decision, policy)?;
        let borrow = self.funding(&opportunity.id, &sized, decision, policy).await;
        let hops = self.build_hops(&sized, policy.slippage_bps)?;
        let context = ExecutionContext {
            threshold: sized.threshold(policy.search.min_profit),
            opportunity: sized.clone(),
        };
        debug!(
            opportunity = %sized.id,
            amount = sized.amount_in,
            net_profit = sized.net_profit,
            borrowed = borrow,
            "attempt sized"
        );

        if borrow {
            let token = self
                .graph
                .token(sized.start_token())
                .ok_or_else(|| EngineError::Infeasible(format!("unknown token {}", sized.start_token())))?;
            let spec = LoanSpec::single(sized.id.clone(), token, sized.amount_in, sized.accounting_rate);
            self.lending
                .borrow_and_execute(&spec, hops, context, self.optimizer.as_ref())
                .await
        } else {
            let plan = AtomicPlan::direct(hops)?;
            let outcome = self.optimizer.protect(plan, context).await?;
            Ok(ExecutionResult::new(&sized, None, outcome))
        }
    }

    fn record_result(&self, opportunity: &Opportunity, result: ExecutionResult, threshold: f64) {
        if result.outcome.is_success() {
            info!(
                opportunity = %result.opportunity_id,
                route = %result.route,
                lender = ?result.lender,
                realized_profit = ?result.realized_profit(),
                "✅ attempt included"
            );
        } else {
            let abandon = Abandon::new(
                outcome_stage(&result.outcome),
                result.outcome.label(),
                outcome_reason(&result.outcome),
            );
            let mut sized = opportunity.clone();
            sized.net_profit = result.expected_net_profit;
            self.abandon(&sized, abandon, threshold);
        }

        let mut results = self.results.lock();
        results.push_back(result);
        while results.len() > self.config.recent_results.max(1) {
            results.pop_front();
        }
    }

    fn abandon(&self, opportunity: &Opportunity, abandon: Abandon, threshold: f64) {
        warn!(
            opportunity = %opportunity.id,
            route = %opportunity.path.describe(),
            stage = abandon.stage,
            reason_code = abandon.reason_code,
            reason = %abandon.reason,
            net_profit = opportunity.net_profit,
            threshold,
            "opportunity abandoned"
        );
        let mut log = self.abandoned.lock();
        log.push_back(Abandonment {
            opportunity_id: opportunity.id.clone(),
            route: opportunity.path.describe(),
            stage: abandon.stage.to_string(),
            reason_code: abandon.reason_code.to_string(),
            reason: abandon.reason,
            net_profit: opportunity.net_profit,
            cost: opportunity.costs.total(),
            threshold,
            at: Utc::now(),
        });
        while log.len() > self.config.abandonment_log.max(1) {
            log.pop_front();
        }
    }

    pub async fn snapshot(&self) -> EngineSnapshot {
        let treasury = self.ledger.lock().await.allocations();
        EngineSnapshot {
            taken_at: Utc::now(),
            paused: self.control.is_paused(),
            cycles: self.cycles.load(Ordering::Relaxed),
            open_opportunities: self.open.read().clone(),
            recent_results: self.results.lock().iter().cloned().collect(),
            abandoned: self.abandoned.lock().iter().cloned().collect(),
            cost_model: self.cost_model.summary(),
            treasury,
            lenders: self
                .lending
                .lender_stats()
                .into_iter()
                .map(|(id, stats)| LenderView {
                    id,
                    attempts: stats.attempts,
                    successes: stats.successes,
                    reliability: stats.reliability(),
                })
                .collect(),
            recent_bundles: self.optimizer.recent_bundles(),
            policy: self.control.policy(),
        }
    }

    async fn write_snapshot(&self) {
        let Some(path) = &self.config.snapshot_path else {
            return;
        };
        if let Err(e) = self.snapshot().await.write_json(path) {
            warn!(path = %path, error = %e, "failed to write engine snapshot");
        }
    }
}
