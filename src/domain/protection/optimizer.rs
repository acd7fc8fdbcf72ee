//! Simulate, bid, submit privately and watch for inclusion

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    BlockRange, Bundle, BundleState, BundleStatus, FeeBidPolicy, MempoolObserver, MempoolRisk, MempoolRiskPolicy,
    NetworkConditions, RiskDecision, SimResult, SubmissionChannel, SubmissionHandle,
};
use crate::domain::arbitrage::Opportunity;
use crate::domain::cost::{CostModel, CostSample, OperationType, BUNDLE_VENUE};
use crate::domain::execution::{
    AtomicPlan, AttemptOutcome, ExecutionContext, NonceAllocator, OperationKind, PlanExecutor, Signer,
};
use crate::shared::errors::EngineError;
use crate::shared::network::NetworkGate;
use crate::shared::types::TokenId;

const RECENT_BUNDLES: usize = 64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    /// Blocks after the current one the bundle targets
    pub target_window_blocks: u64,
    pub poll_interval_ms: u64,
    /// Hard bound on status polls when the chain head cannot be read
    pub max_status_polls: u32,
    pub fingerprint_memory: usize,
    pub fee_bid: FeeBidPolicy,
    pub mempool: MempoolRiskPolicy,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            target_window_blocks: 3,
            poll_interval_ms: 500,
            max_status_polls: 120,
            fingerprint_memory: 4_096,
            fee_bid: FeeBidPolicy::default(),
            mempool: MempoolRiskPolicy::default(),
        }
    }
}

/// Read-only view of a recent bundle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BundleSummary {
    pub id: String,
    pub opportunity_id: String,
    pub fingerprint: String,
    pub state: BundleState,
    pub history: Vec<BundleState>,
    pub fee_bid: f64,
    pub target: Option<BlockRange>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct SimulatedProfit {
    output: f64,
    gas: f64,
    /// Before the priority fee
    net: f64,
}

enum Settlement {
    Included(u64),
    NotIncluded(String),
    Expired(u64),
}

#[derive(Default)]
struct Fingerprints {
    seen: HashSet<String>,
    order: VecDeque<String>,
}

pub struct ProtectionOptimizer {
    channel: Arc<dyn SubmissionChannel>,
    mempool: Option<Arc<dyn MempoolObserver>>,
    signer: Arc<dyn Signer>,
    nonces: Arc<NonceAllocator>,
    cost_model: Arc<CostModel>,
    gate: NetworkGate,
    config: RwLock<ProtectionConfig>,
    fingerprints: Mutex<Fingerprints>,
    recent: Mutex<VecDeque<BundleSummary>>,
}

impl ProtectionOptimizer {
    pub fn new(
        channel: Arc<dyn SubmissionChannel>,
        mempool: Option<Arc<dyn MempoolObserver>>,
        signer: Arc<dyn Signer>,
        nonces: Arc<NonceAllocator>,
        cost_model: Arc<CostModel>,
        gate: NetworkGate,
        config: ProtectionConfig,
    ) -> Result<Self, EngineError> {
        if !channel.is_private() {
            return Err(EngineError::FatalConfiguration(format!(
                "submission channel {} is public",
                channel.name()
            )));
        }
        config.fee_bid.validate().map_err(EngineError::FatalConfiguration)?;
        Ok(Self {
            channel,
            mempool,
            signer,
            nonces,
            cost_model,
            gate,
            config: RwLock::new(config),
            fingerprints: Mutex::new(Fingerprints::default()),
            recent: Mutex::new(VecDeque::new()),
        })
    }

    pub fn config(&self) -> ProtectionConfig {
        self.config.read().clone()
    }

    pub fn set_fee_policy(&self, fee_bid: FeeBidPolicy) -> Result<(), String> {
        fee_bid.validate()?;
        self.config.write().fee_bid = fee_bid;
        Ok(())
    }

    pub fn recent_bundles(&self) -> Vec<BundleSummary> {
        self.recent.lock().iter().cloned().collect()
    }

    pub fn has_submitted(&self, fingerprint: &str) -> bool {
        self.fingerprints.lock().seen.contains(fingerprint)
    }

    /// Atomically mark a fingerprint as submitted; false if it already was
    fn claim_fingerprint(&self, fingerprint: &str, memory: usize) -> bool {
        let mut fps = self.fingerprints.lock();
        if !fps.seen.insert(fingerprint.to_string()) {
            return false;
        }
        fps.order.push_back(fingerprint.to_string());
        while fps.order.len() > memory.max(1) {
            if let Some(old) = fps.order.pop_front() {
                fps.seen.remove(&old);
            }
        }
        true
    }

    fn release_fingerprint(&self, fingerprint: &str) {
        let mut fps = self.fingerprints.lock();
        if fps.seen.remove(fingerprint) {
            fps.order.retain(|f| f != fingerprint);
        }
    }

    fn remember(&self, bundle: &Bundle, fingerprint: &str, reason: Option<String>) {
        let mut recent = self.recent.lock();
        recent.push_back(BundleSummary {
            id: bundle.id.clone(),
            opportunity_id: bundle.opportunity_id.clone(),
            fingerprint: fingerprint.to_string(),
            state: bundle.state(),
            history: bundle.history(),
            fee_bid: bundle.fee_bid,
            target: bundle.target,
            reason,
        });
        while recent.len() > RECENT_BUNDLES {
            recent.pop_front();
        }
    }

    fn evaluate_simulation(bundle: &Bundle, opportunity: &Opportunity, sim: &SimResult) -> Result<SimulatedProfit, String> {
        if !sim.success {
            return Err(sim
                .revert_reason
                .clone()
                .unwrap_or_else(|| "bundle reverted in simulation".to_string()));
        }
        let swaps: Vec<_> = bundle.plan.swaps().collect();
        if sim.swap_outputs.len() != swaps.len() {
            return Err(format!(
                "simulation returned {} swap outputs for {} swaps",
                sim.swap_outputs.len(),
                swaps.len()
            ));
        }
        for (op, out) in swaps.iter().zip(&sim.swap_outputs) {
            if *out < op.min_amount_out {
                return Err(format!(
                    "swap on {} returns {:.8} below minimum {:.8}",
                    op.target, out, op.min_amount_out
                ));
            }
        }

        let output = sim.swap_outputs.last().copied().unwrap_or(0.0);
        let gas = if sim.operation_costs.is_empty() {
            opportunity.costs.swaps.total() + opportunity.costs.borrowing.total()
        } else {
            sim.operation_costs.iter().sum::<f64>() * opportunity.accounting_rate
        };
        let net = output - opportunity.amount_in - opportunity.costs.loan_fee - gas;
        Ok(SimulatedProfit { output, gas, net })
    }

    /// Feed observed per-operation costs and the paid bid back into the cost model
    fn record_samples(&self, bundle: &Bundle, opportunity: &Opportunity, sim: &SimResult, success: bool) {
        let rate = opportunity.accounting_rate;
        if sim.operation_costs.len() == bundle.plan.len() {
            for (op, actual) in bundle.plan.operations().iter().zip(&sim.operation_costs) {
                let operation = match op.kind {
                    OperationKind::Borrow => OperationType::Borrow,
                    OperationKind::Swap => OperationType::Swap,
                    OperationKind::Repay => OperationType::Repay,
                };
                let predicted = self.cost_model.estimate(&op.target, operation).expected;
                self.cost_model
                    .record(CostSample::new(op.target.clone(), operation, predicted, *actual, success));
            }
        }
        if bundle.state() == BundleState::Included && rate > 0.0 {
            let predicted = self
                .cost_model
                .estimate(BUNDLE_VENUE, OperationType::Submission)
                .expected;
            self.cost_model.record(CostSample::new(
                BUNDLE_VENUE,
                OperationType::Submission,
                predicted,
                bundle.fee_bid / rate,
                success,
            ));
        }
    }

    fn fail_simulation(
        &self,
        mut bundle: Bundle,
        fingerprint: &str,
        opportunity: &Opportunity,
        sim: &SimResult,
        reason: String,
    ) -> Result<AttemptOutcome, EngineError> {
        bundle.transition(BundleState::SimulationFailed)?;
        self.record_samples(&bundle, opportunity, sim, false);
        info!(opportunity = %opportunity.id, bundle = %bundle.id, %reason, "simulation rejected bundle");
        self.remember(&bundle, fingerprint, Some(reason.clone()));
        Ok(AttemptOutcome::SimulationFailed { reason })
    }

    async fn assess_mempool(&self, opportunity: &Opportunity, net: f64, policy: &MempoolRiskPolicy) -> RiskDecision {
        let Some(observer) = &self.mempool else {
            return policy.decide(MempoolRisk::Clear, f64::INFINITY);
        };
        let mut tokens: Vec<TokenId> = opportunity.path.hops().iter().map(|h| h.token_in.clone()).collect();
        tokens.sort();
        tokens.dedup();

        let risk = match self.gate.call(|| observer.signals(&tokens)).await {
            Ok(signals) => policy.grade(&signals),
            Err(e) => {
                warn!(opportunity = %opportunity.id, error = %e, "mempool signals unavailable, assuming elevated risk");
                MempoolRisk::Elevated
            }
        };
        let margin = if opportunity.amount_in > 0.0 { net / opportunity.amount_in } else { 0.0 };
        let decision = policy.decide(risk, margin);
        debug!(opportunity = %opportunity.id, ?risk, margin, ?decision, "mempool risk assessed");
        decision
    }

    async fn monitor(
        &self,
        bundle: &mut Bundle,
        handle: &SubmissionHandle,
        target: BlockRange,
        config: &ProtectionConfig,
    ) -> Result<Settlement, EngineError> {
        let mut last_block = target.start.saturating_sub(1);
        for _ in 0..config.max_status_polls.max(1) {
            tokio::time::sleep(Duration::from_millis(config.poll_interval_ms)).await;

            match self.gate.call(|| self.channel.status(handle)).await {
                Ok(BundleStatus::Included { block }) => {
                    bundle.transition(BundleState::Included)?;
                    return Ok(Settlement::Included(block));
                }
                Ok(BundleStatus::Dropped) => {
                    bundle.transition(BundleState::NotIncluded)?;
                    return Ok(Settlement::NotIncluded("relay dropped the bundle".to_string()));
                }
                Ok(BundleStatus::Expired) => {
                    bundle.transition(BundleState::Expired)?;
                    return Ok(Settlement::Expired(last_block.max(target.end)));
                }
                Ok(BundleStatus::Pending) => {}
                Err(e) => warn!(bundle = %bundle.id, error = %e, "bundle status unavailable"),
            }

            match self.gate.call(|| self.channel.current_block()).await {
                Ok(block) => {
                    last_block = block;
                    if target.elapsed_at(block) {
                        bundle.transition(BundleState::Expired)?;
                        return Ok(Settlement::Expired(block));
                    }
                }
                Err(e) => warn!(bundle = %bundle.id, error = %e, "chain head unavailable"),
            }
        }
        bundle.transition(BundleState::Expired)?;
        Ok(Settlement::Expired(last_block))
    }

    /// Take a plan through Built -> Simulated -> Submitted -> terminal
    pub async fn protect(&self, plan: AtomicPlan, context: ExecutionContext) -> Result<AttemptOutcome, EngineError> {
        let config = self.config();
        let opportunity = &context.opportunity;
        if opportunity.is_stale(Utc::now()) {
            return Err(EngineError::Stale(opportunity.id.clone()));
        }

        // simulated under the next free nonce; one is only taken right before submission
        let identity = self.signer.identity().to_string();
        let pending_nonce = self.nonces.peek(&identity).await;
        let mut bundle = Bundle::new(&opportunity.id, plan, identity.clone(), pending_nonce);
        let fingerprint = bundle.fingerprint();
        if self.has_submitted(&fingerprint) {
            let reason = format!("identical bundle {fingerprint} already submitted");
            warn!(opportunity = %opportunity.id, %reason, "refusing resubmission");
            return Ok(AttemptOutcome::Aborted { reason });
        }
        bundle.signature = self.signer.sign(&bundle.signing_payload()?)?;

        let sim = self.gate.call(|| self.channel.simulate(&bundle)).await?;
        bundle.transition(BundleState::Simulated)?;

        let profit = match Self::evaluate_simulation(&bundle, opportunity, &sim) {
            Ok(profit) => profit,
            Err(reason) => return self.fail_simulation(bundle, &fingerprint, opportunity, &sim, reason),
        };
        debug!(
            opportunity = %opportunity.id,
            expected_output = opportunity.expected_output,
            simulated_output = profit.output,
            simulated_net = profit.net,
            "bundle simulated"
        );
        if profit.net <= context.threshold {
            let reason = format!(
                "simulated net profit {:.8} does not clear {:.8} (estimate was {:.8})",
                profit.net, context.threshold, opportunity.net_profit
            );
            return self.fail_simulation(bundle, &fingerprint, opportunity, &sim, reason);
        }

        let strategy = match self.assess_mempool(opportunity, profit.net, &config.mempool).await {
            RiskDecision::Proceed(strategy) => strategy,
            RiskDecision::Abort(reason) => {
                bundle.transition(BundleState::SimulationFailed)?;
                info!(opportunity = %opportunity.id, %reason, "aborted on mempool risk");
                self.remember(&bundle, &fingerprint, Some(reason.clone()));
                return Ok(AttemptOutcome::Aborted { reason });
            }
        };

        let conditions = match self.gate.call(|| self.channel.network_conditions()).await {
            Ok(conditions) => conditions,
            Err(e) => {
                warn!(error = %e, "network conditions unavailable, bidding for idle network");
                NetworkConditions::default()
            }
        };
        let rate = opportunity.accounting_rate;
        let raw_bid = config.fee_bid.bid(strategy, profit.net, conditions, rate);
        let Some(bid) = config.fee_bid.fit(raw_bid, profit.net, context.threshold, rate) else {
            let reason = format!("minimum priority fee does not fit in simulated profit {:.8}", profit.net);
            return self.fail_simulation(bundle, &fingerprint, opportunity, &sim, reason);
        };
        bundle.fee_bid = bid;

        let current = self.gate.call(|| self.channel.current_block()).await?;
        let target = BlockRange::after(current, config.target_window_blocks);
        bundle.target = Some(target);

        if !self.claim_fingerprint(&fingerprint, config.fingerprint_memory) {
            let reason = format!("identical bundle {fingerprint} already submitted");
            warn!(opportunity = %opportunity.id, %reason, "refusing resubmission");
            return Ok(AttemptOutcome::Aborted { reason });
        }

        let nonce = self.nonces.allocate(&identity).await;
        let submitted: Result<SubmissionHandle, EngineError> = async {
            if nonce != bundle.nonce {
                bundle.nonce = nonce;
                bundle.signature = self.signer.sign(&bundle.signing_payload()?)?;
            }
            self.gate.call(|| self.channel.submit(&bundle, target)).await
        }
        .await;
        let handle = match submitted {
            Ok(handle) => handle,
            Err(e) => {
                self.release_fingerprint(&fingerprint);
                self.nonces.release(&identity, nonce).await;
                warn!(opportunity = %opportunity.id, bundle = %bundle.id, error = %e, "submission failed");
                return Err(e);
            }
        };
        bundle.transition(BundleState::Submitted)?;
        info!(
            opportunity = %opportunity.id,
            bundle = %bundle.id,
            channel = self.channel.name(),
            fee_bid = bid,
            ?strategy,
            target_start = target.start,
            target_end = target.end,
            "bundle submitted"
        );

        let settlement = self.monitor(&mut bundle, &handle, target, &config).await?;
        let outcome = match settlement {
            Settlement::Included(block) => {
                self.record_samples(&bundle, opportunity, &sim, true);
                let realized_profit = profit.net - bid;
                info!(opportunity = %opportunity.id, bundle = %bundle.id, block, realized_profit, "bundle included");
                self.remember(&bundle, &fingerprint, None);
                AttemptOutcome::Included {
                    block,
                    realized_profit,
                    realized_cost: opportunity.costs.loan_fee + profit.gas + bid,
                }
            }
            Settlement::NotIncluded(reason) => {
                info!(opportunity = %opportunity.id, bundle = %bundle.id, %reason, "bundle not included");
                self.remember(&bundle, &fingerprint, Some(reason.clone()));
                AttemptOutcome::NotIncluded { reason }
            }
            Settlement::Expired(last_block) => {
                info!(opportunity = %opportunity.id, bundle = %bundle.id, last_block, "target window elapsed");
                self.remember(&bundle, &fingerprint, Some(EngineError::SubmissionExpired(bundle.id.clone()).to_string()));
                AttemptOutcome::Expired { last_block }
            }
        };
        Ok(outcome)
    }
}

#[async_trait]
impl PlanExecutor for ProtectionOptimizer {
    async fn execute(&self, plan: AtomicPlan, context: ExecutionContext) -> Result<AttemptOutcome, EngineError> {
        self.protect(plan, context).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbitrage::{CostBreakdown, Hop, Path};
    use crate::domain::cost::{CostEstimate, CostModelConfig};
    use crate::domain::execution::Operation;
    use crate::domain::protection::MempoolSignal;
    use crate::shared::errors::AdapterError;
    use crate::shared::retry::BackoffPolicy;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

    struct TestSigner;

    impl Signer for TestSigner {
        fn identity(&self) -> &str {
            "searcher"
        }

        fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AdapterError> {
            Ok(payload.iter().rev().take(8).copied().collect())
        }
    }

    /// Scriptable private channel: fixed simulation, fixed inclusion behaviour
    struct ScriptedChannel {
        private: bool,
        sim: SimResult,
        include: bool,
        head: AtomicU64,
        submissions: AtomicUsize,
        /// Submits left to reject with a transport error
        failing_submits: AtomicUsize,
    }

    impl ScriptedChannel {
        fn new(sim: SimResult, include: bool) -> Arc<Self> {
            Arc::new(Self {
                private: true,
                sim,
                include,
                head: AtomicU64::new(100),
                submissions: AtomicUsize::new(0),
                failing_submits: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SubmissionChannel for ScriptedChannel {
        fn name(&self) -> &str {
            "scripted"
        }

        fn is_private(&self) -> bool {
            self.private
        }

        async fn current_block(&self) -> Result<u64, AdapterError> {
            // every head query advances the chain by one block
            Ok(self.head.fetch_add(1, Ordering::SeqCst))
        }

        async fn network_conditions(&self) -> Result<NetworkConditions, AdapterError> {
            Ok(NetworkConditions { congestion: 0.0 })
        }

        async fn simulate(&self, _bundle: &Bundle) -> Result<SimResult, AdapterError> {
            Ok(self.sim.clone())
        }

        async fn submit(&self, bundle: &Bundle, _target: BlockRange) -> Result<SubmissionHandle, AdapterError> {
            if self
                .failing_submits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AdapterError::Transport("relay unreachable".to_string()));
            }
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(SubmissionHandle {
                bundle_id: bundle.id.clone(),
                reference: format!("ref-{}", bundle.nonce),
            })
        }

        async fn status(&self, _handle: &SubmissionHandle) -> Result<BundleStatus, AdapterError> {
            if self.include {
                Ok(BundleStatus::Included {
                    block: self.head.load(Ordering::SeqCst),
                })
            } else {
                Ok(BundleStatus::Pending)
            }
        }
    }

    struct NoisyMempool;

    #[async_trait]
    impl MempoolObserver for NoisyMempool {
        async fn signals(&self, tokens: &[TokenId]) -> Result<Vec<MempoolSignal>, AdapterError> {
            Ok(tokens
                .iter()
                .map(|t| MempoolSignal {
                    token: t.clone(),
                    suspicious_txs: 3,
                    sandwich_patterns: 1,
                })
                .collect())
        }
    }

    fn opportunity() -> Opportunity {
        let hop = |venue: &str, a: &str, b: &str, amount_in: f64, expected_out: f64| Hop {
            venue_id: venue.to_string(),
            exchange: "uni".to_string(),
            fee_bps: 5,
            token_in: a.to_string(),
            token_out: b.to_string(),
            amount_in,
            expected_out,
        };
        let path = Path::new(
            vec![hop("v1", "weth", "usdc", 1.0, 2_000.0), hop("v2", "usdc", "weth", 2_000.0, 1.02)],
            CostEstimate::zero(),
        )
        .unwrap();
        Opportunity::new(
            "opp-1".to_string(),
            path,
            CostBreakdown::new(CostEstimate::zero(), CostEstimate::zero()),
            1.0,
            60_000,
        )
    }

    fn plan() -> AtomicPlan {
        AtomicPlan::direct(vec![
            Operation::new(OperationKind::Swap, "v1", "usdc", 1.0).with_min_out(1_990.0),
            Operation::new(OperationKind::Swap, "v2", "weth", 2_000.0).with_min_out(1.0),
        ])
        .unwrap()
    }

    fn sim(final_out: f64) -> SimResult {
        SimResult {
            success: true,
            revert_reason: None,
            swap_outputs: vec![2_000.0, final_out],
            operation_costs: vec![0.001, 0.001],
        }
    }

    fn optimizer(channel: Arc<ScriptedChannel>, mempool: Option<Arc<dyn MempoolObserver>>) -> ProtectionOptimizer {
        ProtectionOptimizer::new(
            channel,
            mempool,
            Arc::new(TestSigner),
            Arc::new(NonceAllocator::new()),
            Arc::new(CostModel::new(CostModelConfig::default())),
            NetworkGate::new(4, Duration::from_secs(1), BackoffPolicy::no_retry()),
            ProtectionConfig {
                poll_interval_ms: 1,
                ..ProtectionConfig::default()
            },
        )
        .unwrap()
    }

    fn context() -> ExecutionContext {
        ExecutionContext {
            opportunity: opportunity(),
            threshold: 0.0,
        }
    }

    #[tokio::test]
    async fn test_included_bundle_reports_realized_profit() {
        let channel = ScriptedChannel::new(sim(1.02), true);
        let optimizer = optimizer(channel.clone(), None);
        let outcome = optimizer.protect(plan(), context()).await.unwrap();

        match outcome {
            AttemptOutcome::Included { realized_profit, realized_cost, .. } => {
                // 0.02 gross - 0.002 gas, minus a 25% share as priority fee
                assert!((realized_profit - 0.0135).abs() < 1e-9);
                assert!((realized_cost - 0.0065).abs() < 1e-9);
            }
            other => panic!("expected inclusion, got {other:?}"),
        }
        let summary = &optimizer.recent_bundles()[0];
        assert_eq!(
            summary.history,
            vec![
                BundleState::Built,
                BundleState::Simulated,
                BundleState::Submitted,
                BundleState::Included
            ]
        );
        // actual costs fed back
        assert_eq!(optimizer.cost_model.records().len(), 3);
    }

    #[tokio::test]
    async fn test_simulation_shortfall_fails_before_submission() {
        let channel = ScriptedChannel::new(sim(1.0 * 0.95 * 1.02), true);
        let optimizer = optimizer(channel.clone(), None);
        let outcome = optimizer.protect(plan(), context()).await.unwrap();

        assert!(matches!(outcome, AttemptOutcome::SimulationFailed { .. }));
        assert_eq!(channel.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(optimizer.recent_bundles()[0].state, BundleState::SimulationFailed);
    }

    #[tokio::test]
    async fn test_unsubmitted_bundles_leave_the_nonce_unused() {
        let short = optimizer(ScriptedChannel::new(sim(1.0 * 0.95 * 1.02), true), None);
        let outcome = short.protect(plan(), context()).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::SimulationFailed { .. }));
        assert_eq!(short.nonces.peek("searcher").await, 0);

        let watched = optimizer(ScriptedChannel::new(sim(1.005), true), Some(Arc::new(NoisyMempool)));
        let outcome = watched.protect(plan(), context()).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Aborted { .. }));
        assert_eq!(watched.nonces.peek("searcher").await, 0);

        let landed = optimizer(ScriptedChannel::new(sim(1.02), true), None);
        landed.protect(plan(), context()).await.unwrap();
        assert_eq!(landed.nonces.peek("searcher").await, 1);
        // refused duplicate takes no nonce either
        let again = landed.protect(plan(), context()).await.unwrap();
        assert!(matches!(again, AttemptOutcome::Aborted { .. }));
        assert_eq!(landed.nonces.peek("searcher").await, 1);
    }

    #[tokio::test]
    async fn test_failed_submission_can_be_retried() {
        let channel = ScriptedChannel::new(sim(1.02), true);
        channel.failing_submits.store(1, Ordering::SeqCst);
        let optimizer = optimizer(channel.clone(), None);
        let fingerprint = Bundle::new("opp-1", plan(), "searcher", 0).fingerprint();

        let err = optimizer.protect(plan(), context()).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
        assert!(!optimizer.has_submitted(&fingerprint));
        assert_eq!(optimizer.nonces.peek("searcher").await, 0);

        let outcome = optimizer.protect(plan(), context()).await.unwrap();
        assert!(outcome.is_success(), "{outcome:?}");
        assert!(optimizer.has_submitted(&fingerprint));
        assert_eq!(channel.submissions.load(Ordering::SeqCst), 1);
        assert_eq!(optimizer.nonces.peek("searcher").await, 1);
    }

    #[tokio::test]
    async fn test_revert_fails_simulation() {
        let channel = ScriptedChannel::new(SimResult::reverted("hop 2 reverted"), true);
        let optimizer = optimizer(channel.clone(), None);
        let outcome = optimizer.protect(plan(), context()).await.unwrap();
        assert_eq!(
            outcome,
            AttemptOutcome::SimulationFailed {
                reason: "hop 2 reverted".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_window_elapses_to_expired_and_blocks_resubmission() {
        let channel = ScriptedChannel::new(sim(1.02), false);
        let optimizer = optimizer(channel.clone(), None);

        let outcome = optimizer.protect(plan(), context()).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Expired { .. }));
        assert_eq!(optimizer.recent_bundles()[0].state, BundleState::Expired);

        let again = optimizer.protect(plan(), context()).await.unwrap();
        assert!(matches!(again, AttemptOutcome::Aborted { .. }));
        assert_eq!(channel.submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_hostile_mempool_aborts_low_margin() {
        let channel = ScriptedChannel::new(sim(1.005), true);
        let optimizer = optimizer(channel.clone(), Some(Arc::new(NoisyMempool)));
        let outcome = optimizer.protect(plan(), context()).await.unwrap();
        assert!(matches!(outcome, AttemptOutcome::Aborted { .. }));
        assert_eq!(channel.submissions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_opportunity_is_cancelled() {
        let channel = ScriptedChannel::new(sim(1.02), true);
        let optimizer = optimizer(channel, None);
        let mut ctx = context();
        ctx.opportunity.deadline = Utc::now() - chrono::Duration::seconds(1);
        let result = optimizer.protect(plan(), ctx).await;
        assert!(matches!(result, Err(EngineError::Stale(_))));
    }

    #[tokio::test]
    async fn test_public_channel_rejected() {
        let channel = Arc::new(ScriptedChannel {
            private: false,
            sim: sim(1.02),
            include: true,
            head: AtomicU64::new(0),
            submissions: AtomicUsize::new(0),
            failing_submits: AtomicUsize::new(0),
        });
        let result = ProtectionOptimizer::new(
            channel,
            None,
            Arc::new(TestSigner),
            Arc::new(NonceAllocator::new()),
            Arc::new(CostModel::new(CostModelConfig::default())),
            NetworkGate::default(),
            ProtectionConfig::default(),
        );
        assert!(matches!(result, Err(EngineError::FatalConfiguration(_))));
    }
}
