//! Paper submission channel: simulates against the paper book, lands bundles on a block clock

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use super::venue::{PaperBook, PaperLedger, SwapPayload};
use crate::domain::execution::OperationKind;
use crate::domain::protection::{
    BlockRange, Bundle, BundleStatus, MempoolObserver, MempoolSignal, NetworkConditions, SimResult,
    SubmissionChannel, SubmissionHandle,
};
use crate::shared::config::PaperConfig;
use crate::shared::errors::AdapterError;
use crate::shared::types::TokenId;

struct Pending {
    bundle: Bundle,
    target: BlockRange,
    settled: Option<BundleStatus>,
}

pub struct PaperChannel {
    book: PaperBook,
    config: PaperConfig,
    started: Instant,
    pending: Mutex<HashMap<String, Pending>>,
}

impl PaperChannel {
    pub fn new(book: PaperBook, config: PaperConfig) -> Self {
        Self {
            book,
            config,
            started: Instant::now(),
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn head(&self) -> u64 {
        self.config.start_block + self.started.elapsed().as_millis() as u64 / self.config.block_time_ms.max(1)
    }

    /// Execute the plan's swaps in order. Each swap after the first consumes the previous output.
    fn execute(ledger: &mut PaperLedger<'_>, bundle: &Bundle) -> Result<Vec<f64>, String> {
        let mut outputs = Vec::new();
        let mut carried: Option<f64> = None;
        for op in bundle.plan.swaps() {
            let payload = SwapPayload::decode(&op.payload).map_err(|e| e.to_string())?;
            let amount_in = carried.unwrap_or(op.amount);
            let out = ledger
                .swap(&payload.venue, &payload.token_in, amount_in)
                .map_err(|e| format!("swap on {} failed: {e}", payload.venue))?;
            if out < op.min_amount_out {
                return Err(format!(
                    "swap on {} returned {:.8}, minimum {:.8}",
                    payload.venue, out, op.min_amount_out
                ));
            }
            outputs.push(out);
            carried = Some(out);
        }
        Ok(outputs)
    }

    fn run(&self, bundle: &Bundle, commit: bool) -> SimResult {
        match self.book.transact(commit, |ledger| Self::execute(ledger, bundle)) {
            Ok(swap_outputs) => SimResult {
                success: true,
                revert_reason: None,
                swap_outputs,
                operation_costs: bundle
                    .plan
                    .operations()
                    .iter()
                    .map(|op| match op.kind {
                        OperationKind::Swap => self.config.operation_cost,
                        OperationKind::Borrow | OperationKind::Repay => self.config.operation_cost / 2.0,
                    })
                    .collect(),
            },
            Err(reason) => SimResult::reverted(reason),
        }
    }
}

#[async_trait]
impl SubmissionChannel for PaperChannel {
    fn name(&self) -> &str {
        "paper"
    }

    fn is_private(&self) -> bool {
        true
    }

    async fn current_block(&self) -> Result<u64, AdapterError> {
        Ok(self.head())
    }

    async fn network_conditions(&self) -> Result<NetworkConditions, AdapterError> {
        Ok(NetworkConditions {
            congestion: self.config.congestion,
        })
    }

    async fn simulate(&self, bundle: &Bundle) -> Result<SimResult, AdapterError> {
        Ok(self.run(bundle, false))
    }

    async fn submit(&self, bundle: &Bundle, target: BlockRange) -> Result<SubmissionHandle, AdapterError> {
        let head = self.head();
        if target.end < head {
            return Err(AdapterError::Rejected(format!("target {}..={} already passed", target.start, target.end)));
        }
        self.pending.lock().insert(
            bundle.id.clone(),
            Pending {
                bundle: bundle.clone(),
                target,
                settled: None,
            },
        );
        Ok(SubmissionHandle {
            bundle_id: bundle.id.clone(),
            reference: format!("paper-{}", bundle.id),
        })
    }

    async fn status(&self, handle: &SubmissionHandle) -> Result<BundleStatus, AdapterError> {
        let head = self.head();
        let mut pending = self.pending.lock();
        let entry = pending
            .get_mut(&handle.bundle_id)
            .ok_or_else(|| AdapterError::Rejected(format!("unknown bundle {}", handle.bundle_id)))?;
        if let Some(status) = entry.settled {
            return Ok(status);
        }

        let status = if head < entry.target.start {
            BundleStatus::Pending
        } else if entry.target.elapsed_at(head) {
            BundleStatus::Expired
        } else if !self.config.include_bundles {
            BundleStatus::Pending
        } else {
            let landed = self.run(&entry.bundle, true);
            if landed.success {
                BundleStatus::Included { block: head }
            } else {
                debug!(bundle = %entry.bundle.id, reason = ?landed.revert_reason, "paper bundle would revert");
                BundleStatus::Dropped
            }
        };
        if status != BundleStatus::Pending {
            entry.settled = Some(status);
        }
        Ok(status)
    }
}

/// Mempool observer that never sees adversarial activity
#[derive(Debug, Default)]
pub struct QuietMempool;

#[async_trait]
impl MempoolObserver for QuietMempool {
    async fn signals(&self, _tokens: &[TokenId]) -> Result<Vec<MempoolSignal>, AdapterError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::arbitrage::Hop;
    use crate::domain::execution::AtomicPlan;
    use crate::domain::market::{Venue, VenueAdapter};
    use crate::infrastructure::paper::venue::{PaperPool, PaperVenue};
    use crate::shared::types::Token;

    fn book() -> PaperBook {
        let book = PaperBook::default();
        book.insert(PaperPool {
            venue: Venue::new("a", "uni", "weth", "usdc", 0),
            reserve_a: 1_000.0,
            reserve_b: 2_000_000.0,
        });
        book.insert(PaperPool {
            venue: Venue::new("b", "uni", "usdc", "weth", 0),
            reserve_a: 2_000_000.0,
            reserve_b: 1_050.0,
        });
        book
    }

    fn bundle(book: &PaperBook, min_final: f64) -> Bundle {
        let venue = PaperVenue::new("uni", book.clone());
        let weth = Token::new("weth", "WETH", 18);
        let usdc = Token::new("usdc", "USDC", 6);
        let hop = |id: &str, a: &str, b: &str, amount_in: f64| Hop {
            venue_id: id.to_string(),
            exchange: "uni".to_string(),
            fee_bps: 0,
            token_in: a.to_string(),
            token_out: b.to_string(),
            amount_in,
            expected_out: 0.0,
        };
        let first = venue.build_hop(&hop("a", "weth", "usdc", 1.0), &weth, &usdc, 0.0).unwrap();
        let second = venue.build_hop(&hop("b", "usdc", "weth", 1_998.0), &usdc, &weth, min_final).unwrap();
        Bundle::new("opp", AtomicPlan::direct(vec![first, second]).unwrap(), "searcher", 0)
    }

    fn config() -> PaperConfig {
        PaperConfig {
            block_time_ms: 10,
            ..PaperConfig::default()
        }
    }

    #[tokio::test]
    async fn test_simulation_chains_outputs_without_moving_pools() {
        let book = book();
        let channel = PaperChannel::new(book.clone(), config());
        let sim = channel.simulate(&bundle(&book, 1.0)).await.unwrap();
        assert!(sim.success);
        assert_eq!(sim.swap_outputs.len(), 2);
        assert!(sim.swap_outputs[1] > 1.0);
        assert_eq!(sim.operation_costs.len(), 2);
        assert_eq!(book.pool("a").unwrap().reserve_a, 1_000.0);
    }

    #[tokio::test]
    async fn test_min_out_violation_reverts() {
        let book = book();
        let channel = PaperChannel::new(book.clone(), config());
        let sim = channel.simulate(&bundle(&book, 2.0)).await.unwrap();
        assert!(!sim.success);
        assert!(sim.revert_reason.unwrap().contains("minimum"));
    }

    #[tokio::test]
    async fn test_bundle_lands_in_target_window() {
        let book = book();
        let channel = PaperChannel::new(book.clone(), config());
        let bundle = bundle(&book, 1.0);
        let head = channel.current_block().await.unwrap();
        let handle = channel.submit(&bundle, BlockRange::after(head, 3)).await.unwrap();

        let mut status = BundleStatus::Pending;
        for _ in 0..100 {
            status = channel.status(&handle).await.unwrap();
            if status != BundleStatus::Pending {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        }
        assert!(matches!(status, BundleStatus::Included { .. }));
        // the trade moved the pools
        assert!(book.pool("a").unwrap().reserve_a > 1_000.0);
    }

    #[tokio::test]
    async fn test_withheld_bundle_expires() {
        let book = book();
        let channel = PaperChannel::new(
            book.clone(),
            PaperConfig {
                include_bundles: false,
                ..config()
            },
        );
        let bundle = bundle(&book, 1.0);
        let head = channel.current_block().await.unwrap();
        let handle = channel.submit(&bundle, BlockRange::after(head, 1)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(40)).await;
        assert_eq!(channel.status(&handle).await.unwrap(), BundleStatus::Expired);
    }
}
