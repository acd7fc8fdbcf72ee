//! Runtime control surface: pause/resume and live policy updates

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::info;

use crate::domain::arbitrage::SearchPolicy;
use crate::domain::capital::AllocationPolicy;
use crate::domain::protection::{FeeBidPolicy, ProtectionOptimizer};

/// Numeric policy the coordinator reads at the start of every cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LivePolicy {
    pub search: SearchPolicy,
    pub allocation: AllocationPolicy,
    pub slippage_bps: u32,
    pub fee_bid: FeeBidPolicy,
}

struct ControlState {
    paused: AtomicBool,
    stopped: AtomicBool,
    wake: Notify,
    policy: RwLock<LivePolicy>,
}

/// Cloneable handle shared by the coordinator and whoever drives it
#[derive(Clone)]
pub struct ControlHandle {
    state: Arc<ControlState>,
    optimizer: Arc<ProtectionOptimizer>,
}

impl ControlHandle {
    pub fn new(
        search: SearchPolicy,
        allocation: AllocationPolicy,
        slippage_bps: u32,
        optimizer: Arc<ProtectionOptimizer>,
    ) -> Self {
        let fee_bid = optimizer.config().fee_bid;
        Self {
            state: Arc::new(ControlState {
                paused: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
                wake: Notify::new(),
                policy: RwLock::new(LivePolicy {
                    search,
                    allocation,
                    slippage_bps,
                    fee_bid,
                }),
            }),
            optimizer,
        }
    }

    pub fn pause(&self) {
        if !self.state.paused.swap(true, Ordering::SeqCst) {
            info!("⏸️ coordinator paused");
        }
        self.state.wake.notify_one();
    }

    pub fn resume(&self) {
        if self.state.paused.swap(false, Ordering::SeqCst) {
            info!("▶️ coordinator resumed");
        }
        self.state.wake.notify_one();
    }

    /// Ask the loop to finish in-flight attempts and return
    pub fn stop(&self) {
        self.state.stopped.store(true, Ordering::SeqCst);
        self.state.wake.notify_one();
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused.load(Ordering::SeqCst)
    }

    pub fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    /// Resolves on the next pause, resume or stop
    pub async fn changed(&self) {
        self.state.wake.notified().await;
    }

    pub fn policy(&self) -> LivePolicy {
        self.state.policy.read().clone()
    }

    /// Minimum net profit, accounting-token units
    pub fn set_min_profit(&self, min_profit: f64) -> Result<(), String> {
        if !(min_profit.is_finite() && min_profit >= 0.0) {
            return Err(format!("min_profit must be a non-negative number, got {min_profit}"));
        }
        self.state.policy.write().search.min_profit = min_profit;
        info!(min_profit, "profit threshold updated");
        Ok(())
    }

    pub fn set_max_hops(&self, max_hops: usize) -> Result<(), String> {
        if max_hops < 2 {
            return Err(format!("max_hops must be at least 2, got {max_hops}"));
        }
        self.state.policy.write().search.max_hops = max_hops;
        Ok(())
    }

    pub fn set_allocation(&self, allocation: AllocationPolicy) -> Result<(), String> {
        allocation.validate()?;
        info!(
            absolute_min = allocation.absolute_min,
            absolute_max = allocation.absolute_max,
            pct_min = allocation.pct_min,
            pct_max = allocation.pct_max,
            "allocation policy updated"
        );
        self.state.policy.write().allocation = allocation;
        Ok(())
    }

    pub fn set_slippage_bps(&self, slippage_bps: u32) -> Result<(), String> {
        if slippage_bps >= 10_000 {
            return Err(format!("slippage_bps {slippage_bps} is not below 100%"));
        }
        self.state.policy.write().slippage_bps = slippage_bps;
        info!(slippage_bps, "slippage tolerance updated");
        Ok(())
    }

    /// Priority fee bounds, accounting-token units
    pub fn set_fee_bounds(&self, min_priority_fee: f64, max_priority_fee: f64) -> Result<(), String> {
        let fee_bid = FeeBidPolicy {
            min_priority_fee,
            max_priority_fee,
            ..self.optimizer.config().fee_bid
        };
        self.optimizer.set_fee_policy(fee_bid.clone())?;
        self.state.policy.write().fee_bid = fee_bid;
        info!(min_priority_fee, max_priority_fee, "fee bid bounds updated");
        Ok(())
    }
}
