//! Read-only engine state exported to dashboards

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::application::control::LivePolicy;
use crate::domain::arbitrage::Opportunity;
use crate::domain::capital::TokenAllocation;
use crate::domain::cost::CostModelSummary;
use crate::domain::execution::ExecutionResult;
use crate::domain::protection::BundleSummary;
use crate::shared::errors::AppError;

/// Audit entry for an opportunity that was not executed to inclusion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Abandonment {
    pub opportunity_id: String,
    pub route: String,
    /// Pipeline stage that gave up: allocation, pricing, lending, protection, submission
    pub stage: String,
    pub reason_code: String,
    pub reason: String,
    pub net_profit: f64,
    pub cost: f64,
    pub threshold: f64,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LenderView {
    pub id: String,
    pub attempts: u64,
    pub successes: u64,
    pub reliability: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub taken_at: DateTime<Utc>,
    pub paused: bool,
    pub cycles: u64,
    pub open_opportunities: Vec<Opportunity>,
    pub recent_results: Vec<ExecutionResult>,
    pub abandoned: Vec<Abandonment>,
    pub cost_model: CostModelSummary,
    pub treasury: Vec<TokenAllocation>,
    pub lenders: Vec<LenderView>,
    pub recent_bundles: Vec<BundleSummary>,
    pub policy: LivePolicy,
}

impl EngineSnapshot {
    pub fn total_realized_profit(&self) -> f64 {
        self.recent_results.iter().filter_map(|r| r.realized_profit()).sum()
    }

    /// Write as pretty JSON through a temp file so readers never see a partial snapshot
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), AppError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}
