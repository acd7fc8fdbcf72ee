//! Engine configuration loaded from `Config.toml`

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::arbitrage::SearchPolicy;
use crate::domain::capital::AllocationPolicy;
use crate::domain::cost::CostModelConfig;
use crate::domain::lending::LendingPolicy;
use crate::domain::market::MarketGraphConfig;
use crate::domain::protection::ProtectionConfig;
use crate::shared::errors::{AppError, EngineError};
use crate::shared::network::NetworkGate;
use crate::shared::retry::BackoffPolicy;
use crate::shared::types::{Token, TokenId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Private relay endpoint; paper submission when unset
    pub relay_url: Option<String>,
    pub request_timeout_ms: u64,
    pub max_concurrent_requests: usize,
    pub retry_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            relay_url: None,
            request_timeout_ms: 2_000,
            max_concurrent_requests: 16,
            retry_attempts: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 2_000,
        }
    }
}

impl NetworkConfig {
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.retry_attempts.max(1),
            initial_delay_ms: self.initial_backoff_ms,
            max_delay_ms: self.max_backoff_ms,
            ..BackoffPolicy::default()
        }
    }

    /// The process-wide gate every adapter call goes through
    pub fn gate(&self) -> NetworkGate {
        NetworkGate::new(
            self.max_concurrent_requests,
            Duration::from_millis(self.request_timeout_ms),
            self.backoff(),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionSection {
    /// Tolerance applied to every hop's minimum output
    pub slippage_bps: u32,
    #[serde(flatten)]
    pub optimizer: ProtectionConfig,
}

impl Default for ProtectionSection {
    fn default() -> Self {
        Self {
            slippage_bps: 50,
            optimizer: ProtectionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub scan_interval_ms: u64,
    /// Engine snapshot JSON written after every cycle when set
    pub snapshot_path: Option<String>,
    pub recent_results: usize,
    pub abandonment_log: usize,
    /// Halvings tried between the allocated size and the policy minimum
    pub resize_steps: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 1_000,
            snapshot_path: None,
            recent_results: 100,
            abandonment_log: 256,
            resize_steps: 3,
        }
    }
}

/// Constant-product pool served by the paper venue adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueConfig {
    pub id: String,
    pub exchange: String,
    pub token_a: TokenId,
    pub token_b: TokenId,
    #[serde(default)]
    pub fee_bps: u32,
    pub reserve_a: f64,
    pub reserve_b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LenderConfig {
    pub id: String,
    #[serde(default)]
    pub fee_bps: u32,
    /// Borrowable amount per token
    #[serde(default)]
    pub liquidity: HashMap<TokenId, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreasuryConfig {
    pub signer: String,
    pub balances: HashMap<TokenId, f64>,
    pub start_nonce: u64,
}

impl Default for TreasuryConfig {
    fn default() -> Self {
        Self {
            signer: "paper-searcher".to_string(),
            balances: HashMap::new(),
            start_nonce: 0,
        }
    }
}

/// Paper submission channel behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaperConfig {
    pub block_time_ms: u64,
    pub start_block: u64,
    pub congestion: f64,
    /// Simulated execution cost per operation, accounting units
    pub operation_cost: f64,
    /// When false, bundles are accepted but never land
    pub include_bundles: bool,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            block_time_ms: 1_000,
            start_block: 1,
            congestion: 0.2,
            operation_cost: 0.0005,
            include_bundles: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub log_level: String,
    pub network: NetworkConfig,
    pub market: MarketGraphConfig,
    pub search: SearchPolicy,
    pub allocation: AllocationPolicy,
    pub protection: ProtectionSection,
    pub lending: LendingPolicy,
    pub cost_model: CostModelConfig,
    pub coordinator: CoordinatorConfig,
    pub paper: PaperConfig,
    pub treasury: TreasuryConfig,
    pub tokens: Vec<Token>,
    pub venues: Vec<VenueConfig>,
    pub lenders: Vec<LenderConfig>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            network: NetworkConfig::default(),
            market: MarketGraphConfig::default(),
            search: SearchPolicy::default(),
            allocation: AllocationPolicy::default(),
            protection: ProtectionSection::default(),
            lending: LendingPolicy::default(),
            cost_model: CostModelConfig::default(),
            coordinator: CoordinatorConfig::default(),
            paper: PaperConfig::default(),
            treasury: TreasuryConfig::default(),
            tokens: Vec::new(),
            venues: Vec::new(),
            lenders: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, AppError> {
        Ok(toml::from_str(content)?)
    }

    fn token_known(&self, id: &str) -> bool {
        self.tokens.iter().any(|t| t.id == id)
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> Result<(), EngineError> {
        let fatal = |msg: String| Err(EngineError::FatalConfiguration(msg));

        if self.lenders.is_empty() {
            return fatal("no lenders configured".to_string());
        }
        if self.search.start_tokens.is_empty() {
            return fatal("no start tokens configured".to_string());
        }
        if self.search.max_hops < 2 {
            return fatal(format!("max_hops must be at least 2, got {}", self.search.max_hops));
        }
        if !(self.search.min_profit >= 0.0) {
            return fatal(format!("min_profit must be non-negative, got {}", self.search.min_profit));
        }
        for token in self
            .search
            .start_tokens
            .iter()
            .chain(&self.search.bridge_tokens)
            .chain(self.search.accounting_token.iter())
        {
            if !self.token_known(token) {
                return fatal(format!("search references unknown token {token}"));
            }
        }
        for venue in &self.venues {
            if !self.token_known(&venue.token_a) || !self.token_known(&venue.token_b) {
                return fatal(format!("venue {} references an unknown token", venue.id));
            }
            if !(venue.reserve_a > 0.0 && venue.reserve_b > 0.0) {
                return fatal(format!("venue {} needs positive reserves", venue.id));
            }
        }
        if self.protection.slippage_bps >= 10_000 {
            return fatal(format!("slippage_bps {} is not below 100%", self.protection.slippage_bps));
        }
        if self.protection.optimizer.target_window_blocks == 0 {
            return fatal("target_window_blocks must be at least 1".to_string());
        }
        self.allocation.validate().map_err(EngineError::FatalConfiguration)?;
        self.protection
            .optimizer
            .fee_bid
            .validate()
            .map_err(EngineError::FatalConfiguration)?;
        Ok(())
    }
}
