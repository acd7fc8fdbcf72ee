//! Error handling for the application

use thiserror::Error;

/// Errors reported by external adapters (venues, lenders, submission channels)
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AdapterError {
    #[error("No liquidity available")]
    NoLiquidity,

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),
}

impl AdapterError {
    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, AdapterError::Timeout(_) | AdapterError::Transport(_))
    }
}

/// Engine errors, one variant per failure class of the pipeline
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Quote unavailable from venue {venue}: {reason}")]
    QuoteUnavailable { venue: String, reason: String },

    #[error("Infeasible: {0}")]
    Infeasible(String),

    #[error("Simulation rejected: {0}")]
    SimulationRejected(String),

    #[error("Submission expired for bundle {0}")]
    SubmissionExpired(String),

    #[error("Transient network failure: {0}")]
    NetworkTransient(String),

    #[error("Fatal configuration error: {0}")]
    FatalConfiguration(String),

    #[error("Opportunity {0} is stale")]
    Stale(String),

    #[error("Invalid bundle transition {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("Adapter error: {0}")]
    Adapter(String),
}

impl EngineError {
    /// Fatal errors halt the coordinator, everything else is isolated per attempt
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::FatalConfiguration(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::NetworkTransient(_))
    }
}

impl From<AdapterError> for EngineError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::Timeout(_) | AdapterError::Transport(_) => {
                EngineError::NetworkTransient(err.to_string())
            }
            AdapterError::NoLiquidity => EngineError::Infeasible(err.to_string()),
            other => EngineError::Adapter(other.to_string()),
        }
    }
}

/// General application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}
