//! Crossarb - cross-market arbitrage engine
//! Built with Domain-Driven Design principles

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;

// Re-export main types for convenience
pub use application::{Coordinator, Engine, EngineSnapshot};
pub use domain::arbitrage::{Opportunity, PathFinder};
pub use domain::cost::CostModel;
pub use domain::lending::LoanOrchestrator;
pub use domain::protection::ProtectionOptimizer;
pub use shared::config::EngineConfig;
