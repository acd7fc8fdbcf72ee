//! Capital domain - trade sizing and treasury state

mod allocator;
mod treasury;

pub use allocator::{
    allocate, available_capital, AllocationDecision, AllocationPolicy, AllocationRefusal, TreasurySnapshot,
};
pub use treasury::{Reservation, TokenAllocation, TreasuryLedger};

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::execution::Signer;
use crate::shared::errors::AdapterError;

/// Holder of funds and signing capability
#[async_trait]
pub trait TreasuryProvider: Send + Sync {
    async fn available_balance(&self, token: &str) -> Result<f64, AdapterError>;

    fn signer(&self) -> Arc<dyn Signer>;
}
