//! Table-driven lender

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::domain::execution::{Operation, OperationKind};
use crate::domain::lending::{LenderAdapter, LoanRequest};
use crate::shared::config::LenderConfig;
use crate::shared::errors::AdapterError;
use crate::shared::types::{bps_to_ratio, Token, TokenId};

pub struct StaticLender {
    id: String,
    fee_bps: u32,
    liquidity: RwLock<HashMap<TokenId, f64>>,
}

impl StaticLender {
    pub fn new(id: impl Into<String>, fee_bps: u32) -> Self {
        Self {
            id: id.into(),
            fee_bps,
            liquidity: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &LenderConfig) -> Self {
        let lender = Self::new(&config.id, config.fee_bps);
        for (token, amount) in &config.liquidity {
            lender.set_liquidity(token, *amount);
        }
        lender
    }

    pub fn set_liquidity(&self, token: &str, amount: f64) {
        self.liquidity.write().insert(token.to_string(), amount);
    }

    fn operations(&self, kind: OperationKind, request: &LoanRequest, repay: bool) -> Vec<Operation> {
        request
            .legs
            .iter()
            .map(|leg| {
                let amount = if repay { leg.repayment() } else { leg.amount };
                Operation::new(kind, &self.id, &leg.token.id, amount).with_payload(request.nonce.as_bytes().to_vec())
            })
            .collect()
    }
}

#[async_trait]
impl LenderAdapter for StaticLender {
    fn id(&self) -> &str {
        &self.id
    }

    async fn max_borrowable(&self, token: &Token) -> Result<f64, AdapterError> {
        match self.liquidity.read().get(&token.id) {
            Some(amount) if *amount > 0.0 => Ok(*amount),
            _ => Err(AdapterError::NoLiquidity),
        }
    }

    async fn fee(&self, _token: &Token, amount: f64) -> Result<f64, AdapterError> {
        Ok(amount * bps_to_ratio(self.fee_bps))
    }

    fn build_borrow(&self, request: &LoanRequest) -> Result<Vec<Operation>, AdapterError> {
        Ok(self.operations(OperationKind::Borrow, request, false))
    }

    fn build_repay(&self, request: &LoanRequest) -> Result<Vec<Operation>, AdapterError> {
        Ok(self.operations(OperationKind::Repay, request, true))
    }
}
