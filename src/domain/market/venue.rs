//! Venues and the adapter interface venue integrations implement

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::arbitrage::Hop;
use crate::domain::execution::Operation;
use crate::shared::errors::AdapterError;
use crate::shared::types::{Token, TokenId, VenueId};

/// A tradable market between two tokens on one exchange (one pool / fee tier)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: VenueId,
    pub exchange: String,
    pub token_a: TokenId,
    pub token_b: TokenId,
    pub fee_bps: u32,
}

impl Venue {
    pub fn new(
        id: impl Into<String>,
        exchange: impl Into<String>,
        token_a: impl Into<String>,
        token_b: impl Into<String>,
        fee_bps: u32,
    ) -> Self {
        Self {
            id: id.into(),
            exchange: exchange.into(),
            token_a: token_a.into(),
            token_b: token_b.into(),
            fee_bps,
        }
    }

    pub fn connects(&self, token_in: &str, token_out: &str) -> bool {
        (self.token_a == token_in && self.token_b == token_out)
            || (self.token_b == token_in && self.token_a == token_out)
    }

    /// True when `token_in -> token_out` is the a->b direction
    pub fn is_forward(&self, token_in: &str) -> bool {
        self.token_a == token_in
    }
}

/// Adapter response for a quote request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QuoteResponse {
    pub amount_out: f64,
    /// Input-side reserve when the venue exposes one
    pub depth_in: Option<f64>,
}

/// Quoted state for one direction of a venue
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct QuoteLevel {
    pub amount_in: f64,
    pub amount_out: f64,
    pub depth_in: Option<f64>,
}

impl QuoteLevel {
    pub fn new(amount_in: f64, amount_out: f64, depth_in: Option<f64>) -> Self {
        Self {
            amount_in,
            amount_out,
            depth_in,
        }
    }

    /// Zero-size marginal rate implied by the quote
    pub fn marginal_rate(&self) -> f64 {
        if self.amount_in <= 0.0 {
            return 0.0;
        }
        let rate = self.amount_out / self.amount_in;
        match self.depth_in {
            Some(depth) if depth > 0.0 => rate * (depth + self.amount_in) / depth,
            _ => rate,
        }
    }

    /// Expected output for an arbitrary input size.
    /// Constant-product impact when depth is known, linear otherwise.
    pub fn output_for(&self, amount_in: f64) -> f64 {
        if amount_in <= 0.0 {
            return 0.0;
        }
        let marginal = self.marginal_rate();
        match self.depth_in {
            Some(depth) if depth > 0.0 => marginal * amount_in * depth / (depth + amount_in),
            _ => marginal * amount_in,
        }
    }
}

/// Exchange integration consumed by the market graph and bundle builder
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Exchange name this adapter serves
    fn exchange(&self) -> &str;

    async fn quote(
        &self,
        venue: &Venue,
        token_in: &Token,
        token_out: &Token,
        amount_in: f64,
    ) -> Result<QuoteResponse, AdapterError>;

    async fn check_exists(&self, venue: &Venue) -> Result<bool, AdapterError>;

    /// Chain-specific swap operation enforcing `min_amount_out`
    fn build_hop(&self, hop: &Hop, token_in: &Token, token_out: &Token, min_amount_out: f64) -> Result<Operation, AdapterError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_quote_without_depth() {
        let level = QuoteLevel::new(1.0, 2500.0, None);
        assert_eq!(level.marginal_rate(), 2500.0);
        assert_eq!(level.output_for(2.0), 5000.0);
    }

    #[test]
    fn test_constant_product_reproduces_reference_quote() {
        // 1000/1000 pool without fee: 10 in -> 1000*10/1010 out
        let out = 1000.0 * 10.0 / 1010.0;
        let level = QuoteLevel::new(10.0, out, Some(1000.0));
        assert!((level.marginal_rate() - 1.0).abs() < 1e-12);
        assert!((level.output_for(10.0) - out).abs() < 1e-9);
        // larger trades get worse average price
        assert!(level.output_for(100.0) / 100.0 < out / 10.0);
        // and never exceed the marginal rate
        assert!(level.output_for(50.0) <= level.marginal_rate() * 50.0);
    }

    #[test]
    fn test_venue_direction() {
        let venue = Venue::new("v1", "uniswap", "weth", "usdc", 5);
        assert!(venue.connects("usdc", "weth"));
        assert!(venue.is_forward("weth"));
        assert!(!venue.is_forward("usdc"));
        assert!(!venue.connects("weth", "dai"));
    }
}
