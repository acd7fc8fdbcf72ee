//! Constant-product pools quoted and traded in memory

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::domain::arbitrage::Hop;
use crate::domain::execution::{Operation, OperationKind};
use crate::domain::market::{QuoteResponse, Venue, VenueAdapter};
use crate::shared::config::VenueConfig;
use crate::shared::errors::AdapterError;
use crate::shared::types::{bps_to_ratio, Token, VenueId};

#[derive(Debug, Clone, PartialEq)]
pub struct PaperPool {
    pub venue: Venue,
    pub reserve_a: f64,
    pub reserve_b: f64,
}

impl PaperPool {
    /// (input reserve, output reserve) for a trade from `token_in`
    fn reserves(&self, token_in: &str) -> Option<(f64, f64)> {
        if self.venue.token_a == token_in {
            Some((self.reserve_a, self.reserve_b))
        } else if self.venue.token_b == token_in {
            Some((self.reserve_b, self.reserve_a))
        } else {
            None
        }
    }

    fn fee_factor(&self) -> f64 {
        1.0 - bps_to_ratio(self.venue.fee_bps)
    }

    pub fn amount_out(&self, token_in: &str, amount_in: f64) -> Result<f64, AdapterError> {
        let (reserve_in, reserve_out) = self
            .reserves(token_in)
            .ok_or_else(|| AdapterError::Unsupported(format!("{} does not trade {}", self.venue.id, token_in)))?;
        if reserve_in <= 0.0 || reserve_out <= 0.0 {
            return Err(AdapterError::NoLiquidity);
        }
        let effective = amount_in * self.fee_factor();
        Ok(reserve_out * effective / (reserve_in + effective))
    }

    /// Fee-adjusted input reserve; with it the quote curve is exact
    fn depth(&self, token_in: &str) -> Option<f64> {
        self.reserves(token_in).map(|(reserve_in, _)| reserve_in / self.fee_factor())
    }

    fn apply(&mut self, token_in: &str, amount_in: f64, amount_out: f64) {
        if self.venue.token_a == token_in {
            self.reserve_a += amount_in;
            self.reserve_b -= amount_out;
        } else {
            self.reserve_b += amount_in;
            self.reserve_a -= amount_out;
        }
    }
}

/// Pool state shared by the paper venue adapters and the paper channel
#[derive(Debug, Clone, Default)]
pub struct PaperBook {
    pools: Arc<RwLock<HashMap<VenueId, PaperPool>>>,
}

impl PaperBook {
    pub fn from_config(venues: &[VenueConfig]) -> Self {
        let book = Self::default();
        for v in venues {
            book.insert(PaperPool {
                venue: Venue::new(&v.id, &v.exchange, &v.token_a, &v.token_b, v.fee_bps),
                reserve_a: v.reserve_a,
                reserve_b: v.reserve_b,
            });
        }
        book
    }

    pub fn insert(&self, pool: PaperPool) {
        self.pools.write().insert(pool.venue.id.clone(), pool);
    }

    pub fn pool(&self, venue_id: &str) -> Option<PaperPool> {
        self.pools.read().get(venue_id).cloned()
    }

    pub fn venues(&self) -> Vec<Venue> {
        let mut venues: Vec<Venue> = self.pools.read().values().map(|p| p.venue.clone()).collect();
        venues.sort_by(|a, b| a.id.cmp(&b.id));
        venues
    }

    pub fn set_reserves(&self, venue_id: &str, reserve_a: f64, reserve_b: f64) -> bool {
        match self.pools.write().get_mut(venue_id) {
            Some(pool) => {
                pool.reserve_a = reserve_a;
                pool.reserve_b = reserve_b;
                true
            }
            None => false,
        }
    }

    /// Run `f` against a copy of the pools; the copy replaces the book only when `f` returns `Ok`
    /// and `commit` is set
    pub fn transact<T, E>(
        &self,
        commit: bool,
        f: impl FnOnce(&mut PaperLedger<'_>) -> Result<T, E>,
    ) -> Result<T, E> {
        let mut pools = self.pools.write();
        let mut scratch = pools.clone();
        let result = f(&mut PaperLedger { pools: &mut scratch });
        if commit && result.is_ok() {
            *pools = scratch;
        }
        result
    }
}

/// Mutable view of the pools inside one transaction
pub struct PaperLedger<'a> {
    pools: &'a mut HashMap<VenueId, PaperPool>,
}

impl PaperLedger<'_> {
    pub fn swap(&mut self, venue_id: &str, token_in: &str, amount_in: f64) -> Result<f64, AdapterError> {
        let pool = self
            .pools
            .get_mut(venue_id)
            .ok_or_else(|| AdapterError::Rejected(format!("unknown venue {venue_id}")))?;
        let out = pool.amount_out(token_in, amount_in)?;
        pool.apply(token_in, amount_in, out);
        Ok(out)
    }
}

/// What a paper swap operation carries in its payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapPayload {
    pub venue: VenueId,
    pub token_in: String,
    pub token_out: String,
    pub amount_in: f64,
}

impl SwapPayload {
    pub fn decode(bytes: &[u8]) -> Result<Self, AdapterError> {
        serde_json::from_slice(bytes).map_err(|e| AdapterError::Rejected(format!("malformed swap payload: {e}")))
    }
}

/// Venue adapter for one exchange's paper pools
pub struct PaperVenue {
    exchange: String,
    book: PaperBook,
    offline: AtomicBool,
}

impl PaperVenue {
    pub fn new(exchange: impl Into<String>, book: PaperBook) -> Self {
        Self {
            exchange: exchange.into(),
            book,
            offline: AtomicBool::new(false),
        }
    }

    /// Make every quote fail with a transport error
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl VenueAdapter for PaperVenue {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn quote(
        &self,
        venue: &Venue,
        token_in: &Token,
        _token_out: &Token,
        amount_in: f64,
    ) -> Result<QuoteResponse, AdapterError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AdapterError::Transport(format!("{} is offline", self.exchange)));
        }
        let pool = self.book.pool(&venue.id).ok_or(AdapterError::NoLiquidity)?;
        Ok(QuoteResponse {
            amount_out: pool.amount_out(&token_in.id, amount_in)?,
            depth_in: pool.depth(&token_in.id),
        })
    }

    async fn check_exists(&self, venue: &Venue) -> Result<bool, AdapterError> {
        Ok(self
            .book
            .pool(&venue.id)
            .map(|p| p.venue.exchange == self.exchange && p.venue.connects(&venue.token_a, &venue.token_b))
            .unwrap_or(false))
    }

    fn build_hop(&self, hop: &Hop, token_in: &Token, token_out: &Token, min_amount_out: f64) -> Result<Operation, AdapterError> {
        let payload = SwapPayload {
            venue: hop.venue_id.clone(),
            token_in: token_in.id.clone(),
            token_out: token_out.id.clone(),
            amount_in: hop.amount_in,
        };
        let bytes = serde_json::to_vec(&payload).map_err(|e| AdapterError::Rejected(e.to_string()))?;
        Ok(Operation::new(OperationKind::Swap, &hop.venue_id, &token_out.id, hop.amount_in)
            .with_min_out(min_amount_out)
            .with_payload(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::QuoteLevel;

    fn book() -> PaperBook {
        let book = PaperBook::default();
        book.insert(PaperPool {
            venue: Venue::new("uni-weth-usdc", "uniswap", "weth", "usdc", 30),
            reserve_a: 100.0,
            reserve_b: 200_000.0,
        });
        book
    }

    #[tokio::test]
    async fn test_quote_matches_impact_curve() {
        let book = book();
        let venue = PaperVenue::new("uniswap", book.clone());
        let weth = Token::new("weth", "WETH", 18);
        let usdc = Token::new("usdc", "USDC", 6);
        let pool_venue = book.pool("uni-weth-usdc").unwrap().venue;

        let quote = venue.quote(&pool_venue, &weth, &usdc, 1.0).await.unwrap();
        let level = QuoteLevel::new(1.0, quote.amount_out, quote.depth_in);
        let exact = book.pool("uni-weth-usdc").unwrap().amount_out("weth", 5.0).unwrap();
        assert!((level.output_for(5.0) - exact).abs() < 1e-6);
        assert!(quote.amount_out < 2_000.0);
    }

    #[tokio::test]
    async fn test_offline_venue_reports_transport_error() {
        let book = book();
        let venue = PaperVenue::new("uniswap", book.clone());
        venue.set_offline(true);
        let pool_venue = book.pool("uni-weth-usdc").unwrap().venue;
        let err = venue
            .quote(&pool_venue, &Token::new("weth", "WETH", 18), &Token::new("usdc", "USDC", 6), 1.0)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_transact_commits_only_on_success() {
        let book = book();
        let failed: Result<f64, AdapterError> = book.transact(true, |ledger| {
            ledger.swap("uni-weth-usdc", "weth", 1.0)?;
            Err(AdapterError::Rejected("revert".into()))
        });
        assert!(failed.is_err());
        assert_eq!(book.pool("uni-weth-usdc").unwrap().reserve_a, 100.0);

        let out = book.transact(true, |ledger| ledger.swap("uni-weth-usdc", "weth", 1.0)).unwrap();
        let pool = book.pool("uni-weth-usdc").unwrap();
        assert_eq!(pool.reserve_a, 101.0);
        assert!((pool.reserve_b - (200_000.0 - out)).abs() < 1e-9);
    }
}
