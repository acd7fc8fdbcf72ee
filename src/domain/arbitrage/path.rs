use serde::{Deserialize, Serialize};

use crate::domain::cost::CostEstimate;
use crate::shared::errors::EngineError;
use crate::shared::types::{TokenId, VenueId};

/// One directed trade on one venue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hop {
    pub venue_id: VenueId,
    pub exchange: String,
    pub fee_bps: u32,
    pub token_in: TokenId,
    pub token_out: TokenId,
    pub amount_in: f64,
    pub expected_out: f64,
}

/// Ordered, chained sequence of hops that returns to its start token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    hops: Vec<Hop>,
    /// Cumulative cost estimate in start-token units
    cost: CostEstimate,
}

impl Path {
    /// Build a path, rejecting broken chains and open (non-cyclic) sequences
    pub fn new(hops: Vec<Hop>, cost: CostEstimate) -> Result<Self, EngineError> {
        let (Some(first), Some(last)) = (hops.first(), hops.last()) else {
            return Err(EngineError::Infeasible("empty path".to_string()));
        };
        if first.token_in != last.token_out {
            return Err(EngineError::Infeasible(format!(
                "path is not a cycle: {} -> {}",
                first.token_in, last.token_out
            )));
        }
        if let Some(pair) = hops.windows(2).find(|w| w[0].token_out != w[1].token_in) {
            return Err(EngineError::Infeasible(format!(
                "broken chain at venue {}: {} then {}",
                pair[1].venue_id, pair[0].token_out, pair[1].token_in
            )));
        }
        Ok(Self { hops, cost })
    }

    pub fn hops(&self) -> &[Hop] {
        &self.hops
    }

    pub fn len(&self) -> usize {
        self.hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }

    pub fn start_token(&self) -> &str {
        &self.hops[0].token_in
    }

    pub fn is_cycle(&self) -> bool {
        self.hops.first().map(|h| &h.token_in) == self.hops.last().map(|h| &h.token_out)
    }

    pub fn amount_in(&self) -> f64 {
        self.hops[0].amount_in
    }

    pub fn expected_output(&self) -> f64 {
        self.hops[self.hops.len() - 1].expected_out
    }

    pub fn cost(&self) -> CostEstimate {
        self.cost
    }

    pub fn venue_ids(&self) -> Vec<&str> {
        self.hops.iter().map(|h| h.venue_id.as_str()).collect()
    }

    /// Token route, e.g. `weth -> usdc -> dai -> weth`
    pub fn describe(&self) -> String {
        let mut tokens: Vec<&str> = self.hops.iter().map(|h| h.token_in.as_str()).collect();
        tokens.push(self.hops[self.hops.len() - 1].token_out.as_str());
        tokens.join(" -> ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hop(venue: &str, token_in: &str, token_out: &str, amount_in: f64, out: f64) -> Hop {
        Hop {
            venue_id: venue.to_string(),
            exchange: "test".to_string(),
            fee_bps: 30,
            token_in: token_in.to_string(),
            token_out: token_out.to_string(),
            amount_in,
            expected_out: out,
        }
    }

    #[test]
    fn test_cycle_path() {
        let path = Path::new(
            vec![hop("v1", "weth", "usdc", 1.0, 2500.0), hop("v2", "usdc", "weth", 2500.0, 1.01)],
            CostEstimate::zero(),
        )
        .unwrap();
        assert!(path.is_cycle());
        assert_eq!(path.start_token(), "weth");
        assert_eq!(path.expected_output(), 1.01);
        assert_eq!(path.describe(), "weth -> usdc -> weth");
    }

    #[test]
    fn test_rejects_open_and_broken_paths() {
        let open = Path::new(vec![hop("v1", "weth", "usdc", 1.0, 2500.0)], CostEstimate::zero());
        assert!(matches!(open, Err(EngineError::Infeasible(_))));

        let broken = Path::new(
            vec![hop("v1", "weth", "usdc", 1.0, 2500.0), hop("v2", "dai", "weth", 2500.0, 1.0)],
            CostEstimate::zero(),
        );
        assert!(broken.is_err());
        assert!(Path::new(Vec::new(), CostEstimate::zero()).is_err());
    }
}
