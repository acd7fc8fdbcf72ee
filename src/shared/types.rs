//! Common types used across the application

use serde::{Deserialize, Serialize};

/// Token identifier (address or symbolic id supplied by adapters)
pub type TokenId = String;

/// Venue identifier, unique per pool / fee tier
pub type VenueId = String;

/// Token representation. Immutable once discovered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub symbol: String,
    pub decimals: u8,
    /// Size used when quoting this token as the input side of a venue
    #[serde(default = "default_quote_size")]
    pub quote_size: f64,
}

fn default_quote_size() -> f64 {
    1.0
}

impl Token {
    pub fn new(id: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            id: id.into(),
            symbol: symbol.into(),
            decimals,
            quote_size: default_quote_size(),
        }
    }

    pub fn with_quote_size(mut self, quote_size: f64) -> Self {
        self.quote_size = quote_size;
        self
    }

    /// Convert a UI amount into integer base units, rounding down
    pub fn to_base_units(&self, amount: f64) -> u128 {
        if amount <= 0.0 {
            return 0;
        }
        (amount * 10_f64.powi(self.decimals as i32)).floor() as u128
    }

    pub fn from_base_units(&self, value: u128) -> f64 {
        value as f64 / 10_f64.powi(self.decimals as i32)
    }
}

/// Basis points helper
pub fn bps_to_ratio(bps: u32) -> f64 {
    bps as f64 / 10_000.0
}
