//! In-memory treasury and a local signing identity

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rand::Rng;

use crate::domain::capital::TreasuryProvider;
use crate::domain::execution::Signer;
use crate::shared::config::TreasuryConfig;
use crate::shared::errors::AdapterError;
use crate::shared::types::TokenId;

/// Keyed-hash signer for paper trading. Not a cryptographic signature.
pub struct LocalSigner {
    identity: String,
    key: [u8; 32],
}

impl LocalSigner {
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            key: rand::thread_rng().gen(),
        }
    }

    /// Public fingerprint of the key
    pub fn key_id(&self) -> String {
        hex::encode(&self.key[..4])
    }
}

impl Signer for LocalSigner {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, AdapterError> {
        let mut signature = Vec::with_capacity(32);
        for lane in 0u8..4 {
            let mut hasher = DefaultHasher::new();
            self.key.hash(&mut hasher);
            lane.hash(&mut hasher);
            payload.hash(&mut hasher);
            signature.extend_from_slice(&hasher.finish().to_be_bytes());
        }
        Ok(signature)
    }
}

pub struct StaticTreasury {
    balances: RwLock<HashMap<TokenId, f64>>,
    signer: Arc<LocalSigner>,
}

impl StaticTreasury {
    pub fn new(signer: Arc<LocalSigner>) -> Self {
        Self {
            balances: RwLock::new(HashMap::new()),
            signer,
        }
    }

    pub fn from_config(config: &TreasuryConfig) -> Self {
        let treasury = Self::new(Arc::new(LocalSigner::new(&config.signer)));
        for (token, amount) in &config.balances {
            treasury.set_balance(token, *amount);
        }
        treasury
    }

    pub fn set_balance(&self, token: &str, amount: f64) {
        self.balances.write().insert(token.to_string(), amount);
    }
}

#[async_trait]
impl TreasuryProvider for StaticTreasury {
    async fn available_balance(&self, token: &str) -> Result<f64, AdapterError> {
        Ok(self.balances.read().get(token).copied().unwrap_or(0.0))
    }

    fn signer(&self) -> Arc<dyn Signer> {
        self.signer.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_is_deterministic_per_key() {
        let signer = LocalSigner::new("searcher");
        let a = signer.sign(b"bundle").unwrap();
        assert_eq!(a.len(), 32);
        assert_eq!(a, signer.sign(b"bundle").unwrap());
        assert_ne!(a, signer.sign(b"other").unwrap());
        assert_ne!(a, LocalSigner::new("searcher").sign(b"bundle").unwrap());
    }

    #[tokio::test]
    async fn test_unknown_token_has_zero_balance() {
        let treasury = StaticTreasury::new(Arc::new(LocalSigner::new("searcher")));
        treasury.set_balance("weth", 5.0);
        assert_eq!(treasury.available_balance("weth").await.unwrap(), 5.0);
        assert_eq!(treasury.available_balance("dai").await.unwrap(), 0.0);
        assert_eq!(treasury.signer().identity(), "searcher");
    }
}
