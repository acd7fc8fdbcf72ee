//! Submission bundle and its lifecycle

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::execution::AtomicPlan;
use crate::shared::errors::EngineError;
use crate::shared::utils::generate_id;

/// Lifecycle of one protected submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BundleState {
    Built,
    Simulated,
    SimulationFailed,
    Submitted,
    Included,
    NotIncluded,
    Expired,
}

impl BundleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BundleState::Built => "built",
            BundleState::Simulated => "simulated",
            BundleState::SimulationFailed => "simulation_failed",
            BundleState::Submitted => "submitted",
            BundleState::Included => "included",
            BundleState::NotIncluded => "not_included",
            BundleState::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BundleState::SimulationFailed | BundleState::Included | BundleState::NotIncluded | BundleState::Expired
        )
    }

    pub fn can_transition_to(&self, next: BundleState) -> bool {
        use BundleState::*;
        matches!(
            (self, next),
            (Built, Simulated)
                | (Simulated, SimulationFailed)
                | (Simulated, Submitted)
                | (Submitted, Included)
                | (Submitted, NotIncluded)
                | (Submitted, Expired)
        )
    }
}

impl std::fmt::Display for BundleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive range of target blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRange {
    pub start: u64,
    pub end: u64,
}

impl BlockRange {
    /// The `blocks` blocks following `current`
    pub fn after(current: u64, blocks: u64) -> Self {
        Self {
            start: current + 1,
            end: current + blocks.max(1),
        }
    }

    pub fn contains(&self, block: u64) -> bool {
        (self.start..=self.end).contains(&block)
    }

    /// The window has passed once the chain is beyond its last block
    pub fn elapsed_at(&self, current: u64) -> bool {
        current > self.end
    }
}

/// Atomic plan plus the submission parameters chosen for it
#[derive(Debug, Clone, Serialize)]
pub struct Bundle {
    pub id: String,
    pub opportunity_id: String,
    pub plan: AtomicPlan,
    pub signer: String,
    pub nonce: u64,
    #[serde(serialize_with = "hex_signature")]
    pub signature: Vec<u8>,
    /// Priority fee bid, start-token units
    pub fee_bid: f64,
    pub target: Option<BlockRange>,
    state: BundleState,
    history: Vec<(BundleState, DateTime<Utc>)>,
}

fn hex_signature<S: serde::Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

impl Bundle {
    pub fn new(opportunity_id: impl Into<String>, plan: AtomicPlan, signer: impl Into<String>, nonce: u64) -> Self {
        Self {
            id: generate_id(),
            opportunity_id: opportunity_id.into(),
            plan,
            signer: signer.into(),
            nonce,
            signature: Vec::new(),
            fee_bid: 0.0,
            target: None,
            state: BundleState::Built,
            history: vec![(BundleState::Built, Utc::now())],
        }
    }

    pub fn state(&self) -> BundleState {
        self.state
    }

    pub fn history(&self) -> Vec<BundleState> {
        self.history.iter().map(|(s, _)| *s).collect()
    }

    pub fn transition(&mut self, next: BundleState) -> Result<(), EngineError> {
        if !self.state.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        self.state = next;
        self.history.push((next, Utc::now()));
        Ok(())
    }

    /// Bytes the signer commits to
    pub fn signing_payload(&self) -> Result<Vec<u8>, EngineError> {
        let mut payload = serde_json::to_vec(self.plan.operations())
            .map_err(|e| EngineError::Adapter(format!("bundle encoding failed: {e}")))?;
        payload.extend_from_slice(&self.nonce.to_be_bytes());
        Ok(payload)
    }

    /// Content hash of the operations. Identical plans share a fingerprint
    /// regardless of id, nonce or fee bid.
    pub fn fingerprint(&self) -> String {
        let mut hasher = DefaultHasher::new();
        for op in self.plan.operations() {
            op.target.hash(&mut hasher);
            op.token.hash(&mut hasher);
            (op.kind as u8).hash(&mut hasher);
            op.amount.to_bits().hash(&mut hasher);
            op.min_amount_out.to_bits().hash(&mut hasher);
            op.payload.hash(&mut hasher);
        }
        format!("{:016x}", hasher.finish())
    }
}
