//! Treasury ledger: held balances, reservations and in-flight count

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use super::allocator::TreasurySnapshot;
use crate::shared::errors::EngineError;
use crate::shared::types::TokenId;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reservation {
    pub opportunity_id: String,
    pub token: TokenId,
    /// Own capital held back; zero when the principal is borrowed
    pub amount: f64,
    pub borrowed: bool,
}

/// Per-token view exported to the dashboard snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenAllocation {
    pub token: TokenId,
    pub held: f64,
    pub reserved: f64,
    pub in_flight: usize,
}

/// Mutable treasury state. Not shared directly: the coordinator keeps it behind
/// one lock so allocation and reservation happen as a single step.
#[derive(Debug, Default)]
pub struct TreasuryLedger {
    balances: HashMap<TokenId, f64>,
    reservations: HashMap<String, Reservation>,
}

impl TreasuryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_balance(&mut self, token: &str, held: f64) {
        self.balances.insert(token.to_string(), held.max(0.0));
    }

    pub fn balance(&self, token: &str) -> f64 {
        self.balances.get(token).copied().unwrap_or(0.0)
    }

    pub fn in_flight(&self) -> usize {
        self.reservations.len()
    }

    pub fn reserved(&self, token: &str) -> f64 {
        self.reservations
            .values()
            .filter(|r| r.token == token)
            .map(|r| r.amount)
            .sum()
    }

    pub fn snapshot(&self, token: &str) -> TreasurySnapshot {
        TreasurySnapshot {
            token: token.to_string(),
            held: self.balance(token),
            reserved: self.reserved(token),
            in_flight: self.in_flight(),
        }
    }

    /// Record an in-flight attempt. An id can hold one reservation at a time.
    pub fn reserve(&mut self, reservation: Reservation) -> Result<(), EngineError> {
        if self.reservations.contains_key(&reservation.opportunity_id) {
            return Err(EngineError::Infeasible(format!(
                "opportunity {} already has capital reserved",
                reservation.opportunity_id
            )));
        }
        let free = self.balance(&reservation.token) - self.reserved(&reservation.token);
        if reservation.amount > free + 1e-12 {
            return Err(EngineError::Infeasible(format!(
                "reservation of {} {} exceeds free balance {}",
                reservation.amount, reservation.token, free
            )));
        }
        debug!(
            opportunity = %reservation.opportunity_id,
            token = %reservation.token,
            amount = reservation.amount,
            borrowed = reservation.borrowed,
            "capital reserved"
        );
        self.reservations.insert(reservation.opportunity_id.clone(), reservation);
        Ok(())
    }

    pub fn release(&mut self, opportunity_id: &str) -> Option<Reservation> {
        self.reservations.remove(opportunity_id)
    }

    /// Apply realized profit (or loss) to a held balance
    pub fn settle(&mut self, token: &str, pnl: f64) {
        let held = self.balance(token) + pnl;
        self.set_balance(token, held);
    }

    pub fn allocations(&self) -> Vec<TokenAllocation> {
        let mut tokens: Vec<&TokenId> = self.balances.keys().collect();
        tokens.sort();
        tokens
            .into_iter()
            .map(|token| TokenAllocation {
                token: token.clone(),
                held: self.balance(token),
                reserved: self.reserved(token),
                in_flight: self.reservations.values().filter(|r| &r.token == token).count(),
            })
            .collect()
    }
}
