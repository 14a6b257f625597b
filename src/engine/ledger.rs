//! Ledger — house and participant balances.
//!
//! A payout is one operation: credit the winner, debit the house.
//! The two mutations are never individually observable; the ledger is
//! only ever touched under the engine's state lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::types::{BalanceSnapshot, UserId};

/// House balance plus every participant's running balance.
///
/// User balances persist across rounds and are created lazily on
/// first payout. Only settlement mutates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    house: f64,
    balances: HashMap<UserId, f64>,
}

impl Ledger {
    pub fn new(initial_house_balance: f64) -> Self {
        Self {
            house: initial_house_balance,
            balances: HashMap::new(),
        }
    }

    /// Funds available for payouts.
    pub fn house(&self) -> f64 {
        self.house
    }

    /// A user's accumulated balance. Zero if they have never won.
    pub fn balance_of(&self, user: UserId) -> f64 {
        self.balances.get(&user).copied().unwrap_or(0.0)
    }

    /// Whether the house can still fund another round.
    pub fn is_solvent(&self) -> bool {
        self.house > 0.0
    }

    /// Credit `amount` to the user and debit it from the house.
    pub fn apply_payout(&mut self, user: UserId, amount: f64) {
        *self.balances.entry(user).or_insert(0.0) += amount;
        self.house -= amount;
        debug!(
            user,
            amount = format!("{amount:.2}"),
            house = format!("{:.2}", self.house),
            "Payout applied"
        );
    }

    /// Point-in-time copy of every balance, for the owner's `all` view.
    pub fn snapshot(&self) -> BalanceSnapshot {
        let mut users: Vec<(UserId, f64)> = self
            .balances
            .iter()
            .map(|(user, balance)| (*user, *balance))
            .collect();
        // Stable ordering for display.
        users.sort_by_key(|(user, _)| *user);

        BalanceSnapshot {
            house: self.house,
            users,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
