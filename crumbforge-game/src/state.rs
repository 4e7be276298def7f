//! Player economy state owned by a single session.
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum EconomyError {
    #[error("insufficient funds: cost {cost} exceeds balance {balance}")]
    InsufficientFunds { cost: f64, balance: f64 },
    #[error("unknown upgrade: {0}")]
    UnknownUpgrade(String),
    #[error("amount must be finite and non-negative (got {0})")]
    InvalidAmount(f64),
}

/// Currency balance plus owned upgrade counts.
///
/// `balance` never goes negative: the only decreasing operation is
/// [`PlayerEconomyState::spend`], which refuses to overdraw.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PlayerEconomyState {
    #[serde(default)]
    balance: f64,
    #[serde(default)]
    pub upgrade_counts: HashMap<String, u32>,
}

impl PlayerEconomyState {
    /// Build a state, clamping a negative or non-finite balance to zero.
    #[must_use]
    pub fn new(balance: f64, upgrade_counts: HashMap<String, u32>) -> Self {
        let balance = if balance.is_finite() {
            balance.max(0.0)
        } else {
            0.0
        };
        Self {
            balance,
            upgrade_counts,
        }
    }

    #[must_use]
    pub const fn balance(&self) -> f64 {
        self.balance
    }

    #[must_use]
    pub fn count(&self, upgrade_id: &str) -> u32 {
        self.upgrade_counts.get(upgrade_id).copied().unwrap_or(0)
    }

    /// Add currency.
    ///
    /// # Errors
    ///
    /// Returns an error if `amount` is negative or not finite.
    pub fn credit(&mut self, amount: f64) -> Result<(), EconomyError> {
        if !amount.is_finite() || amount < 0.0 {
            return Err(EconomyError::InvalidAmount(amount));
        }
        self.balance += amount;
        Ok(())
    }

    /// Remove currency without going below zero. State is untouched on error.
    ///
    /// # Errors
    ///
    /// Returns [`EconomyError::InsufficientFunds`] when `cost > balance`, or
    /// [`EconomyError::InvalidAmount`] for a negative or non-finite cost.
    pub fn spend(&mut self, cost: f64) -> Result<(), EconomyError> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(EconomyError::InvalidAmount(cost));
        }
        if self.balance < cost {
            return Err(EconomyError::InsufficientFunds {
                cost,
                balance: self.balance,
            });
        }
        self.balance -= cost;
        Ok(())
    }

    /// Replace the balance, used only by reconciliation when a higher cached
    /// balance wins.
    pub(crate) fn raise_balance_to(&mut self, balance: f64) {
        if balance.is_finite() && balance > self.balance {
            self.balance = balance;
        }
    }
}
