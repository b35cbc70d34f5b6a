// Copyright (c) 2024 Botho Foundation

//! Exact-amount value container.
//!
//! A [`Balance`] is the only way value moves through the pool. Splits and
//! joins are exact: the sum of all balances is unchanged by any pair of
//! operations, and no operation can drive a balance below zero.

use serde::{Deserialize, Serialize};

use crate::error::BalanceError;

/// An amount of the funding token, in its smallest unit.
///
/// Not `Clone`: the only copies are crate-internal checkpoints, of which at
/// most one is ever committed. Deserializing restores persisted state and,
/// like [`Balance::issue`], is an entry point for external funds.
#[derive(Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Balance {
    value: u64,
}

impl Balance {
    /// An empty balance.
    pub fn zero() -> Self {
        Self { value: 0 }
    }

    /// Bring `value` under the control of the pool's accounting.
    ///
    /// Token issuance happens outside this crate; this is the boundary where
    /// externally held funds enter.
    pub fn issue(value: u64) -> Self {
        Self { value }
    }

    /// Snapshot restored if the operation that follows fails.
    pub(crate) fn checkpoint(&self) -> Self {
        Self { value: self.value }
    }

    /// Current value.
    pub fn value(&self) -> u64 {
        self.value
    }

    /// Whether the balance holds nothing.
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Split `amount` off into a new balance.
    ///
    /// Leaves `self` untouched on error.
    pub fn split(&mut self, amount: u64) -> Result<Balance, BalanceError> {
        let remaining =
            self.value
                .checked_sub(amount)
                .ok_or(BalanceError::InsufficientFunds {
                    available: self.value,
                    requested: amount,
                })?;
        self.value = remaining;
        Ok(Balance { value: amount })
    }

    /// Join `other` into this balance, returning the new value.
    pub fn join(&mut self, other: Balance) -> Result<u64, BalanceError> {
        self.value = self
            .value
            .checked_add(other.value)
            .ok_or(BalanceError::Overflow {
                current: self.value,
                incoming: other.value,
            })?;
        Ok(self.value)
    }

    /// Move the whole value into a new balance, leaving this one at zero.
    pub fn withdraw_all(&mut self) -> Balance {
        Balance {
            value: std::mem::take(&mut self.value),
        }
    }

    /// Destroy an empty balance.
    pub fn destroy_zero(self) -> Result<(), BalanceError> {
        if self.value != 0 {
            return Err(BalanceError::NonZero(self.value));
        }
        Ok(())
    }
}
