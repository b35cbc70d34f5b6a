// Copyright (c) 2024 Botho Foundation

//! Combining a buyer's payment with the pool, and settling afterwards.
//!
//! ```text
//! combine:  working = pool + payment          (pool, payment -> 0)
//! storage:  working -= cost
//! settle:   pool    += working
//!           payment += initial_payment + buyer_subsidy - cost
//!           system  += system_subsidy
//! ```
//!
//! Across the whole sequence:
//!
//! ```text
//! initial_pool + initial_payment
//!     == final_pool + buyer_refund + system_subsidy + cost
//! ```

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    allocate::SubsidyAllocation,
    balance::Balance,
    error::{SubsidyError, SubsidyResult},
    pool::Subsidies,
    storage::StorageSystem,
};

/// Everything available to fund one storage operation.
///
/// Must be consumed by [`Subsidies::settle`] or [`WorkingPayment::unwind`].
/// Dropping one that still holds funds panics, since those funds would
/// otherwise vanish.
#[derive(Debug)]
#[must_use = "a working payment must be settled or unwound"]
pub struct WorkingPayment {
    payment: Balance,
    initial_payment_value: u64,
    initial_pool_value: u64,
}

impl WorkingPayment {
    /// Merged balance the storage system draws from.
    pub fn balance_mut(&mut self) -> &mut Balance {
        &mut self.payment
    }

    /// Value still held.
    pub fn value(&self) -> u64 {
        self.payment.value()
    }

    /// Buyer's payment value before combination.
    pub fn initial_payment_value(&self) -> u64 {
        self.initial_payment_value
    }

    /// Pool value before combination.
    pub fn initial_pool_value(&self) -> u64 {
        self.initial_pool_value
    }

    /// Return undrawn funds: the pool's share to the pool, the rest to the
    /// buyer.
    ///
    /// Used when the storage system rejects an operation without drawing.
    pub fn unwind(
        mut self,
        subsidies: &mut Subsidies,
        buyer_payment: &mut Balance,
    ) -> SubsidyResult<()> {
        let mut funds = self.payment.withdraw_all();
        let pool_share = funds.value().min(self.initial_pool_value);
        subsidies.pool_mut().join(funds.split(pool_share)?)?;
        buyer_payment.join(funds)?;
        Ok(())
    }
}

impl Drop for WorkingPayment {
    fn drop(&mut self) {
        if !self.payment.is_zero() && !std::thread::panicking() {
            panic!(
                "working payment dropped holding {} (initial payment {}, initial pool {})",
                self.payment.value(),
                self.initial_payment_value,
                self.initial_pool_value
            );
        }
    }
}

/// Result of settling one subsidised operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementOutcome {
    /// Value the storage system drew.
    pub cost: u64,
    /// Buyer's payment value before the operation.
    pub initial_payment_value: u64,
    /// Pool value before the operation.
    pub initial_pool_value: u64,
    /// Discount granted to the buyer.
    pub buyer_subsidy: u64,
    /// Reward forwarded to the storage network.
    pub system_subsidy: u64,
    /// Value returned to the buyer's payment.
    pub buyer_refund: u64,
}

impl SettlementOutcome {
    /// What the buyer actually paid.
    pub fn buyer_cost(&self) -> u64 {
        self.initial_payment_value - self.buyer_refund
    }
}

/// How a buyer-facing operation was paid for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Settlement {
    /// The pool was empty; the buyer paid the storage system directly.
    FastPath,
    /// The pool took part and was settled.
    Subsidized(SettlementOutcome),
}

impl Settlement {
    /// Settlement details, if the pool took part.
    pub fn outcome(&self) -> Option<&SettlementOutcome> {
        match self {
            Settlement::FastPath => None,
            Settlement::Subsidized(outcome) => Some(outcome),
        }
    }
}

impl Subsidies {
    /// Merge `payment` and the entire pool into one working payment.
    ///
    /// Leaves both `payment` and the pool at zero.
    pub fn combine_payment(&mut self, payment: &mut Balance) -> SubsidyResult<WorkingPayment> {
        let initial_payment_value = payment.value();
        let initial_pool_value = self.subsidy_pool_value();
        initial_payment_value
            .checked_add(initial_pool_value)
            .ok_or(SubsidyError::ArithmeticFault("payment plus pool overflows"))?;

        let mut combined = self.pool_mut().withdraw_all();
        combined.join(payment.withdraw_all())?;

        Ok(WorkingPayment {
            payment: combined,
            initial_payment_value,
            initial_pool_value,
        })
    }

    /// Reconcile a working payment after the storage system has drawn from
    /// it.
    ///
    /// Leftovers return to the pool, the buyer is refunded their payment plus
    /// subsidy minus cost, and the system subsidy is forwarded to `system`
    /// for `epochs_ahead` epochs. Fails with
    /// [`SubsidyError::ArithmeticFault`] when the cost exceeds the buyer's
    /// payment plus subsidy. The leftovers are then returned to the pool,
    /// so nothing is lost, but the cost has already been drawn. The
    /// buyer-facing [`Subsidies::reserve_space`] and
    /// [`Subsidies::extend_blob`] roll everything back in that case.
    ///
    /// # Panics
    ///
    /// Panics if the refund would exceed the buyer's original payment, which
    /// the allocation bounds rule out.
    pub fn settle<S: StorageSystem>(
        &mut self,
        mut working: WorkingPayment,
        buyer_payment: &mut Balance,
        epochs_ahead: u32,
        system: &mut S,
    ) -> SubsidyResult<SettlementOutcome> {
        let initial_payment_value = working.initial_payment_value;
        let initial_pool_value = working.initial_pool_value;
        let remaining = working.payment.withdraw_all();

        let reconciled = self.reconcile(initial_payment_value, initial_pool_value, remaining.value());
        self.pool_mut().join(remaining)?;
        let (cost, allocation, buyer_refund) = reconciled?;

        assert!(
            buyer_refund <= initial_payment_value,
            "buyer refund {buyer_refund} exceeds payment {initial_payment_value}"
        );

        buyer_payment.join(self.pool_mut().split(buyer_refund)?)?;
        let system_funds = self.pool_mut().split(allocation.system_subsidy)?;
        system.add_subsidy(system_funds, epochs_ahead)?;

        let outcome = SettlementOutcome {
            cost,
            initial_payment_value,
            initial_pool_value,
            buyer_subsidy: allocation.buyer_subsidy,
            system_subsidy: allocation.system_subsidy,
            buyer_refund,
        };
        debug!(
            cost,
            buyer_subsidy = outcome.buyer_subsidy,
            system_subsidy = outcome.system_subsidy,
            buyer_refund,
            pool = self.subsidy_pool_value(),
            "settled subsidised payment"
        );
        Ok(outcome)
    }

    /// Cost drawn, subsidies, and buyer refund for a settled operation.
    fn reconcile(
        &self,
        initial_payment_value: u64,
        initial_pool_value: u64,
        remaining: u64,
    ) -> SubsidyResult<(u64, SubsidyAllocation, u64)> {
        let cost = initial_payment_value
            .checked_add(initial_pool_value)
            .and_then(|available| available.checked_sub(remaining))
            .ok_or(SubsidyError::ArithmeticFault("working payment grew during operation"))?;
        let allocation = self.allocate_subsidies(cost, initial_pool_value)?;
        let buyer_refund = initial_payment_value
            .checked_add(allocation.buyer_subsidy)
            .and_then(|covered| covered.checked_sub(cost))
            .ok_or(SubsidyError::ArithmeticFault(
                "cost exceeds buyer payment plus buyer subsidy",
            ))?;
        Ok((cost, allocation, buyer_refund))
    }
}
