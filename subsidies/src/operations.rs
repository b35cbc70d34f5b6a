// Copyright (c) 2024 Botho Foundation

//! Buyer-facing storage purchases routed through the pool.
//!
//! Reserving space and extending a blob combine the buyer's payment with
//! the pool, let the storage system draw its price, and settle. An empty
//! pool skips all of that and forwards the payment unchanged. Blob
//! registration is passed straight through.
//!
//! Each operation is all-or-nothing: on error the pool, the storage system,
//! the payment, and any blob are left as they were before the call.

use tracing::{debug, warn};

use crate::{
    balance::Balance,
    error::SubsidyResult,
    payment::Settlement,
    pool::Subsidies,
    storage::{BlobDescriptor, StorageSystem},
};

impl Subsidies {
    /// Reserve `storage_amount` bytes for `epochs_ahead` epochs.
    pub fn reserve_space<S: StorageSystem>(
        &mut self,
        system: &mut S,
        storage_amount: u64,
        epochs_ahead: u32,
        payment: &mut Balance,
    ) -> SubsidyResult<(S::Storage, Settlement)> {
        self.checkpointed(system, payment, |subsidies, system, payment| {
            subsidies.try_reserve_space(system, storage_amount, epochs_ahead, payment)
        })
    }

    /// Extend `blob` by `extended_epochs`.
    pub fn extend_blob<S>(
        &mut self,
        system: &mut S,
        blob: &mut S::Blob,
        extended_epochs: u32,
        payment: &mut Balance,
    ) -> SubsidyResult<Settlement>
    where
        S: StorageSystem,
        S::Blob: Clone,
    {
        let saved_blob = blob.clone();
        self.checkpointed(system, payment, |subsidies, system, payment| {
            subsidies.try_extend_blob(system, blob, extended_epochs, payment)
        })
        .inspect_err(|_| *blob = saved_blob)
    }

    /// Register a blob. No subsidy applies.
    pub fn register_blob<S: StorageSystem>(
        &mut self,
        system: &mut S,
        storage: S::Storage,
        descriptor: BlobDescriptor,
        payment: &mut Balance,
    ) -> SubsidyResult<S::Blob> {
        self.check_version()?;
        self.checkpointed(system, payment, |_, system, payment| {
            Ok(system.register_blob(storage, descriptor, payment)?)
        })
    }

    /// Run `op`, putting the pool, `system` and `payment` back as they were
    /// if it fails.
    fn checkpointed<S: StorageSystem, T>(
        &mut self,
        system: &mut S,
        payment: &mut Balance,
        op: impl FnOnce(&mut Self, &mut S, &mut Balance) -> SubsidyResult<T>,
    ) -> SubsidyResult<T> {
        let saved = (self.checkpoint(), system.checkpoint(), payment.checkpoint());
        match op(self, system, payment) {
            Ok(value) => Ok(value),
            Err(err) => {
                (*self, *system, *payment) = saved;
                Err(err)
            }
        }
    }

    fn try_reserve_space<S: StorageSystem>(
        &mut self,
        system: &mut S,
        storage_amount: u64,
        epochs_ahead: u32,
        payment: &mut Balance,
    ) -> SubsidyResult<(S::Storage, Settlement)> {
        self.check_version()?;

        if self.subsidy_pool_value() == 0 {
            debug!(storage_amount, epochs_ahead, "empty subsidy pool, reserving directly");
            let storage = system.reserve_space(storage_amount, epochs_ahead, payment)?;
            return Ok((storage, Settlement::FastPath));
        }

        let mut working = self.combine_payment(payment)?;
        let storage = match system.reserve_space(storage_amount, epochs_ahead, working.balance_mut())
        {
            Ok(storage) => storage,
            Err(err) => {
                warn!(%err, "storage reservation rejected");
                working.unwind(self, payment)?;
                return Err(err.into());
            }
        };
        let outcome = self.settle(working, payment, epochs_ahead, system)?;
        Ok((storage, Settlement::Subsidized(outcome)))
    }

    fn try_extend_blob<S: StorageSystem>(
        &mut self,
        system: &mut S,
        blob: &mut S::Blob,
        extended_epochs: u32,
        payment: &mut Balance,
    ) -> SubsidyResult<Settlement> {
        self.check_version()?;

        if self.subsidy_pool_value() == 0 {
            debug!(extended_epochs, "empty subsidy pool, extending directly");
            system.extend_blob(blob, extended_epochs, payment)?;
            return Ok(Settlement::FastPath);
        }

        let mut working = self.combine_payment(payment)?;
        if let Err(err) = system.extend_blob(blob, extended_epochs, working.balance_mut()) {
            warn!(%err, "blob extension rejected");
            working.unwind(self, payment)?;
            return Err(err.into());
        }
        let outcome = self.settle(working, payment, extended_epochs, system)?;
        Ok(Settlement::Subsidized(outcome))
    }
}
