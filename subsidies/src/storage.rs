// Copyright (c) 2024 Botho Foundation

//! Boundary to the storage system, plus an in-memory reference system.
//!
//! The pool never prices storage itself. It hands a payment to a
//! [`StorageSystem`], lets the system draw what it charges, and reconciles
//! whatever is left over.

use std::collections::VecDeque;

use displaydoc::Display;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::{balance::Balance, error::BalanceError};

/// Capacity is charged per started MiB.
pub const BYTES_PER_UNIT_SIZE: u64 = 1024 * 1024;

/// Errors returned by a storage system.
///
/// A system must leave the payment untouched when it returns an error.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum StorageError {
    /// Payment rejected: {0}
    Payment(#[from] BalanceError),

    /// Invalid epoch count {requested}: must be between 1 and {max}
    InvalidEpochs { requested: u32, max: u32 },

    /// Storage amount must be non-zero
    ZeroStorage,

    /// Storage of {available} bytes is too small for a blob of {required} bytes
    StorageTooSmall { available: u64, required: u64 },

    /// Blob expired at epoch {end_epoch}, current epoch is {current_epoch}
    BlobExpired { end_epoch: u32, current_epoch: u32 },

    /// Storage price overflows u64
    PriceOverflow,

    /// Rewards for an epoch would overflow u64
    RewardsOverflow,
}

/// Descriptor of the data a blob registration covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobDescriptor {
    /// Content identifier of the blob.
    pub blob_id: [u8; 32],
    /// Size in bytes.
    pub size: u64,
    /// Whether the owner may delete the blob before it expires.
    pub deletable: bool,
}

/// The operations the pool delegates to the storage network.
pub trait StorageSystem {
    /// Reserved capacity.
    type Storage;
    /// Registered blob.
    type Blob;

    /// Reserve `storage_amount` bytes for `epochs_ahead` epochs, drawing the
    /// price from `payment`.
    fn reserve_space(
        &mut self,
        storage_amount: u64,
        epochs_ahead: u32,
        payment: &mut Balance,
    ) -> Result<Self::Storage, StorageError>;

    /// Extend `blob` by `extended_epochs`, drawing the price from `payment`.
    fn extend_blob(
        &mut self,
        blob: &mut Self::Blob,
        extended_epochs: u32,
        payment: &mut Balance,
    ) -> Result<(), StorageError>;

    /// Register a blob into `storage`, drawing the write fee from `payment`.
    fn register_blob(
        &mut self,
        storage: Self::Storage,
        descriptor: BlobDescriptor,
        payment: &mut Balance,
    ) -> Result<Self::Blob, StorageError>;

    /// Add `funds` to the network's rewards for the next `epochs_ahead`
    /// epochs.
    fn add_subsidy(&mut self, funds: Balance, epochs_ahead: u32) -> Result<(), StorageError>;

    /// Snapshot of the system's state, put back if the operation that
    /// follows fails.
    fn checkpoint(&self) -> Self
    where
        Self: Sized;
}

/// Capacity reserved on the in-memory system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Storage {
    /// First epoch the reservation covers.
    pub start_epoch: u32,
    /// Epoch at which the reservation expires (exclusive).
    pub end_epoch: u32,
    /// Reserved bytes.
    pub storage_size: u64,
}

/// Blob registered on the in-memory system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Blob {
    /// Registered data.
    pub descriptor: BlobDescriptor,
    /// Capacity backing the blob.
    pub storage: Storage,
}

impl Blob {
    /// Epoch at which the blob expires.
    pub fn end_epoch(&self) -> u32 {
        self.storage.end_epoch
    }
}

/// Prices for the in-memory system.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoragePricing {
    /// Price per unit size per epoch of reserved capacity.
    pub storage_price_per_unit_size: u64,
    /// One-off price per unit size to register a blob.
    pub write_price_per_unit_size: u64,
    /// Furthest epoch offset a reservation may reach.
    pub max_epochs_ahead: u32,
}

impl Default for StoragePricing {
    fn default() -> Self {
        Self {
            storage_price_per_unit_size: 100,
            write_price_per_unit_size: 20,
            max_epochs_ahead: 53, // ~2 years of 2-week epochs
        }
    }
}

/// Storage system that keeps all accounting in memory.
///
/// Payments for capacity are spread over the epochs they pay for, and
/// subsidies are spread over the epochs they were granted for. Rewards for
/// an epoch are paid out by [`InMemoryStorage::advance_epoch`].
#[derive(Debug, Serialize, Deserialize)]
pub struct InMemoryStorage {
    pricing: StoragePricing,
    current_epoch: u32,
    /// Rewards for the current epoch and the `max_epochs_ahead - 1` epochs
    /// after it.
    future_rewards: VecDeque<Balance>,
}

impl InMemoryStorage {
    /// Create a system at epoch 0.
    pub fn new(pricing: StoragePricing) -> Self {
        let slots = pricing.max_epochs_ahead.max(1) as usize;
        Self {
            pricing,
            current_epoch: 0,
            future_rewards: (0..slots).map(|_| Balance::zero()).collect(),
        }
    }

    /// Pricing in force.
    pub fn pricing(&self) -> &StoragePricing {
        &self.pricing
    }

    /// Current epoch.
    pub fn current_epoch(&self) -> u32 {
        self.current_epoch
    }

    /// Rewards accrued for the epoch `offset` epochs from now.
    pub fn rewards_for_epoch_offset(&self, offset: usize) -> u64 {
        self.future_rewards.get(offset).map_or(0, Balance::value)
    }

    /// Total value held for future rewards.
    pub fn total_rewards(&self) -> u64 {
        self.future_rewards.iter().map(Balance::value).sum()
    }

    /// Close the current epoch and return its rewards.
    pub fn advance_epoch(&mut self) -> Balance {
        let paid = self.future_rewards.pop_front().unwrap_or_default();
        self.future_rewards.push_back(Balance::zero());
        self.current_epoch += 1;
        paid
    }

    /// Price of reserving `storage_amount` bytes for `epochs` epochs.
    pub fn storage_cost(&self, storage_amount: u64, epochs: u32) -> Result<u64, StorageError> {
        storage_units(storage_amount)
            .checked_mul(self.pricing.storage_price_per_unit_size)
            .and_then(|per_epoch| per_epoch.checked_mul(epochs as u64))
            .ok_or(StorageError::PriceOverflow)
    }

    /// Price of registering a blob of `size` bytes.
    pub fn write_cost(&self, size: u64) -> Result<u64, StorageError> {
        storage_units(size)
            .checked_mul(self.pricing.write_price_per_unit_size)
            .ok_or(StorageError::PriceOverflow)
    }

    fn check_epochs(&self, requested: u32) -> Result<(), StorageError> {
        let max = self.pricing.max_epochs_ahead;
        if requested == 0 || requested > max {
            return Err(StorageError::InvalidEpochs { requested, max });
        }
        Ok(())
    }

    /// Shares of `amount` for the epochs `[start, end)` relative to now,
    /// the first epoch taking the remainder.
    ///
    /// Fails if any epoch could not absorb its share, before any funds move.
    fn shares(&self, amount: u64, start: u32, end: u32) -> Result<Vec<(usize, u64)>, StorageError> {
        let start = start as usize;
        let end = (end as usize).min(self.future_rewards.len()).max(start + 1);
        let epochs = (end - start) as u64;
        let per_epoch = amount / epochs;
        let first = amount - per_epoch * (epochs - 1);

        (start..end)
            .map(|offset| {
                let share = if offset == start { first } else { per_epoch };
                let slot = self
                    .future_rewards
                    .get(offset)
                    .ok_or(StorageError::RewardsOverflow)?;
                slot.value()
                    .checked_add(share)
                    .ok_or(StorageError::RewardsOverflow)?;
                Ok((offset, share))
            })
            .collect()
    }

    /// Move `funds` into the epochs planned by [`Self::shares`].
    fn credit(&mut self, mut funds: Balance, shares: &[(usize, u64)]) -> Result<(), StorageError> {
        let Some((&(first, _), rest)) = shares.split_first() else {
            return Ok(());
        };
        for &(offset, share) in rest {
            self.future_rewards[offset].join(funds.split(share)?)?;
        }
        self.future_rewards[first].join(funds)?;
        Ok(())
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new(StoragePricing::default())
    }
}

impl StorageSystem for InMemoryStorage {
    type Storage = Storage;
    type Blob = Blob;

    fn reserve_space(
        &mut self,
        storage_amount: u64,
        epochs_ahead: u32,
        payment: &mut Balance,
    ) -> Result<Storage, StorageError> {
        if storage_amount == 0 {
            return Err(StorageError::ZeroStorage);
        }
        self.check_epochs(epochs_ahead)?;
        let cost = self.storage_cost(storage_amount, epochs_ahead)?;
        let shares = self.shares(cost, 0, epochs_ahead)?;
        let fee = payment.split(cost)?;
        self.credit(fee, &shares)?;

        trace!(storage_amount, epochs_ahead, cost, "reserved storage");
        Ok(Storage {
            start_epoch: self.current_epoch,
            end_epoch: self.current_epoch + epochs_ahead,
            storage_size: storage_amount,
        })
    }

    fn extend_blob(
        &mut self,
        blob: &mut Blob,
        extended_epochs: u32,
        payment: &mut Balance,
    ) -> Result<(), StorageError> {
        let end_epoch = blob.end_epoch();
        if end_epoch <= self.current_epoch {
            return Err(StorageError::BlobExpired {
                end_epoch,
                current_epoch: self.current_epoch,
            });
        }
        let start_offset = end_epoch - self.current_epoch;
        let requested = start_offset.saturating_add(extended_epochs);
        if extended_epochs == 0 || requested > self.pricing.max_epochs_ahead {
            return Err(StorageError::InvalidEpochs {
                requested,
                max: self.pricing.max_epochs_ahead,
            });
        }
        let cost = self.storage_cost(blob.storage.storage_size, extended_epochs)?;
        let shares = self.shares(cost, start_offset, requested)?;
        let fee = payment.split(cost)?;
        self.credit(fee, &shares)?;

        blob.storage.end_epoch += extended_epochs;
        trace!(extended_epochs, cost, end_epoch = blob.storage.end_epoch, "extended blob");
        Ok(())
    }

    fn register_blob(
        &mut self,
        storage: Storage,
        descriptor: BlobDescriptor,
        payment: &mut Balance,
    ) -> Result<Blob, StorageError> {
        if descriptor.size > storage.storage_size {
            return Err(StorageError::StorageTooSmall {
                available: storage.storage_size,
                required: descriptor.size,
            });
        }
        if storage.end_epoch <= self.current_epoch {
            return Err(StorageError::BlobExpired {
                end_epoch: storage.end_epoch,
                current_epoch: self.current_epoch,
            });
        }
        let cost = self.write_cost(descriptor.size)?;
        let shares = self.shares(cost, 0, 1)?;
        let fee = payment.split(cost)?;
        self.credit(fee, &shares)?;

        Ok(Blob {
            descriptor,
            storage,
        })
    }

    fn add_subsidy(&mut self, funds: Balance, epochs_ahead: u32) -> Result<(), StorageError> {
        if funds.is_zero() {
            return Ok(());
        }
        trace!(amount = funds.value(), epochs_ahead, "storage subsidy received");
        let shares = self.shares(funds.value(), 0, epochs_ahead)?;
        self.credit(funds, &shares)
    }

    fn checkpoint(&self) -> Self {
        Self {
            pricing: self.pricing.clone(),
            current_epoch: self.current_epoch,
            future_rewards: self.future_rewards.iter().map(Balance::checkpoint).collect(),
        }
    }
}

/// Number of started units covering `bytes`.
pub fn storage_units(bytes: u64) -> u64 {
    bytes.div_ceil(BYTES_PER_UNIT_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = BYTES_PER_UNIT_SIZE;

    fn system() -> InMemoryStorage {
        InMemoryStorage::new(StoragePricing {
            storage_price_per_unit_size: 10,
            write_price_per_unit_size: 3,
            max_epochs_ahead: 5,
        })
    }

    #[test]
    fn test_storage_units_round_up() {
        assert_eq!(storage_units(0), 0);
        assert_eq!(storage_units(1), 1);
        assert_eq!(storage_units(MIB), 1);
        assert_eq!(storage_units(MIB + 1), 2);
    }

    #[test]
    fn test_reserve_draws_exact_price() {
        let mut system = system();
        let mut payment = Balance::issue(1_000);
        let storage = system.reserve_space(2 * MIB, 3, &mut payment).unwrap();

        assert_eq!(payment.value(), 1_000 - 60);
        assert_eq!(system.total_rewards(), 60);
        assert_eq!(system.rewards_for_epoch_offset(0), 20);
        assert_eq!(system.rewards_for_epoch_offset(2), 20);
        assert_eq!(system.rewards_for_epoch_offset(3), 0);
        assert_eq!((storage.start_epoch, storage.end_epoch), (0, 3));
    }

    #[test]
    fn test_failed_reserve_leaves_payment_untouched() {
        let mut system = system();
        let mut payment = Balance::issue(5);
        let err = system.reserve_space(MIB, 1, &mut payment).unwrap_err();
        assert!(matches!(err, StorageError::Payment(_)));
        assert_eq!(payment.value(), 5);

        assert_eq!(
            system.reserve_space(MIB, 6, &mut payment),
            Err(StorageError::InvalidEpochs { requested: 6, max: 5 })
        );
        assert_eq!(system.reserve_space(0, 1, &mut payment), Err(StorageError::ZeroStorage));
        assert_eq!(system.total_rewards(), 0);
    }

    #[test]
    fn test_extend_pays_for_new_epochs_only() {
        let mut system = system();
        let mut payment = Balance::issue(1_000);
        let storage = system.reserve_space(MIB, 2, &mut payment).unwrap();
        let descriptor = BlobDescriptor {
            blob_id: [1; 32],
            size: MIB,
            deletable: false,
        };
        let mut blob = system.register_blob(storage, descriptor, &mut payment).unwrap();
        assert_eq!(payment.value(), 1_000 - 20 - 3);

        system.extend_blob(&mut blob, 2, &mut payment).unwrap();
        assert_eq!(blob.end_epoch(), 4);
        assert_eq!(payment.value(), 1_000 - 20 - 3 - 20);
        assert_eq!(system.rewards_for_epoch_offset(2), 10);
        assert_eq!(system.rewards_for_epoch_offset(3), 10);

        let err = system.extend_blob(&mut blob, 2, &mut payment).unwrap_err();
        assert_eq!(err, StorageError::InvalidEpochs { requested: 6, max: 5 });
    }

    #[test]
    fn test_subsidy_spread_with_remainder_first() {
        let mut system = system();
        system.add_subsidy(Balance::issue(11), 3).unwrap();
        assert_eq!(system.rewards_for_epoch_offset(0), 5);
        assert_eq!(system.rewards_for_epoch_offset(1), 3);
        assert_eq!(system.rewards_for_epoch_offset(2), 3);

        let paid = system.advance_epoch();
        assert_eq!(paid.value(), 5);
        assert_eq!(system.current_epoch(), 1);
        assert_eq!(system.total_rewards(), 6);
    }

    #[test]
    fn test_full_reward_slot_rejects_payment_untouched() {
        let mut system = system();
        system.add_subsidy(Balance::issue(u64::MAX - 5), 1).unwrap();
        let mut payment = Balance::issue(1_000);

        assert_eq!(
            system.reserve_space(MIB, 3, &mut payment),
            Err(StorageError::RewardsOverflow)
        );
        assert_eq!(payment.value(), 1_000);
        assert_eq!(system.rewards_for_epoch_offset(0), u64::MAX - 5);
        assert_eq!(system.rewards_for_epoch_offset(1), 0);

        assert_eq!(
            system.add_subsidy(Balance::issue(10), 1),
            Err(StorageError::RewardsOverflow)
        );
        assert_eq!(system.rewards_for_epoch_offset(0), u64::MAX - 5);
    }

    #[test]
    fn test_expired_blob_cannot_extend() {
        let mut system = system();
        let mut payment = Balance::issue(1_000);
        let storage = system.reserve_space(MIB, 1, &mut payment).unwrap();
        let mut blob = Blob {
            descriptor: BlobDescriptor {
                blob_id: [2; 32],
                size: 10,
                deletable: true,
            },
            storage,
        };
        let _ = system.advance_epoch();
        assert_eq!(
            system.extend_blob(&mut blob, 1, &mut payment),
            Err(StorageError::BlobExpired {
                end_epoch: 1,
                current_epoch: 1
            })
        );
    }
}
