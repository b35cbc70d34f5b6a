// Copyright (c) 2024 Botho Foundation

//! Transactional access to a deployed pool.
//!
//! A [`SubsidyLedger`] holds everything one operation may touch: the pool,
//! the storage system, and the buyers' balances. [`SharedSubsidies`] wraps
//! it behind a single-writer lock and applies each operation to a draft
//! copy, committing the draft only if the operation succeeds. A failed
//! operation therefore leaves no trace, whatever it had already changed.

use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::{
    allocate::SubsidyRateBps,
    balance::Balance,
    capability::AdminCap,
    error::{SubsidyError, SubsidyResult},
    ids::PackageRecord,
    payment::Settlement,
    pool::Subsidies,
    storage::{BlobDescriptor, StorageSystem},
};

/// The pool, the storage system, and named buyer accounts.
///
/// Purchases are all-or-nothing on their own: a failed one leaves the
/// paying account, the pool and the storage system untouched.
#[derive(Debug)]
pub struct SubsidyLedger<S> {
    subsidies: Subsidies,
    system: S,
    accounts: BTreeMap<String, Balance>,
}

impl<S: StorageSystem> SubsidyLedger<S> {
    /// Create a ledger with no buyer accounts.
    pub fn new(subsidies: Subsidies, system: S) -> Self {
        Self {
            subsidies,
            system,
            accounts: BTreeMap::new(),
        }
    }

    /// The pool.
    pub fn subsidies(&self) -> &Subsidies {
        &self.subsidies
    }

    /// The pool, mutably.
    pub fn subsidies_mut(&mut self) -> &mut Subsidies {
        &mut self.subsidies
    }

    /// The storage system.
    pub fn system(&self) -> &S {
        &self.system
    }

    /// The storage system, mutably.
    pub fn system_mut(&mut self) -> &mut S {
        &mut self.system
    }

    /// Credit `funds` to `account`, opening it if needed.
    pub fn deposit(&mut self, account: &str, funds: Balance) -> SubsidyResult<u64> {
        Ok(self
            .accounts
            .entry(account.to_string())
            .or_default()
            .join(funds)?)
    }

    /// Take `amount` out of `account`.
    pub fn withdraw(&mut self, account: &str, amount: u64) -> SubsidyResult<Balance> {
        Ok(self.account_mut(account)?.split(amount)?)
    }

    /// Value held by `account`, zero if unknown.
    pub fn balance_of(&self, account: &str) -> u64 {
        self.accounts.get(account).map_or(0, Balance::value)
    }

    /// All accounts and their values.
    pub fn accounts(&self) -> impl Iterator<Item = (&str, u64)> {
        self.accounts
            .iter()
            .map(|(name, balance)| (name.as_str(), balance.value()))
    }

    /// Sum of all account values.
    pub fn total_account_value(&self) -> u128 {
        self.accounts.values().map(|b| b.value() as u128).sum()
    }

    /// Reserve storage paid from `account`.
    pub fn reserve_space(
        &mut self,
        account: &str,
        storage_amount: u64,
        epochs_ahead: u32,
    ) -> SubsidyResult<(S::Storage, Settlement)> {
        let payment = self.accounts.get_mut(account).ok_or_else(|| unknown(account))?;
        self.subsidies
            .reserve_space(&mut self.system, storage_amount, epochs_ahead, payment)
    }

    /// Extend `blob` paid from `account`.
    pub fn extend_blob(
        &mut self,
        account: &str,
        blob: &mut S::Blob,
        extended_epochs: u32,
    ) -> SubsidyResult<Settlement>
    where
        S::Blob: Clone,
    {
        let payment = self.accounts.get_mut(account).ok_or_else(|| unknown(account))?;
        self.subsidies
            .extend_blob(&mut self.system, blob, extended_epochs, payment)
    }

    /// Register a blob paid from `account`.
    pub fn register_blob(
        &mut self,
        account: &str,
        storage: S::Storage,
        descriptor: BlobDescriptor,
    ) -> SubsidyResult<S::Blob> {
        let payment = self.accounts.get_mut(account).ok_or_else(|| unknown(account))?;
        self.subsidies
            .register_blob(&mut self.system, storage, descriptor, payment)
    }

    /// Draft copy for [`SharedSubsidies::transact`].
    pub(crate) fn checkpoint(&self) -> Self {
        Self {
            subsidies: self.subsidies.checkpoint(),
            system: self.system.checkpoint(),
            accounts: self
                .accounts
                .iter()
                .map(|(name, balance)| (name.clone(), balance.checkpoint()))
                .collect(),
        }
    }

    fn account_mut(&mut self, account: &str) -> SubsidyResult<&mut Balance> {
        self.accounts.get_mut(account).ok_or_else(|| unknown(account))
    }
}

fn unknown(account: &str) -> SubsidyError {
    SubsidyError::UnknownAccount(account.to_string())
}

/// Counters over committed and failed operations.
#[derive(Debug, Default)]
pub struct SubsidyStats {
    subsidized_operations: AtomicU64,
    fast_path_operations: AtomicU64,
    buyer_subsidies_paid: AtomicU64,
    system_subsidies_paid: AtomicU64,
    failed_operations: AtomicU64,
}

impl SubsidyStats {
    /// Purchases settled against the pool.
    pub fn subsidized_operations(&self) -> u64 {
        self.subsidized_operations.load(Ordering::Relaxed)
    }

    /// Purchases that bypassed an empty pool.
    pub fn fast_path_operations(&self) -> u64 {
        self.fast_path_operations.load(Ordering::Relaxed)
    }

    /// Total discount granted to buyers.
    pub fn buyer_subsidies_paid(&self) -> u64 {
        self.buyer_subsidies_paid.load(Ordering::Relaxed)
    }

    /// Total forwarded to the storage network.
    pub fn system_subsidies_paid(&self) -> u64 {
        self.system_subsidies_paid.load(Ordering::Relaxed)
    }

    /// Transactions rolled back.
    pub fn failed_operations(&self) -> u64 {
        self.failed_operations.load(Ordering::Relaxed)
    }

    fn record(&self, settlement: &Settlement) {
        match settlement {
            Settlement::FastPath => {
                self.fast_path_operations.fetch_add(1, Ordering::Relaxed);
            }
            Settlement::Subsidized(outcome) => {
                self.subsidized_operations.fetch_add(1, Ordering::Relaxed);
                self.buyer_subsidies_paid
                    .fetch_add(outcome.buyer_subsidy, Ordering::Relaxed);
                self.system_subsidies_paid
                    .fetch_add(outcome.system_subsidy, Ordering::Relaxed);
            }
        }
    }

    fn increment_failed(&self) {
        self.failed_operations.fetch_add(1, Ordering::Relaxed);
    }
}

/// Thread-safe handle to a deployed pool.
///
/// Writers are serialized by a `RwLock`; each write runs against a draft of
/// the ledger and is committed only on success.
pub struct SharedSubsidies<S> {
    inner: Arc<RwLock<SubsidyLedger<S>>>,
    stats: Arc<SubsidyStats>,
}

impl<S> Clone for SharedSubsidies<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            stats: Arc::clone(&self.stats),
        }
    }
}

impl<S: StorageSystem> SharedSubsidies<S> {
    /// Share `ledger`.
    pub fn new(ledger: SubsidyLedger<S>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ledger)),
            stats: Arc::new(SubsidyStats::default()),
        }
    }

    /// Apply `f` atomically: its changes are kept only if it returns `Ok`.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&mut SubsidyLedger<S>) -> SubsidyResult<T>,
    ) -> SubsidyResult<T> {
        let mut ledger = self.inner.write();
        let mut draft = ledger.checkpoint();
        match f(&mut draft) {
            Ok(value) => {
                *ledger = draft;
                Ok(value)
            }
            Err(err) => {
                self.stats.increment_failed();
                warn!(%err, "subsidy transaction rolled back");
                Err(err)
            }
        }
    }

    /// Run `f` against the committed ledger.
    pub fn read<T>(&self, f: impl FnOnce(&SubsidyLedger<S>) -> T) -> T {
        f(&self.inner.read())
    }

    /// Operation counters.
    pub fn stats(&self) -> Arc<SubsidyStats> {
        Arc::clone(&self.stats)
    }

    /// Value currently in the pool.
    pub fn subsidy_pool_value(&self) -> u64 {
        self.read(|ledger| ledger.subsidies().subsidy_pool_value())
    }

    /// Value held by `account`.
    pub fn balance_of(&self, account: &str) -> u64 {
        self.read(|ledger| ledger.balance_of(account))
    }

    /// Credit `funds` to `account`.
    pub fn deposit(&self, account: &str, funds: Balance) -> SubsidyResult<u64> {
        self.transact(|ledger| ledger.deposit(account, funds))
    }

    /// Add funds to the pool.
    pub fn add_funds(&self, funds: Balance) -> SubsidyResult<()> {
        self.transact(|ledger| ledger.subsidies_mut().add_funds(funds))
    }

    /// Set the buyer subsidy rate.
    pub fn set_buyer_subsidy_rate(&self, cap: &AdminCap, rate: SubsidyRateBps) -> SubsidyResult<()> {
        self.transact(|ledger| ledger.subsidies_mut().set_buyer_subsidy_rate(cap, rate))
    }

    /// Set the system subsidy rate.
    pub fn set_system_subsidy_rate(&self, cap: &AdminCap, rate: SubsidyRateBps) -> SubsidyResult<()> {
        self.transact(|ledger| ledger.subsidies_mut().set_system_subsidy_rate(cap, rate))
    }

    /// Withdraw the entire pool.
    pub fn withdraw_all(&self, cap: &AdminCap) -> SubsidyResult<Balance> {
        self.transact(|ledger| ledger.subsidies_mut().withdraw_all(cap))
    }

    /// Migrate the pool to `package`.
    pub fn migrate(&self, package: &PackageRecord) -> SubsidyResult<()> {
        self.transact(|ledger| ledger.subsidies_mut().migrate(package))
    }

    /// Reserve storage paid from `account`.
    pub fn reserve_space(
        &self,
        account: &str,
        storage_amount: u64,
        epochs_ahead: u32,
    ) -> SubsidyResult<(S::Storage, Settlement)> {
        let (storage, settlement) =
            self.transact(|ledger| ledger.reserve_space(account, storage_amount, epochs_ahead))?;
        self.stats.record(&settlement);
        debug!(account, ?settlement, "storage reserved");
        Ok((storage, settlement))
    }

    /// Extend `blob` paid from `account`.
    ///
    /// `blob` is only updated if the whole operation commits.
    pub fn extend_blob(
        &self,
        account: &str,
        blob: &mut S::Blob,
        extended_epochs: u32,
    ) -> SubsidyResult<Settlement>
    where
        S::Blob: Clone,
    {
        let mut draft = blob.clone();
        let settlement =
            self.transact(|ledger| ledger.extend_blob(account, &mut draft, extended_epochs))?;
        *blob = draft;
        self.stats.record(&settlement);
        debug!(account, ?settlement, "blob extended");
        Ok(settlement)
    }
}
