// Copyright (c) 2024 Botho Foundation

//! The shared subsidy pool.
//!
//! ## Lifecycle
//!
//! 1. **Creation**: [`Subsidies::new`] or
//!    [`Subsidies::with_initial_rates_and_funds`] creates the pool together
//!    with the one [`AdminCap`] bound to it.
//! 2. **Funding**: anyone may [`add_funds`](Subsidies::add_funds).
//! 3. **Administration**: the capability holder changes the two rates and
//!    may [`withdraw_all`](Subsidies::withdraw_all) to move funds to a
//!    successor pool.
//! 4. **Upgrade**: [`migrate`](Subsidies::migrate) moves an old pool to
//!    [`CURRENT_VERSION`], once.

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    allocate::{allocate_subsidies, SubsidyAllocation, SubsidyRateBps, BASIS_POINTS},
    balance::Balance,
    capability::AdminCap,
    error::{SubsidyError, SubsidyResult},
    ids::{ObjectId, PackageRecord},
};

/// Highest accepted subsidy rate (100%).
pub const MAX_SUBSIDY_RATE: SubsidyRateBps = BASIS_POINTS as SubsidyRateBps;

/// Version of the pool logic in this crate.
pub const CURRENT_VERSION: u64 = 2;

/// Shared pool of funds subsidising storage purchases.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subsidies {
    id: ObjectId,
    /// Share of a purchase's cost refunded to the buyer.
    buyer_subsidy_rate: SubsidyRateBps,
    /// Share of a purchase's cost forwarded to the storage network.
    system_subsidy_rate: SubsidyRateBps,
    subsidy_pool: Balance,
    package_id: ObjectId,
    version: u64,
}

impl Subsidies {
    /// Create an empty pool with zero rates.
    pub fn new<R: RngCore + CryptoRng>(package: &PackageRecord, rng: &mut R) -> (Self, AdminCap) {
        let id = ObjectId::random(rng);
        let cap = AdminCap::new(ObjectId::random(rng), id);
        let subsidies = Self {
            id,
            buyer_subsidy_rate: 0,
            system_subsidy_rate: 0,
            subsidy_pool: Balance::zero(),
            package_id: package.package_id,
            version: CURRENT_VERSION,
        };
        info!(subsidies_id = %id, "created subsidy pool");
        (subsidies, cap)
    }

    /// Create a pool with the given rates and initial funds.
    pub fn with_initial_rates_and_funds<R: RngCore + CryptoRng>(
        package: &PackageRecord,
        buyer_subsidy_rate: SubsidyRateBps,
        system_subsidy_rate: SubsidyRateBps,
        initial_funds: Balance,
        rng: &mut R,
    ) -> SubsidyResult<(Self, AdminCap)> {
        check_rate(buyer_subsidy_rate)?;
        check_rate(system_subsidy_rate)?;

        let (mut subsidies, cap) = Self::new(package, rng);
        subsidies.buyer_subsidy_rate = buyer_subsidy_rate;
        subsidies.system_subsidy_rate = system_subsidy_rate;
        subsidies.subsidy_pool = initial_funds;
        Ok((subsidies, cap))
    }

    /// Add funds to the pool. Permissionless.
    pub fn add_funds(&mut self, funds: Balance) -> SubsidyResult<()> {
        let amount = funds.value();
        let total = self.subsidy_pool.join(funds)?;
        debug!(amount, total, "subsidy pool funded");
        Ok(())
    }

    /// Set the buyer subsidy rate.
    pub fn set_buyer_subsidy_rate(
        &mut self,
        cap: &AdminCap,
        new_rate: SubsidyRateBps,
    ) -> SubsidyResult<()> {
        self.check_admin_call(cap)?;
        check_rate(new_rate)?;
        self.buyer_subsidy_rate = new_rate;
        info!(new_rate, "buyer subsidy rate updated");
        Ok(())
    }

    /// Set the system subsidy rate.
    pub fn set_system_subsidy_rate(
        &mut self,
        cap: &AdminCap,
        new_rate: SubsidyRateBps,
    ) -> SubsidyResult<()> {
        self.check_admin_call(cap)?;
        check_rate(new_rate)?;
        self.system_subsidy_rate = new_rate;
        info!(new_rate, "system subsidy rate updated");
        Ok(())
    }

    /// Withdraw the entire pool, leaving the rates in place.
    ///
    /// Used to move funds to a successor pool.
    pub fn withdraw_all(&mut self, cap: &AdminCap) -> SubsidyResult<Balance> {
        self.check_admin_call(cap)?;
        let funds = self.subsidy_pool.withdraw_all();
        info!(amount = funds.value(), "subsidy pool withdrawn");
        Ok(funds)
    }

    /// Upgrade the pool to the version implemented by `package`.
    ///
    /// Fails with [`SubsidyError::WrongVersion`] unless the pool is older
    /// than [`CURRENT_VERSION`] and `package` implements it.
    pub fn migrate(&mut self, package: &PackageRecord) -> SubsidyResult<()> {
        if self.version >= CURRENT_VERSION || package.version != CURRENT_VERSION {
            return Err(SubsidyError::WrongVersion {
                expected: CURRENT_VERSION,
                found: self.version,
            });
        }
        let previous = self.version;
        self.version = CURRENT_VERSION;
        self.package_id = package.package_id;
        info!(from = previous, to = CURRENT_VERSION, package_id = %package.package_id, "migrated subsidy pool");
        Ok(())
    }

    /// Subsidies this pool grants for `cost`, given the pool value at the
    /// start of the operation.
    pub fn allocate_subsidies(
        &self,
        cost: u64,
        initial_pool_value: u64,
    ) -> SubsidyResult<SubsidyAllocation> {
        allocate_subsidies(
            self.buyer_subsidy_rate,
            self.system_subsidy_rate,
            cost,
            initial_pool_value,
        )
    }

    /// Identity the admin capability is bound to.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Identity of the package the pool was last migrated to.
    pub fn package_id(&self) -> ObjectId {
        self.package_id
    }

    /// Stored version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Value currently in the pool.
    pub fn subsidy_pool_value(&self) -> u64 {
        self.subsidy_pool.value()
    }

    /// Buyer subsidy rate in basis points.
    pub fn buyer_subsidy_rate(&self) -> SubsidyRateBps {
        self.buyer_subsidy_rate
    }

    /// System subsidy rate in basis points.
    pub fn system_subsidy_rate(&self) -> SubsidyRateBps {
        self.system_subsidy_rate
    }

    /// Fail unless the pool is at [`CURRENT_VERSION`].
    pub(crate) fn check_version(&self) -> SubsidyResult<()> {
        if self.version != CURRENT_VERSION {
            return Err(SubsidyError::WrongVersion {
                expected: CURRENT_VERSION,
                found: self.version,
            });
        }
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Copy of the pool for restoring after a failed operation.
    pub(crate) fn checkpoint(&self) -> Self {
        Self {
            subsidy_pool: self.subsidy_pool.checkpoint(),
            ..*self
        }
    }

    pub(crate) fn pool_mut(&mut self) -> &mut Balance {
        &mut self.subsidy_pool
    }

    fn check_admin_call(&self, cap: &AdminCap) -> SubsidyResult<()> {
        self.check_version()?;
        cap.authorize(self)
    }
}

fn check_rate(rate: SubsidyRateBps) -> SubsidyResult<()> {
    if rate > MAX_SUBSIDY_RATE {
        return Err(SubsidyError::InvalidRate(rate));
    }
    Ok(())
}
