// Copyright (c) 2024 Botho Foundation
//
//! Shared setup for the subsidy integration tests.

#![allow(dead_code)]

use rand::{rngs::StdRng, SeedableRng};
use storage_subsidies::{
    storage::BYTES_PER_UNIT_SIZE, AdminCap, Balance, InMemoryStorage, ObjectId, PackageRecord,
    SharedSubsidies, StoragePricing, SubsidyLedger, Subsidies,
};

pub const MIB: u64 = BYTES_PER_UNIT_SIZE;

/// 100 per MiB-epoch, free registration, 10 epochs ahead.
pub fn pricing() -> StoragePricing {
    StoragePricing {
        storage_price_per_unit_size: 100,
        write_price_per_unit_size: 0,
        max_epochs_ahead: 10,
    }
}

/// Deploy a pool with the given rates and funds.
pub fn deploy(buyer_rate: u16, system_rate: u16, funds: u64, seed: u64) -> (Subsidies, AdminCap) {
    let mut rng = StdRng::seed_from_u64(seed);
    let package = PackageRecord::current(ObjectId::random(&mut rng));
    Subsidies::with_initial_rates_and_funds(
        &package,
        buyer_rate,
        system_rate,
        Balance::issue(funds),
        &mut rng,
    )
    .unwrap()
}

/// Deploy a pool behind a shared handle with the given buyers.
pub fn deploy_shared(
    buyer_rate: u16,
    system_rate: u16,
    funds: u64,
    buyers: &[(&str, u64)],
) -> (SharedSubsidies<InMemoryStorage>, AdminCap) {
    let (subsidies, cap) = deploy(buyer_rate, system_rate, funds, 7);
    let mut ledger = SubsidyLedger::new(subsidies, InMemoryStorage::new(pricing()));
    for (name, value) in buyers {
        ledger.deposit(name, Balance::issue(*value)).unwrap();
    }
    (SharedSubsidies::new(ledger), cap)
}

/// Everything held by the pool, the buyers, and the network.
pub fn total_value(ledger: &SubsidyLedger<InMemoryStorage>) -> u128 {
    ledger.total_account_value()
        + ledger.subsidies().subsidy_pool_value() as u128
        + ledger.system().total_rewards() as u128
}
