// Copyright (c) 2024 Botho Foundation

//! Shared subsidy pool for storage purchases.
//!
//! Anyone can fund the pool. When a buyer reserves storage or extends a
//! blob, the pool covers part of the price and also forwards an extra
//! reward to the storage network:
//!
//! | Rate                  | Effect                                          |
//! |-----------------------|-------------------------------------------------|
//! | `buyer_subsidy_rate`  | Share of the cost refunded to the buyer         |
//! | `system_subsidy_rate` | Share of the cost added to the network rewards  |
//!
//! Both rates are in basis points (0-10 000). If the pool cannot pay both
//! shares in full it pays what it holds, split in the ratio of the rates.
//!
//! ## Key Concepts
//!
//! - **Working payment**: the buyer's payment and the whole pool merged for
//!   the duration of one storage operation.
//! - **Settlement**: splitting what remains of the working payment between
//!   pool, buyer, and network once the storage system has drawn its price.
//! - **Fast path**: an empty pool forwards the buyer's payment unchanged.
//! - **Admin capability**: the one [`AdminCap`] minted with a pool; it alone
//!   can change the rates or withdraw funds.

#![deny(clippy::print_stdout)]

pub mod config;
pub mod ledger;
pub mod storage;

mod allocate;
mod balance;
mod capability;
mod error;
mod ids;
mod operations;
mod payment;
mod pool;

pub use allocate::{allocate_subsidies, SubsidyAllocation, SubsidyRateBps, BASIS_POINTS};
pub use balance::Balance;
pub use capability::{check_admin, AdminCap};
pub use config::{ConfigError, SubsidyConfig};
pub use error::{BalanceError, SubsidyError, SubsidyResult};
pub use ids::{ObjectId, PackageRecord};
pub use ledger::{SharedSubsidies, SubsidyLedger, SubsidyStats};
pub use payment::{Settlement, SettlementOutcome, WorkingPayment};
pub use pool::{Subsidies, CURRENT_VERSION, MAX_SUBSIDY_RATE};
pub use storage::{BlobDescriptor, InMemoryStorage, StorageError, StoragePricing, StorageSystem};
