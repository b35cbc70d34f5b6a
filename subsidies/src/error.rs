// Copyright (c) 2024 Botho Foundation

//! Error types for the subsidy pool.

use displaydoc::Display;
use thiserror::Error;

use crate::storage::StorageError;

/// Errors raised by [`Balance`](crate::Balance) operations.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum BalanceError {
    /// Insufficient funds: have {available}, need {requested}
    InsufficientFunds { available: u64, requested: u64 },

    /// Joining {incoming} into a balance of {current} overflows
    Overflow { current: u64, incoming: u64 },

    /// Cannot destroy a balance still holding {0}
    NonZero(u64),
}

/// Errors that can occur while operating on the subsidy pool.
///
/// Every error is fatal to the operation that raised it. Callers that need
/// all-or-nothing semantics run operations through
/// [`SharedSubsidies::transact`](crate::SharedSubsidies::transact), which
/// discards the partially updated state.
#[derive(Clone, Debug, Display, Error, PartialEq, Eq)]
pub enum SubsidyError {
    /// Subsidy rate {0} exceeds the maximum of 10000 basis points
    InvalidRate(u16),

    /// Admin capability is not bound to this subsidy pool
    UnauthorizedCapability,

    /// Wrong version: pool is at {found}, operation requires {expected}
    WrongVersion { expected: u64, found: u64 },

    /// Arithmetic fault: {0}
    ArithmeticFault(&'static str),

    /// Balance error: {0}
    Balance(#[from] BalanceError),

    /// Storage system error: {0}
    Storage(#[from] StorageError),

    /// Unknown buyer account: {0}
    UnknownAccount(String),
}

/// Result type for subsidy operations.
pub type SubsidyResult<T> = Result<T, SubsidyError>;
