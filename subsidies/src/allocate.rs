// Copyright (c) 2024 Botho Foundation

//! Subsidy allocation.
//!
//! Given the cost of a storage operation and the pool value at the start of
//! that operation, decide how much of the cost the pool covers for the buyer
//! and how much it forwards to the storage network.
//!
//! ```text
//! buyer  = cost * buyer_rate  / 10_000
//! system = cost * system_rate / 10_000
//!
//! if pool < buyer + system:
//!   buyer  = pool * buyer_rate  / (buyer_rate + system_rate)
//!   system = pool * system_rate / (buyer_rate + system_rate)
//! ```
//!
//! An under-funded pool is split in the ratio of the *rates*, and the
//! truncation remainder stays in the pool.

use serde::{Deserialize, Serialize};

use crate::error::{SubsidyError, SubsidyResult};

/// Basis-point denominator: 10_000 bps = 100%.
pub const BASIS_POINTS: u64 = 10_000;

/// Subsidy rate in basis points.
pub type SubsidyRateBps = u16;

/// Split of one operation's subsidy between buyer and storage network.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsidyAllocation {
    /// Discount applied to the buyer's cost.
    pub buyer_subsidy: u64,
    /// Reward forwarded to the storage network.
    pub system_subsidy: u64,
}

impl SubsidyAllocation {
    /// Total drawn from the pool.
    pub fn total(&self) -> u64 {
        // Both parts are bounded by the pool value they were carved from.
        self.buyer_subsidy.saturating_add(self.system_subsidy)
    }
}

/// Compute the subsidies for `cost` given the pool value before the
/// operation.
///
/// Returns [`SubsidyError::ArithmeticFault`] only if a rate above
/// [`BASIS_POINTS`] pushes a subsidy past `u64::MAX`; rates set through the
/// pool are capped and never do.
pub fn allocate_subsidies(
    buyer_rate: SubsidyRateBps,
    system_rate: SubsidyRateBps,
    cost: u64,
    initial_pool_value: u64,
) -> SubsidyResult<SubsidyAllocation> {
    if initial_pool_value == 0 {
        return Ok(SubsidyAllocation::default());
    }

    let buyer_subsidy = scale(cost, buyer_rate as u128, BASIS_POINTS as u128)?;
    let system_subsidy = scale(cost, system_rate as u128, BASIS_POINTS as u128)?;
    let total = buyer_subsidy as u128 + system_subsidy as u128;

    // Zero rates give a zero total and always stop here, so the rate sum
    // below is never zero.
    if initial_pool_value as u128 >= total {
        return Ok(SubsidyAllocation {
            buyer_subsidy,
            system_subsidy,
        });
    }

    let rate_sum = buyer_rate as u128 + system_rate as u128;
    Ok(SubsidyAllocation {
        buyer_subsidy: scale(initial_pool_value, buyer_rate as u128, rate_sum)?,
        system_subsidy: scale(initial_pool_value, system_rate as u128, rate_sum)?,
    })
}

/// `floor(amount * numerator / denominator)` with a u128 intermediate.
fn scale(amount: u64, numerator: u128, denominator: u128) -> SubsidyResult<u64> {
    if denominator == 0 {
        return Err(SubsidyError::ArithmeticFault("division by zero rate sum"));
    }
    u64::try_from(amount as u128 * numerator / denominator)
        .map_err(|_| SubsidyError::ArithmeticFault("subsidy exceeds u64"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alloc(buyer: u16, system: u16, cost: u64, pool: u64) -> (u64, u64) {
        let a = allocate_subsidies(buyer, system, cost, pool).unwrap();
        (a.buyer_subsidy, a.system_subsidy)
    }

    #[test]
    fn test_full_coverage() {
        assert_eq!(alloc(500, 300, 1000, 10_000), (50, 30));
    }

    #[test]
    fn test_exact_coverage_is_not_degraded() {
        assert_eq!(alloc(500, 300, 1000, 80), (50, 30));
    }

    #[test]
    fn test_degraded_by_rate_ratio() {
        let (buyer, system) = alloc(500, 300, 1000, 50);
        assert_eq!((buyer, system), (31, 18));
        assert!(buyer + system <= 50);
    }

    #[test]
    fn test_empty_pool_allocates_nothing() {
        assert_eq!(alloc(10_000, 10_000, 1_000_000, 0), (0, 0));
        assert_eq!(alloc(0, 0, 0, 0), (0, 0));
    }

    #[test]
    fn test_zero_rates_never_divide() {
        assert_eq!(alloc(0, 0, 1000, 5), (0, 0));
        assert_eq!(alloc(0, 0, u64::MAX, 1), (0, 0));
    }

    #[test]
    fn test_single_sided_rates() {
        assert_eq!(alloc(2_500, 0, 400, 1_000), (100, 0));
        assert_eq!(alloc(0, 2_500, 400, 60), (0, 60));
    }

    #[test]
    fn test_rates_summing_past_full_cost() {
        // 100% + 100% of a 100 cost needs 200 from the pool.
        assert_eq!(alloc(10_000, 10_000, 100, 1_000), (100, 100));
        assert_eq!(alloc(10_000, 10_000, 100, 150), (75, 75));
    }

    #[test]
    fn test_large_cost_uses_wide_intermediate() {
        let (buyer, system) = alloc(5_000, 5_000, u64::MAX, u64::MAX);
        assert_eq!(buyer, u64::MAX / 2);
        assert_eq!(system, u64::MAX / 2);

        // Degraded split of a full-width pool.
        let (buyer, system) = alloc(10_000, 5_000, u64::MAX, u64::MAX);
        assert_eq!(buyer, (u64::MAX as u128 * 2 / 3) as u64);
        assert_eq!(system, u64::MAX / 3);
    }

    #[test]
    fn test_out_of_range_rate_faults_instead_of_wrapping() {
        let result = allocate_subsidies(u16::MAX, 0, u64::MAX, u64::MAX);
        assert!(matches!(result, Err(SubsidyError::ArithmeticFault(_))));
    }
}
