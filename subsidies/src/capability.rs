// Copyright (c) 2024 Botho Foundation

//! Admin capability bound to a single subsidy pool.
//!
//! Holding an [`AdminCap`] is not enough on its own: every privileged call
//! compares the identity the capability was minted for with the identity of
//! the pool it is presented to.

use serde::Serialize;

use crate::{
    error::{SubsidyError, SubsidyResult},
    ids::ObjectId,
    pool::Subsidies,
};

/// Capability to change rates on, and withdraw funds from, one pool.
#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct AdminCap {
    id: ObjectId,
    subsidies_id: ObjectId,
}

impl AdminCap {
    pub(crate) fn new(id: ObjectId, subsidies_id: ObjectId) -> Self {
        Self { id, subsidies_id }
    }

    /// Identity of the capability itself.
    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// Identity of the pool this capability may mutate.
    pub fn subsidies_id(&self) -> ObjectId {
        self.subsidies_id
    }

    /// Fail with [`SubsidyError::UnauthorizedCapability`] unless this
    /// capability is bound to `subsidies`.
    pub fn authorize(&self, subsidies: &Subsidies) -> SubsidyResult<()> {
        if self.subsidies_id != subsidies.id() {
            return Err(SubsidyError::UnauthorizedCapability);
        }
        Ok(())
    }

    /// Destroy the capability.
    pub fn destroy(self) {}
}

/// Check that `cap` may mutate `subsidies`.
pub fn check_admin(subsidies: &Subsidies, cap: &AdminCap) -> SubsidyResult<()> {
    cap.authorize(subsidies)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::PackageRecord;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_cap_authorizes_own_pool_only() {
        let mut rng = StdRng::seed_from_u64(1);
        let package = PackageRecord::current(ObjectId::random(&mut rng));
        let (pool_a, cap_a) = Subsidies::new(&package, &mut rng);
        let (pool_b, cap_b) = Subsidies::new(&package, &mut rng);

        assert_eq!(cap_a.subsidies_id(), pool_a.id());
        check_admin(&pool_a, &cap_a).unwrap();
        check_admin(&pool_b, &cap_b).unwrap();

        assert_eq!(
            check_admin(&pool_b, &cap_a),
            Err(SubsidyError::UnauthorizedCapability)
        );
        assert_eq!(
            cap_b.authorize(&pool_a),
            Err(SubsidyError::UnauthorizedCapability)
        );
        cap_a.destroy();
        cap_b.destroy();
    }
}
