// Copyright (c) 2024 Botho Foundation

//! Object identities and the deployed package record.

use std::fmt;

use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::pool::CURRENT_VERSION;

/// Opaque 32-byte identity of a pool, capability, or deployed package.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId([u8; 32]);

impl ObjectId {
    /// Wrap raw bytes.
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Draw a fresh identity.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; 32];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

/// Identity and version of the deployed pool logic.
///
/// Passed explicitly at creation and migration instead of being derived from
/// the running code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
    /// Identity of the deployed code.
    pub package_id: ObjectId,
    /// Version that code implements.
    pub version: u64,
}

impl PackageRecord {
    /// Record for a package implementing [`CURRENT_VERSION`].
    pub fn current(package_id: ObjectId) -> Self {
        Self {
            package_id,
            version: CURRENT_VERSION,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_random_ids_differ() {
        let mut rng = StdRng::seed_from_u64(7);
        assert_ne!(ObjectId::random(&mut rng), ObjectId::random(&mut rng));
    }

    #[test]
    fn test_display_is_prefixed_hex() {
        let id = ObjectId::from_bytes([0xab; 32]);
        let shown = id.to_string();
        assert!(shown.starts_with("0xabab"));
        assert_eq!(shown.len(), 2 + 64);
    }
}
