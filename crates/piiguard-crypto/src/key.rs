//! Raw symmetric key material

use piiguard_core::KdfCost;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::KEY_SIZE;

/// A 256-bit symmetric key plus the KDF cost that produced it.
///
/// `cost` is `None` for keys configured directly rather than derived.
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    bytes: [u8; KEY_SIZE],
    #[zeroize(skip)]
    cost: Option<KdfCost>,
}

impl KeyMaterial {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes, cost: None }
    }

    pub fn derived(bytes: [u8; KEY_SIZE], cost: KdfCost) -> Self {
        Self {
            bytes,
            cost: Some(cost),
        }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    pub fn cost(&self) -> Option<&KdfCost> {
        self.cost.as_ref()
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bytes", &"[REDACTED]")
            .field("cost", &self.cost)
            .finish()
    }
}
