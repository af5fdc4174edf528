//! Process-wide cache of derived keys
//!
//! Argon2id is deliberately slow, so a busy service would otherwise spend most
//! of its CPU re-deriving the same handful of keys. Entries are keyed by a
//! SHA-256 fingerprint of the length-prefixed (password, salt, cost) triple;
//! the raw password never becomes a map key.
//!
//! Concurrent misses for the same triple may each run the KDF, but the first
//! insert wins and every caller observes the same bytes afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use piiguard_core::{KdfCost, PiiguardResult};
use sha2::{Digest, Sha256};

use crate::kdf::derive_key;
use crate::key::KeyMaterial;

type Fingerprint = [u8; 32];

const FINGERPRINT_DOMAIN: &[u8] = b"piiguard-derived-key-cache-v1";

/// Thread-safe memo of `(password, salt, cost) → KeyMaterial`.
#[derive(Default)]
pub struct DerivedKeyCache {
    entries: RwLock<HashMap<Fingerprint, KeyMaterial>>,
    derivations: AtomicU64,
}

impl DerivedKeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// New cache behind an `Arc`, ready to hand to several encryptors.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Return the cached key for the triple, deriving it on a miss.
    pub fn get_or_derive(
        &self,
        password: &[u8],
        salt: &[u8],
        cost: &KdfCost,
    ) -> PiiguardResult<KeyMaterial> {
        let fp = fingerprint(password, salt, cost);

        if let Some(hit) = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&fp)
        {
            return Ok(hit.clone());
        }

        // Derive outside the lock: Argon2 can take hundreds of milliseconds.
        let derived = derive_key(password, salt, cost)?;
        self.derivations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(cost = %cost, "derived key cache miss");

        let mut entries = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(entries.entry(fp).or_insert(derived).clone())
    }

    /// Number of KDF invocations this cache has performed.
    pub fn derivations(&self) -> u64 {
        self.derivations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every cached key (they are zeroized as they are dropped).
    pub fn clear(&self) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for DerivedKeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKeyCache")
            .field("entries", &self.len())
            .field("derivations", &self.derivations())
            .finish()
    }
}

fn fingerprint(password: &[u8], salt: &[u8], cost: &KdfCost) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(FINGERPRINT_DOMAIN);
    for field in [password, salt] {
        hasher.update((field.len() as u64).to_be_bytes());
        hasher.update(field);
    }
    hasher.update(cost.mem_cost_kib.to_be_bytes());
    hasher.update(cost.time_cost.to_be_bytes());
    hasher.update(cost.parallelism.to_be_bytes());
    hasher.finalize().into()
}
