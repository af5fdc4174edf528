//! Key derivation: Argon2id (password, salt, cost) → 256-bit key

use std::sync::Arc;

use argon2::{Algorithm, Argon2, Params, Version};
use piiguard_core::{KdfCost, PiiguardError, PiiguardResult};
use zeroize::{Zeroize, Zeroizing};

use crate::cache::DerivedKeyCache;
use crate::key::KeyMaterial;
use crate::{KEY_SIZE, MIN_SALT_SIZE};

/// Derive a 256-bit key from a password and salt using Argon2id.
///
/// Deterministic for identical inputs. Rejects an empty password, a salt
/// shorter than [`MIN_SALT_SIZE`] and cost parameters Argon2 refuses.
pub fn derive_key(password: &[u8], salt: &[u8], cost: &KdfCost) -> PiiguardResult<KeyMaterial> {
    if password.is_empty() {
        return Err(PiiguardError::Derivation("password is empty".into()));
    }
    if salt.len() < MIN_SALT_SIZE {
        return Err(PiiguardError::Derivation(format!(
            "salt too short: {} bytes (minimum {MIN_SALT_SIZE})",
            salt.len()
        )));
    }

    let params = params(cost)?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| PiiguardError::Derivation(format!("Argon2id KDF failed: {e}")))?;

    let material = KeyMaterial::derived(key, *cost);
    key.zeroize();
    Ok(material)
}

/// Check that Argon2id accepts `cost` without deriving anything.
pub fn validate_cost(cost: &KdfCost) -> PiiguardResult<()> {
    params(cost).map(|_| ())
}

fn params(cost: &KdfCost) -> PiiguardResult<Params> {
    Params::new(
        cost.mem_cost_kib,
        cost.time_cost,
        cost.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| PiiguardError::Derivation(format!("invalid Argon2id cost {cost}: {e}")))
}

/// A password-derived key that has not necessarily been computed yet.
///
/// Holds the inputs and resolves them through a shared [`DerivedKeyCache`],
/// so the expensive derivation runs at most once per distinct input triple
/// across the process.
pub struct DerivedKey {
    password: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    cost: KdfCost,
    cache: Arc<DerivedKeyCache>,
}

impl DerivedKey {
    pub fn new(password: &[u8], salt: &[u8], cost: KdfCost, cache: Arc<DerivedKeyCache>) -> Self {
        Self {
            password: Zeroizing::new(password.to_vec()),
            salt: salt.to_vec(),
            cost,
            cache,
        }
    }

    pub fn cost(&self) -> &KdfCost {
        &self.cost
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    /// Produce the key for an encrypt path.
    pub fn build(&self) -> PiiguardResult<KeyMaterial> {
        tracing::trace!(cost = %self.cost, "building derived key");
        self.resolve()
    }

    /// Recover the key for a decrypt path. Same derivation as [`build`](Self::build).
    pub fn unlock(&self) -> PiiguardResult<KeyMaterial> {
        tracing::trace!(cost = %self.cost, "unlocking derived key");
        self.resolve()
    }

    fn resolve(&self) -> PiiguardResult<KeyMaterial> {
        self.cache
            .get_or_derive(&self.password, &self.salt, &self.cost)
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("password", &"[REDACTED]")
            .field("salt_len", &self.salt.len())
            .field("cost", &self.cost)
            .finish()
    }
}
