//! Attribute encryption with multi-generation key rotation
//!
//! New ciphertexts are always written under the current generation. Reads
//! try the current generation first, then each retired generation in ring
//! order, so keys can be rotated without re-encrypting every stored value
//! up front. Exhausting the ring is a hard error, never an empty plaintext.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use piiguard_core::{PiiguardError, PiiguardResult};

use crate::cache::DerivedKeyCache;
use crate::cipher;
use crate::kdf::DerivedKey;
use crate::key::KeyMaterial;
use crate::keyring::{KeyGeneration, KeyRing};

/// Result of a successful attribute decrypt.
#[derive(Debug)]
pub struct DecryptedAttribute {
    pub plaintext: Vec<u8>,
    /// Id of the generation that authenticated the ciphertext
    pub generation: String,
    /// True when that generation is retired
    pub stale: bool,
}

/// Decrypt count for one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationUsage {
    pub id: String,
    pub current: bool,
    pub decrypts: u64,
}

pub struct AttributeEncryptor {
    ring: KeyRing,
    cache: Arc<DerivedKeyCache>,
    stale: AtomicBool,
    // Indexed in decrypt order (0 = current)
    usage: Vec<AtomicU64>,
}

impl AttributeEncryptor {
    pub fn new(ring: KeyRing, cache: Arc<DerivedKeyCache>) -> Self {
        let usage = (0..ring.len()).map(|_| AtomicU64::new(0)).collect();
        Self {
            ring,
            cache,
            stale: AtomicBool::new(false),
            usage,
        }
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    /// Encrypt under the current generation. Returns a base64 envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> PiiguardResult<String> {
        let key = self.material(self.ring.current())?;
        cipher::encrypt_to_string(key.as_bytes(), plaintext, b"")
    }

    pub fn decrypt(&self, ciphertext: &str) -> PiiguardResult<Vec<u8>> {
        self.decrypt_detailed(ciphertext).map(|d| d.plaintext)
    }

    /// Decrypt and report which generation succeeded.
    pub fn decrypt_detailed(&self, ciphertext: &str) -> PiiguardResult<DecryptedAttribute> {
        // Structural damage is not a key problem; fail before scanning the ring.
        let envelope = cipher::decode(ciphertext)?;
        cipher::check_envelope(&envelope)?;

        let mut tried = 0;
        for (index, generation) in self.ring.decrypt_order().enumerate() {
            tried += 1;
            let key = self.material(generation)?;
            match cipher::decrypt(key.as_bytes(), &envelope, b"") {
                Ok(plaintext) => {
                    let stale = index != 0;
                    self.stale.store(stale, Ordering::Relaxed);
                    self.usage[index].fetch_add(1, Ordering::Relaxed);
                    if stale {
                        tracing::debug!(generation = generation.id(), "attribute decrypted with retired key");
                    }
                    return Ok(DecryptedAttribute {
                        plaintext,
                        generation: generation.id().to_owned(),
                        stale,
                    });
                }
                Err(PiiguardError::Decryption) => continue,
                Err(e) => return Err(e),
            }
        }

        tracing::warn!(tried, "attribute ciphertext did not authenticate under any key generation");
        Err(PiiguardError::KeyExhausted { tried })
    }

    /// True iff the most recent successful decrypt used a retired generation.
    ///
    /// Shared across threads; under concurrent use it reflects whichever
    /// decrypt finished last. Intended for monitoring only.
    pub fn stale(&self) -> bool {
        self.stale.load(Ordering::Relaxed)
    }

    /// Decrypt and, if a retired generation was needed, re-encrypt under the
    /// current one. `None` means the ciphertext is already current.
    pub fn reencrypt_if_stale(&self, ciphertext: &str) -> PiiguardResult<Option<String>> {
        let decrypted = self.decrypt_detailed(ciphertext)?;
        if !decrypted.stale {
            return Ok(None);
        }
        tracing::debug!(from = %decrypted.generation, "re-encrypting attribute under current key");
        self.encrypt(&decrypted.plaintext).map(Some)
    }

    /// Decrypt counts per generation, in decrypt order.
    pub fn usage(&self) -> Vec<GenerationUsage> {
        self.ring
            .decrypt_order()
            .zip(&self.usage)
            .enumerate()
            .map(|(i, (generation, count))| GenerationUsage {
                id: generation.id().to_owned(),
                current: i == 0,
                decrypts: count.load(Ordering::Relaxed),
            })
            .collect()
    }

    // The generation key doubles as its own salt.
    fn material(&self, generation: &KeyGeneration) -> PiiguardResult<KeyMaterial> {
        let key = generation.key_bytes();
        DerivedKey::new(key, key, *generation.cost(), self.cache.clone()).build()
    }
}

impl std::fmt::Debug for AttributeEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeEncryptor")
            .field("ring", &self.ring)
            .field("stale", &self.stale())
            .finish()
    }
}
