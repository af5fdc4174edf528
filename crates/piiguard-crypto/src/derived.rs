//! Password/salt-scoped symmetric encryption

use std::sync::{Arc, OnceLock};

use piiguard_core::{KdfCost, PiiguardResult};

use crate::cache::DerivedKeyCache;
use crate::cipher;
use crate::kdf::DerivedKey;
use crate::key::KeyMaterial;

/// Symmetric encryptor whose key is derived from a password and salt.
///
/// The key is resolved lazily on first use and then memoized on the
/// instance, so repeated calls never go back to the KDF (or the shared
/// cache). Safe to share across threads.
#[derive(Debug)]
pub struct DerivedKeyEncryptor {
    derived: DerivedKey,
    key: OnceLock<KeyMaterial>,
}

impl DerivedKeyEncryptor {
    pub fn new(derived: DerivedKey) -> Self {
        Self {
            derived,
            key: OnceLock::new(),
        }
    }

    /// Shorthand for wrapping a fresh [`DerivedKey`].
    pub fn from_parts(
        password: &[u8],
        salt: &[u8],
        cost: KdfCost,
        cache: Arc<DerivedKeyCache>,
    ) -> Self {
        Self::new(DerivedKey::new(password, salt, cost, cache))
    }

    pub fn cost(&self) -> &KdfCost {
        self.derived.cost()
    }

    /// Encrypt to a base64 envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> PiiguardResult<String> {
        self.encrypt_with_aad(plaintext, b"")
    }

    /// Decrypt a base64 envelope produced by [`encrypt`](Self::encrypt).
    pub fn decrypt(&self, ciphertext: &str) -> PiiguardResult<Vec<u8>> {
        self.decrypt_with_aad(ciphertext, b"")
    }

    pub fn encrypt_with_aad(&self, plaintext: &[u8], aad: &[u8]) -> PiiguardResult<String> {
        let key = self.material(KeyUse::Build)?;
        cipher::encrypt_to_string(key.as_bytes(), plaintext, aad)
    }

    pub fn decrypt_with_aad(&self, ciphertext: &str, aad: &[u8]) -> PiiguardResult<Vec<u8>> {
        // Reject malformed text before paying for a derivation.
        let envelope = cipher::decode(ciphertext)?;
        cipher::check_envelope(&envelope)?;
        let key = self.material(KeyUse::Unlock)?;
        cipher::decrypt(key.as_bytes(), &envelope, aad)
    }

    fn material(&self, usage: KeyUse) -> PiiguardResult<&KeyMaterial> {
        if let Some(key) = self.key.get() {
            return Ok(key);
        }
        let key = match usage {
            KeyUse::Build => self.derived.build()?,
            KeyUse::Unlock => self.derived.unlock()?,
        };
        Ok(self.key.get_or_init(|| key))
    }
}

#[derive(Clone, Copy)]
enum KeyUse {
    Build,
    Unlock,
}

#[cfg(test)]
mod tests {
    use super::*;
    use piiguard_core::PiiguardError;

    const FAST: KdfCost = KdfCost::insecure_fast();

    fn encryptor(cache: &Arc<DerivedKeyCache>) -> DerivedKeyEncryptor {
        DerivedKeyEncryptor::from_parts(b"correct horse", b"battery-staple", FAST, cache.clone())
    }

    #[test]
    fn test_roundtrip() {
        let cache = DerivedKeyCache::shared();
        let enc = encryptor(&cache);
        let ct = enc.encrypt(b"1985-04-12").unwrap();
        assert_eq!(enc.decrypt(&ct).unwrap(), b"1985-04-12");
    }

    #[test]
    fn test_key_memoized_per_instance() {
        let cache = DerivedKeyCache::shared();
        let enc = encryptor(&cache);

        enc.encrypt(b"first").unwrap();
        // With the shared cache emptied, only the instance memo can satisfy
        // subsequent calls without a second derivation.
        cache.clear();
        for _ in 0..10 {
            let ct = enc.encrypt(b"again").unwrap();
            enc.decrypt(&ct).unwrap();
        }
        assert_eq!(cache.derivations(), 1);
    }

    #[test]
    fn test_separate_instances_share_cache() {
        let cache = DerivedKeyCache::shared();
        let ct = encryptor(&cache).encrypt(b"payload").unwrap();
        assert_eq!(encryptor(&cache).decrypt(&ct).unwrap(), b"payload");
        assert_eq!(cache.derivations(), 1);
    }

    #[test]
    fn test_wrong_password_fails() {
        let cache = DerivedKeyCache::shared();
        let ct = encryptor(&cache).encrypt(b"payload").unwrap();
        let other =
            DerivedKeyEncryptor::from_parts(b"wrong horse", b"battery-staple", FAST, cache);
        assert!(matches!(other.decrypt(&ct), Err(PiiguardError::Decryption)));
    }

    #[test]
    fn test_malformed_input_skips_kdf() {
        let cache = DerivedKeyCache::shared();
        let enc = encryptor(&cache);
        assert!(matches!(enc.decrypt("not-base64!"), Err(PiiguardError::Decryption)));
        assert!(matches!(enc.decrypt("AAAA"), Err(PiiguardError::Decryption)));
        assert_eq!(cache.derivations(), 0);
    }

    #[test]
    fn test_derivation_error_surfaces() {
        let enc = DerivedKeyEncryptor::from_parts(b"", b"battery-staple", FAST, DerivedKeyCache::shared());
        assert!(matches!(enc.encrypt(b"x"), Err(PiiguardError::Derivation(_))));
    }

    #[test]
    fn test_shared_across_threads() {
        let cache = DerivedKeyCache::shared();
        let enc = Arc::new(encryptor(&cache));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let enc = enc.clone();
                std::thread::spawn(move || {
                    let msg = format!("thread-{i}");
                    let ct = enc.encrypt(msg.as_bytes()).unwrap();
                    assert_eq!(enc.decrypt(&ct).unwrap(), msg.as_bytes());
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
