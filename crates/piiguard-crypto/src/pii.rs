//! Password-scoped PII fields
//!
//! Ciphertext format (JSON text):
//! ```text
//! {"v": 1, "cost": "m=65536,t=3,p=4", "ct": "<base64 AES-256-GCM envelope>"}
//! ```
//!
//! The cost tag is read back on decrypt, so blobs written before a cost
//! change keep opening. A tag above the encryptor's ceiling is refused
//! before any derivation runs. When a context is set (typically the owning
//! user's UUID) it is bound as AAD.

use std::sync::Arc;

use piiguard_core::{KdfCost, PiiguardError, PiiguardResult};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::cache::DerivedKeyCache;
use crate::derived::DerivedKeyEncryptor;

const PII_FORMAT_VERSION: u8 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct PiiCiphertext {
    v: u8,
    cost: KdfCost,
    ct: String,
}

/// Encrypts PII under a key derived from a user password and salt.
pub struct PiiEncryptor {
    password: Zeroizing<Vec<u8>>,
    salt: Vec<u8>,
    cost: KdfCost,
    max_cost: KdfCost,
    context: Option<String>,
    cache: Arc<DerivedKeyCache>,
}

impl PiiEncryptor {
    /// `cost` applies to new ciphertexts only. Stored ciphertexts may ask for
    /// at most the larger of `cost` and [`KdfCost::default`].
    pub fn new(
        password: &SecretString,
        salt: &[u8],
        cost: KdfCost,
        cache: Arc<DerivedKeyCache>,
    ) -> Self {
        Self {
            password: Zeroizing::new(password.expose_secret().as_bytes().to_vec()),
            salt: salt.to_vec(),
            cost,
            max_cost: cost.max(KdfCost::default()),
            context: None,
            cache,
        }
    }

    /// Raise or lower the decrypt ceiling. Never drops below `cost`.
    pub fn with_max_cost(mut self, max_cost: KdfCost) -> Self {
        self.max_cost = self.cost.max(max_cost);
        self
    }

    /// Bind ciphertexts to `context` (e.g. a user UUID).
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> PiiguardResult<String> {
        let ct = self
            .encryptor(self.cost)
            .encrypt_with_aad(plaintext, self.aad())?;
        serde_json::to_string(&PiiCiphertext {
            v: PII_FORMAT_VERSION,
            cost: self.cost,
            ct,
        })
        .map_err(|e| PiiguardError::Encryption(format!("serializing PII ciphertext: {e}")))
    }

    pub fn decrypt(&self, ciphertext: &str) -> PiiguardResult<Vec<u8>> {
        let parsed: PiiCiphertext = serde_json::from_str(ciphertext).map_err(|_| {
            tracing::debug!("PII ciphertext is not valid JSON");
            PiiguardError::Decryption
        })?;
        if parsed.v != PII_FORMAT_VERSION {
            tracing::debug!(version = parsed.v, "unknown PII ciphertext version");
            return Err(PiiguardError::Decryption);
        }
        if !parsed.cost.within(&self.max_cost) {
            tracing::debug!(cost = %parsed.cost, max = %self.max_cost, "PII cost above ceiling");
            return Err(PiiguardError::Decryption);
        }
        self.encryptor(parsed.cost)
            .decrypt_with_aad(&parsed.ct, self.aad())
            .map_err(|e| match e {
                PiiguardError::Derivation(_) => PiiguardError::Decryption,
                other => other,
            })
    }

    fn encryptor(&self, cost: KdfCost) -> DerivedKeyEncryptor {
        DerivedKeyEncryptor::from_parts(&self.password, &self.salt, cost, self.cache.clone())
    }

    fn aad(&self) -> &[u8] {
        self.context.as_deref().map(str::as_bytes).unwrap_or_default()
    }
}

impl std::fmt::Debug for PiiEncryptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiEncryptor")
            .field("password", &"[REDACTED]")
            .field("cost", &self.cost)
            .field("max_cost", &self.max_cost)
            .field("context", &self.context)
            .finish()
    }
}
