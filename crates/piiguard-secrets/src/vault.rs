//! Private-key vault: recipient private keys sealed under a user password
//!
//! `LocalKeyVault` blob format (JSON text):
//! ```text
//! {"v": 1, "salt": "<base64 16 bytes>", "cost": "m=..,t=..,p=..", "ct": "<base64 envelope>"}
//! ```
//! The key is derived with Argon2id from the password and the per-blob salt;
//! the caller's identity is bound as AAD so a blob cannot be moved between
//! accounts. Derivation runs on the blocking pool, so a caller's timeout
//! still fires while Argon2 is busy.

use std::future::Future;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use piiguard_core::config::VaultConfig;
use piiguard_core::{KdfCost, PiiguardError, PiiguardResult};
use piiguard_crypto::{DerivedKeyCache, DerivedKeyEncryptor};
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

const SEALED_KEY_VERSION: u8 = 1;
const SALT_SIZE: usize = 16;

/// Stores recipient private keys so that only the password holder can
/// recover them.
///
/// Implementations backed by a remote service must report transport
/// failures as [`PiiguardError::RemoteUnavailable`]; every other failure
/// (wrong password, corrupted blob, identity mismatch) is
/// [`PiiguardError::Decryption`].
pub trait PrivateKeyVault: Send + Sync {
    fn encrypt(
        &self,
        private_key: &[u8],
        password: &SecretString,
        identity: &str,
    ) -> impl Future<Output = PiiguardResult<String>> + Send;

    fn decrypt(
        &self,
        blob: &str,
        password: &SecretString,
        identity: &str,
    ) -> impl Future<Output = PiiguardResult<Zeroizing<Vec<u8>>>> + Send;
}

#[derive(Debug, Serialize, Deserialize)]
struct SealedKey {
    v: u8,
    salt: String,
    cost: KdfCost,
    ct: String,
}

/// In-process vault built on [`DerivedKeyEncryptor`].
#[derive(Debug, Clone)]
pub struct LocalKeyVault {
    cost: KdfCost,
    max_cost: KdfCost,
    cache: Arc<DerivedKeyCache>,
}

impl LocalKeyVault {
    /// Blobs may ask for at most the larger of `cost` and [`KdfCost::default`].
    pub fn new(cost: KdfCost, cache: Arc<DerivedKeyCache>) -> Self {
        Self {
            cost,
            max_cost: cost.max(KdfCost::default()),
            cache,
        }
    }

    pub fn from_config(config: &VaultConfig, cache: Arc<DerivedKeyCache>) -> Self {
        Self::new(config.cost, cache).with_max_cost(config.max_cost)
    }

    /// Ceiling for the cost tag of blobs being opened. Never drops below the
    /// sealing cost.
    pub fn with_max_cost(mut self, max_cost: KdfCost) -> Self {
        self.max_cost = self.cost.max(max_cost);
        self
    }

    fn seal(
        &self,
        private_key: &[u8],
        password: &SecretString,
        identity: &str,
    ) -> PiiguardResult<String> {
        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let ct = self
            .encryptor(password, &salt, self.cost)
            .encrypt_with_aad(private_key, identity.as_bytes())?;

        serde_json::to_string(&SealedKey {
            v: SEALED_KEY_VERSION,
            salt: B64.encode(salt),
            cost: self.cost,
            ct,
        })
        .map_err(|e| PiiguardError::Encryption(format!("serializing sealed key: {e}")))
    }

    fn open(
        &self,
        blob: &str,
        password: &SecretString,
        identity: &str,
    ) -> PiiguardResult<Zeroizing<Vec<u8>>> {
        let sealed: SealedKey =
            serde_json::from_str(blob).map_err(|_| PiiguardError::Decryption)?;
        if sealed.v != SEALED_KEY_VERSION {
            return Err(PiiguardError::Decryption);
        }
        if !sealed.cost.within(&self.max_cost) {
            tracing::debug!(cost = %sealed.cost, max = %self.max_cost, "sealed key cost above ceiling");
            return Err(PiiguardError::Decryption);
        }
        let salt = B64
            .decode(&sealed.salt)
            .map_err(|_| PiiguardError::Decryption)?;

        self.encryptor(password, &salt, sealed.cost)
            .decrypt_with_aad(&sealed.ct, identity.as_bytes())
            .map(Zeroizing::new)
            .map_err(|e| match e {
                // An empty password or a mangled cost tag is still just a
                // blob this caller cannot open.
                PiiguardError::Derivation(_) => PiiguardError::Decryption,
                other => other,
            })
    }

    fn encryptor(&self, password: &SecretString, salt: &[u8], cost: KdfCost) -> DerivedKeyEncryptor {
        DerivedKeyEncryptor::from_parts(
            password.expose_secret().as_bytes(),
            salt,
            cost,
            self.cache.clone(),
        )
    }
}

impl PrivateKeyVault for LocalKeyVault {
    async fn encrypt(
        &self,
        private_key: &[u8],
        password: &SecretString,
        identity: &str,
    ) -> PiiguardResult<String> {
        let vault = self.clone();
        let private_key = Zeroizing::new(private_key.to_vec());
        let password = owned_secret(password);
        let identity = identity.to_owned();

        tokio::task::spawn_blocking(move || vault.seal(&private_key, &password, &identity))
            .await
            .map_err(|e| PiiguardError::Encryption(format!("vault seal task failed: {e}")))?
    }

    async fn decrypt(
        &self,
        blob: &str,
        password: &SecretString,
        identity: &str,
    ) -> PiiguardResult<Zeroizing<Vec<u8>>> {
        let vault = self.clone();
        let blob = blob.to_owned();
        let password = owned_secret(password);
        let owner = identity.to_owned();

        let opened = tokio::task::spawn_blocking(move || vault.open(&blob, &password, &owner))
            .await
            .map_err(|e| {
                tracing::warn!("vault open task failed: {e}");
                PiiguardError::Decryption
            })
            .and_then(|opened| opened);
        if opened.is_err() {
            tracing::debug!(identity, "private key vault refused blob");
        }
        opened
    }
}

fn owned_secret(secret: &SecretString) -> SecretString {
    SecretString::from(secret.expose_secret().to_owned())
}
