//! ECDH envelope encryption on NIST P-256
//!
//! Envelope format (JSON text):
//! ```text
//! {"v": 1, "epk": "<base64 SEC1 compressed ephemeral public key>", "ct": "<base64 AES-256-GCM envelope>"}
//! ```
//!
//! content key = HKDF-SHA256(ECDH(ephemeral, recipient), info = "piiguard-ecc-envelope-v1")
//! AAD = SEC1 bytes of the ephemeral public key
//!
//! Anyone holding the recipient public key can encrypt. Decrypting first
//! recovers the recipient private key from the vault, so it needs the
//! recipient's password.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use hkdf::Hkdf;
use p256::ecdh::EphemeralSecret;
use p256::elliptic_curve::rand_core::OsRng;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{PublicKey, SecretKey};
use piiguard_core::{PiiguardError, PiiguardResult};
use piiguard_crypto::{cipher, KEY_SIZE};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

use crate::vault::PrivateKeyVault;

const ECC_ENVELOPE_VERSION: u8 = 1;
const HKDF_INFO: &[u8] = b"piiguard-ecc-envelope-v1";

#[derive(Debug, Serialize, Deserialize)]
struct EccEnvelope {
    v: u8,
    epk: String,
    ct: String,
}

/// A freshly generated recipient key pair.
pub struct RecipientKeyPair {
    /// SEC1 compressed public key (33 bytes)
    pub public_key: Vec<u8>,
    /// Raw 32-byte private scalar; seal it with a [`PrivateKeyVault`]
    pub private_key: Zeroizing<Vec<u8>>,
}

impl std::fmt::Debug for RecipientKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecipientKeyPair")
            .field("public_key", &B64.encode(&self.public_key))
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Generate a recipient key pair for enrollment.
pub fn generate_keypair() -> RecipientKeyPair {
    let secret = SecretKey::random(&mut OsRng);
    RecipientKeyPair {
        public_key: secret.public_key().to_encoded_point(true).as_bytes().to_vec(),
        private_key: Zeroizing::new(secret.to_bytes().to_vec()),
    }
}

pub struct EnvelopeEccEncryptor<V> {
    vault: V,
    vault_timeout: Duration,
}

impl<V: PrivateKeyVault> EnvelopeEccEncryptor<V> {
    pub fn new(vault: V, vault_timeout: Duration) -> Self {
        Self {
            vault,
            vault_timeout,
        }
    }

    pub fn vault(&self) -> &V {
        &self.vault
    }

    /// Encrypt `plaintext` to the holder of `recipient_public_key` (SEC1,
    /// compressed or uncompressed).
    pub fn encrypt(&self, plaintext: &[u8], recipient_public_key: &[u8]) -> PiiguardResult<String> {
        let recipient = PublicKey::from_sec1_bytes(recipient_public_key)
            .map_err(|_| PiiguardError::Encryption("invalid recipient public key".into()))?;

        let ephemeral = EphemeralSecret::random(&mut OsRng);
        let epk = ephemeral.public_key().to_encoded_point(true);
        let shared = ephemeral.diffie_hellman(&recipient);

        let key = content_key(shared.raw_secret_bytes().as_slice())?;
        let ct = cipher::encrypt(&key, plaintext, epk.as_bytes())?;

        serde_json::to_string(&EccEnvelope {
            v: ECC_ENVELOPE_VERSION,
            epk: B64.encode(epk.as_bytes()),
            ct: B64.encode(ct),
        })
        .map_err(|e| PiiguardError::Encryption(format!("serializing ECC envelope: {e}")))
    }

    /// Decrypt an envelope, recovering the recipient private key from
    /// `encrypted_private_key` via the vault.
    ///
    /// A refused password, tampered ciphertext and tampered ephemeral key
    /// all fail as [`PiiguardError::Decryption`]. A vault that times out or
    /// cannot be reached fails as [`PiiguardError::RemoteUnavailable`].
    pub async fn decrypt(
        &self,
        envelope: &str,
        encrypted_private_key: &str,
        password: &SecretString,
        identity: &str,
    ) -> PiiguardResult<Vec<u8>> {
        let envelope: EccEnvelope =
            serde_json::from_str(envelope).map_err(|_| PiiguardError::Decryption)?;
        if envelope.v != ECC_ENVELOPE_VERSION {
            return Err(PiiguardError::Decryption);
        }
        let epk_bytes = B64
            .decode(&envelope.epk)
            .map_err(|_| PiiguardError::Decryption)?;
        let ct = cipher::decode(&envelope.ct)?;

        let private_key = self.unlock_private_key(encrypted_private_key, password, identity).await?;
        let secret =
            SecretKey::from_slice(&private_key).map_err(|_| PiiguardError::Decryption)?;
        let ephemeral =
            PublicKey::from_sec1_bytes(&epk_bytes).map_err(|_| PiiguardError::Decryption)?;

        let shared = p256::ecdh::diffie_hellman(secret.to_nonzero_scalar(), ephemeral.as_affine());
        let key = content_key(shared.raw_secret_bytes().as_slice())?;
        cipher::decrypt(&key, &ct, &epk_bytes)
    }

    async fn unlock_private_key(
        &self,
        blob: &str,
        password: &SecretString,
        identity: &str,
    ) -> PiiguardResult<Zeroizing<Vec<u8>>> {
        let started = std::time::Instant::now();
        let result = tokio::time::timeout(
            self.vault_timeout,
            self.vault.decrypt(blob, password, identity),
        )
        .await;

        match result {
            Ok(Ok(key)) => {
                tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "vault released private key");
                Ok(key)
            }
            Ok(Err(PiiguardError::RemoteUnavailable(msg))) => {
                tracing::warn!(error = %msg, "private key vault unavailable");
                Err(PiiguardError::RemoteUnavailable(msg))
            }
            Ok(Err(_)) => Err(PiiguardError::Decryption),
            Err(_) => {
                tracing::warn!(timeout_ms = self.vault_timeout.as_millis() as u64, "private key vault timed out");
                Err(PiiguardError::RemoteUnavailable(format!(
                    "private key vault timed out after {:?}",
                    self.vault_timeout
                )))
            }
        }
    }
}

fn content_key(shared_secret: &[u8]) -> PiiguardResult<Zeroizing<[u8; KEY_SIZE]>> {
    let mut key = Zeroizing::new([0u8; KEY_SIZE]);
    Hkdf::<Sha256>::new(None, shared_secret)
        .expand(HKDF_INFO, key.as_mut_slice())
        .map_err(|_| PiiguardError::Encryption("HKDF expand failed".into()))?;
    Ok(key)
}
