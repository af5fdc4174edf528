//! piiguard-secrets: encryption paths that depend on a key held elsewhere
//!
//! - `vault`: password-gated storage of recipient private keys
//! - `ecc`: P-256 ECDH envelope encryption, decrypting through the vault
//! - `kms`: remote KMS contract, gateway with timeout/chunking/local fallback
//! - `session`: session ciphertexts, legacy single-layer and KMS-wrapped
//!
//! Remote calls are async and bounded by a timeout; every timeout or
//! transport failure surfaces as `PiiguardError::RemoteUnavailable`.

pub mod ecc;
pub mod kms;
pub mod session;
pub mod vault;

pub use ecc::{generate_keypair, EnvelopeEccEncryptor, RecipientKeyPair};
pub use kms::{KmsClient, KmsGateway, LocalKms, KMS_PREFIX, SESSION_CONTEXT};
pub use session::LayeredSessionEncryptor;
pub use vault::{LocalKeyVault, PrivateKeyVault};
