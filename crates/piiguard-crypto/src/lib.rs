//! piiguard-crypto: field-level encryption under rotating keys
//!
//! Key paths:
//! ```text
//! attribute key generation (config)          user password + salt
//!   └── Argon2id ──► DerivedKeyCache ◄── Argon2id ──┘
//!                        │
//!                        ▼
//!              KeyMaterial (256-bit, zeroized)
//!                        │
//!                        ▼
//!     AES-256-GCM envelope: [version=1][12-byte nonce][ciphertext + 16-byte tag]
//! ```
//!
//! `AttributeEncryptor` always writes under the current generation and falls
//! back through retired generations on read. `DerivedKeyEncryptor` and
//! `PiiEncryptor` scope a key to one password/salt pair.

pub mod attribute;
pub mod cache;
pub mod cipher;
pub mod derived;
pub mod kdf;
pub mod key;
pub mod keyring;
pub mod pii;

pub use attribute::{AttributeEncryptor, DecryptedAttribute, GenerationUsage};
pub use cache::DerivedKeyCache;
pub use derived::DerivedKeyEncryptor;
pub use kdf::{derive_key, validate_cost, DerivedKey};
pub use key::KeyMaterial;
pub use keyring::{KeyGeneration, KeyRing};
pub use pii::PiiEncryptor;

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Minimum salt length accepted by the KDF
pub const MIN_SALT_SIZE: usize = 8;
