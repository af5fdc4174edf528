//! AES-256-GCM envelope encryption
//!
//! Envelope format (binary):
//! ```text
//! [1 byte: version = 1][12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```
//!
//! The version byte is authenticated as part of the AAD together with any
//! caller-supplied context, so a blob cannot be replayed under a different
//! version or context. Text contexts carry the envelope as standard base64.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use piiguard_core::{PiiguardError, PiiguardResult};
use rand::RngCore;

use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Current envelope version byte
pub const ENVELOPE_VERSION: u8 = 1;

/// Smallest well-formed envelope: version, nonce and tag over an empty message
pub const MIN_ENVELOPE_SIZE: usize = 1 + NONCE_SIZE + TAG_SIZE;

/// Encrypt `plaintext` under `key`, binding `aad` to the ciphertext.
///
/// Returns: `[version][12-byte nonce][ciphertext][16-byte tag]`
pub fn encrypt(key: &[u8; KEY_SIZE], plaintext: &[u8], aad: &[u8]) -> PiiguardResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad = build_aad(ENVELOPE_VERSION, aad);
    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| PiiguardError::Encryption(format!("AES-GCM encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
    result.push(ENVELOPE_VERSION);
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Every failure (short input, unknown version, tag mismatch, wrong key or
/// wrong AAD) collapses into [`PiiguardError::Decryption`].
pub fn decrypt(key: &[u8; KEY_SIZE], envelope: &[u8], aad: &[u8]) -> PiiguardResult<Vec<u8>> {
    check_envelope(envelope)?;

    let cipher = Aes256Gcm::new(key.into());
    let nonce = Nonce::from_slice(&envelope[1..1 + NONCE_SIZE]);
    let aad = build_aad(envelope[0], aad);

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: &envelope[1 + NONCE_SIZE..],
                aad: &aad,
            },
        )
        .map_err(|_| PiiguardError::Decryption)
}

/// Structural check of an envelope without touching any key.
pub fn check_envelope(envelope: &[u8]) -> PiiguardResult<()> {
    if envelope.len() < MIN_ENVELOPE_SIZE {
        tracing::debug!(len = envelope.len(), "envelope too short");
        return Err(PiiguardError::Decryption);
    }
    if envelope[0] != ENVELOPE_VERSION {
        tracing::debug!(version = envelope[0], "unknown envelope version");
        return Err(PiiguardError::Decryption);
    }
    Ok(())
}

/// Encrypt and base64-encode for text storage.
pub fn encrypt_to_string(
    key: &[u8; KEY_SIZE],
    plaintext: &[u8],
    aad: &[u8],
) -> PiiguardResult<String> {
    Ok(B64.encode(encrypt(key, plaintext, aad)?))
}

/// Decode and decrypt a base64 envelope.
pub fn decrypt_from_str(key: &[u8; KEY_SIZE], encoded: &str, aad: &[u8]) -> PiiguardResult<Vec<u8>> {
    decrypt(key, &decode(encoded)?, aad)
}

/// Base64-decode a text envelope. Malformed input is a decryption failure.
pub fn decode(encoded: &str) -> PiiguardResult<Vec<u8>> {
    B64.decode(encoded.trim()).map_err(|_| {
        tracing::debug!("envelope is not valid base64");
        PiiguardError::Decryption
    })
}

/// AAD = version (1 byte) || caller context
fn build_aad(version: u8, context: &[u8]) -> Vec<u8> {
    let mut aad = Vec::with_capacity(1 + context.len());
    aad.push(version);
    aad.extend_from_slice(context);
    aad
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_key() -> [u8; KEY_SIZE] {
        [0x42; KEY_SIZE]
    }

    #[test]
    fn test_roundtrip() {
        let key = test_key();
        let plaintext = b"123-45-6789";

        let envelope = encrypt(&key, plaintext, b"").unwrap();
        assert_eq!(envelope[0], ENVELOPE_VERSION);
        assert_eq!(envelope.len(), MIN_ENVELOPE_SIZE + plaintext.len());

        let decrypted = decrypt(&key, &envelope, b"").unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_empty_plaintext() {
        let key = test_key();
        let envelope = encrypt(&key, b"", b"").unwrap();
        assert_eq!(envelope.len(), MIN_ENVELOPE_SIZE);
        assert!(decrypt(&key, &envelope, b"").unwrap().is_empty());
    }

    #[test]
    fn test_nonce_is_fresh() {
        let key = test_key();
        let a = encrypt(&key, b"same input", b"").unwrap();
        let b = encrypt(&key, b"same input", b"").unwrap();
        assert_ne!(a, b, "two encryptions of the same plaintext must differ");
    }

    #[test]
    fn test_wrong_key_fails() {
        let envelope = encrypt(&test_key(), b"secret", b"").unwrap();
        let err = decrypt(&[0x43; KEY_SIZE], &envelope, b"").unwrap_err();
        assert!(matches!(err, PiiguardError::Decryption));
    }

    #[test]
    fn test_aad_mismatch_fails() {
        let key = test_key();
        let envelope = encrypt(&key, b"secret", b"user-1").unwrap();
        assert!(decrypt(&key, &envelope, b"user-2").is_err());
        assert!(decrypt(&key, &envelope, b"").is_err());
        assert_eq!(decrypt(&key, &envelope, b"user-1").unwrap(), b"secret");
    }

    #[test]
    fn test_tampered_tag_fails() {
        let key = test_key();
        let mut envelope = encrypt(&key, b"secret", b"").unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        assert!(matches!(
            decrypt(&key, &envelope, b""),
            Err(PiiguardError::Decryption)
        ));
    }

    #[test]
    fn test_unknown_version_fails() {
        let key = test_key();
        let mut envelope = encrypt(&key, b"secret", b"").unwrap();
        envelope[0] = 2;
        assert!(matches!(
            decrypt(&key, &envelope, b""),
            Err(PiiguardError::Decryption)
        ));
    }

    #[test]
    fn test_truncated_fails() {
        let key = test_key();
        let envelope = encrypt(&key, b"secret", b"").unwrap();
        for len in [0, 1, MIN_ENVELOPE_SIZE - 1] {
            assert!(matches!(
                decrypt(&key, &envelope[..len], b""),
                Err(PiiguardError::Decryption)
            ));
        }
    }

    #[test]
    fn test_string_roundtrip_and_bad_base64() {
        let key = test_key();
        let text = encrypt_to_string(&key, b"jane@example.com", b"email").unwrap();
        assert_eq!(
            decrypt_from_str(&key, &text, b"email").unwrap(),
            b"jane@example.com"
        );
        assert!(matches!(
            decrypt_from_str(&key, "%%% not base64 %%%", b"email"),
            Err(PiiguardError::Decryption)
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip_any_plaintext(
            plaintext in proptest::collection::vec(any::<u8>(), 0..2048),
            aad in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let key = test_key();
            let envelope = encrypt(&key, &plaintext, &aad).unwrap();
            prop_assert_eq!(decrypt(&key, &envelope, &aad).unwrap(), plaintext);
        }

        #[test]
        fn prop_single_bit_flip_detected(
            plaintext in proptest::collection::vec(any::<u8>(), 1..256),
            bit in 0usize..8,
            pos_seed in any::<usize>(),
        ) {
            let key = test_key();
            let mut envelope = encrypt(&key, &plaintext, b"").unwrap();
            let pos = pos_seed % envelope.len();
            envelope[pos] ^= 1 << bit;
            prop_assert!(decrypt(&key, &envelope, b"").is_err());
        }
    }
}
