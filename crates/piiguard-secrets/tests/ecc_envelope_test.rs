//! ECC envelopes end to end: enrollment through the local vault, failure
//! modes, and vault outages.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use piiguard_core::{KdfCost, PiiguardError, PiiguardResult};
use piiguard_crypto::DerivedKeyCache;
use piiguard_secrets::{generate_keypair, EnvelopeEccEncryptor, LocalKeyVault, PrivateKeyVault};
use secrecy::SecretString;
use zeroize::Zeroizing;

const IDENTITY: &str = "5b1a8e1e-recipient";

fn password(s: &str) -> SecretString {
    SecretString::from(s.to_owned())
}

/// Local vault that counts decrypt calls.
struct CountingVault {
    inner: LocalKeyVault,
    decrypts: AtomicUsize,
}

impl PrivateKeyVault for CountingVault {
    async fn encrypt(&self, key: &[u8], pw: &SecretString, identity: &str) -> PiiguardResult<String> {
        self.inner.encrypt(key, pw, identity).await
    }

    async fn decrypt(
        &self,
        blob: &str,
        pw: &SecretString,
        identity: &str,
    ) -> PiiguardResult<Zeroizing<Vec<u8>>> {
        self.decrypts.fetch_add(1, Ordering::Relaxed);
        self.inner.decrypt(blob, pw, identity).await
    }
}

/// Vault whose backing service is down or slow.
enum BrokenVault {
    Unreachable,
    Slow,
}

impl PrivateKeyVault for BrokenVault {
    async fn encrypt(&self, _: &[u8], _: &SecretString, _: &str) -> PiiguardResult<String> {
        Err(PiiguardError::RemoteUnavailable("vault down".into()))
    }

    async fn decrypt(
        &self,
        _: &str,
        _: &SecretString,
        _: &str,
    ) -> PiiguardResult<Zeroizing<Vec<u8>>> {
        match self {
            Self::Unreachable => Err(PiiguardError::RemoteUnavailable("connection refused".into())),
            Self::Slow => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Err(PiiguardError::RemoteUnavailable("too late".into()))
            }
        }
    }
}

fn counting_encryptor() -> EnvelopeEccEncryptor<CountingVault> {
    EnvelopeEccEncryptor::new(
        CountingVault {
            inner: LocalKeyVault::new(KdfCost::insecure_fast(), DerivedKeyCache::shared()),
            decrypts: AtomicUsize::new(0),
        },
        Duration::from_secs(5),
    )
}

async fn enroll(enc: &EnvelopeEccEncryptor<CountingVault>) -> (Vec<u8>, String) {
    let pair = generate_keypair();
    let sealed = enc
        .vault()
        .encrypt(&pair.private_key, &password("recipient-pw"), IDENTITY)
        .await
        .unwrap();
    (pair.public_key, sealed)
}

fn rewrite_field(envelope: &str, field: &str, edit: impl FnOnce(&mut Vec<u8>)) -> String {
    let mut json: serde_json::Value = serde_json::from_str(envelope).unwrap();
    let mut bytes = B64.decode(json[field].as_str().unwrap()).unwrap();
    edit(&mut bytes);
    json[field] = B64.encode(bytes).into();
    json.to_string()
}

#[tokio::test]
async fn roundtrip_with_correct_password() {
    let enc = counting_encryptor();
    let (public_key, sealed) = enroll(&enc).await;

    let envelope = enc.encrypt(b"passport scan", &public_key).unwrap();
    let plaintext = enc
        .decrypt(&envelope, &sealed, &password("recipient-pw"), IDENTITY)
        .await
        .unwrap();
    assert_eq!(plaintext, b"passport scan");
}

#[tokio::test]
async fn wrong_password_fails_at_the_vault() {
    let enc = counting_encryptor();
    let (public_key, sealed) = enroll(&enc).await;
    let envelope = enc.encrypt(b"passport scan", &public_key).unwrap();

    let err = enc
        .decrypt(&envelope, &sealed, &password("guess"), IDENTITY)
        .await
        .unwrap_err();
    assert!(matches!(err, PiiguardError::Decryption));
    assert_eq!(enc.vault().decrypts.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn tampered_ciphertext_or_ephemeral_key_fails() {
    let enc = counting_encryptor();
    let (public_key, sealed) = enroll(&enc).await;
    let envelope = enc.encrypt(b"passport scan", &public_key).unwrap();

    let tampered_ct = rewrite_field(&envelope, "ct", |b| {
        let last = b.len() - 1;
        b[last] ^= 0x80;
    });
    // Swap in another valid point so the failure comes from the AEAD, not parsing.
    let other_epk = generate_keypair().public_key;
    let tampered_epk = rewrite_field(&envelope, "epk", |b| *b = other_epk.clone());

    for bad in [tampered_ct, tampered_epk, "{}".to_string(), "garbage".to_string()] {
        let err = enc
            .decrypt(&bad, &sealed, &password("recipient-pw"), IDENTITY)
            .await
            .unwrap_err();
        assert!(matches!(err, PiiguardError::Decryption), "{bad}: {err}");
    }
}

#[tokio::test]
async fn wrong_recipient_fails() {
    let enc = counting_encryptor();
    let (_, sealed) = enroll(&enc).await;
    let stranger = generate_keypair();
    let envelope = enc.encrypt(b"not for you", &stranger.public_key).unwrap();

    assert!(matches!(
        enc.decrypt(&envelope, &sealed, &password("recipient-pw"), IDENTITY).await,
        Err(PiiguardError::Decryption)
    ));
}

#[tokio::test]
async fn vault_outage_is_remote_unavailable() {
    let recipient = generate_keypair();

    for vault in [BrokenVault::Unreachable, BrokenVault::Slow] {
        let enc = EnvelopeEccEncryptor::new(vault, Duration::from_millis(50));
        let envelope = enc.encrypt(b"payload", &recipient.public_key).unwrap();
        let err = enc
            .decrypt(&envelope, "{}", &password("pw"), IDENTITY)
            .await
            .unwrap_err();
        assert!(matches!(err, PiiguardError::RemoteUnavailable(_)), "{err}");
    }
}

/// Argon2 work inside the local vault must not hold off the vault timeout.
#[tokio::test]
async fn slow_local_derivation_hits_the_vault_timeout() {
    let vault = LocalKeyVault::new(KdfCost::insecure_fast(), DerivedKeyCache::shared())
        .with_max_cost(KdfCost::new(16384, 2, 1));
    let pair = generate_keypair();
    let sealed = vault
        .encrypt(&pair.private_key, &password("recipient-pw"), IDENTITY)
        .await
        .unwrap();

    // Still under the ceiling, but far slower than the timeout allows.
    let mut json: serde_json::Value = serde_json::from_str(&sealed).unwrap();
    json["cost"] = "m=16384,t=2,p=1".into();
    let sealed = json.to_string();

    let enc = EnvelopeEccEncryptor::new(vault, Duration::from_millis(1));
    let envelope = enc.encrypt(b"payload", &pair.public_key).unwrap();
    let started = std::time::Instant::now();
    let err = enc
        .decrypt(&envelope, &sealed, &password("recipient-pw"), IDENTITY)
        .await
        .unwrap_err();
    assert!(matches!(err, PiiguardError::RemoteUnavailable(_)), "{err}");
    assert!(started.elapsed() < Duration::from_millis(500));
}
