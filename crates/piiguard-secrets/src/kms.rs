//! Remote KMS contract and gateway
//!
//! KMS ciphertext format (text):
//! ```text
//! KMSx["<base64 chunk 1 ciphertext>", "<base64 chunk 2 ciphertext>", ...]
//! ```
//! Plaintext is split into chunks of at most `chunk_size` bytes (4 KiB by
//! default, the remote service's per-call limit) and each chunk is encrypted
//! separately.
//!
//! With KMS disabled the gateway encrypts locally under the pepper key and
//! emits a bare base64 AES-256-GCM envelope, which never starts with `KMSx`.
//! Decrypt picks the path from the prefix, so values written either way stay
//! readable when the `enabled` flag flips.

use std::future::Future;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use piiguard_core::config::KmsConfig;
use piiguard_core::{decode_key, PiiguardError, PiiguardResult};
use piiguard_crypto::{cipher, KEY_SIZE};
use rand::RngCore;
use zeroize::Zeroizing;

/// Discriminator prefix for KMS-produced ciphertexts
pub const KMS_PREFIX: &str = "KMSx";

/// Encryption context used for session payloads
pub const SESSION_CONTEXT: &str = "session-encryption";

/// A key management service that encrypts small payloads under a key it
/// never releases.
///
/// `context` is bound to the ciphertext; decrypting under another context
/// fails. Timeouts and transport errors must surface as
/// [`PiiguardError::RemoteUnavailable`], refused ciphertexts as
/// [`PiiguardError::Decryption`].
pub trait KmsClient: Send + Sync {
    fn encrypt(
        &self,
        plaintext: &[u8],
        context: &str,
    ) -> impl Future<Output = PiiguardResult<Vec<u8>>> + Send;

    fn decrypt(
        &self,
        ciphertext: &[u8],
        context: &str,
    ) -> impl Future<Output = PiiguardResult<Vec<u8>>> + Send;
}

/// In-process stand-in for a remote KMS, for development and tests.
pub struct LocalKms {
    key: Zeroizing<[u8; KEY_SIZE]>,
}

impl LocalKms {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// A LocalKms with a random key; its ciphertexts die with the process.
    pub fn generate() -> Self {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        let kms = Self::new(key);
        zeroize::Zeroize::zeroize(&mut key);
        kms
    }
}

impl std::fmt::Debug for LocalKms {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalKms").field("key", &"[REDACTED]").finish()
    }
}

impl KmsClient for LocalKms {
    async fn encrypt(&self, plaintext: &[u8], context: &str) -> PiiguardResult<Vec<u8>> {
        cipher::encrypt(&self.key, plaintext, context.as_bytes())
    }

    async fn decrypt(&self, ciphertext: &[u8], context: &str) -> PiiguardResult<Vec<u8>> {
        cipher::decrypt(&self.key, ciphertext, context.as_bytes())
    }
}

/// Wraps a [`KmsClient`] with timeouts, chunking and the local pepper path.
pub struct KmsGateway<K> {
    client: K,
    enabled: bool,
    timeout: Duration,
    chunk_size: usize,
    pepper: Option<Zeroizing<[u8; KEY_SIZE]>>,
}

impl<K: KmsClient> KmsGateway<K> {
    pub fn new(client: K, config: &KmsConfig) -> PiiguardResult<Self> {
        if config.chunk_size == 0 {
            return Err(PiiguardError::Config("kms.chunk_size must be positive".into()));
        }
        let pepper = config
            .pepper
            .as_ref()
            .map(|p| decode_key(p, "kms.pepper").map(Zeroizing::new))
            .transpose()?;
        if !config.enabled && pepper.is_none() {
            return Err(PiiguardError::Config(
                "kms.pepper is required when kms.enabled is false".into(),
            ));
        }

        tracing::debug!(
            enabled = config.enabled,
            key_id = config.key_id.as_deref().unwrap_or("-"),
            region = %config.region,
            timeout_ms = config.timeout_ms,
            "kms gateway configured"
        );

        Ok(Self {
            client,
            enabled: config.enabled,
            timeout: Duration::from_millis(config.timeout_ms),
            chunk_size: config.chunk_size,
            pepper,
        })
    }

    pub fn client(&self) -> &K {
        &self.client
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// True if `ciphertext` was produced by the remote KMS path.
    pub fn looks_like_kms(ciphertext: &str) -> bool {
        ciphertext.starts_with(KMS_PREFIX)
    }

    /// Encrypt via KMS when enabled, otherwise under the local pepper.
    pub async fn encrypt(&self, plaintext: &[u8], context: &str) -> PiiguardResult<String> {
        if self.enabled {
            self.kms_encrypt(plaintext, context).await
        } else {
            cipher::encrypt_to_string(self.pepper()?, plaintext, context.as_bytes())
        }
    }

    pub async fn decrypt(&self, ciphertext: &str, context: &str) -> PiiguardResult<Vec<u8>> {
        if Self::looks_like_kms(ciphertext) {
            self.kms_decrypt(ciphertext, context).await
        } else {
            cipher::decrypt_from_str(self.pepper()?, ciphertext, context.as_bytes())
        }
    }

    /// Always use the remote KMS, regardless of `enabled`.
    pub async fn kms_encrypt(&self, plaintext: &[u8], context: &str) -> PiiguardResult<String> {
        // An empty payload still needs one call so decrypt has something to verify.
        let chunks: Vec<&[u8]> = if plaintext.is_empty() {
            vec![plaintext]
        } else {
            plaintext.chunks(self.chunk_size).collect()
        };

        let mut encoded = Vec::with_capacity(chunks.len());
        for chunk in &chunks {
            let ct = self
                .remote("encrypt", self.client.encrypt(chunk, context))
                .await?;
            encoded.push(B64.encode(ct));
        }

        let body = serde_json::to_string(&encoded)
            .map_err(|e| PiiguardError::Encryption(format!("serializing kms chunks: {e}")))?;
        Ok(format!("{KMS_PREFIX}{body}"))
    }

    /// Decrypt a `KMSx` ciphertext through the remote KMS.
    pub async fn kms_decrypt(&self, ciphertext: &str, context: &str) -> PiiguardResult<Vec<u8>> {
        let body = ciphertext
            .strip_prefix(KMS_PREFIX)
            .ok_or(PiiguardError::Decryption)?;
        let chunks: Vec<String> =
            serde_json::from_str(body).map_err(|_| PiiguardError::Decryption)?;
        if chunks.is_empty() {
            return Err(PiiguardError::Decryption);
        }

        let mut plaintext = Vec::new();
        for chunk in &chunks {
            let ct = B64.decode(chunk).map_err(|_| PiiguardError::Decryption)?;
            let pt = self
                .remote("decrypt", self.client.decrypt(&ct, context))
                .await?;
            plaintext.extend_from_slice(&pt);
        }
        Ok(plaintext)
    }

    async fn remote<F>(&self, op: &'static str, call: F) -> PiiguardResult<Vec<u8>>
    where
        F: Future<Output = PiiguardResult<Vec<u8>>>,
    {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => {
                tracing::debug!(op, elapsed_ms = started.elapsed().as_millis() as u64, ok = result.is_ok(), "kms call");
                result
            }
            Err(_) => {
                tracing::warn!(op, timeout_ms = self.timeout.as_millis() as u64, "kms call timed out");
                Err(PiiguardError::RemoteUnavailable(format!(
                    "kms {op} timed out after {:?}",
                    self.timeout
                )))
            }
        }
    }

    fn pepper(&self) -> PiiguardResult<&[u8; KEY_SIZE]> {
        self.pepper
            .as_deref()
            .ok_or_else(|| PiiguardError::Config("kms.pepper is not configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PEPPER_B64: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";

    fn config(enabled: bool) -> KmsConfig {
        KmsConfig {
            enabled,
            pepper: Some(SecretString::from(PEPPER_B64)),
            timeout_ms: 1_000,
            ..KmsConfig::default()
        }
    }

    /// Counts encrypt calls so chunking is observable.
    struct CountingKms {
        inner: LocalKms,
        encrypts: AtomicUsize,
    }

    impl KmsClient for CountingKms {
        async fn encrypt(&self, plaintext: &[u8], context: &str) -> PiiguardResult<Vec<u8>> {
            self.encrypts.fetch_add(1, Ordering::Relaxed);
            self.inner.encrypt(plaintext, context).await
        }

        async fn decrypt(&self, ciphertext: &[u8], context: &str) -> PiiguardResult<Vec<u8>> {
            self.inner.decrypt(ciphertext, context).await
        }
    }

    #[tokio::test]
    async fn test_kms_path_chunks_large_payloads() {
        let client = CountingKms {
            inner: LocalKms::generate(),
            encrypts: AtomicUsize::new(0),
        };
        let gateway = KmsGateway::new(client, &config(true)).unwrap();

        let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let ct = gateway.encrypt(&payload, SESSION_CONTEXT).await.unwrap();

        assert!(KmsGateway::<CountingKms>::looks_like_kms(&ct));
        assert_eq!(gateway.client().encrypts.load(Ordering::Relaxed), 3);
        let chunks: Vec<String> = serde_json::from_str(&ct[KMS_PREFIX.len()..]).unwrap();
        assert_eq!(chunks.len(), 3);

        assert_eq!(gateway.decrypt(&ct, SESSION_CONTEXT).await.unwrap(), payload);
    }

    #[tokio::test]
    async fn test_empty_payload_roundtrip() {
        let gateway = KmsGateway::new(LocalKms::generate(), &config(true)).unwrap();
        let ct = gateway.encrypt(b"", SESSION_CONTEXT).await.unwrap();
        assert!(gateway.decrypt(&ct, SESSION_CONTEXT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_context_mismatch() {
        let gateway = KmsGateway::new(LocalKms::generate(), &config(true)).unwrap();
        let ct = gateway.encrypt(b"payload", SESSION_CONTEXT).await.unwrap();
        assert!(matches!(
            gateway.decrypt(&ct, "other-context").await,
            Err(PiiguardError::Decryption)
        ));
    }

    #[tokio::test]
    async fn test_local_fallback_and_switchover() {
        let kms = LocalKms::new([9u8; KEY_SIZE]);
        let disabled = KmsGateway::new(kms, &config(false)).unwrap();
        let local_ct = disabled.encrypt(b"written while off", "ctx").await.unwrap();
        assert!(!KmsGateway::<LocalKms>::looks_like_kms(&local_ct));
        assert_eq!(disabled.decrypt(&local_ct, "ctx").await.unwrap(), b"written while off");

        // Turning KMS on keeps locally written values readable.
        let enabled = KmsGateway::new(LocalKms::new([9u8; KEY_SIZE]), &config(true)).unwrap();
        assert_eq!(enabled.decrypt(&local_ct, "ctx").await.unwrap(), b"written while off");
        let kms_ct = enabled.encrypt(b"written while on", "ctx").await.unwrap();
        assert!(kms_ct.starts_with(KMS_PREFIX));

        // And turning it back off still routes KMSx values to the KMS.
        assert_eq!(disabled.decrypt(&kms_ct, "ctx").await.unwrap(), b"written while on");
    }

    #[test]
    fn test_config_validation() {
        let mut no_pepper = config(false);
        no_pepper.pepper = None;
        assert!(KmsGateway::new(LocalKms::generate(), &no_pepper).is_err());

        let mut zero_chunks = config(true);
        zero_chunks.chunk_size = 0;
        assert!(KmsGateway::new(LocalKms::generate(), &zero_chunks).is_err());

        let mut enabled_no_pepper = config(true);
        enabled_no_pepper.pepper = None;
        assert!(KmsGateway::new(LocalKms::generate(), &enabled_no_pepper).is_ok());
    }

    proptest::proptest! {
        #[test]
        fn prop_chunk_count_tracks_payload_length(len in 0usize..200) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            let mut cfg = config(true);
            cfg.chunk_size = 64;
            let gateway = KmsGateway::new(LocalKms::new([4u8; KEY_SIZE]), &cfg).unwrap();
            let payload: Vec<u8> = (0..len).map(|i| i as u8).collect();

            let ct = rt.block_on(gateway.encrypt(&payload, "ctx")).unwrap();
            let chunks: Vec<String> = serde_json::from_str(&ct[KMS_PREFIX.len()..]).unwrap();
            proptest::prop_assert_eq!(chunks.len(), len.div_ceil(64).max(1));
            proptest::prop_assert_eq!(rt.block_on(gateway.decrypt(&ct, "ctx")).unwrap(), payload);
        }
    }

    #[tokio::test]
    async fn test_malformed_kms_ciphertext() {
        let gateway = KmsGateway::new(LocalKms::generate(), &config(true)).unwrap();
        for bad in ["KMSx", "KMSx[]", "KMSxnot json", "KMSx[\"%%%\"]"] {
            assert!(
                matches!(gateway.decrypt(bad, "ctx").await, Err(PiiguardError::Decryption)),
                "{bad}"
            );
        }
    }
}
