//! Session ciphertexts
//!
//! Two formats, distinguished by a leading tag:
//! ```text
//! s1.<z>.<b64url AES-256-GCM envelope>                       single layer (legacy)
//! s2.<z>.<b64url KMSx ciphertext wrapping an AES envelope>   two layers
//! ```
//! `<z>` is `1` when the payload was zstd-compressed before encryption and
//! `0` otherwise. The inner envelope is always sealed with the static session
//! key and its AAD is the `<tag>.<z>` header, so a header cannot be swapped
//! onto another payload.
//!
//! Readers accept both formats. Writers emit `s1` until the deployment is
//! switched to `s2`, so older readers keep working during a rollout.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use piiguard_core::config::SessionConfig;
use piiguard_core::{decode_key, PiiguardError, PiiguardResult};
use piiguard_crypto::{cipher, KEY_SIZE};
use zeroize::Zeroizing;

use crate::kms::{KmsClient, KmsGateway, SESSION_CONTEXT};

const ZSTD_LEVEL: i32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionFormat {
    Legacy,
    KmsWrapped,
}

impl SessionFormat {
    fn tag(self) -> &'static str {
        match self {
            Self::Legacy => "s1",
            Self::KmsWrapped => "s2",
        }
    }

    fn parse(tag: &str) -> Option<Self> {
        match tag {
            "s1" => Some(Self::Legacy),
            "s2" => Some(Self::KmsWrapped),
            _ => None,
        }
    }
}

pub struct LayeredSessionEncryptor<K> {
    session_key: Zeroizing<[u8; KEY_SIZE]>,
    gateway: KmsGateway<K>,
    write_format: SessionFormat,
    compress_threshold: usize,
}

impl<K: KmsClient> LayeredSessionEncryptor<K> {
    pub fn new(
        session_key: [u8; KEY_SIZE],
        gateway: KmsGateway<K>,
        write_kms_layer: bool,
        compress_threshold: usize,
    ) -> Self {
        Self {
            session_key: Zeroizing::new(session_key),
            gateway,
            write_format: if write_kms_layer {
                SessionFormat::KmsWrapped
            } else {
                SessionFormat::Legacy
            },
            compress_threshold,
        }
    }

    pub fn from_config(config: &SessionConfig, gateway: KmsGateway<K>) -> PiiguardResult<Self> {
        let secret = config.encryption_key.as_ref().ok_or_else(|| {
            PiiguardError::Config("session.encryption_key is not set".into())
        })?;
        let key = Zeroizing::new(decode_key(secret, "session.encryption_key")?);
        Ok(Self::new(
            *key,
            gateway,
            config.writes_kms_layer()?,
            config.compress_threshold,
        ))
    }

    /// True when `encrypt` emits the two-layer format.
    pub fn writes_kms_layer(&self) -> bool {
        self.write_format == SessionFormat::KmsWrapped
    }

    pub async fn encrypt(&self, plaintext: &[u8]) -> PiiguardResult<String> {
        let format = self.write_format;
        let compressed = plaintext.len() >= self.compress_threshold;
        let header = header(format, compressed);

        let body = if compressed {
            Zeroizing::new(
                zstd::encode_all(plaintext, ZSTD_LEVEL)
                    .map_err(|e| PiiguardError::Encryption(format!("zstd compress: {e}")))?,
            )
        } else {
            Zeroizing::new(plaintext.to_vec())
        };
        let inner = cipher::encrypt(&self.session_key, &body, header.as_bytes())?;

        let payload = match format {
            SessionFormat::Legacy => B64URL.encode(inner),
            SessionFormat::KmsWrapped => {
                let wrapped = self.gateway.kms_encrypt(&inner, SESSION_CONTEXT).await?;
                B64URL.encode(wrapped)
            }
        };

        tracing::trace!(format = format.tag(), compressed, len = plaintext.len(), "session encrypted");
        Ok(format!("{header}.{payload}"))
    }

    pub async fn decrypt(&self, ciphertext: &str) -> PiiguardResult<Vec<u8>> {
        let mut parts = ciphertext.splitn(3, '.');
        let (Some(tag), Some(flag), Some(payload)) = (parts.next(), parts.next(), parts.next())
        else {
            tracing::debug!("session ciphertext has no format header");
            return Err(PiiguardError::Decryption);
        };
        let Some(format) = SessionFormat::parse(tag) else {
            tracing::debug!(tag, "unknown session format tag");
            return Err(PiiguardError::Decryption);
        };
        let compressed = match flag {
            "0" => false,
            "1" => true,
            _ => return Err(PiiguardError::Decryption),
        };

        let payload = B64URL
            .decode(payload)
            .map_err(|_| PiiguardError::Decryption)?;
        let inner = match format {
            SessionFormat::Legacy => payload,
            SessionFormat::KmsWrapped => {
                let wrapped =
                    String::from_utf8(payload).map_err(|_| PiiguardError::Decryption)?;
                self.gateway.kms_decrypt(&wrapped, SESSION_CONTEXT).await?
            }
        };

        let body = Zeroizing::new(cipher::decrypt(
            &self.session_key,
            &inner,
            header(format, compressed).as_bytes(),
        )?);
        if compressed {
            zstd::decode_all(body.as_slice()).map_err(|_| PiiguardError::Decryption)
        } else {
            Ok(body.to_vec())
        }
    }
}

fn header(format: SessionFormat, compressed: bool) -> String {
    format!("{}.{}", format.tag(), u8::from(compressed))
}
