use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::path::Path;

use crate::cost::KdfCost;
use crate::error::{PiiguardError, PiiguardResult};

/// Top-level configuration (loaded from piiguard.toml)
///
/// Built once at process start and handed to the encryptors by reference;
/// nothing reads it from global state afterwards.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PiiguardConfig {
    pub logging: LoggingConfig,
    pub attribute: AttributeConfig,
    pub pii: PiiConfig,
    pub session: SessionConfig,
    pub kms: KmsConfig,
    pub vault: VaultConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

/// Attribute (field-level) encryption keys
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AttributeConfig {
    /// Key used for every new attribute encryption
    #[serde(deserialize_with = "deserialize_secret")]
    pub current_key: Option<SecretString>,
    /// KDF cost applied to `current_key`
    pub current_cost: KdfCost,
    /// JSON-encoded list of retired `{"key": ..., "cost": ...}` pairs,
    /// most recently retired first
    #[serde(deserialize_with = "deserialize_secret")]
    pub retired_keys: Option<SecretString>,
}

/// A retired attribute key as it appears in `attribute.retired_keys`
#[derive(Debug, Deserialize)]
pub struct RetiredKey {
    #[serde(deserialize_with = "deserialize_required_secret")]
    pub key: SecretString,
    pub cost: KdfCost,
    /// Optional operator label (defaults to `retired-<index>`)
    #[serde(default)]
    pub id: Option<String>,
}

/// Password-scoped PII encryption
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PiiConfig {
    /// KDF cost for newly written PII ciphertexts
    pub cost: KdfCost,
    /// Highest cost a stored PII ciphertext may ask for. `cost` is always
    /// accepted even when it exceeds this.
    pub max_cost: KdfCost,
}

/// Session ciphertext settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Static 32-byte session key, base64
    #[serde(deserialize_with = "deserialize_secret")]
    pub encryption_key: Option<SecretString>,
    /// Format written by `encrypt`: "legacy" (default) or "kms"
    pub write_format: String,
    /// Payloads at or above this many bytes are compressed before encryption
    pub compress_threshold: usize,
}

/// Remote KMS settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct KmsConfig {
    /// Use the remote KMS; when false, the local pepper key is used instead
    pub enabled: bool,
    pub key_id: Option<String>,
    pub region: String,
    pub endpoint: Option<String>,
    /// Per-call timeout in milliseconds
    pub timeout_ms: u64,
    /// Maximum plaintext bytes per KMS encrypt call
    pub chunk_size: usize,
    /// Local 32-byte pepper key, base64
    #[serde(deserialize_with = "deserialize_secret")]
    pub pepper: Option<SecretString>,
    /// Key for the in-process development KMS, base64. Never set in production.
    #[serde(deserialize_with = "deserialize_secret")]
    pub local_key: Option<SecretString>,
}

/// Private-key vault settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// KDF cost used when sealing a private key
    pub cost: KdfCost,
    /// Highest cost a sealed blob may ask for when opened
    pub max_cost: KdfCost,
    /// Per-call timeout for remote vault implementations, in milliseconds
    pub timeout_ms: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl Default for AttributeConfig {
    fn default() -> Self {
        Self {
            current_key: None,
            current_cost: KdfCost::default(),
            retired_keys: None,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            encryption_key: None,
            write_format: "legacy".into(),
            compress_threshold: 300,
        }
    }
}

impl Default for KmsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_id: None,
            region: "us-west-2".into(),
            endpoint: None,
            timeout_ms: 5_000,
            chunk_size: 4_096,
            pepper: None,
            local_key: None,
        }
    }
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            cost: KdfCost::default(),
            max_cost: KdfCost::default(),
            timeout_ms: 5_000,
        }
    }
}

impl PiiguardConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(s: &str) -> PiiguardResult<Self> {
        toml::from_str(s).map_err(|e| PiiguardError::Config(format!("parsing config: {e}")))
    }

    /// Load from a file. `None` means the file does not exist; callers fall
    /// back to defaults and report it once logging is up.
    pub fn load(path: &Path) -> PiiguardResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map(Some)
    }
}

impl AttributeConfig {
    /// Decode `retired_keys` into ring order. An absent or blank value means
    /// no retired generations.
    pub fn retired(&self) -> PiiguardResult<Vec<RetiredKey>> {
        use secrecy::ExposeSecret;

        let Some(raw) = &self.retired_keys else {
            return Ok(Vec::new());
        };
        let raw = raw.expose_secret().trim();
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        // Report position only; serde_json messages can echo the offending value.
        serde_json::from_str(raw).map_err(|e| {
            PiiguardError::Config(format!(
                "attribute.retired_keys: invalid at line {} column {}",
                e.line(),
                e.column()
            ))
        })
    }
}

impl SessionConfig {
    pub fn writes_kms_layer(&self) -> PiiguardResult<bool> {
        match self.write_format.as_str() {
            "legacy" => Ok(false),
            "kms" => Ok(true),
            other => Err(PiiguardError::Config(format!(
                "session.write_format must be \"legacy\" or \"kms\", got {other:?}"
            ))),
        }
    }
}

/// Decode a base64 32-byte key from a config secret.
pub fn decode_key(secret: &SecretString, field: &str) -> PiiguardResult<[u8; 32]> {
    use base64::{engine::general_purpose::STANDARD as B64, Engine};
    use secrecy::ExposeSecret;

    let bytes = zeroize::Zeroizing::new(
        B64.decode(secret.expose_secret().trim())
            .map_err(|_| PiiguardError::Config(format!("{field}: not valid base64")))?,
    );
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| PiiguardError::Config(format!("{field}: expected 32 bytes, got {}", bytes.len())))
}

fn deserialize_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    Ok(Option::<String>::deserialize(deserializer)?.map(SecretString::from))
}

fn deserialize_required_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<SecretString, D::Error> {
    Ok(SecretString::from(String::deserialize(deserializer)?))
}
