use thiserror::Error;

pub type PiiguardResult<T> = Result<T, PiiguardError>;

/// Error taxonomy for every encrypt/decrypt path.
///
/// `Decryption` is opaque: wrong key, tampered bytes, and malformed envelopes
/// all render the same message. Messages never carry plaintext or key bytes.
#[derive(Debug, Error)]
pub enum PiiguardError {
    /// KDF inputs were rejected (empty password, short salt, bad cost).
    #[error("key derivation error: {0}")]
    Derivation(String),

    #[error("unable to decrypt")]
    Decryption,

    /// Every generation in the key ring was tried and none authenticated.
    #[error("unable to decrypt attribute with any key (tried {tried} generations)")]
    KeyExhausted { tried: usize },

    /// A KMS or vault call timed out or failed at the transport level.
    /// Retrying may succeed; the data itself is not known to be bad.
    #[error("remote service unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("encryption failed: {0}")]
    Encryption(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PiiguardError {
    /// True for failures that say nothing about the ciphertext itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PiiguardError::RemoteUnavailable(_))
    }
}
