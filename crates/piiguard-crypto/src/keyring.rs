//! Attribute key generations

use std::collections::HashSet;

use piiguard_core::config::AttributeConfig;
use piiguard_core::{KdfCost, PiiguardError, PiiguardResult};
use secrecy::{ExposeSecret, SecretString};

use crate::kdf::validate_cost;
use crate::MIN_SALT_SIZE;

/// Identifier given to the current generation when loaded from config
pub const CURRENT_GENERATION_ID: &str = "current";

/// One versioned attribute key and the cost it is stretched with.
pub struct KeyGeneration {
    id: String,
    key: SecretString,
    cost: KdfCost,
}

impl KeyGeneration {
    pub fn new(id: impl Into<String>, key: SecretString, cost: KdfCost) -> Self {
        Self {
            id: id.into(),
            key,
            cost,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cost(&self) -> &KdfCost {
        &self.cost
    }

    pub(crate) fn key_bytes(&self) -> &[u8] {
        self.key.expose_secret().as_bytes()
    }
}

impl std::fmt::Debug for KeyGeneration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyGeneration")
            .field("id", &self.id)
            .field("key", &"[REDACTED]")
            .field("cost", &self.cost)
            .finish()
    }
}

/// The current generation plus retired generations, most recently retired
/// first. Immutable once built.
#[derive(Debug)]
pub struct KeyRing {
    current: KeyGeneration,
    retired: Vec<KeyGeneration>,
}

impl KeyRing {
    /// Build a ring, rejecting duplicate ids, costs Argon2id refuses and keys
    /// too short to serve as their own KDF salt.
    pub fn new(current: KeyGeneration, retired: Vec<KeyGeneration>) -> PiiguardResult<Self> {
        let mut seen = HashSet::new();
        for generation in std::iter::once(&current).chain(&retired) {
            if generation.key_bytes().len() < MIN_SALT_SIZE {
                return Err(PiiguardError::Config(format!(
                    "attribute key generation {:?} is shorter than {MIN_SALT_SIZE} bytes",
                    generation.id
                )));
            }
            validate_cost(&generation.cost).map_err(|e| {
                PiiguardError::Config(format!("attribute key generation {:?}: {e}", generation.id))
            })?;
            if !seen.insert(generation.id.as_str()) {
                return Err(PiiguardError::Config(format!(
                    "duplicate attribute key generation id {:?}",
                    generation.id
                )));
            }
        }
        Ok(Self { current, retired })
    }

    /// Build from `[attribute]` config. Retired generations without an
    /// explicit id are named `retired-1`, `retired-2`, ... in config order.
    pub fn from_config(config: &AttributeConfig) -> PiiguardResult<Self> {
        let current_key = config
            .current_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()))
            .ok_or_else(|| PiiguardError::Config("attribute.current_key is not set".into()))?;
        let current = KeyGeneration::new(CURRENT_GENERATION_ID, current_key, config.current_cost);

        let retired = config
            .retired()?
            .into_iter()
            .enumerate()
            .map(|(i, r)| {
                let id = r.id.unwrap_or_else(|| format!("retired-{}", i + 1));
                KeyGeneration::new(id, r.key, r.cost)
            })
            .collect();

        let ring = Self::new(current, retired)?;
        tracing::info!(retired = ring.retired.len(), "attribute key ring loaded");
        Ok(ring)
    }

    pub fn current(&self) -> &KeyGeneration {
        &self.current
    }

    pub fn retired(&self) -> &[KeyGeneration] {
        &self.retired
    }

    /// Generations in decrypt-attempt order: current, then retired.
    pub fn decrypt_order(&self) -> impl Iterator<Item = &KeyGeneration> {
        std::iter::once(&self.current).chain(self.retired.iter())
    }

    /// Number of generations. Never zero: a ring always holds a current one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        1 + self.retired.len()
    }
}
