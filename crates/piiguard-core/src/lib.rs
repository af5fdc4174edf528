//! piiguard-core: configuration schema, KDF cost tags, and the error taxonomy
//! shared by every piiguard crate.

pub mod config;
pub mod cost;
pub mod error;

pub use config::{decode_key, PiiguardConfig, RetiredKey};
pub use cost::KdfCost;
pub use error::{PiiguardError, PiiguardResult};
