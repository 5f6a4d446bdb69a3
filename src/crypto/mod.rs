//! End-to-end encryption for tunnel sessions

mod encryptor;
mod sas;

pub use encryptor::{CryptoError, Encryptor, Role, ENCRYPTION_OVERHEAD};
pub use sas::SAS_DICTIONARY;
