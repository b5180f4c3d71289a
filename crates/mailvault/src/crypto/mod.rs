//! Envelope encryption of sensitive mail fields.
//!
//! One 256-bit key per user (the vault), AES-256-GCM per field (the
//! cipher). Subjects, snippets and bodies never hit the database in
//! plaintext once a user's key exists.

pub mod cipher;
pub mod error;
pub mod vault;

pub use cipher::{FieldCipher, KEY_SIZE};
pub use error::CryptoError;
pub use vault::KeyVault;
