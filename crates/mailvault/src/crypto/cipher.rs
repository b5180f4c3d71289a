//! Field-level authenticated encryption (AES-256-GCM).
//!
//! Sensitive mail fields (subject, snippet, bodies) are encrypted with a
//! per-user key before they reach the database. The stored blob is
//! `nonce ‖ tag ‖ ciphertext`, hex-encoded. Decryption verifies the GCM
//! tag — a tampered or truncated blob fails, it never yields garbage.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
use base64::Engine;

use super::error::{CryptoError, Result};

/// Key size for AES-256 (32 bytes).
pub const KEY_SIZE: usize = 32;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes).
const NONCE_SIZE: usize = 12;

/// GCM authentication tag size (16 bytes).
const TAG_SIZE: usize = 16;

/// Field encryptor bound to one user's key.
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Creates a cipher from raw key bytes.
    pub fn new(key: &[u8; KEY_SIZE]) -> Self {
        let cipher = Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(key));
        Self { cipher }
    }

    /// Creates a cipher from a 64-character hex key.
    pub fn from_hex_key(key_hex: &str) -> Result<Self> {
        let key = parse_key_hex(key_hex)?;
        Ok(Self::new(&key))
    }

    /// Encrypts plaintext. Output is the canonical encoding: lowercase
    /// hex of `nonce ‖ tag ‖ ciphertext`. A fresh random nonce is drawn
    /// per call, so encrypting the same value twice yields different
    /// blobs.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let nonce_bytes = rand_bytes::<NONCE_SIZE>()?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        // aes-gcm appends the tag to the ciphertext; reorder to the
        // stored layout nonce ‖ tag ‖ ciphertext.
        let sealed = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptionError(e.to_string()))?;
        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_SIZE);

        let mut blob = Vec::with_capacity(NONCE_SIZE + sealed.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(tag);
        blob.extend_from_slice(ciphertext);

        Ok(hex_encode(&blob))
    }

    /// Decrypts a stored blob. Accepts the canonical hex encoding as
    /// well as legacy variants (`0x`/`\x`-prefixed hex, padded or
    /// unpadded base64); only canonical hex is ever produced on write.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        let combined = decode_blob(blob)?;

        if combined.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::DecryptionFailed {
                reason: "blob too short",
            });
        }

        let (nonce_bytes, rest) = combined.split_at(NONCE_SIZE);
        let (tag, ciphertext) = rest.split_at(TAG_SIZE);
        let nonce = Nonce::from_slice(nonce_bytes);

        // Reassemble ciphertext ‖ tag for the AEAD API.
        let mut sealed = Vec::with_capacity(rest.len());
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let plaintext = self
            .cipher
            .decrypt(nonce, sealed.as_slice())
            .map_err(|_| CryptoError::DecryptionFailed {
                reason: "authentication failed",
            })?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptionFailed {
            reason: "invalid UTF-8",
        })
    }
}

/// Decodes a stored blob from any accepted encoding.
fn decode_blob(blob: &str) -> Result<Vec<u8>> {
    let trimmed = blob.trim();
    let unprefixed = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("\\x"))
        .unwrap_or(trimmed);

    if unprefixed.len() % 2 == 0 && unprefixed.chars().all(|c| c.is_ascii_hexdigit()) {
        if let Ok(bytes) = hex_decode(unprefixed) {
            return Ok(bytes);
        }
    }

    STANDARD
        .decode(trimmed)
        .or_else(|_| STANDARD_NO_PAD.decode(trimmed))
        .map_err(|_| CryptoError::DecryptionFailed {
            reason: "undecodable blob",
        })
}

/// Parses a 64-character hex string into key bytes.
pub fn parse_key_hex(key_hex: &str) -> Result<[u8; KEY_SIZE]> {
    let bytes = hex_decode(key_hex.trim())
        .map_err(|e| CryptoError::InvalidKey(format!("Invalid hex key: {}", e)))?;

    if bytes.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKey(format!(
            "Key must be {} bytes ({} hex chars), got {} bytes",
            KEY_SIZE,
            KEY_SIZE * 2,
            bytes.len()
        )));
    }

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&bytes);
    Ok(key)
}

/// Generates a fresh random 256-bit key, hex-encoded.
pub fn generate_key_hex() -> Result<String> {
    let bytes = rand_bytes::<KEY_SIZE>()?;
    Ok(hex_encode(&bytes))
}

/// Encodes bytes as lowercase hex string.
pub(crate) fn hex_encode(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8; 16] = b"0123456789abcdef";
    let mut result = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        result.push(HEX_CHARS[(byte >> 4) as usize] as char);
        result.push(HEX_CHARS[(byte & 0x0f) as usize] as char);
    }
    result
}

/// Decodes hex string to bytes.
pub(crate) fn hex_decode(hex: &str) -> std::result::Result<Vec<u8>, String> {
    if hex.len() % 2 != 0 {
        return Err("Hex string must have even length".to_string());
    }

    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| format!("Invalid hex at position {}: {}", i, e))
        })
        .collect()
}

/// Generates random bytes using getrandom.
fn rand_bytes<const N: usize>() -> Result<[u8; N]> {
    let mut bytes = [0u8; N];
    getrandom::getrandom(&mut bytes).map_err(|e| {
        CryptoError::EncryptionError(format!("Failed to generate random bytes: {}", e))
    })?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test key: 32 bytes = 64 hex chars
    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    fn cipher() -> FieldCipher {
        FieldCipher::from_hex_key(TEST_KEY).unwrap()
    }

    #[test]
    fn test_roundtrip() {
        let c = cipher();
        let plaintext = "Re: your application for the staff role";

        let blob = c.encrypt(plaintext).unwrap();
        assert_eq!(c.decrypt(&blob).unwrap(), plaintext);
    }

    #[test]
    fn test_different_blob_each_time() {
        let c = cipher();
        let blob1 = c.encrypt("same").unwrap();
        let blob2 = c.encrypt("same").unwrap();

        assert_ne!(blob1, blob2);
        assert_eq!(c.decrypt(&blob1).unwrap(), "same");
        assert_eq!(c.decrypt(&blob2).unwrap(), "same");
    }

    #[test]
    fn test_canonical_output_is_plain_hex() {
        let c = cipher();
        let blob = c.encrypt("hello").unwrap();
        assert!(blob.chars().all(|ch| ch.is_ascii_hexdigit()));
        assert!(blob.chars().all(|ch| !ch.is_ascii_uppercase()));
    }

    #[test]
    fn test_tolerant_decode_prefixed_hex_and_base64() {
        let c = cipher();
        let blob = c.encrypt("legacy row").unwrap();
        let raw = hex_decode(&blob).unwrap();

        use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
        use base64::Engine;

        assert_eq!(c.decrypt(&format!("0x{}", blob)).unwrap(), "legacy row");
        assert_eq!(c.decrypt(&format!("\\x{}", blob)).unwrap(), "legacy row");
        assert_eq!(c.decrypt(&STANDARD.encode(&raw)).unwrap(), "legacy row");
        assert_eq!(c.decrypt(&STANDARD_NO_PAD.encode(&raw)).unwrap(), "legacy row");
    }

    #[test]
    fn test_decrypt_with_wrong_key_fails() {
        let c = cipher();
        let blob = c.encrypt("secret").unwrap();

        let other = FieldCipher::from_hex_key(
            "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff",
        )
        .unwrap();
        assert!(matches!(
            other.decrypt(&blob),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_decrypt_tampered_blob_fails() {
        let c = cipher();
        let blob = c.encrypt("secret").unwrap();

        let mut raw = hex_decode(&blob).unwrap();
        if let Some(byte) = raw.last_mut() {
            *byte ^= 0xff;
        }
        assert!(matches!(
            c.decrypt(&hex_encode(&raw)),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_decrypt_truncated_blob_fails() {
        let c = cipher();
        let blob = c.encrypt("secret").unwrap();

        // Strip everything past the nonce.
        let truncated = &blob[..20];
        assert!(matches!(
            c.decrypt(truncated),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let c = cipher();
        assert!(matches!(
            c.decrypt("not a blob at all!!!"),
            Err(CryptoError::DecryptionFailed { .. })
        ));
    }

    #[test]
    fn test_unicode_roundtrip() {
        let c = cipher();
        let plaintext = "Hallo, 世界! 🔐 émojis und ünïcödé";
        let blob = c.encrypt(plaintext).unwrap();
        assert_eq!(c.decrypt(&blob).unwrap(), plaintext);
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            FieldCipher::from_hex_key("0123456789abcdef"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_invalid_hex_key() {
        assert!(matches!(
            FieldCipher::from_hex_key("not-valid-hex-string-at-all!!!!!"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_generate_key_hex() {
        let k1 = generate_key_hex().unwrap();
        let k2 = generate_key_hex().unwrap();
        assert_eq!(k1.len(), KEY_SIZE * 2);
        assert_ne!(k1, k2);
        assert!(FieldCipher::from_hex_key(&k1).is_ok());
    }

    #[test]
    fn test_hex_encode_decode_roundtrip() {
        let original = vec![0x00, 0xff, 0x12, 0xab, 0xcd, 0xef];
        let encoded = hex_encode(&original);
        assert_eq!(encoded, "00ff12abcdef");
        assert_eq!(hex_decode(&encoded).unwrap(), original);
    }

    #[test]
    fn test_hex_decode_errors() {
        assert!(hex_decode("abc").is_err());
        assert!(hex_decode("ghij").is_err());
    }
}
