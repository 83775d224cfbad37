//! Field encryption for columns marked encrypted-at-rest
//!
//! AES-256-GCM with a random 96-bit nonce per value; ciphertext is stored
//! as base64(nonce || ciphertext) in a TEXT column. The key comes from the
//! caller (OS keychain integration lives outside this crate).

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use serde_json::Value;

use crate::error::{Error, Result};

const NONCE_LEN: usize = 12;

/// Length in bytes of an encryption key
pub const KEY_LEN: usize = 32;

/// Encrypts and decrypts individual column values
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").finish_non_exhaustive()
    }
}

impl FieldCipher {
    /// Build a cipher from a raw 256-bit key
    #[must_use]
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key)),
        }
    }

    /// Encrypt a JSON column value into its at-rest TEXT representation
    pub fn encrypt_value(&self, value: &Value) -> Result<String> {
        let plaintext = serde_json::to_vec(value)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_ref())
            .map_err(|e| Error::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    /// Decrypt an at-rest TEXT representation back into its JSON value
    pub fn decrypt_value(&self, encoded: &str) -> Result<Value> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|e| Error::Encryption(e.to_string()))?;
        if bytes.len() <= NONCE_LEN {
            return Err(Error::Encryption("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = bytes.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::Encryption(e.to_string()))?;

        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> FieldCipher {
        FieldCipher::new(&[7u8; KEY_LEN])
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let value = json!(125_500);
        let encoded = cipher().encrypt_value(&value).unwrap();
        assert_ne!(encoded, "125500");
        assert_eq!(cipher().decrypt_value(&encoded).unwrap(), value);
    }

    #[test]
    fn nonce_makes_ciphertext_unique() {
        let value = json!(42);
        let a = cipher().encrypt_value(&value).unwrap();
        let b = cipher().encrypt_value(&value).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_closed() {
        let encoded = cipher().encrypt_value(&json!(1)).unwrap();
        let other = FieldCipher::new(&[9u8; KEY_LEN]);
        assert!(other.decrypt_value(&encoded).is_err());
    }

    #[test]
    fn garbage_input_is_an_error() {
        assert!(cipher().decrypt_value("not base64!!").is_err());
        assert!(cipher().decrypt_value("AAAA").is_err());
    }
}
