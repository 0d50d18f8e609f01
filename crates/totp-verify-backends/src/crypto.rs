//! Encryption-at-rest for TOTP secrets.
//!
//! A secret is encrypted with a key derived from the user's pincode via
//! Argon2id, then sealed with AES-256-GCM. The on-disk/on-row encoding is
//! `salt(16) || nonce(12) || ciphertext`.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use rand::RngCore;
use zeroize::Zeroize;

use totp_verify_core::Error;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Decrypts a TOTP secret that was encrypted at rest, using the user's
/// pincode as key-derivation material. Implemented by the file and SQL
/// backends identically; kept here so both reuse one audited routine.
pub trait SecretDecryptor {
    fn decrypt(&self, sealed: &[u8], pincode: &str) -> Result<String, Error>;
}

pub struct Argon2AesGcmDecryptor;

fn derive_key(pincode: &str, salt: &[u8]) -> Result<[u8; KEY_SIZE], Error> {
    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(pincode.as_bytes(), salt, &mut key)
        .map_err(|e| Error::user_secret(format!("key derivation failed: {e}")))?;
    Ok(key)
}

impl SecretDecryptor for Argon2AesGcmDecryptor {
    fn decrypt(&self, sealed: &[u8], pincode: &str) -> Result<String, Error> {
        if sealed.len() < SALT_SIZE + NONCE_SIZE {
            return Err(Error::user_secret("encrypted secret is truncated"));
        }

        let (salt, rest) = sealed.split_at(SALT_SIZE);
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        let mut key = derive_key(pincode, salt)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| Error::user_secret(format!("bad AES key: {e}")))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher.decrypt(nonce, ciphertext).map_err(|_| {
            tracing::warn!("encrypted secret failed to decrypt with supplied pincode");
            Error::user_secret("could not decrypt secret with this pincode")
        })?;
        key.zeroize();

        String::from_utf8(plaintext)
            .map_err(|_| Error::user_secret("decrypted secret is not valid UTF-8"))
    }
}

/// Seal a plaintext base32 secret for storage. Used by provisioning tools,
/// not by the verify path, but kept alongside its inverse.
pub fn encrypt(plaintext: &str, pincode: &str) -> Result<Vec<u8>, Error> {
    let mut salt = [0u8; SALT_SIZE];
    OsRng.fill_bytes(&mut salt);
    let mut key = derive_key(pincode, &salt)?;

    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|e| Error::user_secret(format!("bad AES key: {e}")))?;
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|e| Error::user_secret(format!("encryption failed: {e}")))?;
    key.zeroize();

    let mut sealed = Vec::with_capacity(SALT_SIZE + NONCE_SIZE + ciphertext.len());
    sealed.extend_from_slice(&salt);
    sealed.extend_from_slice(&nonce_bytes);
    sealed.extend_from_slice(&ciphertext);
    Ok(sealed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encrypt_and_decrypt() {
        let sealed = encrypt("VN7J5UVLZEP7ZAGM", "1234").unwrap();
        let decryptor = Argon2AesGcmDecryptor;
        let plaintext = decryptor.decrypt(&sealed, "1234").unwrap();
        assert_eq!(plaintext, "VN7J5UVLZEP7ZAGM");
    }

    #[test]
    fn wrong_pincode_fails_to_decrypt() {
        let sealed = encrypt("VN7J5UVLZEP7ZAGM", "1234").unwrap();
        let decryptor = Argon2AesGcmDecryptor;
        assert!(decryptor.decrypt(&sealed, "9999").is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let decryptor = Argon2AesGcmDecryptor;
        assert!(decryptor.decrypt(b"short", "1234").is_err());
    }
}
