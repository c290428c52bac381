//! Authenticated symmetric encryption.
//!
//! ChaCha20-Poly1305 with a random 96-bit nonce per encryption. The nonce
//! is bundled with the ciphertext so the key is the only input needed for
//! decryption.

use crate::error::{CryptoError, CryptoResult};
use crate::key::DerivedKey;
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Nonce length for ChaCha20-Poly1305.
pub const NONCE_SIZE: usize = 12;

/// Poly1305 auth tag length, appended to the ciphertext.
pub const TAG_SIZE: usize = 16;

/// Ciphertext with its nonce.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EncryptedData {
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with the Poly1305 tag appended.
    pub ciphertext: Vec<u8>,
}

/// Encrypts plaintext under the given key with a fresh random nonce.
pub fn encrypt(key: &DerivedKey, plaintext: &[u8]) -> CryptoResult<EncryptedData> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;

    Ok(EncryptedData { nonce, ciphertext })
}

/// Decrypts and authenticates ciphertext under the given key.
///
/// The returned plaintext is zeroed when dropped.
pub fn decrypt(key: &DerivedKey, data: &EncryptedData) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(key.as_bytes()));

    cipher
        .decrypt(Nonce::from_slice(&data.nonce), data.ciphertext.as_ref())
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::Decryption("wrong key or tampered data".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::generate_random_key;

    #[test]
    fn roundtrip() {
        let key = generate_random_key();
        let encrypted = encrypt(&key, b"attack at dawn").unwrap();
        let plaintext = decrypt(&key, &encrypted).unwrap();
        assert_eq!(plaintext.as_slice(), b"attack at dawn");
    }

    #[test]
    fn wrong_key_fails() {
        let encrypted = encrypt(&generate_random_key(), b"payload").unwrap();
        assert!(decrypt(&generate_random_key(), &encrypted).is_err());
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let key = generate_random_key();
        let mut encrypted = encrypt(&key, b"payload").unwrap();
        encrypted.ciphertext[0] ^= 0xFF;
        assert!(decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn tampered_nonce_fails() {
        let key = generate_random_key();
        let mut encrypted = encrypt(&key, b"payload").unwrap();
        encrypted.nonce[0] ^= 0xFF;
        assert!(decrypt(&key, &encrypted).is_err());
    }

    #[test]
    fn ciphertext_includes_tag() {
        let key = generate_random_key();
        let encrypted = encrypt(&key, b"xyz").unwrap();
        assert_eq!(encrypted.ciphertext.len(), 3 + TAG_SIZE);
    }

    #[test]
    fn empty_plaintext_roundtrip() {
        let key = generate_random_key();
        let encrypted = encrypt(&key, b"").unwrap();
        assert_eq!(decrypt(&key, &encrypted).unwrap().as_slice(), b"");
    }
}
