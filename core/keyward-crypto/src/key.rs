//! Password-based key derivation.
//!
//! Argon2id parameters are tuned for password-based key encryption:
//! 64 MiB memory, 3 iterations, 4 lanes. The same derivation backs both
//! private-key wrapping keys in the vault and delegation unlocking, always
//! with a fresh random salt per use so no two derived keys coincide.

use crate::error::{CryptoError, CryptoResult};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Derived key length in bytes.
pub const KEY_SIZE: usize = 32;

/// Salt length for key derivation.
pub const SALT_SIZE: usize = 16;

/// Random salt for key derivation, unique per derived key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Salt([u8; SALT_SIZE]);

impl Salt {
    /// Generates a fresh random salt from the OS RNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; SALT_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SIZE] {
        &self.0
    }
}

/// Argon2id cost parameters.
#[derive(Clone, Debug)]
pub struct KdfParams {
    /// Memory cost in KiB.
    pub memory_kib: u32,
    /// Iteration count.
    pub iterations: u32,
    /// Lane count.
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// A 32-byte symmetric key, either derived from a password or random.
///
/// Zeroed on drop. Equality is constant-time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DerivedKey([u8; KEY_SIZE]);

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl PartialEq for DerivedKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for DerivedKey {}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey").finish()
    }
}

/// Derives a 256-bit key from a password using Argon2id.
pub fn derive_key(password: &str, salt: &Salt, params: &KdfParams) -> CryptoResult<DerivedKey> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| CryptoError::KeyDerivation(format!("invalid Argon2 params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), &mut key)
        .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;

    Ok(DerivedKey(key))
}

/// Generates a random 256-bit key from the OS RNG.
pub fn generate_random_key() -> DerivedKey {
    let mut bytes = [0u8; KEY_SIZE];
    OsRng.fill_bytes(&mut bytes);
    DerivedKey(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_params() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn same_password_same_salt_is_deterministic() {
        let salt = Salt::random();
        let k1 = derive_key("hunter2", &salt, &fast_params()).unwrap();
        let k2 = derive_key("hunter2", &salt, &fast_params()).unwrap();
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_salts_produce_different_keys() {
        let k1 = derive_key("hunter2", &Salt::random(), &fast_params()).unwrap();
        let k2 = derive_key("hunter2", &Salt::random(), &fast_params()).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn different_passwords_produce_different_keys() {
        let salt = Salt::random();
        let k1 = derive_key("hunter2", &salt, &fast_params()).unwrap();
        let k2 = derive_key("hunter3", &salt, &fast_params()).unwrap();
        assert_ne!(k1, k2);
    }

    #[test]
    fn random_keys_differ() {
        assert_ne!(generate_random_key(), generate_random_key());
    }
}
