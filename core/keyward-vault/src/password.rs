//! Password hashing and verification using Argon2
//!
//! Uses the argon2id variant in PHC string format. The verifier hash and
//! the private-key wrapping key are derived under independent random salts,
//! so exposure of the verifier reveals nothing about the wrapping key.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};

use crate::{VaultError, VaultResult};

/// Hash a password using Argon2id.
///
/// Returns the PHC-formatted hash string that includes the salt and parameters.
pub fn hash_password(password: &str) -> VaultResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    argon2
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VaultError::Crypto(format!("failed to hash password: {e}")))
}

/// Verify a password against a stored PHC hash.
pub fn verify_password(password: &str, hash: &str) -> VaultResult<bool> {
    let parsed_hash = PasswordHash::new(hash)
        .map_err(|e| VaultError::Crypto(format!("invalid password hash format: {e}")))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}
