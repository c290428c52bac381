//! Cryptor error types.

use thiserror::Error;

/// Result type for cryptor operations.
pub type CryptorResult<T> = Result<T, CryptorError>;

/// Errors from envelope encryption and threshold decryption.
#[derive(Debug, Error)]
pub enum CryptorError {
    #[error("owner set must not be empty")]
    NoOwners,

    #[error("duplicate owner: {0}")]
    DuplicateOwner(String),

    #[error("owner not present: {0}")]
    UnknownOwner(String),

    #[error("owner is revoked: {0}")]
    RevokedOwner(String),

    #[error("minimum must be between 1 and {owners}, got {minimum}")]
    InvalidMinimum { minimum: usize, owners: usize },

    #[error("two-person rule requires a minimum of at least 2")]
    TwoPersonRequired,

    #[error("threshold sharing supports at most {max} owners, got {owners}")]
    TooManyOwners { owners: usize, max: usize },

    #[error("insufficient delegations to decrypt")]
    InsufficientDelegations,

    #[error("malformed envelope: {0}")]
    Envelope(String),

    #[error("crypto failure: {0}")]
    Crypto(String),
}

impl From<keyward_crypto::CryptoError> for CryptorError {
    fn from(err: keyward_crypto::CryptoError) -> Self {
        CryptorError::Crypto(err.to_string())
    }
}
