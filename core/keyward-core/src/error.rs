//! Dispatch error taxonomy.
//!
//! Every error surfaces to the caller as a JSON response whose `Status`
//! holds the `Display` text below; the strings are a stable contract.
//! Underlying causes are logged, never serialized.

use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Vault is not created yet")]
    VaultNotInitialized,

    #[error("Vault is already created")]
    VaultAlreadyInitialized,

    #[error("User name must not be blank")]
    BlankName,

    #[error("Password must be at least one character")]
    BlankPassword,

    #[error("User not present")]
    UserNotFound,

    #[error("User already exists")]
    UserAlreadyExists,

    #[error("User is revoked")]
    UserRevoked,

    #[error("Password does not match")]
    BadPassword,

    #[error("Admin required")]
    NotAdmin,

    #[error("Cannot modify own record")]
    CannotModifySelf,

    #[error("Record to modify missing")]
    ModifyTargetMissing,

    #[error("Unknown command")]
    UnknownCommand,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Insufficient delegations to decrypt")]
    InsufficientDelegations,

    #[error("Cryptographic operation failed")]
    Crypto,

    #[error("Vault storage failure")]
    Persistence,

    #[error("Internal error")]
    Internal,
}

impl From<keyward_vault::VaultError> for CoreError {
    fn from(err: keyward_vault::VaultError) -> Self {
        use keyward_vault::VaultError;
        match err {
            VaultError::UserNotFound(_) => CoreError::UserNotFound,
            VaultError::UserAlreadyExists(_) => CoreError::UserAlreadyExists,
            VaultError::UserRevoked(_) => CoreError::UserRevoked,
            VaultError::InvalidPassword => CoreError::BadPassword,
            VaultError::BlankName => CoreError::BlankName,
            VaultError::Storage(_) => CoreError::Persistence,
            VaultError::Crypto(_) => CoreError::Crypto,
        }
    }
}

impl From<keyward_keycache::CacheError> for CoreError {
    fn from(err: keyward_keycache::CacheError) -> Self {
        use keyward_keycache::CacheError;
        match err {
            CacheError::InvalidUses
            | CacheError::InvalidDuration(_)
            | CacheError::DurationTooLong { .. } => CoreError::InvalidRequest(err.to_string()),
            CacheError::Vault(inner) => inner.into(),
            CacheError::LockPoisoned => CoreError::Internal,
        }
    }
}

impl From<keyward_cryptor::CryptorError> for CoreError {
    fn from(err: keyward_cryptor::CryptorError) -> Self {
        use keyward_cryptor::CryptorError;
        match err {
            CryptorError::NoOwners
            | CryptorError::DuplicateOwner(_)
            | CryptorError::InvalidMinimum { .. }
            | CryptorError::TwoPersonRequired
            | CryptorError::TooManyOwners { .. } => CoreError::InvalidRequest(err.to_string()),
            CryptorError::UnknownOwner(_) => CoreError::UserNotFound,
            CryptorError::RevokedOwner(_) => CoreError::UserRevoked,
            CryptorError::InsufficientDelegations => CoreError::InsufficientDelegations,
            CryptorError::Envelope(_) | CryptorError::Crypto(_) => CoreError::Crypto,
        }
    }
}
