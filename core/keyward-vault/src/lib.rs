//! Persistent password vault.
//!
//! Holds one record per user: an Argon2id password verifier, an X25519
//! keypair whose private half is encrypted under a password-derived key,
//! and admin/revoked lifecycle flags. Private keys never leave a record in
//! the clear except through [`Record::unlock_private_key`].
//!
//! The whole record table persists as a single JSON file replaced
//! atomically on every mutation, so a crashed or failed write never
//! corrupts the vault.

use crypto_box::{PublicKey, SecretKey};
use keyward_crypto::{protect_private_key, recover_private_key, KeyPair, PasswordProtectedKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

mod password;
mod store;

pub use password::{hash_password, verify_password};
pub use store::VAULT_FORMAT_VERSION;

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("user not present: {0}")]
    UserNotFound(String),
    #[error("user already exists: {0}")]
    UserAlreadyExists(String),
    #[error("user is revoked: {0}")]
    UserRevoked(String),
    #[error("invalid password")]
    InvalidPassword,
    #[error("user name must not be blank")]
    BlankName,
    #[error("storage error: {0}")]
    Storage(String),
    #[error("crypto error: {0}")]
    Crypto(String),
}

pub type VaultResult<T> = Result<T, VaultError>;

// ============================================================================
// Records
// ============================================================================

/// Asymmetric scheme backing a record's keypair.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordType {
    #[default]
    Curve25519,
}

impl std::fmt::Display for RecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordType::Curve25519 => f.write_str("curve25519"),
        }
    }
}

/// One user's vault entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    record_type: RecordType,
    admin: bool,
    revoked: bool,
    /// Argon2id PHC-string verifier. Salted independently of the
    /// private-key wrapping derivation.
    password_hash: String,
    public_key: [u8; 32],
    protected_key: PasswordProtectedKey,
}

impl Record {
    fn new(password: &str, admin: bool, record_type: RecordType) -> VaultResult<Self> {
        let keypair = KeyPair::generate();
        let protected_key = protect_private_key(&keypair.secret, password)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let password_hash = password::hash_password(password)?;

        Ok(Record {
            record_type,
            admin,
            revoked: false,
            password_hash,
            public_key: keypair.public_bytes(),
            protected_key,
        })
    }

    pub fn record_type(&self) -> RecordType {
        self.record_type
    }

    pub fn is_admin(&self) -> bool {
        self.admin
    }

    pub fn is_revoked(&self) -> bool {
        self.revoked
    }

    /// Checks the password against the stored verifier.
    pub fn validate_password(&self, password: &str) -> VaultResult<()> {
        if password::verify_password(password, &self.password_hash)? {
            Ok(())
        } else {
            Err(VaultError::InvalidPassword)
        }
    }

    /// Decrypts the record's private key with the user's password.
    pub fn unlock_private_key(&self, password: &str) -> VaultResult<SecretKey> {
        self.validate_password(password)?;
        recover_private_key(&self.protected_key, password).map_err(|e| match e {
            keyward_crypto::CryptoError::Decryption(_) => VaultError::InvalidPassword,
            other => VaultError::Crypto(other.to_string()),
        })
    }

    /// The record's X25519 public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(self.public_key)
    }

    /// Hex-encoded SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.public_key))
    }
}

/// Public view of a record, safe to hand to any authenticated caller.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Summary {
    #[serde(rename = "Admin")]
    pub admin: bool,
    #[serde(rename = "Type")]
    pub record_type: RecordType,
    #[serde(rename = "Revoked")]
    pub revoked: bool,
    #[serde(rename = "Fingerprint")]
    pub fingerprint: String,
}

// ============================================================================
// Vault
// ============================================================================

/// The record table, bound to its backing file.
pub struct Vault {
    path: PathBuf,
    records: RwLock<BTreeMap<String, Record>>,
}

impl Vault {
    /// Loads an existing vault file, or binds an empty vault to `path`.
    pub fn init_from(path: impl Into<PathBuf>) -> VaultResult<Self> {
        let path = path.into();
        let records = store::load(&path)?;
        debug!(records = records.len(), path = %path.display(), "vault loaded");
        Ok(Vault {
            path,
            records: RwLock::new(records),
        })
    }

    pub fn num_records(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    /// Fetches a copy of the named record.
    pub fn get_record(&self, name: &str) -> Option<Record> {
        self.records.read().ok()?.get(name).cloned()
    }

    /// Creates a record with a fresh keypair, failing if the name exists.
    pub fn add_new_record(
        &self,
        name: &str,
        password: &str,
        admin: bool,
        record_type: RecordType,
    ) -> VaultResult<Record> {
        if name.is_empty() {
            return Err(VaultError::BlankName);
        }

        let mut records = self.write_lock()?;
        if records.contains_key(name) {
            return Err(VaultError::UserAlreadyExists(name.to_string()));
        }

        let record = Record::new(password, admin, record_type)?;

        let mut next = records.clone();
        next.insert(name.to_string(), record.clone());
        store::persist(&self.path, &next)?;
        *records = next;

        debug!(name, admin, "vault record added");
        Ok(record)
    }

    /// Re-wraps the private key and verifier under a new password.
    ///
    /// The old password must verify; disk and memory only change together.
    pub fn change_password(&self, name: &str, old: &str, new: &str) -> VaultResult<()> {
        let mut records = self.write_lock()?;
        let record = records
            .get(name)
            .ok_or_else(|| VaultError::UserNotFound(name.to_string()))?;

        let secret = record.unlock_private_key(old)?;
        let protected_key = protect_private_key(&secret, new)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;
        let password_hash = password::hash_password(new)?;

        let mut updated = record.clone();
        updated.protected_key = protected_key;
        updated.password_hash = password_hash;

        let mut next = records.clone();
        next.insert(name.to_string(), updated);
        store::persist(&self.path, &next)?;
        *records = next;

        debug!(name, "vault password changed");
        Ok(())
    }

    /// Removes the record permanently.
    pub fn delete_record(&self, name: &str) -> VaultResult<()> {
        let mut records = self.write_lock()?;
        if !records.contains_key(name) {
            return Err(VaultError::UserNotFound(name.to_string()));
        }

        let mut next = records.clone();
        next.remove(name);
        store::persist(&self.path, &next)?;
        *records = next;

        debug!(name, "vault record deleted");
        Ok(())
    }

    /// Marks the record revoked; it stays visible for audit but may no
    /// longer join new delegations or owner sets.
    pub fn revoke_record(&self, name: &str) -> VaultResult<()> {
        self.update_record(name, |record| record.revoked = true)
    }

    /// Grants the admin flag.
    pub fn make_admin(&self, name: &str) -> VaultResult<()> {
        self.update_record(name, |record| record.admin = true)
    }

    /// Public summaries for every record, keyed by user name.
    pub fn get_summary(&self) -> BTreeMap<String, Summary> {
        let records = match self.records.read() {
            Ok(records) => records,
            Err(_) => return BTreeMap::new(),
        };
        records
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    Summary {
                        admin: record.admin,
                        record_type: record.record_type,
                        revoked: record.revoked,
                        fingerprint: record.fingerprint(),
                    },
                )
            })
            .collect()
    }

    fn update_record(
        &self,
        name: &str,
        mutate: impl FnOnce(&mut Record),
    ) -> VaultResult<()> {
        let mut records = self.write_lock()?;
        let record = records
            .get(name)
            .ok_or_else(|| VaultError::UserNotFound(name.to_string()))?;

        let mut updated = record.clone();
        mutate(&mut updated);

        let mut next = records.clone();
        next.insert(name.to_string(), updated);
        store::persist(&self.path, &next)?;
        *records = next;
        Ok(())
    }

    fn write_lock(&self) -> VaultResult<std::sync::RwLockWriteGuard<'_, BTreeMap<String, Record>>> {
        self.records
            .write()
            .map_err(|e| VaultError::Storage(e.to_string()))
    }
}
