//! The self-describing ciphertext envelope.
//!
//! An envelope carries everything needed to decrypt a payload except the
//! owners' private keys: the AEAD parameters, the label list, the owner
//! list with the quorum threshold, and a sealed key share set. The version
//! tag pins which split construction produced the shares; both remain
//! decryptable.

use crate::error::{CryptorError, CryptorResult};
use keyward_crypto::SealedShare;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Version tag for the XOR-subset construction: one grant per permitted
/// owner subset, the DEK XOR-shared across the subset's members.
pub const VERSION_SUBSET: u16 = 1;

/// Version tag for the threshold construction: one GF(256) share per
/// owner, any `minimum` of which reconstruct the DEK.
pub const VERSION_THRESHOLD: u16 = 2;

/// Payload cipher identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SymmetricAlgorithm {
    #[serde(rename = "chacha20poly1305")]
    ChaCha20Poly1305,
}

/// Sealed key material, laid out per the construction the version pins.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum KeyShareSet {
    /// One entry per permitted subset, mapping each member to their sealed
    /// XOR fragment. All members of one subset must cooperate.
    Subsets(Vec<BTreeMap<String, SealedShare>>),
    /// One sealed Shamir share per owner.
    Threshold(BTreeMap<String, SealedShare>),
}

#[derive(Serialize, Deserialize)]
pub struct Envelope {
    pub version: u16,
    pub algorithm: SymmetricAlgorithm,
    pub nonce: [u8; 12],
    /// AEAD ciphertext with the tag appended.
    pub ciphertext: Vec<u8>,
    pub labels: Vec<String>,
    /// Owner names in canonical (sorted) order.
    pub owners: Vec<String>,
    pub minimum: u32,
    pub shares: KeyShareSet,
}

impl Envelope {
    pub fn to_bytes(&self) -> CryptorResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| CryptorError::Crypto(e.to_string()))
    }

    /// Parses and structurally validates an envelope.
    pub fn from_bytes(bytes: &[u8]) -> CryptorResult<Self> {
        let envelope: Envelope = serde_json::from_slice(bytes)
            .map_err(|e| CryptorError::Envelope(e.to_string()))?;
        envelope.validate()?;
        Ok(envelope)
    }

    fn validate(&self) -> CryptorResult<()> {
        if self.owners.is_empty() {
            return Err(CryptorError::Envelope("empty owner list".to_string()));
        }

        let owner_set: HashSet<&str> = self.owners.iter().map(String::as_str).collect();
        if owner_set.len() != self.owners.len() {
            return Err(CryptorError::Envelope("duplicate owners".to_string()));
        }

        let minimum = self.minimum as usize;
        if minimum < 1 || minimum > self.owners.len() {
            return Err(CryptorError::Envelope(format!(
                "minimum {} out of range for {} owners",
                self.minimum,
                self.owners.len()
            )));
        }

        match (self.version, &self.shares) {
            (VERSION_SUBSET, KeyShareSet::Subsets(grants)) => {
                if grants.is_empty() {
                    return Err(CryptorError::Envelope("no subset grants".to_string()));
                }
                for grant in grants {
                    if grant.len() != minimum {
                        return Err(CryptorError::Envelope(format!(
                            "subset grant of size {} does not match minimum {minimum}",
                            grant.len()
                        )));
                    }
                    if let Some(unknown) =
                        grant.keys().find(|m| !owner_set.contains(m.as_str()))
                    {
                        return Err(CryptorError::Envelope(format!(
                            "grant member {unknown} is not an owner"
                        )));
                    }
                }
                Ok(())
            }
            (VERSION_THRESHOLD, KeyShareSet::Threshold(shares)) => {
                if shares.len() != self.owners.len()
                    || shares.keys().any(|m| !owner_set.contains(m.as_str()))
                {
                    return Err(CryptorError::Envelope(
                        "threshold shares do not cover the owner list".to_string(),
                    ));
                }
                Ok(())
            }
            (VERSION_SUBSET, _) | (VERSION_THRESHOLD, _) => Err(CryptorError::Envelope(
                "share set does not match version".to_string(),
            )),
            (version, _) => Err(CryptorError::Envelope(format!(
                "unknown version {version}"
            ))),
        }
    }
}
