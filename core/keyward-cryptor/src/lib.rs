//! Envelope encryption with policy-gated threshold decryption.
//!
//! Encryption generates a fresh data-encryption key (DEK), seals the
//! payload with ChaCha20-Poly1305, then splits the DEK across the named
//! owners so that any `minimum` of them can reconstruct it. Two split
//! constructions exist, pinned by the envelope version:
//!
//! - **XOR subsets** (version 1): one grant per minimum-size owner subset,
//!   the DEK XOR-shared across the subset members. Used while the subset
//!   count stays within a configured bound.
//! - **Threshold** (version 2): one GF(256) Shamir share per owner. Used
//!   when subset enumeration would blow up the envelope.
//!
//! Decryption consults the key cache: only owners with a live delegation
//! permitting the requesting user and the envelope's labels participate,
//! and uses are consumed all-or-nothing per reconstruction attempt.

pub mod envelope;
mod error;

pub use error::{CryptorError, CryptorResult};

use envelope::{Envelope, KeyShareSet, SymmetricAlgorithm, VERSION_SUBSET, VERSION_THRESHOLD};
use keyward_crypto::{
    combine_shares, decrypt, encrypt, generate_random_key, seal_share, split_secret, DerivedKey,
    EncryptedData, SealedShare, Share, KEY_SIZE,
};
use keyward_keycache::KeyCache;
use keyward_vault::Vault;
use rand::rngs::OsRng;
use rand::RngCore;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Tuning knobs for envelope construction.
#[derive(Clone, Debug)]
pub struct CryptorConfig {
    /// Refuse to encrypt with `minimum < 2`.
    pub require_two_person: bool,
    /// Largest subset enumeration before switching to threshold sharing.
    pub max_subsets: usize,
}

impl Default for CryptorConfig {
    fn default() -> Self {
        Self {
            require_two_person: false,
            max_subsets: 1024,
        }
    }
}

/// Outcome of a successful decryption.
#[derive(Debug)]
pub struct Recovered {
    pub data: Vec<u8>,
    /// Owners whose delegations were consumed, in canonical order.
    pub delegates: Vec<String>,
    /// True iff the quorum was at least two and every consumed delegation
    /// was requester-scoped.
    pub secure: bool,
}

/// The envelope encryption engine. Stateless between calls; composes the
/// vault (public keys) and the cache (delegated private keys), never
/// holding both locks at once.
pub struct Cryptor {
    vault: Arc<Vault>,
    cache: Arc<KeyCache>,
    config: CryptorConfig,
}

impl Cryptor {
    pub fn new(vault: Arc<Vault>, cache: Arc<KeyCache>) -> Self {
        Self::with_config(vault, cache, CryptorConfig::default())
    }

    pub fn with_config(vault: Arc<Vault>, cache: Arc<KeyCache>, config: CryptorConfig) -> Self {
        Cryptor {
            vault,
            cache,
            config,
        }
    }

    /// Encrypts `plaintext` so that any `minimum` of `owners` can later
    /// authorize its decryption.
    pub fn encrypt(
        &self,
        plaintext: &[u8],
        labels: &[String],
        owners: &[String],
        minimum: usize,
    ) -> CryptorResult<Vec<u8>> {
        let owners = canonical_owners(owners)?;
        let total = owners.len();

        if minimum < 1 || minimum > total {
            return Err(CryptorError::InvalidMinimum {
                minimum,
                owners: total,
            });
        }
        if self.config.require_two_person && minimum < 2 {
            return Err(CryptorError::TwoPersonRequired);
        }

        let mut public_keys = BTreeMap::new();
        for name in &owners {
            let record = self
                .vault
                .get_record(name)
                .ok_or_else(|| CryptorError::UnknownOwner(name.clone()))?;
            if record.is_revoked() {
                return Err(CryptorError::RevokedOwner(name.clone()));
            }
            public_keys.insert(name.clone(), record.public_key());
        }

        let dek = generate_random_key();
        let encrypted = encrypt(&dek, plaintext)?;

        let within_bound =
            binomial_capped(total, minimum, self.config.max_subsets) <= self.config.max_subsets;

        let (version, shares) = if within_bound {
            let mut grants = Vec::new();
            for combo in combinations(total, minimum) {
                let fragments = xor_split(dek.as_bytes(), minimum);
                let mut grant = BTreeMap::new();
                for (&index, fragment) in combo.iter().zip(&fragments) {
                    let name = &owners[index];
                    grant.insert(name.clone(), seal_share(fragment, &public_keys[name])?);
                }
                grants.push(grant);
            }
            (VERSION_SUBSET, KeyShareSet::Subsets(grants))
        } else {
            if total > u8::MAX as usize {
                return Err(CryptorError::TooManyOwners {
                    owners: total,
                    max: u8::MAX as usize,
                });
            }
            let split = split_secret(dek.as_bytes(), total as u8, minimum as u8)
                .map_err(keyward_crypto::CryptoError::from)?;

            let mut sealed = BTreeMap::new();
            for (share, name) in split.iter().zip(&owners) {
                let mut share_bytes = Zeroizing::new(Vec::with_capacity(1 + share.y.len()));
                share_bytes.push(share.x);
                share_bytes.extend_from_slice(&share.y);
                sealed.insert(name.clone(), seal_share(&share_bytes, &public_keys[name])?);
            }
            (VERSION_THRESHOLD, KeyShareSet::Threshold(sealed))
        };

        debug!(owners = total, minimum, version, "payload encrypted");

        Envelope {
            version,
            algorithm: SymmetricAlgorithm::ChaCha20Poly1305,
            nonce: encrypted.nonce,
            ciphertext: encrypted.ciphertext,
            labels: labels.to_vec(),
            owners,
            minimum: minimum as u32,
            shares,
        }
        .to_bytes()
    }

    /// Decrypts an envelope on behalf of `requester`, drawing on whatever
    /// live delegations satisfy the envelope's access policy.
    pub fn decrypt(&self, envelope_bytes: &[u8], requester: &str) -> CryptorResult<Recovered> {
        let env = Envelope::from_bytes(envelope_bytes)?;
        let minimum = env.minimum as usize;

        let usable = self.cache.usable_owners(&env.owners, requester, &env.labels);

        let attempt = match &env.shares {
            KeyShareSet::Subsets(grants) => {
                let usable_set: HashSet<&str> = usable.iter().map(String::as_str).collect();
                self.attempt_subset_grants(grants, &usable_set, requester, &env.labels)?
            }
            KeyShareSet::Threshold(shares) => {
                self.attempt_threshold(shares, &usable, minimum, requester, &env.labels)?
            }
        };

        let Some((dek, delegates, all_scoped)) = attempt else {
            return Err(CryptorError::InsufficientDelegations);
        };

        let encrypted = EncryptedData {
            nonce: env.nonce,
            ciphertext: env.ciphertext,
        };
        let plaintext = decrypt(&dek, &encrypted)
            .map_err(|_| CryptorError::Crypto("payload authentication failed".to_string()))?;

        debug!(requester, delegates = delegates.len(), "payload decrypted");

        Ok(Recovered {
            data: plaintext.to_vec(),
            delegates,
            secure: minimum >= 2 && all_scoped,
        })
    }

    fn attempt_subset_grants(
        &self,
        grants: &[BTreeMap<String, SealedShare>],
        usable: &HashSet<&str>,
        requester: &str,
        labels: &[String],
    ) -> CryptorResult<Option<(DerivedKey, Vec<String>, bool)>> {
        for grant in grants {
            if !grant.keys().all(|member| usable.contains(member.as_str())) {
                continue;
            }

            let requests: Vec<(&str, &SealedShare)> = grant
                .iter()
                .map(|(name, sealed)| (name.as_str(), sealed))
                .collect();

            // The cache state may have moved since the usability check;
            // a refused set just means this grant is no longer viable.
            let Some(opened) =
                self.cache
                    .open_delegated_share_set(&requests, requester, labels)
            else {
                continue;
            };

            let all_scoped = opened.iter().all(|(_, scoped)| *scoped);
            let dek = xor_combine(opened.iter().map(|(fragment, _)| fragment.as_slice()))?;
            return Ok(Some((dek, grant.keys().cloned().collect(), all_scoped)));
        }
        Ok(None)
    }

    fn attempt_threshold(
        &self,
        shares: &BTreeMap<String, SealedShare>,
        usable: &[String],
        minimum: usize,
        requester: &str,
        labels: &[String],
    ) -> CryptorResult<Option<(DerivedKey, Vec<String>, bool)>> {
        if usable.len() < minimum {
            return Ok(None);
        }

        for combo in combinations(usable.len(), minimum) {
            let mut requests = Vec::with_capacity(minimum);
            for &index in &combo {
                let name = usable[index].as_str();
                match shares.get(name) {
                    Some(sealed) => requests.push((name, sealed)),
                    None => break,
                }
            }
            if requests.len() != minimum {
                continue;
            }

            let Some(opened) =
                self.cache
                    .open_delegated_share_set(&requests, requester, labels)
            else {
                continue;
            };

            let all_scoped = opened.iter().all(|(_, scoped)| *scoped);
            let mut parsed = Vec::with_capacity(opened.len());
            for (bytes, _) in &opened {
                if bytes.len() < 2 {
                    return Err(CryptorError::Crypto("malformed key share".to_string()));
                }
                parsed.push(Share {
                    x: bytes[0],
                    y: bytes[1..].to_vec(),
                });
            }

            let secret =
                combine_shares(&parsed).map_err(|e| CryptorError::Crypto(e.to_string()))?;
            let dek = dek_from_bytes(&secret)?;
            let delegates = requests.iter().map(|(name, _)| name.to_string()).collect();
            return Ok(Some((dek, delegates, all_scoped)));
        }
        Ok(None)
    }
}

fn canonical_owners(owners: &[String]) -> CryptorResult<Vec<String>> {
    if owners.is_empty() {
        return Err(CryptorError::NoOwners);
    }
    let mut sorted = owners.to_vec();
    sorted.sort();
    for pair in sorted.windows(2) {
        if pair[0] == pair[1] {
            return Err(CryptorError::DuplicateOwner(pair[0].clone()));
        }
    }
    Ok(sorted)
}

/// Splits `secret` into `count` fragments whose XOR is the secret.
fn xor_split(secret: &[u8], count: usize) -> Vec<Zeroizing<Vec<u8>>> {
    let mut fragments: Vec<Zeroizing<Vec<u8>>> = Vec::with_capacity(count);
    let mut last = Zeroizing::new(secret.to_vec());
    for _ in 1..count {
        let mut random = Zeroizing::new(vec![0u8; secret.len()]);
        OsRng.fill_bytes(&mut random);
        for (acc, byte) in last.iter_mut().zip(random.iter()) {
            *acc ^= byte;
        }
        fragments.push(random);
    }
    fragments.push(last);
    fragments
}

fn xor_combine<'a>(fragments: impl Iterator<Item = &'a [u8]>) -> CryptorResult<DerivedKey> {
    let mut acc = Zeroizing::new([0u8; KEY_SIZE]);
    let mut count = 0usize;
    for fragment in fragments {
        if fragment.len() != KEY_SIZE {
            return Err(CryptorError::Crypto(
                "key fragment length mismatch".to_string(),
            ));
        }
        for (a, b) in acc.iter_mut().zip(fragment) {
            *a ^= b;
        }
        count += 1;
    }
    if count == 0 {
        return Err(CryptorError::Crypto("no key fragments".to_string()));
    }
    Ok(DerivedKey::from_bytes(*acc))
}

fn dek_from_bytes(bytes: &[u8]) -> CryptorResult<DerivedKey> {
    let array: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptorError::Crypto("reconstructed key has wrong length".to_string()))?;
    Ok(DerivedKey::from_bytes(array))
}

/// C(n, k), or `cap + 1` as soon as the running value exceeds `cap`.
fn binomial_capped(n: usize, k: usize, cap: usize) -> usize {
    let k = k.min(n - k);
    let mut value: u128 = 1;
    for i in 0..k {
        value = value * (n - i) as u128 / (i as u128 + 1);
        if value > cap as u128 {
            return cap + 1;
        }
    }
    value as usize
}

/// Lexicographic k-combinations of `0..n`.
fn combinations(n: usize, k: usize) -> Combinations {
    Combinations {
        n,
        k,
        indices: Vec::new(),
        started: false,
        done: k > n,
    }
}

struct Combinations {
    n: usize,
    k: usize,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            self.indices = (0..self.k).collect();
            return Some(self.indices.clone());
        }

        // Advance the rightmost index that still has room.
        let mut i = self.k;
        loop {
            if i == 0 {
                self.done = true;
                return None;
            }
            i -= 1;
            if self.indices[i] != i + self.n - self.k {
                break;
            }
        }
        self.indices[i] += 1;
        for j in i + 1..self.k {
            self.indices[j] = self.indices[j - 1] + 1;
        }
        Some(self.indices.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binomial_values() {
        assert_eq!(binomial_capped(3, 2, 1024), 3);
        assert_eq!(binomial_capped(5, 5, 1024), 1);
        assert_eq!(binomial_capped(10, 1, 1024), 10);
        assert_eq!(binomial_capped(20, 10, 1024), 1025, "capped at bound");
    }

    #[test]
    fn combinations_enumerate_lexicographically() {
        let combos: Vec<Vec<usize>> = combinations(4, 2).collect();
        assert_eq!(
            combos,
            vec![
                vec![0, 1],
                vec![0, 2],
                vec![0, 3],
                vec![1, 2],
                vec![1, 3],
                vec![2, 3],
            ]
        );
    }

    #[test]
    fn combinations_degenerate_cases() {
        assert_eq!(combinations(3, 3).count(), 1);
        assert_eq!(combinations(3, 4).count(), 0);
        assert_eq!(combinations(5, 1).count(), 5);
    }

    #[test]
    fn xor_split_combines_back() {
        let secret = [0x5au8; KEY_SIZE];
        for count in 1..5 {
            let fragments = xor_split(&secret, count);
            assert_eq!(fragments.len(), count);
            let dek = xor_combine(fragments.iter().map(|f| f.as_slice())).unwrap();
            assert_eq!(dek.as_bytes(), &secret);
        }
    }

    #[test]
    fn xor_combine_rejects_bad_lengths() {
        let short: &[u8] = b"short";
        assert!(xor_combine([short].into_iter()).is_err());
    }

    #[test]
    fn single_fragment_is_the_secret() {
        let secret = [7u8; KEY_SIZE];
        let fragments = xor_split(&secret, 1);
        assert_eq!(fragments[0].as_slice(), &secret);
    }
}
