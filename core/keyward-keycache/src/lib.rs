//! In-memory cache of active delegations.
//!
//! A delegation is a user's decrypted private key held transiently on
//! their behalf, scoped by remaining uses, an expiry instant, a permitted
//! requester set, and a permitted label set. Entries never touch disk and
//! vanish on restart.
//!
//! A single mutex guards the delegation map; every check-unseal-decrement
//! sequence runs under it, so a use is consumed exactly when a share is
//! handed out and an aborted quorum attempt consumes nothing.

use chrono::{DateTime, Duration, Utc};
use crypto_box::SecretKey;
use keyward_crypto::{open_share, SealedShare};
use keyward_vault::Record;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;
use tracing::debug;
use zeroize::Zeroizing;

// ============================================================================
// Error types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("delegation uses must be at least 1")]
    InvalidUses,
    #[error("invalid duration: {0}")]
    InvalidDuration(String),
    #[error("delegation time {requested} exceeds the maximum of {ceiling_hours}h")]
    DurationTooLong {
        requested: String,
        ceiling_hours: i64,
    },
    #[error(transparent)]
    Vault(#[from] keyward_vault::VaultError),
    #[error("cache lock poisoned")]
    LockPoisoned,
}

pub type CacheResult<T> = Result<T, CacheError>;

/// Default ceiling on delegation lifetime: 30 days.
pub const DEFAULT_MAX_DELEGATION_HOURS: i64 = 720;

// ============================================================================
// Delegations
// ============================================================================

struct Delegation {
    secret: SecretKey,
    uses_remaining: u32,
    expires_at: DateTime<Utc>,
    /// User names allowed to request decryptions against this entry.
    /// Empty means unrestricted.
    users: HashSet<String>,
    /// Labels an envelope must intersect to draw on this entry.
    /// Empty means any.
    labels: HashSet<String>,
}

impl Delegation {
    fn usable(&self, now: DateTime<Utc>) -> bool {
        self.uses_remaining > 0 && self.expires_at > now
    }

    fn permits(&self, requester: &str, envelope_labels: &[String]) -> bool {
        if !self.users.is_empty() && !self.users.contains(requester) {
            return false;
        }
        if !self.labels.is_empty()
            && !envelope_labels.iter().any(|label| self.labels.contains(label))
        {
            return false;
        }
        true
    }

    /// Whether this delegation names an explicit requester set.
    fn is_scoped(&self) -> bool {
        !self.users.is_empty()
    }
}

/// Public view of a delegation. Never includes key material.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DelegationSummary {
    #[serde(rename = "Uses")]
    pub uses_remaining: u32,
    #[serde(rename = "Expires")]
    pub expires_at: DateTime<Utc>,
    #[serde(rename = "Users")]
    pub users: Vec<String>,
    #[serde(rename = "Labels")]
    pub labels: Vec<String>,
}

// ============================================================================
// KeyCache
// ============================================================================

/// The set of active delegations, keyed by user name.
pub struct KeyCache {
    entries: Mutex<HashMap<String, Delegation>>,
    max_duration: Duration,
}

impl Default for KeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCache {
    pub fn new() -> Self {
        Self::with_max_duration(Duration::hours(DEFAULT_MAX_DELEGATION_HOURS))
    }

    /// A cache with a custom ceiling on delegation lifetime.
    pub fn with_max_duration(max_duration: Duration) -> Self {
        KeyCache {
            entries: Mutex::new(HashMap::new()),
            max_duration,
        }
    }

    /// Purges expired and exhausted entries.
    pub fn refresh(&self) {
        let now = Utc::now();
        if let Ok(mut entries) = self.entries.lock() {
            entries.retain(|_, delegation| delegation.usable(now));
        }
    }

    /// Decrypts the record's private key and installs a delegation.
    ///
    /// A delegation already cached under `name` is replaced outright:
    /// re-delegation is re-authorization.
    #[allow(clippy::too_many_arguments)]
    pub fn add_key_from_record(
        &self,
        record: &Record,
        name: &str,
        password: &str,
        users: Vec<String>,
        labels: Vec<String>,
        uses: u32,
        time_spec: &str,
    ) -> CacheResult<()> {
        if uses == 0 {
            return Err(CacheError::InvalidUses);
        }

        let duration = parse_duration(time_spec)?;
        if duration > self.max_duration {
            return Err(CacheError::DurationTooLong {
                requested: time_spec.to_string(),
                ceiling_hours: self.max_duration.num_hours(),
            });
        }

        let secret = record.unlock_private_key(password)?;
        let expires_at = Utc::now() + duration;

        let delegation = Delegation {
            secret,
            uses_remaining: uses,
            expires_at,
            users: users.into_iter().collect(),
            labels: labels.into_iter().collect(),
        };

        let mut entries = self.entries.lock().map_err(|_| CacheError::LockPoisoned)?;
        entries.insert(name.to_string(), delegation);
        debug!(name, uses, %expires_at, "delegation added");
        Ok(())
    }

    /// Summaries of the live delegations, keyed by user name.
    ///
    /// Unusable entries are swept before reporting.
    pub fn get_summary(&self) -> BTreeMap<String, DelegationSummary> {
        let now = Utc::now();
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return BTreeMap::new(),
        };
        entries.retain(|_, delegation| delegation.usable(now));

        entries
            .iter()
            .map(|(name, delegation)| {
                let mut users: Vec<String> = delegation.users.iter().cloned().collect();
                users.sort();
                let mut labels: Vec<String> = delegation.labels.iter().cloned().collect();
                labels.sort();
                (
                    name.clone(),
                    DelegationSummary {
                        uses_remaining: delegation.uses_remaining,
                        expires_at: delegation.expires_at,
                        users,
                        labels,
                    },
                )
            })
            .collect()
    }

    /// Candidates with a live delegation permitting this requester and
    /// label set. Read-only; consumes nothing.
    pub fn usable_owners(
        &self,
        candidates: &[String],
        requester: &str,
        envelope_labels: &[String],
    ) -> Vec<String> {
        let now = Utc::now();
        let entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(_) => return Vec::new(),
        };
        candidates
            .iter()
            .filter(|name| {
                entries
                    .get(name.as_str())
                    .is_some_and(|d| d.usable(now) && d.permits(requester, envelope_labels))
            })
            .cloned()
            .collect()
    }

    /// Opens one sealed share with the owner's delegated key, consuming a
    /// use on success. Returns `None` when the entry is absent, expired,
    /// exhausted, or its policy excludes the requester or labels.
    pub fn open_delegated_share(
        &self,
        owner: &str,
        sealed: &SealedShare,
        requester: &str,
        envelope_labels: &[String],
    ) -> Option<Zeroizing<Vec<u8>>> {
        self.open_delegated_share_set(&[(owner, sealed)], requester, envelope_labels)
            .map(|mut shares| shares.remove(0).0)
    }

    /// Opens every share in the set, or none of them.
    ///
    /// All policy checks and unsealing happen under one lock hold; uses
    /// are decremented only after the whole set opened, so a failed quorum
    /// attempt never consumes a delegation. The flag beside each share
    /// reports whether the owner's delegation was requester-scoped.
    pub fn open_delegated_share_set(
        &self,
        requests: &[(&str, &SealedShare)],
        requester: &str,
        envelope_labels: &[String],
    ) -> Option<Vec<(Zeroizing<Vec<u8>>, bool)>> {
        if requests.is_empty() {
            return None;
        }

        let mut distinct = HashSet::new();
        if !requests.iter().all(|(owner, _)| distinct.insert(*owner)) {
            return None;
        }

        let now = Utc::now();
        let mut entries = self.entries.lock().ok()?;

        for (owner, _) in requests {
            let delegation = entries.get(*owner)?;
            if !delegation.usable(now) || !delegation.permits(requester, envelope_labels) {
                return None;
            }
        }

        let mut opened = Vec::with_capacity(requests.len());
        for (owner, sealed) in requests {
            let delegation = entries.get(*owner)?;
            let share = open_share(sealed, &delegation.secret).ok()?;
            opened.push((share, delegation.is_scoped()));
        }

        for (owner, _) in requests {
            if let Some(delegation) = entries.get_mut(*owner) {
                delegation.uses_remaining -= 1;
                if delegation.uses_remaining == 0 {
                    entries.remove(*owner);
                    debug!(owner, "delegation exhausted");
                }
            }
        }

        Some(opened)
    }
}

// ============================================================================
// Duration parsing
// ============================================================================

/// Parses a delegation lifetime of the form `"<number><unit>"` with unit
/// `h`, `m`, or `s` (e.g. `"2h"`, `"90m"`, `"30s"`).
pub fn parse_duration(spec: &str) -> CacheResult<Duration> {
    let spec = spec.trim();
    let unit_start = spec
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| CacheError::InvalidDuration(format!("missing unit in {spec:?}")))?;
    let (number, unit) = spec.split_at(unit_start);

    if number.is_empty() {
        return Err(CacheError::InvalidDuration(format!(
            "missing value in {spec:?}"
        )));
    }
    let value: i64 = number
        .parse()
        .map_err(|_| CacheError::InvalidDuration(format!("bad value in {spec:?}")))?;

    let duration = match unit {
        "h" => Duration::try_hours(value),
        "m" => Duration::try_minutes(value),
        "s" => Duration::try_seconds(value),
        _ => {
            return Err(CacheError::InvalidDuration(format!(
                "unknown unit {unit:?} in {spec:?}"
            )))
        }
    };

    duration.ok_or_else(|| CacheError::InvalidDuration(format!("value out of range in {spec:?}")))
}
