//! JSON dispatch for the keyward service.
//!
//! Each public method on [`Core`] handles the JSON command of the same
//! name: authenticate the caller against the vault, then mutate the vault,
//! mutate the key cache, or invoke the cryptor. Responses always carry a
//! `Status` field; `"ok"` is the sole success sentinel and every error
//! maps to a stable human-readable status string.
//!
//! There is no module-level state: a [`Core`] owns its vault, cache, and
//! cryptor, and tests build their own instances.

mod error;

pub use error::{CoreError, CoreResult};

use keyward_cryptor::{Cryptor, CryptorConfig};
use keyward_keycache::{DelegationSummary, KeyCache};
use keyward_vault::{Record, RecordType, Summary, Vault};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, warn};

// ============================================================================
// Configuration
// ============================================================================

/// Settings for a [`Core`] instance.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    /// Backing file for the password vault.
    pub vault_path: PathBuf,
    /// Refuse encryption requests with a quorum below two.
    pub require_two_person: bool,
    /// Ceiling on delegation lifetime.
    pub max_delegation: chrono::Duration,
}

impl CoreConfig {
    pub fn new(vault_path: impl Into<PathBuf>) -> Self {
        CoreConfig {
            vault_path: vault_path.into(),
            require_two_person: false,
            max_delegation: chrono::Duration::hours(
                keyward_keycache::DEFAULT_MAX_DELEGATION_HOURS,
            ),
        }
    }
}

// ============================================================================
// Request / response DTOs
// ============================================================================

// Each of these structures maps the JSON expected for the correspondingly
// named command; field names are a stable contract with the front-end.

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateRequest {
    name: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SummaryRequest {
    name: String,
    password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DelegateRequest {
    name: String,
    password: String,

    uses: u32,
    time: String,
    #[serde(default)]
    users: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct PasswordRequest {
    name: String,
    password: String,

    new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EncryptRequest {
    name: String,
    password: String,

    minimum: usize,
    owners: Vec<String>,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,

    #[serde(default)]
    labels: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DecryptRequest {
    name: String,
    password: String,

    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModifyRequest {
    name: String,
    password: String,

    to_modify: String,
    command: String,
}

/// Generic command response.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseData {
    pub status: String,
    #[serde(
        default,
        with = "base64_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub response: Option<Vec<u8>>,
}

/// Response to a summary request.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SummaryData {
    pub status: String,
    pub live: BTreeMap<String, DelegationSummary>,
    pub all: BTreeMap<String, Summary>,
}

/// Payload nested inside a successful decrypt response.
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DecryptWithDelegates {
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    pub secure: bool,
    pub delegates: Vec<String>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}

mod base64_opt {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map(Some)
                .map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

// ============================================================================
// Core
// ============================================================================

/// The dispatch context: vault, key cache, and cryptor.
pub struct Core {
    vault: Arc<Vault>,
    cache: Arc<KeyCache>,
    cryptor: Cryptor,
}

impl Core {
    /// Loads (or creates) the vault file and wires up the components.
    pub fn init(config: CoreConfig) -> CoreResult<Self> {
        let vault = Arc::new(Vault::init_from(&config.vault_path).map_err(|err| {
            error!(%err, path = %config.vault_path.display(), "failed to load password vault");
            CoreError::Persistence
        })?);
        let cache = Arc::new(KeyCache::with_max_duration(config.max_delegation));
        let cryptor = Cryptor::with_config(
            vault.clone(),
            cache.clone(),
            CryptorConfig {
                require_two_person: config.require_two_person,
                ..CryptorConfig::default()
            },
        );

        Ok(Core {
            vault,
            cache,
            cryptor,
        })
    }

    /// Processes a create request.
    pub fn create(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_create(json_in) {
            Ok(()) => status_ok(),
            Err(err) => status_err(&err),
        }
    }

    /// Processes a summary request.
    pub fn summary(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_summary(json_in) {
            Ok(bytes) => bytes,
            Err(err) => status_err(&err),
        }
    }

    /// Processes a delegation request.
    pub fn delegate(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_delegate(json_in) {
            Ok(()) => status_ok(),
            Err(err) => status_err(&err),
        }
    }

    /// Processes a password change request.
    pub fn password(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_password(json_in) {
            Ok(()) => status_ok(),
            Err(err) => status_err(&err),
        }
    }

    /// Processes an encrypt request.
    pub fn encrypt(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_encrypt(json_in) {
            Ok(envelope) => render(&ResponseData {
                status: "ok".to_string(),
                response: Some(envelope),
            }),
            Err(err) => status_err(&err),
        }
    }

    /// Processes a decrypt request.
    pub fn decrypt(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_decrypt(json_in) {
            Ok(inner) => render(&ResponseData {
                status: "ok".to_string(),
                response: Some(inner),
            }),
            Err(err) => status_err(&err),
        }
    }

    /// Processes a modify request.
    pub fn modify(&self, json_in: &[u8]) -> Vec<u8> {
        match self.handle_modify(json_in) {
            Ok(()) => status_ok(),
            Err(err) => status_err(&err),
        }
    }

    fn handle_create(&self, json_in: &[u8]) -> CoreResult<()> {
        let req: CreateRequest = parse(json_in)?;

        if self.vault.num_records() != 0 {
            return Err(CoreError::VaultAlreadyInitialized);
        }
        validate_user(&req.name, &req.password)?;

        // The first record is forced admin.
        self.vault
            .add_new_record(&req.name, &req.password, true, RecordType::default())
            .inspect_err(|err| warn!(%err, name = %req.name, "error adding record"))?;
        Ok(())
    }

    fn handle_summary(&self, json_in: &[u8]) -> CoreResult<Vec<u8>> {
        self.cache.refresh();

        let req: SummaryRequest = parse(json_in)?;
        self.authenticate(&req.name, &req.password)?;

        Ok(render(&SummaryData {
            status: "ok".to_string(),
            live: self.cache.get_summary(),
            all: self.vault.get_summary(),
        }))
    }

    fn handle_delegate(&self, json_in: &[u8]) -> CoreResult<()> {
        let req: DelegateRequest = parse(json_in)?;

        if self.vault.num_records() == 0 {
            return Err(CoreError::VaultNotInitialized);
        }
        validate_user(&req.name, &req.password)?;

        // Verify the user's password, or enroll them on first delegation.
        let record = match self.vault.get_record(&req.name) {
            Some(record) => {
                record
                    .validate_password(&req.password)
                    .map_err(|_| CoreError::BadPassword)?;
                if record.is_revoked() {
                    return Err(CoreError::UserRevoked);
                }
                record
            }
            None => self
                .vault
                .add_new_record(&req.name, &req.password, false, RecordType::default())
                .inspect_err(|err| warn!(%err, name = %req.name, "error adding record"))?,
        };

        self.cache
            .add_key_from_record(
                &record,
                &req.name,
                &req.password,
                req.users,
                req.labels,
                req.uses,
                &req.time,
            )
            .inspect_err(|err| warn!(%err, name = %req.name, "error adding key to cache"))?;
        Ok(())
    }

    fn handle_password(&self, json_in: &[u8]) -> CoreResult<()> {
        let req: PasswordRequest = parse(json_in)?;

        if self.vault.num_records() == 0 {
            return Err(CoreError::VaultNotInitialized);
        }
        validate_user(&req.name, &req.password)?;
        if req.new_password.is_empty() {
            return Err(CoreError::BlankPassword);
        }

        self.vault
            .change_password(&req.name, &req.password, &req.new_password)
            .inspect_err(|err| warn!(%err, name = %req.name, "error changing password"))?;
        Ok(())
    }

    fn handle_encrypt(&self, json_in: &[u8]) -> CoreResult<Vec<u8>> {
        let req: EncryptRequest = parse(json_in)?;
        self.authenticate(&req.name, &req.password)?;

        let envelope = self
            .cryptor
            .encrypt(&req.data, &req.labels, &req.owners, req.minimum)
            .inspect_err(|err| warn!(%err, name = %req.name, "error encrypting"))?;
        Ok(envelope)
    }

    fn handle_decrypt(&self, json_in: &[u8]) -> CoreResult<Vec<u8>> {
        let req: DecryptRequest = parse(json_in)?;
        self.authenticate(&req.name, &req.password)?;

        let recovered = self
            .cryptor
            .decrypt(&req.data, &req.name)
            .inspect_err(|err| warn!(%err, name = %req.name, "error decrypting"))?;

        Ok(render(&DecryptWithDelegates {
            data: recovered.data,
            secure: recovered.secure,
            delegates: recovered.delegates,
        }))
    }

    fn handle_modify(&self, json_in: &[u8]) -> CoreResult<()> {
        let req: ModifyRequest = parse(json_in)?;

        self.validate_admin(&req.name, &req.password)
            .inspect_err(|err| warn!(%err, name = %req.name, "error validating admin status"))?;

        if self.vault.get_record(&req.to_modify).is_none() {
            return Err(CoreError::ModifyTargetMissing);
        }
        if req.name == req.to_modify {
            return Err(CoreError::CannotModifySelf);
        }

        match req.command.as_str() {
            "delete" => self.vault.delete_record(&req.to_modify)?,
            "revoke" => self.vault.revoke_record(&req.to_modify)?,
            "admin" => self.vault.make_admin(&req.to_modify)?,
            _ => return Err(CoreError::UnknownCommand),
        }
        Ok(())
    }

    /// Checks the (name, password) pair against an existing record.
    fn authenticate(&self, name: &str, password: &str) -> CoreResult<Record> {
        if self.vault.num_records() == 0 {
            return Err(CoreError::VaultNotInitialized);
        }
        validate_user(name, password)?;

        let record = self.vault.get_record(name).ok_or(CoreError::UserNotFound)?;
        record
            .validate_password(password)
            .map_err(|_| CoreError::BadPassword)?;
        Ok(record)
    }

    /// Like [`Core::authenticate`], additionally requiring the admin flag.
    fn validate_admin(&self, name: &str, password: &str) -> CoreResult<Record> {
        let record = self.authenticate(name, password)?;
        if !record.is_admin() {
            return Err(CoreError::NotAdmin);
        }
        Ok(record)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_user(name: &str, password: &str) -> CoreResult<()> {
    if name.is_empty() {
        return Err(CoreError::BlankName);
    }
    if password.is_empty() {
        return Err(CoreError::BlankPassword);
    }
    Ok(())
}

fn parse<'a, T: Deserialize<'a>>(json_in: &'a [u8]) -> CoreResult<T> {
    serde_json::from_slice(json_in).map_err(|err| CoreError::InvalidRequest(err.to_string()))
}

fn render(resp: &impl Serialize) -> Vec<u8> {
    serde_json::to_vec(resp).unwrap_or_else(|err| {
        error!(%err, "failed to serialize response");
        br#"{"Status":"Internal error"}"#.to_vec()
    })
}

fn status_ok() -> Vec<u8> {
    render(&ResponseData {
        status: "ok".to_string(),
        response: None,
    })
}

fn status_err(err: &CoreError) -> Vec<u8> {
    render(&ResponseData {
        status: err.to_string(),
        response: None,
    })
}
