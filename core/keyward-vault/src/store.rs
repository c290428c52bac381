//! On-disk vault persistence.
//!
//! The whole record table lives in one JSON file, replaced atomically on
//! every mutation: serialize, write to a sibling temp file, fsync, rename.
//! A failed write leaves the previous file intact.

use crate::{Record, VaultError, VaultResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Current on-disk format version.
pub const VAULT_FORMAT_VERSION: u32 = 1;

#[derive(Serialize)]
struct VaultFileRef<'a> {
    version: u32,
    records: &'a BTreeMap<String, Record>,
}

#[derive(Deserialize)]
struct VaultFile {
    version: u32,
    records: BTreeMap<String, Record>,
}

/// Loads the record table from `path`, or an empty table if the file does
/// not exist yet.
pub fn load(path: &Path) -> VaultResult<BTreeMap<String, Record>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(BTreeMap::new());
        }
        Err(err) => return Err(VaultError::Storage(err.to_string())),
    };

    let file: VaultFile =
        serde_json::from_slice(&bytes).map_err(|err| VaultError::Storage(err.to_string()))?;

    if file.version != VAULT_FORMAT_VERSION {
        return Err(VaultError::Storage(format!(
            "unsupported vault format version {}",
            file.version
        )));
    }

    Ok(file.records)
}

/// Atomically replaces the vault file with the given record table.
pub fn persist(path: &Path, records: &BTreeMap<String, Record>) -> VaultResult<()> {
    let file = VaultFileRef {
        version: VAULT_FORMAT_VERSION,
        records,
    };
    let data = serde_json::to_vec(&file).map_err(|err| VaultError::Storage(err.to_string()))?;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| VaultError::Storage(err.to_string()))?;
        }
    }

    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(".tmp");
    let tmp_path = std::path::PathBuf::from(tmp_path);

    let mut tmp = fs::File::create(&tmp_path).map_err(|err| VaultError::Storage(err.to_string()))?;
    tmp.write_all(&data)
        .and_then(|_| tmp.sync_all())
        .map_err(|err| VaultError::Storage(err.to_string()))?;
    drop(tmp);

    fs::rename(&tmp_path, path).map_err(|err| VaultError::Storage(err.to_string()))
}
