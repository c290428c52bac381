use keyward_vault::{RecordType, Vault, VaultError};
use tempfile::TempDir;

fn vault_in(dir: &TempDir) -> Vault {
    Vault::init_from(dir.path().join("vault.json")).unwrap()
}

#[test]
fn starts_empty_when_file_missing() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    assert_eq!(vault.num_records(), 0);
    assert!(vault.get_record("alice").is_none());
}

#[test]
fn add_record_and_fetch() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);

    let record = vault
        .add_new_record("alice", "pw-alice", true, RecordType::default())
        .unwrap();
    assert!(record.is_admin());
    assert!(!record.is_revoked());
    assert_eq!(record.record_type(), RecordType::Curve25519);

    assert_eq!(vault.num_records(), 1);
    let fetched = vault.get_record("alice").unwrap();
    assert_eq!(fetched.fingerprint(), record.fingerprint());
}

#[test]
fn duplicate_name_rejected() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);

    vault
        .add_new_record("alice", "pw", false, RecordType::default())
        .unwrap();
    let err = vault
        .add_new_record("alice", "pw2", false, RecordType::default())
        .unwrap_err();
    assert!(matches!(err, VaultError::UserAlreadyExists(_)));
}

#[test]
fn blank_name_rejected() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    let err = vault
        .add_new_record("", "pw", false, RecordType::default())
        .unwrap_err();
    assert!(matches!(err, VaultError::BlankName));
}

#[test]
fn password_validation() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    let record = vault
        .add_new_record("alice", "pw-alice", false, RecordType::default())
        .unwrap();

    assert!(record.validate_password("pw-alice").is_ok());
    assert!(matches!(
        record.validate_password("wrong").unwrap_err(),
        VaultError::InvalidPassword
    ));
}

#[test]
fn private_key_unlocks_with_correct_password_only() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    let record = vault
        .add_new_record("alice", "pw-alice", false, RecordType::default())
        .unwrap();

    let secret = record.unlock_private_key("pw-alice").unwrap();
    assert_eq!(*secret.public_key().as_bytes(), *record.public_key().as_bytes());

    assert!(record.unlock_private_key("wrong").is_err());
}

#[test]
fn persists_across_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.json");

    {
        let vault = Vault::init_from(&path).unwrap();
        vault
            .add_new_record("alice", "pw-alice", true, RecordType::default())
            .unwrap();
        vault
            .add_new_record("bob", "pw-bob", false, RecordType::default())
            .unwrap();
    }

    let vault = Vault::init_from(&path).unwrap();
    assert_eq!(vault.num_records(), 2);

    let alice = vault.get_record("alice").unwrap();
    assert!(alice.is_admin());
    let secret = alice.unlock_private_key("pw-alice").unwrap();
    assert_eq!(*secret.public_key().as_bytes(), *alice.public_key().as_bytes());
}

#[test]
fn change_password_rewraps_key() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.json");
    let vault = Vault::init_from(&path).unwrap();
    let original = vault
        .add_new_record("alice", "old-pw", false, RecordType::default())
        .unwrap();

    vault.change_password("alice", "old-pw", "new-pw").unwrap();

    let record = vault.get_record("alice").unwrap();
    assert!(record.unlock_private_key("old-pw").is_err());
    let secret = record.unlock_private_key("new-pw").unwrap();
    // Same keypair survives the password change
    assert_eq!(*secret.public_key().as_bytes(), *original.public_key().as_bytes());

    // And the change persists
    let reloaded = Vault::init_from(&path).unwrap();
    let record = reloaded.get_record("alice").unwrap();
    assert!(record.unlock_private_key("new-pw").is_ok());
}

#[test]
fn change_password_requires_old_password() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault
        .add_new_record("alice", "old-pw", false, RecordType::default())
        .unwrap();

    let err = vault.change_password("alice", "wrong", "new-pw").unwrap_err();
    assert!(matches!(err, VaultError::InvalidPassword));
    assert!(vault
        .get_record("alice")
        .unwrap()
        .validate_password("old-pw")
        .is_ok());
}

#[test]
fn delete_revoke_and_admin_transitions() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault
        .add_new_record("alice", "pw", true, RecordType::default())
        .unwrap();
    vault
        .add_new_record("bob", "pw", false, RecordType::default())
        .unwrap();

    vault.revoke_record("bob").unwrap();
    assert!(vault.get_record("bob").unwrap().is_revoked());

    vault.make_admin("bob").unwrap();
    assert!(vault.get_record("bob").unwrap().is_admin());

    vault.delete_record("bob").unwrap();
    assert!(vault.get_record("bob").is_none());
    assert_eq!(vault.num_records(), 1);

    assert!(matches!(
        vault.delete_record("bob").unwrap_err(),
        VaultError::UserNotFound(_)
    ));
    assert!(matches!(
        vault.revoke_record("carol").unwrap_err(),
        VaultError::UserNotFound(_)
    ));
}

#[test]
fn summary_exposes_flags_and_fingerprint_only() {
    let dir = TempDir::new().unwrap();
    let vault = vault_in(&dir);
    vault
        .add_new_record("alice", "pw", true, RecordType::default())
        .unwrap();
    vault
        .add_new_record("bob", "pw", false, RecordType::default())
        .unwrap();
    vault.revoke_record("bob").unwrap();

    let summary = vault.get_summary();
    assert_eq!(summary.len(), 2);

    let alice = &summary["alice"];
    assert!(alice.admin);
    assert!(!alice.revoked);
    assert_eq!(alice.fingerprint.len(), 64);

    let bob = &summary["bob"];
    assert!(!bob.admin);
    assert!(bob.revoked);

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"Admin\""));
    assert!(json.contains("\"Type\""));
    assert!(json.contains("\"Revoked\""));
    // No password or key material in the serialized view
    assert!(!json.contains("password"));
    assert!(!json.contains("protected_key"));
}

#[test]
fn vault_file_is_versioned() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("vault.json");
    let vault = Vault::init_from(&path).unwrap();
    vault
        .add_new_record("alice", "pw", true, RecordType::default())
        .unwrap();

    let raw = std::fs::read_to_string(&path).unwrap();
    assert!(raw.contains("\"version\":1"));

    // An unknown version must be refused, not silently migrated.
    let bumped = raw.replace("\"version\":1", "\"version\":99");
    std::fs::write(&path, bumped).unwrap();
    assert!(Vault::init_from(&path).is_err());
}
