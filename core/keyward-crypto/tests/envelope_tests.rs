use keyward_crypto::{
    open_share, protect_private_key, recover_private_key, seal_share, KeyPair,
};

#[test]
fn keypair_generation_produces_valid_keys() {
    let kp = KeyPair::generate();
    assert_eq!(kp.public_bytes().len(), 32);
    // Public and secret keys must differ
    assert_ne!(kp.public_bytes(), kp.secret.to_bytes());
}

#[test]
fn keypair_roundtrip_from_secret_bytes() {
    let kp1 = KeyPair::generate();
    let kp2 = KeyPair::from_secret_bytes(kp1.secret.to_bytes());
    assert_eq!(kp1.public_bytes(), kp2.public_bytes());
    assert_eq!(kp1.secret.to_bytes(), kp2.secret.to_bytes());
}

#[test]
fn seal_open_share_roundtrip() {
    let owner = KeyPair::generate();
    let share = b"this-is-a-32-byte-data-encr-key!";

    let sealed = seal_share(share, &owner.public).unwrap();
    let recovered = open_share(&sealed, &owner.secret).unwrap();

    assert_eq!(recovered.as_slice(), share);
}

#[test]
fn wrong_owner_key_fails_to_open() {
    let owner = KeyPair::generate();
    let wrong = KeyPair::generate();
    let share = b"secret-share-material-1234567890";

    let sealed = seal_share(share, &owner.public).unwrap();
    assert!(open_share(&sealed, &wrong.secret).is_err());
}

#[test]
fn tampered_share_ciphertext_fails() {
    let owner = KeyPair::generate();
    let mut sealed = seal_share(b"secret-share-material", &owner.public).unwrap();
    if let Some(byte) = sealed.ciphertext.first_mut() {
        *byte ^= 0xFF;
    }
    assert!(open_share(&sealed, &owner.secret).is_err());
}

#[test]
fn tampered_share_nonce_fails() {
    let owner = KeyPair::generate();
    let mut sealed = seal_share(b"secret-share-material", &owner.public).unwrap();
    sealed.nonce[0] ^= 0xFF;
    assert!(open_share(&sealed, &owner.secret).is_err());
}

#[test]
fn each_seal_produces_different_ciphertext() {
    let owner = KeyPair::generate();
    let share = b"same-share-every-time-0123456789";

    let sealed1 = seal_share(share, &owner.public).unwrap();
    let sealed2 = seal_share(share, &owner.public).unwrap();

    // Different ephemeral keys and nonces
    assert_ne!(sealed1.ephemeral_public_key, sealed2.ephemeral_public_key);
    assert_ne!(sealed1.nonce, sealed2.nonce);
    assert_ne!(sealed1.ciphertext, sealed2.ciphertext);

    // Both open to the same share
    assert_eq!(open_share(&sealed1, &owner.secret).unwrap().as_slice(), share);
    assert_eq!(open_share(&sealed2, &owner.secret).unwrap().as_slice(), share);
}

#[test]
fn password_protect_recover_roundtrip() {
    let kp = KeyPair::generate();
    let password = "correct-horse-battery-staple";

    let protected = protect_private_key(&kp.secret, password).unwrap();
    let recovered = recover_private_key(&protected, password).unwrap();

    assert_eq!(recovered.to_bytes(), kp.secret.to_bytes());
}

#[test]
fn wrong_password_fails() {
    let kp = KeyPair::generate();
    let protected = protect_private_key(&kp.secret, "correct-password").unwrap();

    assert!(recover_private_key(&protected, "wrong-password").is_err());
}

#[test]
fn sealed_share_serialization_roundtrip() {
    let owner = KeyPair::generate();
    let share = b"serialize-test-share-material-ok";

    let sealed = seal_share(share, &owner.public).unwrap();
    let json = serde_json::to_string(&sealed).unwrap();
    let deserialized: keyward_crypto::SealedShare = serde_json::from_str(&json).unwrap();

    assert_eq!(sealed.ephemeral_public_key, deserialized.ephemeral_public_key);
    assert_eq!(sealed.nonce, deserialized.nonce);
    assert_eq!(sealed.ciphertext, deserialized.ciphertext);

    let recovered = open_share(&deserialized, &owner.secret).unwrap();
    assert_eq!(recovered.as_slice(), share);
}

#[test]
fn protected_key_serialization_roundtrip() {
    let kp = KeyPair::generate();
    let password = "serialize-test-password";

    let protected = protect_private_key(&kp.secret, password).unwrap();
    let json = serde_json::to_string(&protected).unwrap();
    let deserialized: keyward_crypto::PasswordProtectedKey =
        serde_json::from_str(&json).unwrap();

    let recovered = recover_private_key(&deserialized, password).unwrap();
    assert_eq!(recovered.to_bytes(), kp.secret.to_bytes());
}

// Property-based tests
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn seal_open_always_roundtrips(share in proptest::collection::vec(any::<u8>(), 0..256)) {
            let owner = KeyPair::generate();
            let sealed = seal_share(&share, &owner.public).unwrap();
            let recovered = open_share(&sealed, &owner.secret).unwrap();
            prop_assert_eq!(recovered.as_slice(), share.as_slice());
        }
    }
}
