//! Keypairs and key-share sealing.
//!
//! Uses X25519 key exchange + XSalsa20-Poly1305 for sealing key shares to
//! an owner's public key. Each share is sealed with an ephemeral keypair,
//! so possession of the owner's private key is the only way to open it.
//!
//! Also provides password-protected private key storage: the private half
//! of a user's keypair is encrypted under an Argon2id-derived key and never
//! persisted in the clear.

use crate::cipher::{decrypt, encrypt, EncryptedData};
use crate::error::{CryptoError, CryptoResult};
use crate::key::{derive_key, KdfParams, Salt, SALT_SIZE};
use crypto_box::aead::Aead;
use crypto_box::{PublicKey, SalsaBox, SecretKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// X25519 keypair backing a vault record.
///
/// The secret key implements `ZeroizeOnDrop` (from crypto_box).
pub struct KeyPair {
    pub secret: SecretKey,
    pub public: PublicKey,
}

impl KeyPair {
    /// Generates a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        let secret = SecretKey::generate(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Returns the public key as a raw 32-byte array.
    pub fn public_bytes(&self) -> [u8; 32] {
        *self.public.as_bytes()
    }

    /// Reconstructs a keypair from raw secret key bytes.
    pub fn from_secret_bytes(bytes: [u8; 32]) -> Self {
        let secret = SecretKey::from(bytes);
        let public = secret.public_key();
        Self { secret, public }
    }
}

/// A key share sealed to an owner's X25519 public key.
///
/// The ephemeral public key is included so the owner can reconstruct the
/// shared secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealedShare {
    /// Ephemeral X25519 public key (sender side of DH).
    pub ephemeral_public_key: [u8; 32],
    /// XSalsa20 nonce (24 bytes).
    pub nonce: [u8; 24],
    /// Encrypted share (XSalsa20-Poly1305 ciphertext + Poly1305 tag).
    pub ciphertext: Vec<u8>,
}

/// Private key encrypted with a password (Argon2id -> ChaCha20-Poly1305).
///
/// Bundles the Argon2id salt with the encrypted data so the password is
/// the only input needed for decryption.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PasswordProtectedKey {
    pub salt: [u8; SALT_SIZE],
    pub encrypted: EncryptedData,
}

/// Seals a key share for an owner.
///
/// An ephemeral X25519 keypair is generated for each seal operation; the
/// sealing party retains no way to reopen the share.
pub fn seal_share(share: &[u8], owner_pk: &PublicKey) -> CryptoResult<SealedShare> {
    let ephemeral = SecretKey::generate(&mut OsRng);
    let ephemeral_pk = ephemeral.public_key();

    let salsa_box = SalsaBox::new(owner_pk, &ephemeral);

    let mut nonce_bytes = [0u8; 24];
    OsRng.fill_bytes(&mut nonce_bytes);

    let ciphertext = salsa_box
        .encrypt(crypto_box::Nonce::from_slice(&nonce_bytes), share)
        .map_err(|e| CryptoError::Encryption(format!("share seal failed: {e}")))?;

    Ok(SealedShare {
        ephemeral_public_key: *ephemeral_pk.as_bytes(),
        nonce: nonce_bytes,
        ciphertext,
    })
}

/// Opens a sealed key share using the owner's secret key.
///
/// The returned share is zeroed when dropped.
pub fn open_share(sealed: &SealedShare, owner_sk: &SecretKey) -> CryptoResult<Zeroizing<Vec<u8>>> {
    let ephemeral_pk = PublicKey::from(sealed.ephemeral_public_key);
    let salsa_box = SalsaBox::new(&ephemeral_pk, owner_sk);

    salsa_box
        .decrypt(
            crypto_box::Nonce::from_slice(&sealed.nonce),
            sealed.ciphertext.as_ref(),
        )
        .map(Zeroizing::new)
        .map_err(|_| {
            CryptoError::Decryption("share open failed (wrong key or tampered data)".to_string())
        })
}

/// Encrypts a private key with a password using Argon2id -> ChaCha20-Poly1305.
///
/// The Argon2id salt here is independent of any password-verifier salt, so
/// the wrapping key and the verifier are domain-separated derivations.
pub fn protect_private_key(sk: &SecretKey, password: &str) -> CryptoResult<PasswordProtectedKey> {
    let salt = Salt::random();
    let derived = derive_key(password, &salt, &KdfParams::default())?;
    let secret_bytes = Zeroizing::new(sk.to_bytes());
    let encrypted = encrypt(&derived, secret_bytes.as_ref())?;

    Ok(PasswordProtectedKey {
        salt: *salt.as_bytes(),
        encrypted,
    })
}

/// Decrypts a password-protected private key.
pub fn recover_private_key(
    protected: &PasswordProtectedKey,
    password: &str,
) -> CryptoResult<SecretKey> {
    let salt = Salt::from_bytes(protected.salt);
    let derived = derive_key(password, &salt, &KdfParams::default())?;
    let plaintext = decrypt(&derived, &protected.encrypted)?;

    if plaintext.len() != 32 {
        return Err(CryptoError::InvalidKeyLength {
            expected: 32,
            actual: plaintext.len(),
        });
    }

    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&plaintext);
    Ok(SecretKey::from(bytes))
}
