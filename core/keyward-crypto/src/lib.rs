//! Cryptographic primitives for keyward.
//!
//! Provides the building blocks for delegated threshold decryption:
//! - Argon2id for key derivation from passwords
//! - ChaCha20-Poly1305 for authenticated encryption
//! - X25519 keypairs with anonymous share sealing
//! - GF(256) secret sharing for quorum reconstruction
//! - Secure key management with zeroization
//!
//! # Architecture
//!
//! Every user owns an X25519 keypair. The private half only ever exists in
//! two forms: encrypted under a key derived from the user's password
//! ([`PasswordProtectedKey`]), or held transiently in memory after the user
//! delegates it. Data-encryption keys are split into fragments and each
//! fragment is sealed to an owner's public key ([`SealedShare`]), so
//! reassembly requires the cooperation of a quorum of delegated owners.

mod cipher;
pub mod envelope;
mod error;
mod key;
pub mod shamir;

pub use cipher::{decrypt, encrypt, EncryptedData, NONCE_SIZE, TAG_SIZE};
pub use envelope::{
    open_share, protect_private_key, recover_private_key, seal_share, KeyPair,
    PasswordProtectedKey, SealedShare,
};
pub use error::{CryptoError, CryptoResult};
pub use key::{derive_key, generate_random_key, DerivedKey, KdfParams, Salt, KEY_SIZE, SALT_SIZE};
pub use shamir::{combine_shares, split_secret, CombineError, Share, SplitError};
