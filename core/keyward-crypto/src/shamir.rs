//! Shamir secret sharing over GF(256).
//!
//! Each byte of the secret is shared independently: a random polynomial of
//! degree `threshold - 1` is sampled with the secret byte as its constant
//! term, and share `x` holds the polynomial evaluated at `x`. Combining any
//! `threshold` shares recovers the constant term by Lagrange interpolation
//! at zero; fewer shares yield bytes indistinguishable from random.
//!
//! Field arithmetic uses the AES reduction polynomial (0x11b).

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Errors from splitting a secret into shares.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SplitError {
    #[error("threshold must be at least 1")]
    ThresholdTooSmall,

    #[error("threshold {threshold} exceeds total shares {total}")]
    ThresholdExceedsTotal { threshold: u8, total: u8 },

    #[error("cannot split an empty secret")]
    EmptySecret,
}

/// Errors from combining shares.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CombineError {
    #[error("no shares provided")]
    NoShares,

    #[error("duplicate share x-coordinate {0}")]
    DuplicateShare(u8),

    #[error("share lengths are inconsistent")]
    MismatchedLengths,

    #[error("share x-coordinate must not be zero")]
    ZeroCoordinate,
}

/// One share of a split secret.
///
/// `x` is the (non-zero) evaluation point; `y` holds one polynomial
/// evaluation per secret byte. Zeroed on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    pub x: u8,
    pub y: Vec<u8>,
}

// Never expose share contents through Debug.
impl std::fmt::Debug for Share {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Share").field("x", &self.x).finish()
    }
}

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut product = 0u8;
    for _ in 0..8 {
        if b & 1 != 0 {
            product ^= a;
        }
        let carry = a & 0x80;
        a <<= 1;
        if carry != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    product
}

fn gf_pow(mut base: u8, mut exp: u8) -> u8 {
    let mut result = 1u8;
    while exp > 0 {
        if exp & 1 != 0 {
            result = gf_mul(result, base);
        }
        base = gf_mul(base, base);
        exp >>= 1;
    }
    result
}

// Multiplicative inverse via a^254; caller guarantees a != 0.
fn gf_inv(a: u8) -> u8 {
    gf_pow(a, 254)
}

// Evaluates the polynomial with the given coefficients (constant term
// first) at x, by Horner's rule.
fn poly_eval(coefficients: &[u8], x: u8) -> u8 {
    let mut acc = 0u8;
    for &c in coefficients.iter().rev() {
        acc = gf_mul(acc, x) ^ c;
    }
    acc
}

/// Splits `secret` into `total` shares such that any `threshold` of them
/// reconstruct it.
pub fn split_secret(secret: &[u8], total: u8, threshold: u8) -> Result<Vec<Share>, SplitError> {
    if threshold == 0 {
        return Err(SplitError::ThresholdTooSmall);
    }
    if threshold > total {
        return Err(SplitError::ThresholdExceedsTotal { threshold, total });
    }
    if secret.is_empty() {
        return Err(SplitError::EmptySecret);
    }

    let mut shares: Vec<Share> = (1..=total)
        .map(|x| Share {
            x,
            y: Vec::with_capacity(secret.len()),
        })
        .collect();

    let mut coefficients = Zeroizing::new(vec![0u8; threshold as usize]);
    for &secret_byte in secret {
        coefficients[0] = secret_byte;
        OsRng.fill_bytes(&mut coefficients[1..]);

        for share in &mut shares {
            share.y.push(poly_eval(&coefficients, share.x));
        }
    }

    Ok(shares)
}

/// Recombines shares by Lagrange interpolation at zero.
///
/// Succeeds for any set of distinct shares; whether the output equals the
/// original secret depends on meeting the split threshold. The result is
/// zeroed when dropped.
pub fn combine_shares(shares: &[Share]) -> Result<Zeroizing<Vec<u8>>, CombineError> {
    let first = shares.first().ok_or(CombineError::NoShares)?;
    let len = first.y.len();

    let mut seen = [false; 256];
    for share in shares {
        if share.x == 0 {
            return Err(CombineError::ZeroCoordinate);
        }
        if seen[share.x as usize] {
            return Err(CombineError::DuplicateShare(share.x));
        }
        seen[share.x as usize] = true;
        if share.y.len() != len {
            return Err(CombineError::MismatchedLengths);
        }
    }

    // Lagrange basis at zero: l_i = prod_{j != i} x_j / (x_j - x_i).
    // Subtraction is XOR in GF(256).
    let mut basis = Vec::with_capacity(shares.len());
    for (i, share_i) in shares.iter().enumerate() {
        let mut l = 1u8;
        for (j, share_j) in shares.iter().enumerate() {
            if i != j {
                l = gf_mul(l, gf_mul(share_j.x, gf_inv(share_j.x ^ share_i.x)));
            }
        }
        basis.push(l);
    }

    let mut secret = Zeroizing::new(vec![0u8; len]);
    for byte_index in 0..len {
        let mut acc = 0u8;
        for (share, &l) in shares.iter().zip(&basis) {
            acc ^= gf_mul(share.y[byte_index], l);
        }
        secret[byte_index] = acc;
    }

    Ok(secret)
}
