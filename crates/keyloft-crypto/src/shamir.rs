//! Shamir secret sharing over GF(256).
//!
//! The field is GF(2^8) with the AES reducing polynomial 0x1b. Each secret
//! byte is shared independently: the byte becomes the constant term of a
//! random degree-(k-1) polynomial, and share `i` holds the polynomial
//! evaluated at x = i. Any k shares reconstruct the secret by Lagrange
//! interpolation at x = 0.
//!
//! Fewer than k shares reconstruct a DIFFERENT value with no way to detect
//! it; the threshold is not recorded in the shares. That is intrinsic to
//! the scheme, so callers who want detection must track k out of band.

use std::fmt;

use base64ct::{Base64UrlUnpadded, Encoding};
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::rand::RandomSource;

/// Minimum reconstruction threshold accepted by [`split`].
pub const MIN_THRESHOLD: u8 = 2;

/// Prefix of the textual share encoding.
const SHARE_PREFIX: &str = "keyloft-share:v1:";

/// One share of a split secret: a point on the sharing polynomial.
pub struct Share {
    /// Evaluation point, 1..=n. Zero is the secret itself and never issued.
    pub index: u8,
    pub value: Vec<u8>,
}

impl Clone for Share {
    fn clone(&self) -> Self {
        Self {
            index: self.index,
            value: self.value.clone(),
        }
    }
}

impl Drop for Share {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

impl fmt::Debug for Share {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Share {{ index: {}, value: [REDACTED] }}", self.index)
    }
}

// ============================================================================
// GF(256) arithmetic
// ============================================================================

fn gf_mul(mut a: u8, mut b: u8) -> u8 {
    let mut p = 0u8;
    for _ in 0..8 {
        if (b & 1) == 1 {
            p ^= a;
        }
        let hi = a & 0x80;
        a <<= 1;
        if hi != 0 {
            a ^= 0x1b;
        }
        b >>= 1;
    }
    p
}

fn gf_pow(mut a: u8, mut e: u8) -> u8 {
    let mut r = 1u8;
    while e > 0 {
        if e & 1 == 1 {
            r = gf_mul(r, a);
        }
        a = gf_mul(a, a);
        e >>= 1;
    }
    r
}

/// Multiplicative inverse via a^254. Inputs come from distinct non-zero
/// share indices, so zero never reaches this in practice (and maps to zero
/// if it does).
fn gf_inv(a: u8) -> u8 {
    gf_pow(a, 254)
}

// ============================================================================
// Split / reconstruct
// ============================================================================

/// Split a secret into `share_count` shares, any `threshold` of which
/// reconstruct it.
pub fn split(
    secret: &[u8],
    share_count: u8,
    threshold: u8,
    rng: &dyn RandomSource,
) -> Result<Vec<Share>, CryptoError> {
    if secret.is_empty() {
        return Err(CryptoError::EmptySecret);
    }
    if threshold < MIN_THRESHOLD {
        return Err(CryptoError::ThresholdTooSmall {
            min: MIN_THRESHOLD,
            got: threshold,
        });
    }
    if threshold > share_count {
        return Err(CryptoError::ThresholdExceedsShares {
            threshold,
            count: share_count,
        });
    }

    let mut shares: Vec<Share> = (1..=share_count)
        .map(|index| Share {
            index,
            value: vec![0u8; secret.len()],
        })
        .collect();

    // One polynomial per secret byte; the coefficient buffer is reused and
    // wiped before returning on every path.
    let mut coeffs = vec![0u8; threshold as usize];
    for (byte_index, &secret_byte) in secret.iter().enumerate() {
        coeffs[0] = secret_byte;
        if let Err(e) = rng.fill(&mut coeffs[1..]) {
            coeffs.zeroize();
            return Err(e);
        }
        for share in shares.iter_mut() {
            let x = share.index;
            let mut acc = 0u8;
            let mut x_pow = 1u8;
            for &coeff in coeffs.iter() {
                acc ^= gf_mul(coeff, x_pow);
                x_pow = gf_mul(x_pow, x);
            }
            share.value[byte_index] = acc;
        }
    }
    coeffs.zeroize();

    Ok(shares)
}

/// Reconstruct a secret from shares via Lagrange interpolation at x = 0.
///
/// At least the original threshold must be supplied; fewer (but still >= 2)
/// yield a different value silently.
pub fn reconstruct(shares: &[Share]) -> Result<Vec<u8>, CryptoError> {
    if shares.len() < MIN_THRESHOLD as usize {
        return Err(CryptoError::NotEnoughShares {
            min: MIN_THRESHOLD as usize,
            got: shares.len(),
        });
    }

    let secret_len = shares[0].value.len();
    let mut seen = [false; 256];
    for share in shares {
        if share.index == 0 {
            return Err(CryptoError::ZeroShareIndex);
        }
        if seen[share.index as usize] {
            return Err(CryptoError::DuplicateShareIndex(share.index));
        }
        seen[share.index as usize] = true;
        if share.value.len() != secret_len {
            return Err(CryptoError::ShareLengthMismatch {
                expected: secret_len,
                got: share.value.len(),
            });
        }
    }

    let mut secret = vec![0u8; secret_len];
    for (byte_index, secret_byte) in secret.iter_mut().enumerate() {
        let mut acc = 0u8;
        for (i, share) in shares.iter().enumerate() {
            // Lagrange basis polynomial for this share, evaluated at 0.
            let mut numerator = 1u8;
            let mut denominator = 1u8;
            for (j, other) in shares.iter().enumerate() {
                if i == j {
                    continue;
                }
                numerator = gf_mul(numerator, other.index);
                denominator = gf_mul(denominator, other.index ^ share.index);
            }
            let basis = gf_mul(numerator, gf_inv(denominator));
            acc ^= gf_mul(share.value[byte_index], basis);
        }
        *secret_byte = acc;
    }
    Ok(secret)
}

// ============================================================================
// Text encoding
// ============================================================================

/// Encode a share for out-of-band storage: `keyloft-share:v1:<index>:<value>`.
pub fn share_to_string(share: &Share) -> String {
    format!(
        "{}{}:{}",
        SHARE_PREFIX,
        share.index,
        Base64UrlUnpadded::encode_string(&share.value)
    )
}

/// Parse a share encoded by [`share_to_string`].
pub fn share_from_string(encoded: &str) -> Result<Share, CryptoError> {
    let rest = encoded
        .strip_prefix(SHARE_PREFIX)
        .ok_or_else(|| CryptoError::MalformedShare("missing keyloft-share:v1 prefix".into()))?;
    let (index_text, value_text) = rest
        .split_once(':')
        .ok_or_else(|| CryptoError::MalformedShare("missing index separator".into()))?;
    let index: u8 = index_text
        .parse()
        .map_err(|_| CryptoError::MalformedShare(format!("invalid index {:?}", index_text)))?;
    if index == 0 {
        return Err(CryptoError::ZeroShareIndex);
    }
    let value = Base64UrlUnpadded::decode_vec(value_text)
        .map_err(|e| CryptoError::MalformedShare(format!("invalid value encoding: {}", e)))?;
    if value.is_empty() {
        return Err(CryptoError::MalformedShare("empty share value".into()));
    }
    Ok(Share { index, value })
}
