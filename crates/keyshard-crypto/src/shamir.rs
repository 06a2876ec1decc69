//! Byte-wise Shamir secret sharing over GF(257).
//!
//! The field must hold every byte value 0–255 as a distinct element, so the
//! modulus is the smallest prime above 255. The price is that share points
//! need two bytes per coordinate on the wire; the payoff is plain prime-field
//! Lagrange arithmetic.
//!
//! Wire form of a share: `base64( JSON [ {"x":..,"y":..}, .. ] )`, one point
//! per secret byte, ordered by byte position.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::{rngs::OsRng, Rng};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use keyshard_core::error::{CustodyError, CustodyResult};

/// GF(257) arithmetic on u32 residues.
mod gf257 {
    /// Field modulus: smallest prime exceeding the byte range.
    pub const P: u32 = 257;

    pub fn mul(a: u32, b: u32) -> u32 {
        (a % P) * (b % P) % P
    }

    /// Multiplicative inverse via the extended Euclidean algorithm.
    ///
    /// Returns a value in `[0, P-1]`; input 0 (no inverse) maps to 0.
    pub fn inv(a: u32) -> u32 {
        if a % P == 0 {
            return 0;
        }
        let (mut t, mut new_t) = (0i64, 1i64);
        let (mut r, mut new_r) = (P as i64, (a % P) as i64);
        while new_r != 0 {
            let quotient = r / new_r;
            (t, new_t) = (new_t, t - quotient * new_t);
            (r, new_r) = (new_r, r - quotient * new_r);
        }
        ((t % P as i64 + P as i64) % P as i64) as u32
    }

    /// Evaluate a polynomial at `x` using Horner's method. Coefficients are
    /// `[a0, a1, ..]` with `a0` the constant term (the secret byte).
    pub fn eval_poly(coeffs: &[u32], x: u32) -> u32 {
        let mut acc = 0u32;
        for &coeff in coeffs.iter().rev() {
            acc = (mul(acc, x) + coeff) % P;
        }
        acc
    }
}

/// One evaluation point `(x, p(x))`. Coordinates are field elements, so `y`
/// may be 256 and does not fit a byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct SharePoint {
    pub x: u16,
    pub y: u16,
}

/// One share of a split secret: the ordered point list for a single
/// x-coordinate, one point per secret byte. Zeroized on drop.
#[derive(Debug, Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Share {
    points: Vec<SharePoint>,
}

impl Share {
    pub fn points(&self) -> &[SharePoint] {
        &self.points
    }

    /// Serialize to the wire form: base64 of the JSON point list.
    pub fn encode(&self) -> String {
        // Vec<SharePoint> → JSON cannot fail
        let json = serde_json::to_vec(&self.points).expect("point list serializes");
        BASE64.encode(json)
    }

    /// Parse the wire form, rejecting anything that is not a well-formed
    /// point list with in-field coordinates.
    pub fn decode(wire: &str) -> CustodyResult<Self> {
        let raw = BASE64
            .decode(wire.trim())
            .map_err(|e| CustodyError::InvalidShardFormat(format!("base64: {e}")))?;
        let points: Vec<SharePoint> = serde_json::from_slice(&raw)
            .map_err(|e| CustodyError::InvalidShardFormat(format!("point list: {e}")))?;
        for point in &points {
            if point.x == 0 || u32::from(point.x) >= gf257::P {
                return Err(CustodyError::InvalidShardFormat(format!(
                    "x-coordinate {} outside [1, 256]",
                    point.x
                )));
            }
            if u32::from(point.y) >= gf257::P {
                return Err(CustodyError::InvalidShardFormat(format!(
                    "y-coordinate {} outside the field",
                    point.y
                )));
            }
        }
        Ok(Self { points })
    }
}

fn validate_params(total_shares: u8, threshold: u8) -> CustodyResult<()> {
    if threshold < 2 {
        return Err(CustodyError::Configuration(
            "threshold must be at least 2".to_string(),
        ));
    }
    if total_shares < threshold {
        return Err(CustodyError::Configuration(format!(
            "total_shares {total_shares} is below threshold {threshold}"
        )));
    }
    if total_shares > 10 {
        return Err(CustodyError::Configuration(format!(
            "total_shares {total_shares} exceeds the maximum of 10"
        )));
    }
    Ok(())
}

/// Split `secret` into `total_shares` shares, any `threshold` of which
/// recover it.
///
/// Per secret byte: a fresh random polynomial of degree `threshold - 1`
/// with the byte as constant term, evaluated at x = 1..=total_shares.
/// An empty secret yields shares with empty point lists.
///
/// # Errors
///
/// `Configuration` if the parameters violate `2 <= threshold <=
/// total_shares <= 10`.
pub fn split(secret: &[u8], total_shares: u8, threshold: u8) -> CustodyResult<Vec<Share>> {
    validate_params(total_shares, threshold)?;

    let n = total_shares as usize;
    let mut shares: Vec<Vec<SharePoint>> = vec![Vec::with_capacity(secret.len()); n];
    let mut coeffs = vec![0u32; threshold as usize];
    let mut rng = OsRng;

    for &byte in secret {
        coeffs[0] = u32::from(byte);
        for coeff in coeffs.iter_mut().skip(1) {
            *coeff = rng.gen_range(0..gf257::P);
        }

        for (i, share) in shares.iter_mut().enumerate() {
            let x = (i + 1) as u32;
            let y = gf257::eval_poly(&coeffs, x);
            share.push(SharePoint {
                x: x as u16,
                y: y as u16,
            });
        }
    }
    coeffs.zeroize();

    Ok(shares.into_iter().map(|points| Share { points }).collect())
}

/// Recover the secret from at least two shares via Lagrange interpolation
/// at x = 0, one byte position at a time.
///
/// All-empty point lists reproduce the empty secret without interpolation.
///
/// # Errors
///
/// `InvalidShardFormat` for fewer than two shares, ragged point lists,
/// duplicate or zero x-coordinates, or interpolation values outside the
/// byte range (inconsistent shares) — never a silently wrong secret.
pub fn recover(shares: &[Share]) -> CustodyResult<Vec<u8>> {
    if shares.len() < 2 {
        return Err(CustodyError::InvalidShardFormat(format!(
            "need at least 2 shares to recover, got {}",
            shares.len()
        )));
    }

    let len = shares[0].points.len();
    for share in shares {
        if share.points.len() != len {
            return Err(CustodyError::InvalidShardFormat(format!(
                "share length mismatch: {} vs {len}",
                share.points.len()
            )));
        }
    }
    if len == 0 {
        return Ok(Vec::new());
    }

    // Every point in a share sits on one x-coordinate, and x-coordinates
    // must be distinct across shares.
    let xs: Vec<u32> = shares.iter().map(|s| u32::from(s.points[0].x)).collect();
    for share in shares {
        let x = share.points[0].x;
        if share.points.iter().any(|p| p.x != x) {
            return Err(CustodyError::InvalidShardFormat(
                "inconsistent x-coordinates within a share".to_string(),
            ));
        }
    }
    let mut sorted = xs.clone();
    sorted.sort_unstable();
    for window in sorted.windows(2) {
        if window[0] == window[1] {
            return Err(CustodyError::InvalidShardFormat(format!(
                "duplicate share x-coordinate {}",
                window[0]
            )));
        }
    }

    let basis = lagrange_basis_at_zero(&xs);
    let mut secret = Vec::with_capacity(len);
    for position in 0..len {
        let mut acc = 0u32;
        for (share, &basis_coeff) in shares.iter().zip(&basis) {
            acc = (acc + gf257::mul(u32::from(share.points[position].y), basis_coeff)) % gf257::P;
        }
        let byte = u8::try_from(acc).map_err(|_| {
            CustodyError::InvalidShardFormat(format!(
                "interpolated value {acc} at position {position} is not a byte"
            ))
        })?;
        secret.push(byte);
    }
    Ok(secret)
}

/// Lagrange basis coefficients evaluated at x = 0:
/// `L_i(0) = Π_{j≠i} (0 − x_j) / (x_i − x_j)`, all mod 257.
fn lagrange_basis_at_zero(xs: &[u32]) -> Vec<u32> {
    use gf257::{inv, mul, P};

    let mut basis = Vec::with_capacity(xs.len());
    for (i, &x_i) in xs.iter().enumerate() {
        let mut numerator = 1u32;
        let mut denominator = 1u32;
        for (j, &x_j) in xs.iter().enumerate() {
            if i == j {
                continue;
            }
            numerator = mul(numerator, (P - x_j) % P);
            denominator = mul(denominator, (x_i + P - x_j) % P);
        }
        basis.push(mul(numerator, inv(denominator)));
    }
    basis
}
