//! Shamir sharing primitives for the threshold decryption path: dealing a
//! secret, and recovering a committed point from public shares by Lagrange
//! interpolation at the origin.
//!
//! Shares use the x = index + 1 evaluation convention, with zero-based
//! trustee indices.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("not enough shares to recover: have {have}, need {need}")]
    NotEnoughShares { have: usize, need: usize },
    #[error("duplicate share index {0}")]
    DuplicateIndex(u32),
}

/// A trustee's private share of a dealt secret.
#[derive(Clone, Debug, Serialize, Deserialize, Zeroize)]
pub struct PriShare {
    pub index: u32,
    pub value: Scalar,
}

/// A trustee's public contribution to the decryption of one ciphertext:
/// the private share's action on the ephemeral key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PubShare {
    pub index: u32,
    pub value: EdwardsPoint,
}

/// Deals `shares` private shares of `secret` with the given recovery
/// threshold.
pub fn deal<R: RngCore + CryptoRng>(
    secret: &Scalar,
    threshold: usize,
    shares: usize,
    rng: &mut R,
) -> Vec<PriShare> {
    let mut coefficients = vec![*secret];
    coefficients.extend((1..threshold).map(|_| Scalar::random(rng)));

    (0..shares as u32)
        .map(|index| PriShare {
            index,
            value: evaluate_polynomial(&coefficients, index),
        })
        .collect()
}

/// Evaluates f(x) = c0 + c1·x + c2·x² + ... at x = index + 1.
fn evaluate_polynomial(coefficients: &[Scalar], index: u32) -> Scalar {
    let x = Scalar::from(index + 1);
    coefficients
        .iter()
        .rev()
        .fold(Scalar::ZERO, |acc, coefficient| acc * x + coefficient)
}

/// Lagrange basis polynomial for `index`, evaluated at the origin.
fn lagrange_coefficient(index: u32, indices: &[u32]) -> Scalar {
    let xi = Scalar::from(index + 1);
    let mut numerator = Scalar::ONE;
    let mut denominator = Scalar::ONE;
    for &j in indices {
        if j == index {
            continue;
        }
        let xj = Scalar::from(j + 1);
        numerator *= xj;
        denominator *= xj - xi;
    }
    // the denominator is non-zero for pairwise-distinct indices
    numerator * denominator.invert()
}

/// Recovers the secret's action on a point from the public shares, by
/// interpolating at the origin over all the shares given.
pub fn recover_commit(shares: &[PubShare], threshold: usize) -> Result<EdwardsPoint, ShareError> {
    if shares.len() < threshold {
        return Err(ShareError::NotEnoughShares {
            have: shares.len(),
            need: threshold,
        });
    }

    let indices: Vec<u32> = shares.iter().map(|share| share.index).collect();
    for (position, index) in indices.iter().enumerate() {
        if indices[..position].contains(index) {
            return Err(ShareError::DuplicateIndex(*index));
        }
    }

    let mut commit = EdwardsPoint::identity();
    for share in shares {
        commit += share.value * lagrange_coefficient(share.index, &indices);
    }
    Ok(commit)
}
