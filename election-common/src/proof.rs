//! Fiat-Shamir transcript shared by the shuffle prover and verifier.
//!
//! Challenges are derived from the protocol label and the prover messages
//! absorbed so far, so both sides regenerate the same challenge sequence
//! from the proof content alone.

use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};

pub struct Transcript {
    state: Vec<u8>,
    challenges: u64,
}

impl Transcript {
    pub fn new(label: &str) -> Self {
        Self {
            state: label.as_bytes().to_vec(),
            challenges: 0,
        }
    }

    /// Absorbs a length-prefixed prover message.
    pub fn absorb(&mut self, message: &[u8]) {
        self.state
            .extend_from_slice(&(message.len() as u64).to_le_bytes());
        self.state.extend_from_slice(message);
    }

    /// Derives the next public challenge scalar.
    pub fn challenge_scalar(&mut self) -> Scalar {
        let digest = Sha512::new()
            .chain_update(&self.state)
            .chain_update(self.challenges.to_le_bytes())
            .finalize();
        self.challenges += 1;
        Scalar::from_bytes_mod_order_wide(&digest.into())
    }
}
