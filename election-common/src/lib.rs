//! Cryptographic toolkit shared between the e-voting contract and the node
//! services: the Ed25519 suite with its data embedding, ElGamal encryption,
//! the verifiable pair shuffle, public-share recovery, the deterministic
//! semi-random stream, and the trustee signing keys.

use serde::{Deserialize, Serialize};

pub mod bls;
pub mod elgamal;
pub mod proof;
pub mod secretshare;
pub mod shuffle;
pub mod stream;

/// Encodes the value with the canonical snapshot/wire encoding.
///
/// ## Errors
/// Fails if serialization fails
pub fn encode<T: Serialize + Sized>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Decodes the value
///
/// ## Errors
/// Fails if deserialization fails
pub fn decode<'de, T: Deserialize<'de>>(value: &'de [u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(value)
}
