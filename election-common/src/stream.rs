//! Deterministic byte stream used to derive the shuffle random vector.
//!
//! The stream is seeded from the first eight bytes of a shuffle digest read
//! as a varint, so both the shuffling trustee and the contract regenerate
//! the exact same scalars from the transaction content alone. It is not
//! cryptographically strong on its own; binding comes from the digest.

use blake2::{Blake2b512, Digest};
use curve25519_dalek::scalar::Scalar;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("the seed has a wrong size (too small)")]
    SeedTooShort,
}

/// A deterministic stream backed by a seeded PRNG whose output is expanded
/// through a BLAKE2b XOF before use.
pub struct SemiRandomStream {
    prng: StdRng,
}

impl SemiRandomStream {
    /// Seeds the stream from the first eight bytes of `seed`, decoded as a
    /// zigzag varint int64.
    pub fn new(seed: &[u8]) -> Result<Self, StreamError> {
        let seed = &seed[..seed.len().min(8)];
        let (value, read) = decode_varint(seed);
        if read == 0 {
            return Err(StreamError::SeedTooShort);
        }

        Ok(Self {
            prng: StdRng::seed_from_u64(value as u64),
        })
    }

    /// XORs `src` with the next key-stream bytes into `dst`.
    ///
    /// `dst` and `src` must have the same length.
    pub fn xor_key_stream(&mut self, dst: &mut [u8], src: &[u8]) {
        debug_assert_eq!(dst.len(), src.len());

        let mut key = vec![0u8; src.len()];
        self.prng.fill_bytes(&mut key);

        let mut offset = 0;
        let mut counter: u64 = 0;
        while offset < src.len() {
            let block = Blake2b512::new()
                .chain_update(&key)
                .chain_update(counter.to_le_bytes())
                .finalize();
            for (i, byte) in block.iter().take(src.len() - offset).enumerate() {
                dst[offset + i] = src[offset + i] ^ byte;
            }
            offset += block.len();
            counter += 1;
        }
    }

    /// Draws the next scalar from the stream.
    pub fn pick_scalar(&mut self) -> Scalar {
        let mut wide = [0u8; 64];
        let zeroes = [0u8; 64];
        self.xor_key_stream(&mut wide, &zeroes);
        Scalar::from_bytes_mod_order_wide(&wide)
    }
}

/// Decodes a zigzag LEB128 varint, returning the value and the number of
/// bytes consumed; zero bytes consumed means the buffer ended mid-varint.
fn decode_varint(buf: &[u8]) -> (i64, usize) {
    let mut unsigned: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in buf.iter().enumerate() {
        if byte < 0x80 {
            unsigned |= (byte as u64) << shift;
            let value = (unsigned >> 1) as i64 ^ -((unsigned & 1) as i64);
            return (value, i + 1);
        }
        unsigned |= ((byte & 0x7f) as u64) << shift;
        shift += 7;
    }
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_decoding() {
        assert_eq!(decode_varint(&[0x00]), (0, 1));
        assert_eq!(decode_varint(&[0x01]), (-1, 1));
        assert_eq!(decode_varint(&[0x02]), (1, 1));
        assert_eq!(decode_varint(&[0xac, 0x02]), (150, 2));
        // all continuation bits set: the varint never terminates
        assert_eq!(decode_varint(&[0x80; 8]), (0, 0));
    }

    #[test]
    fn stream_is_deterministic() {
        let seed = [7u8, 1, 2, 3, 4, 5, 6, 7];
        let mut first = SemiRandomStream::new(&seed).unwrap();
        let mut second = SemiRandomStream::new(&seed).unwrap();

        for _ in 0..4 {
            assert_eq!(first.pick_scalar(), second.pick_scalar());
        }
    }

    #[test]
    fn distinct_seeds_diverge() {
        let mut first = SemiRandomStream::new(&[2u8, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        let mut second = SemiRandomStream::new(&[4u8, 0, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_ne!(first.pick_scalar(), second.pick_scalar());
    }

    #[test]
    fn unterminated_seed_is_rejected() {
        assert!(matches!(
            SemiRandomStream::new(&[0x80; 8]),
            Err(StreamError::SeedTooShort)
        ));
    }
}
