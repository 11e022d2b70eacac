//! The Ed25519 suite used throughout the stack: point encoding, embedding
//! of plaintext bytes into curve points, and ElGamal encryption of chunked
//! ballot plaintexts.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek::scalar::Scalar;
use rand::{CryptoRng, RngCore};

/// Number of plaintext bytes that fit into a single curve point.
pub const EMBED_LEN: usize = 29;

/// Byte length of a compressed curve point.
pub const POINT_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum PointError {
    #[error("a curve point encoding must be {POINT_LEN} bytes, got {0}")]
    Length(usize),
    #[error("the bytes do not encode a curve point")]
    NotOnCurve,
    #[error("cannot embed {0} bytes into a point, the maximum is {EMBED_LEN}")]
    EmbedTooLong(usize),
    #[error("the point does not carry embedded data")]
    NoEmbeddedData,
    #[error("ballot has {got} chunks, expected {expected}")]
    ChunkCount { got: usize, expected: usize },
    #[error("the bytes do not encode a scalar")]
    NotAScalar,
}

/// Decodes a compressed point, rejecting off-curve encodings.
pub fn decode_point(bytes: &[u8]) -> Result<EdwardsPoint, PointError> {
    let compressed: [u8; POINT_LEN] = bytes
        .try_into()
        .map_err(|_| PointError::Length(bytes.len()))?;
    CompressedEdwardsY(compressed)
        .decompress()
        .ok_or(PointError::NotOnCurve)
}

/// Compressed encoding of a point.
pub fn encode_point(point: &EdwardsPoint) -> [u8; POINT_LEN] {
    point.compress().to_bytes()
}

/// Decodes a canonical scalar encoding.
pub fn decode_scalar(bytes: &[u8]) -> Result<Scalar, PointError> {
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| PointError::Length(bytes.len()))?;
    Option::<Scalar>::from(Scalar::from_canonical_bytes(bytes)).ok_or(PointError::NotAScalar)
}

/// Embeds up to [`EMBED_LEN`] bytes into a prime-order curve point.
///
/// The compressed encoding carries the data length in its first byte and the
/// data right after it; the remaining bytes are sampled until the candidate
/// decompresses to a torsion-free point.
pub fn embed<R: RngCore + CryptoRng>(
    data: &[u8],
    rng: &mut R,
) -> Result<EdwardsPoint, PointError> {
    if data.len() > EMBED_LEN {
        return Err(PointError::EmbedTooLong(data.len()));
    }

    let mut buf = [0u8; POINT_LEN];
    loop {
        rng.fill_bytes(&mut buf);
        buf[0] = data.len() as u8;
        buf[1..1 + data.len()].copy_from_slice(data);

        let Some(point) = CompressedEdwardsY(buf).decompress() else {
            continue;
        };
        if point.is_torsion_free() {
            return Ok(point);
        }
    }
}

/// Extracts the bytes previously embedded with [`embed`].
pub fn extract(point: &EdwardsPoint) -> Result<Vec<u8>, PointError> {
    let bytes = encode_point(point);
    let len = bytes[0] as usize;
    if len > EMBED_LEN {
        return Err(PointError::NoEmbeddedData);
    }
    Ok(bytes[1..1 + len].to_vec())
}

/// ElGamal-encrypts one plaintext point: `K = r·G`, `C = M + r·pk`.
pub fn encrypt_chunk<R: RngCore + CryptoRng>(
    public_key: &EdwardsPoint,
    message: &EdwardsPoint,
    rng: &mut R,
) -> (EdwardsPoint, EdwardsPoint) {
    let r = Scalar::random(rng);
    let k = ED25519_BASEPOINT_POINT * r;
    let c = message + public_key * r;
    (k, c)
}

/// Encrypts a plaintext of arbitrary length as a sequence of ElGamal pairs,
/// one per [`EMBED_LEN`]-byte chunk.
pub fn encrypt<R: RngCore + CryptoRng>(
    public_key: &EdwardsPoint,
    plaintext: &[u8],
    rng: &mut R,
) -> Result<Vec<(EdwardsPoint, EdwardsPoint)>, PointError> {
    plaintext
        .chunks(EMBED_LEN)
        .map(|chunk| {
            let message = embed(chunk, rng)?;
            Ok(encrypt_chunk(public_key, &message, rng))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn embed_roundtrip() {
        let mut rng = StdRng::seed_from_u64(1);

        for len in [0, 1, 13, EMBED_LEN] {
            let data: Vec<u8> = (0..len as u8).collect();
            let point = embed(&data, &mut rng).unwrap();
            assert!(point.is_torsion_free());
            assert_eq!(extract(&point).unwrap(), data);
        }
    }

    #[test]
    fn embed_rejects_oversized_data() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = [0u8; EMBED_LEN + 1];
        assert!(matches!(
            embed(&data, &mut rng),
            Err(PointError::EmbedTooLong(_))
        ));
    }

    #[test]
    fn encrypt_then_decrypt_with_secret() {
        let mut rng = StdRng::seed_from_u64(3);
        let secret = Scalar::random(&mut rng);
        let public_key = ED25519_BASEPOINT_POINT * secret;

        let plaintext = b"vote:0,1,0\nvote2:1,0\n".to_vec();
        let pairs = encrypt(&public_key, &plaintext, &mut rng).unwrap();
        assert_eq!(pairs.len(), plaintext.len().div_ceil(EMBED_LEN));

        let mut recovered = Vec::new();
        for (k, c) in pairs {
            let message = c - k * secret;
            recovered.extend(extract(&message).unwrap());
        }
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn point_and_scalar_decoding() {
        assert!(matches!(decode_point(&[0u8; 7]), Err(PointError::Length(7))));

        let mut rng = StdRng::seed_from_u64(4);
        let point = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        assert_eq!(decode_point(&encode_point(&point)).unwrap(), point);

        // a value above the group order is not a canonical scalar
        assert!(decode_scalar(&[0xffu8; 32]).is_err());
        let scalar = Scalar::random(&mut rng);
        assert_eq!(decode_scalar(&scalar.to_bytes()).unwrap(), scalar);
    }
}
