//! BLS12-381 signing keys of the trustees (min-pk setting: 48-byte public
//! keys, 96-byte signatures).

use blst::min_pk;
use blst::BLST_ERROR;
use rand::{CryptoRng, RngCore};

/// Domain separation tag of the standard hash-to-curve signature suite.
const DST: &[u8] = b"BLS_SIG_BLS12381G2_XMD:SHA-256_SSWU_RO_NUL_";

pub const PUBLIC_KEY_LEN: usize = 48;
pub const SIGNATURE_LEN: usize = 96;

#[derive(Debug, thiserror::Error)]
pub enum BlsError {
    #[error("failed to generate key: {0:?}")]
    KeyGen(BLST_ERROR),
    #[error("could not decode public key of signer: {0:?}")]
    MalformedPublicKey(BLST_ERROR),
    #[error("could not decode signature: {0:?}")]
    MalformedSignature(BLST_ERROR),
    #[error("signature verification failed: {0:?}")]
    Verification(BLST_ERROR),
}

/// A trustee signing keypair.
pub struct Keypair {
    secret: min_pk::SecretKey,
    public: PublicKey,
}

#[derive(Clone, Debug)]
pub struct PublicKey(min_pk::PublicKey);

impl PartialEq for PublicKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for PublicKey {}

#[derive(Clone, Debug)]
pub struct Signature(min_pk::Signature);

impl Keypair {
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self, BlsError> {
        let mut ikm = [0u8; 32];
        rng.fill_bytes(&mut ikm);
        let secret = min_pk::SecretKey::key_gen(&ikm, &[]).map_err(BlsError::KeyGen)?;
        let public = PublicKey(secret.sk_to_pk());
        Ok(Self { secret, public })
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature(self.secret.sign(message, DST, &[]))
    }
}

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        min_pk::PublicKey::from_bytes(bytes)
            .map(Self)
            .map_err(BlsError::MalformedPublicKey)
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0.to_bytes()
    }

    /// Verifies `signature` over `message` under this key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> Result<(), BlsError> {
        match signature.0.verify(true, message, DST, &[], &self.0, true) {
            BLST_ERROR::BLST_SUCCESS => Ok(()),
            err => Err(BlsError::Verification(err)),
        }
    }
}

impl Signature {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BlsError> {
        min_pk::Signature::from_bytes(bytes)
            .map(Self)
            .map_err(BlsError::MalformedSignature)
    }

    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        self.0.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn sign_and_verify() {
        let mut rng = StdRng::seed_from_u64(21);
        let keypair = Keypair::generate(&mut rng).unwrap();

        let signature = keypair.sign(b"shuffle hash");
        keypair
            .public_key()
            .verify(b"shuffle hash", &signature)
            .unwrap();

        assert!(keypair
            .public_key()
            .verify(b"another message", &signature)
            .is_err());
    }

    #[test]
    fn keys_and_signatures_roundtrip_through_bytes() {
        let mut rng = StdRng::seed_from_u64(22);
        let keypair = Keypair::generate(&mut rng).unwrap();
        let signature = keypair.sign(b"payload");

        let public = PublicKey::from_bytes(&keypair.public_key().to_bytes()).unwrap();
        let signature = Signature::from_bytes(&signature.to_bytes()).unwrap();
        public.verify(b"payload", &signature).unwrap();
    }

    #[test]
    fn wrong_key_rejects() {
        let mut rng = StdRng::seed_from_u64(23);
        let signer = Keypair::generate(&mut rng).unwrap();
        let other = Keypair::generate(&mut rng).unwrap();

        let signature = signer.sign(b"payload");
        assert!(other.public_key().verify(b"payload", &signature).is_err());
    }
}
