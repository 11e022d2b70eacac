//! Verifiable shuffle of ElGamal pairs.
//!
//! Implements Neff's verifiable mixing of ElGamal pairs: the five-move pair
//! protocol with its embedded simple k-shuffle ladder, made non-interactive
//! over a [`Transcript`]. Multi-chunk ballots are handled by the sequence
//! layer, which folds the chunk columns with a public weight vector so a
//! single pair proof covers the whole shuffle under one permutation.

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand::seq::SliceRandom;
use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};

use crate::proof::Transcript;

/// Protocol label bound into every shuffle transcript.
pub const PROTOCOL_NAME: &str = "PairShuffle";

#[derive(Debug, thiserror::Error)]
pub enum ShuffleError {
    #[error("a verifiable shuffle needs at least two pairs, got {0}")]
    TooFewPairs(usize),
    #[error("mismatched column dimensions")]
    MismatchedColumns,
    #[error("weight vector length {got} does not match the {expected} chunk columns")]
    WeightLength { got: usize, expected: usize },
    #[error("malformed proof: {0}")]
    Malformed(String),
    #[error("{0} check failed")]
    Mismatch(&'static str),
}

impl From<bincode::Error> for ShuffleError {
    fn from(err: bincode::Error) -> Self {
        ShuffleError::Malformed(err.to_string())
    }
}

/// First prover message of the pair protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PairCommit {
    gamma: EdwardsPoint,
    a: Vec<EdwardsPoint>,
    c: Vec<EdwardsPoint>,
    u: Vec<EdwardsPoint>,
    w: Vec<EdwardsPoint>,
    lambda1: EdwardsPoint,
    lambda2: EdwardsPoint,
}

/// Final prover responses of the pair protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct PairResponse {
    zsigma: Vec<Scalar>,
    ztau: Scalar,
}

/// Transcript of the embedded simple k-shuffle.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct SimpleProof {
    theta: Vec<EdwardsPoint>,
    zalpha: Vec<Scalar>,
}

/// A complete non-interactive pair-shuffle proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PairShuffleProof {
    commit: PairCommit,
    d: Vec<EdwardsPoint>,
    response: PairResponse,
    simple: SimpleProof,
}

impl PairShuffleProof {
    pub fn serialize(&self) -> Result<Vec<u8>, ShuffleError> {
        Ok(bincode::serialize(self)?)
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, ShuffleError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// The secrets of a sequence shuffle, kept until the weight vector is known
/// and the proof can be produced.
pub struct SequenceShuffle {
    permutation: Vec<usize>,
    randomizers: Vec<Vec<Scalar>>,
}

/// Shuffles ballot columns under a fresh permutation with fresh
/// re-encryption randomness.
///
/// `x` and `y` are chunk-major: `x[j][i]` is the `K` half of ballot `i`'s
/// chunk `j`. Returns the shuffled columns and the secrets needed by
/// [`SequenceShuffle::prove`].
pub fn shuffle_sequences<R: RngCore + CryptoRng + Rng>(
    public_key: &EdwardsPoint,
    x: &[Vec<EdwardsPoint>],
    y: &[Vec<EdwardsPoint>],
    rng: &mut R,
) -> Result<(Vec<Vec<EdwardsPoint>>, Vec<Vec<EdwardsPoint>>, SequenceShuffle), ShuffleError> {
    let chunks = x.len();
    if chunks == 0 || y.len() != chunks {
        return Err(ShuffleError::MismatchedColumns);
    }
    let ballots = x[0].len();
    if ballots < 2 {
        return Err(ShuffleError::TooFewPairs(ballots));
    }
    if x.iter().chain(y.iter()).any(|column| column.len() != ballots) {
        return Err(ShuffleError::MismatchedColumns);
    }

    let mut permutation: Vec<usize> = (0..ballots).collect();
    permutation.shuffle(rng);

    let randomizers: Vec<Vec<Scalar>> = (0..chunks)
        .map(|_| (0..ballots).map(|_| Scalar::random(rng)).collect())
        .collect();

    let g = ED25519_BASEPOINT_POINT;
    let mut x_bar = Vec::with_capacity(chunks);
    let mut y_bar = Vec::with_capacity(chunks);
    for j in 0..chunks {
        x_bar.push(
            (0..ballots)
                .map(|i| x[j][permutation[i]] + g * randomizers[j][permutation[i]])
                .collect(),
        );
        y_bar.push(
            (0..ballots)
                .map(|i| y[j][permutation[i]] + public_key * randomizers[j][permutation[i]])
                .collect(),
        );
    }

    Ok((x_bar, y_bar, SequenceShuffle { permutation, randomizers }))
}

impl SequenceShuffle {
    /// Produces the pair-shuffle proof over the columns folded with
    /// `weights`, consuming the shuffle secrets.
    pub fn prove<R: RngCore + CryptoRng>(
        self,
        public_key: &EdwardsPoint,
        x: &[Vec<EdwardsPoint>],
        y: &[Vec<EdwardsPoint>],
        x_bar: &[Vec<EdwardsPoint>],
        y_bar: &[Vec<EdwardsPoint>],
        weights: &[Scalar],
        rng: &mut R,
    ) -> Result<PairShuffleProof, ShuffleError> {
        if weights.len() != x.len() {
            return Err(ShuffleError::WeightLength {
                got: weights.len(),
                expected: x.len(),
            });
        }

        let ballots = self.permutation.len();
        let folded_randomizers: Vec<Scalar> = (0..ballots)
            .map(|i| {
                weights
                    .iter()
                    .zip(&self.randomizers)
                    .map(|(weight, column)| weight * column[i])
                    .sum()
            })
            .collect();

        prove_pairs(
            public_key,
            &fold(x, weights),
            &fold(y, weights),
            &fold(x_bar, weights),
            &fold(y_bar, weights),
            &self.permutation,
            &folded_randomizers,
            rng,
        )
    }
}

/// Verifies a sequence shuffle: both column sets are folded with `weights`
/// and checked against the pair proof.
pub fn verify_sequences(
    public_key: &EdwardsPoint,
    x: &[Vec<EdwardsPoint>],
    y: &[Vec<EdwardsPoint>],
    x_bar: &[Vec<EdwardsPoint>],
    y_bar: &[Vec<EdwardsPoint>],
    weights: &[Scalar],
    proof: &PairShuffleProof,
) -> Result<(), ShuffleError> {
    let chunks = x.len();
    if chunks == 0 || y.len() != chunks || x_bar.len() != chunks || y_bar.len() != chunks {
        return Err(ShuffleError::MismatchedColumns);
    }
    if weights.len() != chunks {
        return Err(ShuffleError::WeightLength {
            got: weights.len(),
            expected: chunks,
        });
    }
    let ballots = x[0].len();
    if x
        .iter()
        .chain(y.iter())
        .chain(x_bar.iter())
        .chain(y_bar.iter())
        .any(|column| column.len() != ballots)
    {
        return Err(ShuffleError::MismatchedColumns);
    }

    verify_pairs(
        public_key,
        &fold(x, weights),
        &fold(y, weights),
        &fold(x_bar, weights),
        &fold(y_bar, weights),
        proof,
    )
}

/// Folds chunk-major columns into a single weighted column.
fn fold(columns: &[Vec<EdwardsPoint>], weights: &[Scalar]) -> Vec<EdwardsPoint> {
    let ballots = columns[0].len();
    (0..ballots)
        .map(|i| {
            columns
                .iter()
                .zip(weights)
                .fold(EdwardsPoint::identity(), |acc, (column, weight)| {
                    acc + column[i] * weight
                })
        })
        .collect()
}

/// Proves one column shuffle: `x_bar[i] = x[pi[i]] + beta[pi[i]]·G` and
/// `y_bar[i] = y[pi[i]] + beta[pi[i]]·pk`.
#[allow(clippy::too_many_arguments)]
fn prove_pairs<R: RngCore + CryptoRng>(
    public_key: &EdwardsPoint,
    x: &[EdwardsPoint],
    y: &[EdwardsPoint],
    x_bar: &[EdwardsPoint],
    y_bar: &[EdwardsPoint],
    pi: &[usize],
    beta: &[Scalar],
    rng: &mut R,
) -> Result<PairShuffleProof, ShuffleError> {
    let k = x.len();
    if k < 2 {
        return Err(ShuffleError::TooFewPairs(k));
    }
    let g = ED25519_BASEPOINT_POINT;

    let mut pi_inv = vec![0usize; k];
    for (i, &p) in pi.iter().enumerate() {
        pi_inv[p] = i;
    }

    let gamma = Scalar::random(rng);
    let tau0 = Scalar::random(rng);
    let a: Vec<Scalar> = (0..k).map(|_| Scalar::random(rng)).collect();
    let u: Vec<Scalar> = (0..k).map(|_| Scalar::random(rng)).collect();
    let w: Vec<Scalar> = (0..k).map(|_| Scalar::random(rng)).collect();

    let w_beta_sum: Scalar = tau0 + (0..k).map(|i| w[i] * beta[pi[i]]).sum::<Scalar>();
    let mut lambda1 = g * w_beta_sum;
    let mut lambda2 = public_key * w_beta_sum;
    for i in 0..k {
        let w_u = w[pi_inv[i]] - u[i];
        lambda1 += x[i] * w_u;
        lambda2 += y[i] * w_u;
    }

    let commit = PairCommit {
        gamma: g * gamma,
        a: a.iter().map(|ai| g * ai).collect(),
        c: (0..k).map(|i| g * (gamma * a[pi[i]])).collect(),
        u: u.iter().map(|ui| g * ui).collect(),
        w: (0..k).map(|i| g * (gamma * w[i])).collect(),
        lambda1,
        lambda2,
    };

    let mut transcript = Transcript::new(PROTOCOL_NAME);
    transcript.absorb(&bincode::serialize(&commit)?);
    let rho: Vec<Scalar> = (0..k).map(|_| transcript.challenge_scalar()).collect();

    let b: Vec<Scalar> = (0..k).map(|i| rho[i] - u[i]).collect();
    let d: Vec<EdwardsPoint> = (0..k).map(|i| g * (gamma * b[pi[i]])).collect();
    transcript.absorb(&bincode::serialize(&d)?);
    let lambda = transcript.challenge_scalar();

    let response = PairResponse {
        zsigma: (0..k).map(|i| w[i] + b[pi[i]]).collect(),
        ztau: -tau0 + (0..k).map(|i| b[i] * beta[i]).sum::<Scalar>(),
    };
    transcript.absorb(&bincode::serialize(&response)?);

    // the embedded simple shuffle ties the commitment pairs together
    let r: Vec<Scalar> = (0..k).map(|i| a[i] + lambda * b[i]).collect();
    let s: Vec<Scalar> = (0..k).map(|i| gamma * r[pi[i]]).collect();
    let simple = prove_simple(&mut transcript, &gamma, &r, &s, rng)?;

    Ok(PairShuffleProof {
        commit,
        d,
        response,
        simple,
    })
}

/// Verifies one column shuffle against its pair proof.
fn verify_pairs(
    public_key: &EdwardsPoint,
    x: &[EdwardsPoint],
    y: &[EdwardsPoint],
    x_bar: &[EdwardsPoint],
    y_bar: &[EdwardsPoint],
    proof: &PairShuffleProof,
) -> Result<(), ShuffleError> {
    let k = x.len();
    if k < 2 {
        return Err(ShuffleError::TooFewPairs(k));
    }
    if y.len() != k || x_bar.len() != k || y_bar.len() != k {
        return Err(ShuffleError::MismatchedColumns);
    }
    let commit = &proof.commit;
    if commit.a.len() != k
        || commit.c.len() != k
        || commit.u.len() != k
        || commit.w.len() != k
        || proof.d.len() != k
        || proof.response.zsigma.len() != k
    {
        return Err(ShuffleError::Malformed(
            "pair proof dimensions do not match the columns".into(),
        ));
    }
    let g = ED25519_BASEPOINT_POINT;

    let mut transcript = Transcript::new(PROTOCOL_NAME);
    transcript.absorb(&bincode::serialize(commit)?);
    let rho: Vec<Scalar> = (0..k).map(|_| transcript.challenge_scalar()).collect();

    let b: Vec<EdwardsPoint> = (0..k).map(|i| g * rho[i] - commit.u[i]).collect();
    transcript.absorb(&bincode::serialize(&proof.d)?);
    let lambda = transcript.challenge_scalar();
    transcript.absorb(&bincode::serialize(&proof.response)?);

    // per-pair binding of the sigma responses to W and D
    for i in 0..k {
        if commit.gamma * proof.response.zsigma[i] != commit.w[i] + proof.d[i] {
            return Err(ShuffleError::Mismatch("sigma response"));
        }
    }

    // the simple shuffle runs over R = A + lambda·B against S = C + lambda·D
    let r: Vec<EdwardsPoint> = (0..k).map(|i| commit.a[i] + b[i] * lambda).collect();
    let s: Vec<EdwardsPoint> = (0..k).map(|i| commit.c[i] + proof.d[i] * lambda).collect();
    verify_simple(&mut transcript, &commit.gamma, &r, &s, &proof.simple)?;

    // finally the shuffled columns against the blinding commitments
    let mut phi1 = EdwardsPoint::identity();
    let mut phi2 = EdwardsPoint::identity();
    for i in 0..k {
        phi1 += x_bar[i] * proof.response.zsigma[i] - x[i] * rho[i];
        phi2 += y_bar[i] * proof.response.zsigma[i] - y[i] * rho[i];
    }
    if phi1 != commit.lambda1 + g * proof.response.ztau {
        return Err(ShuffleError::Mismatch("first column"));
    }
    if phi2 != commit.lambda2 + public_key * proof.response.ztau {
        return Err(ShuffleError::Mismatch("second column"));
    }

    Ok(())
}

/// Proves the simple k-shuffle: the prover knows the discrete logs of both
/// columns and `y[i] = gamma · x[pi[i]]` as multisets.
fn prove_simple<R: RngCore + CryptoRng>(
    transcript: &mut Transcript,
    gamma: &Scalar,
    x: &[Scalar],
    y: &[Scalar],
    rng: &mut R,
) -> Result<SimpleProof, ShuffleError> {
    let k = x.len();
    let g = ED25519_BASEPOINT_POINT;

    let t = transcript.challenge_scalar();
    let gamma_t = gamma * t;
    let x_hat: Vec<Scalar> = x.iter().map(|xi| xi - t).collect();
    let y_hat: Vec<Scalar> = y.iter().map(|yi| yi - gamma_t).collect();

    let ladder = 2 * k - 1;
    let secrets: Vec<Scalar> = (0..ladder).map(|_| Scalar::random(rng)).collect();

    let mut theta = Vec::with_capacity(ladder + 1);
    theta.push(g * (secrets[0] * y_hat[0]));
    for i in 1..k {
        theta.push(g * (secrets[i] * y_hat[i] - secrets[i - 1] * x_hat[i]));
    }
    for i in k..ladder {
        theta.push(g * (secrets[i] - secrets[i - 1] * gamma));
    }
    theta.push(g * -(secrets[ladder - 1] * gamma));

    transcript.absorb(&bincode::serialize(&theta)?);
    let c = transcript.challenge_scalar();

    let mut zalpha = Vec::with_capacity(ladder);
    let mut running = c;
    for i in 0..k {
        running = running * x_hat[i] * y_hat[i].invert();
        zalpha.push(secrets[i] + running);
    }
    for i in k..ladder {
        running *= gamma;
        zalpha.push(secrets[i] + running);
    }

    Ok(SimpleProof { theta, zalpha })
}

/// Verifies the simple k-shuffle ladder over public points, with
/// `gamma_commit` the prover's commitment to gamma.
fn verify_simple(
    transcript: &mut Transcript,
    gamma_commit: &EdwardsPoint,
    x: &[EdwardsPoint],
    y: &[EdwardsPoint],
    proof: &SimpleProof,
) -> Result<(), ShuffleError> {
    let k = x.len();
    let ladder = 2 * k - 1;
    if proof.theta.len() != ladder + 1 || proof.zalpha.len() != ladder {
        return Err(ShuffleError::Malformed(
            "simple proof dimensions do not match the columns".into(),
        ));
    }
    let g = ED25519_BASEPOINT_POINT;

    let t = transcript.challenge_scalar();
    let t_g = g * t;
    let t_gamma = gamma_commit * t;
    let x_hat: Vec<EdwardsPoint> = x.iter().map(|xi| xi - t_g).collect();
    let y_hat: Vec<EdwardsPoint> = y.iter().map(|yi| yi - t_gamma).collect();

    transcript.absorb(&bincode::serialize(&proof.theta)?);
    let c = transcript.challenge_scalar();

    let alpha = &proof.zalpha;
    for i in 0..k {
        let previous = if i == 0 { c } else { alpha[i - 1] };
        if proof.theta[i] != y_hat[i] * alpha[i] - x_hat[i] * previous {
            return Err(ShuffleError::Mismatch("shuffle ladder"));
        }
    }
    for i in k..ladder {
        if proof.theta[i] != g * alpha[i] - gamma_commit * alpha[i - 1] {
            return Err(ShuffleError::Mismatch("shuffle ladder"));
        }
    }
    if proof.theta[ladder] != g * c - gamma_commit * alpha[ladder - 1] {
        return Err(ShuffleError::Mismatch("shuffle ladder"));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elgamal;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Encrypts `ballots` random plaintexts of `chunks` chunks each and
    /// returns the chunk-major columns.
    fn random_columns(
        public_key: &EdwardsPoint,
        ballots: usize,
        chunks: usize,
        rng: &mut StdRng,
    ) -> (Vec<Vec<EdwardsPoint>>, Vec<Vec<EdwardsPoint>>) {
        let mut x = vec![Vec::new(); chunks];
        let mut y = vec![Vec::new(); chunks];
        for ballot in 0..ballots {
            let plaintext = vec![ballot as u8; chunks * elgamal::EMBED_LEN];
            let pairs = elgamal::encrypt(public_key, &plaintext, rng).unwrap();
            for (j, (k_point, c_point)) in pairs.into_iter().enumerate() {
                x[j].push(k_point);
                y[j].push(c_point);
            }
        }
        (x, y)
    }

    fn random_weights(chunks: usize, rng: &mut StdRng) -> Vec<Scalar> {
        (0..chunks).map(|_| Scalar::random(rng)).collect()
    }

    #[test]
    fn honest_shuffle_verifies() {
        let mut rng = StdRng::seed_from_u64(31);
        let public_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);

        for (ballots, chunks) in [(2, 1), (3, 1), (3, 2), (5, 3)] {
            let (x, y) = random_columns(&public_key, ballots, chunks, &mut rng);
            let (x_bar, y_bar, secrets) =
                shuffle_sequences(&public_key, &x, &y, &mut rng).unwrap();
            let weights = random_weights(chunks, &mut rng);

            let proof = secrets
                .prove(&public_key, &x, &y, &x_bar, &y_bar, &weights, &mut rng)
                .unwrap();

            verify_sequences(&public_key, &x, &y, &x_bar, &y_bar, &weights, &proof).unwrap();
        }
    }

    #[test]
    fn proof_roundtrips_through_bytes() {
        let mut rng = StdRng::seed_from_u64(32);
        let public_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        let (x, y) = random_columns(&public_key, 3, 2, &mut rng);
        let (x_bar, y_bar, secrets) = shuffle_sequences(&public_key, &x, &y, &mut rng).unwrap();
        let weights = random_weights(2, &mut rng);
        let proof = secrets
            .prove(&public_key, &x, &y, &x_bar, &y_bar, &weights, &mut rng)
            .unwrap();

        let decoded = PairShuffleProof::deserialize(&proof.serialize().unwrap()).unwrap();
        verify_sequences(&public_key, &x, &y, &x_bar, &y_bar, &weights, &decoded).unwrap();
    }

    #[test]
    fn tampered_output_is_rejected() {
        let mut rng = StdRng::seed_from_u64(33);
        let public_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        let (x, y) = random_columns(&public_key, 4, 2, &mut rng);
        let (x_bar, mut y_bar, secrets) =
            shuffle_sequences(&public_key, &x, &y, &mut rng).unwrap();
        let weights = random_weights(2, &mut rng);
        let proof = secrets
            .prove(&public_key, &x, &y, &x_bar, &y_bar, &weights, &mut rng)
            .unwrap();

        // tampering a single output ciphertext breaks the proof
        y_bar[1][2] += ED25519_BASEPOINT_POINT;
        assert!(
            verify_sequences(&public_key, &x, &y, &x_bar, &y_bar, &weights, &proof).is_err()
        );
    }

    #[test]
    fn wrong_weights_are_rejected() {
        let mut rng = StdRng::seed_from_u64(34);
        let public_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        let (x, y) = random_columns(&public_key, 3, 2, &mut rng);
        let (x_bar, y_bar, secrets) = shuffle_sequences(&public_key, &x, &y, &mut rng).unwrap();
        let weights = random_weights(2, &mut rng);
        let proof = secrets
            .prove(&public_key, &x, &y, &x_bar, &y_bar, &weights, &mut rng)
            .unwrap();

        let other_weights = random_weights(2, &mut rng);
        assert!(verify_sequences(
            &public_key,
            &x,
            &y,
            &x_bar,
            &y_bar,
            &other_weights,
            &proof
        )
        .is_err());
    }

    #[test]
    fn wrong_public_key_is_rejected() {
        let mut rng = StdRng::seed_from_u64(35);
        let public_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        let (x, y) = random_columns(&public_key, 3, 1, &mut rng);
        let (x_bar, y_bar, secrets) = shuffle_sequences(&public_key, &x, &y, &mut rng).unwrap();
        let weights = random_weights(1, &mut rng);
        let proof = secrets
            .prove(&public_key, &x, &y, &x_bar, &y_bar, &weights, &mut rng)
            .unwrap();

        let other_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        assert!(
            verify_sequences(&other_key, &x, &y, &x_bar, &y_bar, &weights, &proof).is_err()
        );
    }

    #[test]
    fn single_ballot_is_rejected() {
        let mut rng = StdRng::seed_from_u64(36);
        let public_key = ED25519_BASEPOINT_POINT * Scalar::random(&mut rng);
        let (x, y) = random_columns(&public_key, 1, 1, &mut rng);
        assert!(matches!(
            shuffle_sequences(&public_key, &x, &y, &mut rng),
            Err(ShuffleError::TooFewPairs(1))
        ));
    }

    #[test]
    fn shuffle_preserves_the_plaintext_multiset() {
        let mut rng = StdRng::seed_from_u64(37);
        let secret = Scalar::random(&mut rng);
        let public_key = ED25519_BASEPOINT_POINT * secret;

        let plaintexts: Vec<Vec<u8>> = (0..4u8).map(|i| vec![i; 10]).collect();
        let mut x = vec![Vec::new()];
        let mut y = vec![Vec::new()];
        for plaintext in &plaintexts {
            let pairs = elgamal::encrypt(&public_key, plaintext, &mut rng).unwrap();
            x[0].push(pairs[0].0);
            y[0].push(pairs[0].1);
        }

        let (x_bar, y_bar, _) = shuffle_sequences(&public_key, &x, &y, &mut rng).unwrap();

        let mut decrypted: Vec<Vec<u8>> = (0..4)
            .map(|i| {
                let message = y_bar[0][i] - x_bar[0][i] * secret;
                elgamal::extract(&message).unwrap()
            })
            .collect();
        decrypted.sort();
        assert_eq!(decrypted, plaintexts);
    }
}
