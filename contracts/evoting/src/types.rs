//! Data model of an election: the record stored in the snapshot, the global
//! metadata index, the trustee roster, and the typed command payloads.

use curve25519_dalek::edwards::EdwardsPoint;
use curve25519_dalek::scalar::Scalar;
use election_common::elgamal::{self, PointError, EMBED_LEN};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Status of an election through its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Status {
    /// Created, the collective key is not set yet.
    Initial,
    /// Votes can be cast.
    Open,
    /// The bulletin board is frozen, trustees shuffle.
    Closed,
    /// Enough shuffles have been accepted.
    ShuffledBallots,
    /// Enough public shares have been submitted.
    PubSharesSubmitted,
    /// The decrypted ballots are available.
    ResultAvailable,
    /// Canceled by the admin; terminal.
    Canceled,
}

impl From<Status> for u16 {
    fn from(status: Status) -> Self {
        match status {
            Status::Initial => 0,
            Status::Open => 1,
            Status::Closed => 2,
            Status::ShuffledBallots => 3,
            Status::PubSharesSubmitted => 4,
            Status::ResultAvailable => 5,
            Status::Canceled => 6,
        }
    }
}

impl TryFrom<u16> for Status {
    type Error = String;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::Initial),
            1 => Ok(Status::Open),
            2 => Ok(Status::Closed),
            3 => Ok(Status::ShuffledBallots),
            4 => Ok(Status::PubSharesSubmitted),
            5 => Ok(Status::ResultAvailable),
            6 => Ok(Status::Canceled),
            other => Err(format!("unknown status: {other}")),
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The commands of the evoting contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum Command {
    CreateElection,
    OpenElection,
    CastVote,
    CloseElection,
    ShuffleBallots,
    RegisterPubShares,
    DecryptBallots,
    CancelElection,
}

/// One question of the ballot schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Identifier of the question, unique within the configuration.
    pub id: String,
    /// The question shown to the voter.
    pub title: String,
    /// Maximum number of choices a voter may select.
    pub max_choices: u32,
    /// The choices offered.
    pub choices: Vec<String>,
}

/// The ballot schema of an election.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    pub main_title: String,
    pub questions: Vec<Question>,
}

impl Configuration {
    /// Checks the schema is coherent: a non-empty list of questions with
    /// pairwise-distinct non-empty ids, and per-question choice counts that
    /// make at least one selection expressible.
    pub fn is_valid(&self) -> bool {
        if self.questions.is_empty() {
            return false;
        }
        for (position, question) in self.questions.iter().enumerate() {
            if question.id.is_empty()
                || question.choices.is_empty()
                || question.max_choices == 0
                || question.max_choices as usize > question.choices.len()
            {
                return false;
            }
            if self.questions[..position]
                .iter()
                .any(|other| other.id == question.id)
            {
                return false;
            }
        }
        true
    }

    /// Exact byte length of a marshalled ballot for this schema.
    pub fn max_ballot_size(&self) -> usize {
        self.questions
            .iter()
            .map(|question| question.id.len() + 2 * question.choices.len() + 1)
            .sum()
    }

    /// Number of ElGamal pairs a ballot occupies.
    pub fn chunks_per_ballot(&self) -> usize {
        self.max_ballot_size().div_ceil(EMBED_LEN)
    }
}

/// A voter's selections for one question.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionSelection {
    pub question_id: String,
    pub picks: Vec<bool>,
}

/// A decoded plaintext ballot.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    pub selections: Vec<QuestionSelection>,
}

#[derive(Debug, thiserror::Error)]
pub enum BallotError {
    #[error("ballot text length {got} does not match the schema size {expected}")]
    Size { got: usize, expected: usize },
    #[error("line {0} is not of the form 'id:picks'")]
    Shape(usize),
    #[error("line {position} answers {got}, expected question {expected}")]
    QuestionMismatch {
        position: usize,
        got: String,
        expected: String,
    },
    #[error("wrong number of picks for question {0}")]
    PickCount(String),
    #[error("invalid pick marker {0:?}")]
    PickMarker(String),
    #[error("ballot text is not valid UTF-8")]
    NotText,
    #[error("too many selections for question {0}")]
    TooManySelections(String),
}

impl Ballot {
    /// Canonical text encoding: one `id:0,1,0` line per question, in schema
    /// order.
    pub fn marshal(&self) -> String {
        let mut out = String::new();
        for selection in &self.selections {
            out.push_str(&selection.question_id);
            out.push(':');
            let picks: Vec<&str> = selection
                .picks
                .iter()
                .map(|picked| if *picked { "1" } else { "0" })
                .collect();
            out.push_str(&picks.join(","));
            out.push('\n');
        }
        out
    }

    /// Parses and validates a ballot text against the schema.
    pub fn unmarshal(text: &[u8], configuration: &Configuration) -> Result<Self, BallotError> {
        let expected = configuration.max_ballot_size();
        if text.len() != expected {
            return Err(BallotError::Size {
                got: text.len(),
                expected,
            });
        }
        let text = std::str::from_utf8(text).map_err(|_| BallotError::NotText)?;

        let mut selections = Vec::with_capacity(configuration.questions.len());
        let lines: Vec<&str> = text.split_terminator('\n').collect();
        if lines.len() != configuration.questions.len() {
            return Err(BallotError::Shape(lines.len()));
        }

        for (position, (line, question)) in
            lines.iter().zip(&configuration.questions).enumerate()
        {
            let (id, picks) = line
                .split_once(':')
                .ok_or(BallotError::Shape(position))?;
            if id != question.id {
                return Err(BallotError::QuestionMismatch {
                    position,
                    got: id.to_string(),
                    expected: question.id.clone(),
                });
            }

            let markers: Vec<&str> = picks.split(',').collect();
            if markers.len() != question.choices.len() {
                return Err(BallotError::PickCount(question.id.clone()));
            }
            let picks = markers
                .iter()
                .map(|marker| match *marker {
                    "0" => Ok(false),
                    "1" => Ok(true),
                    other => Err(BallotError::PickMarker(other.to_string())),
                })
                .collect::<Result<Vec<bool>, _>>()?;
            if picks.iter().filter(|picked| **picked).count() > question.max_choices as usize {
                return Err(BallotError::TooManySelections(question.id.clone()));
            }

            selections.push(QuestionSelection {
                question_id: question.id.clone(),
                picks,
            });
        }

        Ok(Self { selections })
    }
}

/// One ElGamal pair of a ciphervote, as compressed curve points.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedPair {
    pub k: Vec<u8>,
    pub c: Vec<u8>,
}

impl EncryptedPair {
    pub fn from_points(k: &EdwardsPoint, c: &EdwardsPoint) -> Self {
        Self {
            k: elgamal::encode_point(k).to_vec(),
            c: elgamal::encode_point(c).to_vec(),
        }
    }

    /// Decodes both halves as curve points.
    pub fn points(&self) -> Result<(EdwardsPoint, EdwardsPoint), PointError> {
        Ok((
            elgamal::decode_point(&self.k)?,
            elgamal::decode_point(&self.c)?,
        ))
    }
}

/// A voter's encrypted ballot: one ElGamal pair per plaintext chunk.
pub type Ciphervote = Vec<EncryptedPair>;

/// Builds a ciphervote from freshly encrypted pairs.
pub fn ciphervote_from_pairs(pairs: &[(EdwardsPoint, EdwardsPoint)]) -> Ciphervote {
    pairs
        .iter()
        .map(|(k, c)| EncryptedPair::from_points(k, c))
        .collect()
}

/// Chunk-major point columns `(X, Y)` of a list of ciphervotes:
/// `X[chunk][ballot]` is a `K` half, `Y[chunk][ballot]` a `C` half.
pub fn elgamal_columns(
    ciphervotes: &[Ciphervote],
) -> Result<(Vec<Vec<EdwardsPoint>>, Vec<Vec<EdwardsPoint>>), PointError> {
    let chunks = ciphervotes.first().map(Vec::len).unwrap_or_default();
    let mut x = vec![Vec::with_capacity(ciphervotes.len()); chunks];
    let mut y = vec![Vec::with_capacity(ciphervotes.len()); chunks];
    for ciphervote in ciphervotes {
        if ciphervote.len() != chunks {
            return Err(PointError::ChunkCount {
                got: ciphervote.len(),
                expected: chunks,
            });
        }
        for (j, pair) in ciphervote.iter().enumerate() {
            let (k, c) = pair.points()?;
            x[j].push(k);
            y[j].push(c);
        }
    }
    Ok((x, y))
}

/// The bulletin board: insertion-ordered user id to latest ciphervote.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulletinBoard {
    pub user_ids: Vec<String>,
    pub ciphervotes: Vec<Ciphervote>,
}

impl BulletinBoard {
    /// Inserts the vote, replacing in place any earlier vote by the same
    /// user.
    pub fn cast_vote(&mut self, user_id: &str, ciphervote: Ciphervote) {
        if let Some(position) = self.user_ids.iter().position(|id| id == user_id) {
            self.ciphervotes[position] = ciphervote;
        } else {
            self.user_ids.push(user_id.to_string());
            self.ciphervotes.push(ciphervote);
        }
    }

    pub fn len(&self) -> usize {
        self.user_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.user_ids.is_empty()
    }
}

/// A single accepted shuffle round.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleInstance {
    pub shuffled_ballots: Vec<Ciphervote>,
    pub proof: Vec<u8>,
    pub shuffler_public_key: Vec<u8>,
}

/// One trustee's share of one decrypted pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubShare {
    /// Trustee index within the sharing scheme.
    pub index: u32,
    /// The marshalled point `d_i · K`.
    pub value: Vec<u8>,
}

/// A full submission: `[ballot][pair]` share matrix from one trustee.
pub type PubShareSubmission = Vec<Vec<PubShare>>;

/// All public-share submissions received so far, with the submitters.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubSharesArchive {
    pub submissions: Vec<PubShareSubmission>,
    pub public_keys: Vec<Vec<u8>>,
}

/// Outcome of decrypting one ballot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BallotStatus {
    Valid,
    Invalid,
}

/// A decrypted ballot with its per-ballot outcome flag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptedBallot {
    pub ballot: Ballot,
    pub status: BallotStatus,
}

/// The set of trustee signing keys frozen at election creation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Roster {
    pub public_keys: Vec<Vec<u8>>,
}

impl Roster {
    pub fn len(&self) -> usize {
        self.public_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public_keys.is_empty()
    }

    /// Bitwise membership check of a submitter key.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.public_keys.iter().any(|member| member == key)
    }

    /// Byzantine threshold `f + 1` with `f = (n - 1) / 3` honest shuffles
    /// required for liveness.
    pub fn byzantine_threshold(&self) -> usize {
        (self.len().saturating_sub(1)) / 3 + 1
    }
}

/// A full election record as stored in the snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Election {
    /// Hex encoding of `SHA256(creation transaction id)`.
    pub election_id: String,
    /// Only this principal may close, decrypt or cancel.
    pub admin_id: String,
    pub status: Status,
    pub configuration: Configuration,
    /// The collective DKG key; set exactly once on open.
    pub public_key: Option<Vec<u8>>,
    /// Plaintext size of a marshalled ballot, derived from the schema.
    pub ballot_size: usize,
    pub bulletin_board: BulletinBoard,
    pub shuffle_instances: Vec<ShuffleInstance>,
    pub pub_shares_archive: PubSharesArchive,
    pub decrypted_ballots: Vec<DecryptedBallot>,
    /// Frozen serialized roster captured at creation.
    pub roster_buf: Vec<u8>,
    pub shuffle_threshold: usize,
}

impl Election {
    pub fn chunks_per_ballot(&self) -> usize {
        self.ballot_size.div_ceil(EMBED_LEN)
    }

    /// Decodes the collective public key.
    pub fn public_key_point(&self) -> Result<Option<EdwardsPoint>, PointError> {
        self.public_key
            .as_deref()
            .map(elgamal::decode_point)
            .transpose()
    }
}

/// The global set of known election ids.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElectionsMetadata {
    pub elections_ids: Vec<String>,
}

impl ElectionsMetadata {
    /// Adds the id if it is not yet known.
    pub fn add(&mut self, election_id: &str) {
        if !self.elections_ids.iter().any(|id| id == election_id) {
            self.elections_ids.push(election_id.to_string());
        }
    }
}

/// Marshalled scalars of the shuffle weight vector.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomVector(pub Vec<Vec<u8>>);

impl RandomVector {
    pub fn from_scalars(scalars: &[Scalar]) -> Self {
        Self(scalars.iter().map(|s| s.to_bytes().to_vec()).collect())
    }

    pub fn unmarshal(&self) -> Result<Vec<Scalar>, PointError> {
        self.0.iter().map(|bytes| elgamal::decode_scalar(bytes)).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Payload of the CreateElection command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateElectionTransaction {
    pub configuration: Configuration,
    pub admin_id: String,
}

/// Payload of the OpenElection command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenElectionTransaction {
    pub election_id: String,
}

/// Payload of the CastVote command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteTransaction {
    pub election_id: String,
    pub user_id: String,
    pub ballot: Ciphervote,
}

/// Payload of the CloseElection command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseElectionTransaction {
    pub election_id: String,
    pub user_id: String,
}

/// Payload of the ShuffleBallots command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShuffleBallotsTransaction {
    pub election_id: String,
    /// Zero-based, contiguous shuffle round.
    pub round: usize,
    pub shuffled_ballots: Vec<Ciphervote>,
    /// Serialized pair-shuffle proof.
    pub proof: Vec<u8>,
    pub random_vector: RandomVector,
    /// BLS key of the shuffling trustee.
    pub public_key: Vec<u8>,
    /// BLS signature over [`ShuffleBallotsTransaction::hash_shuffle`].
    pub signature: Vec<u8>,
}

impl ShuffleBallotsTransaction {
    /// Digest binding the shuffled output; this is what seeds the
    /// semi-random stream the weight vector is drawn from.
    pub fn shuffle_digest(election_id: &[u8], shuffled_ballots: &[Ciphervote]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(election_id);
        for ciphervote in shuffled_ballots {
            for pair in ciphervote {
                hasher.update(&pair.k);
                hasher.update(&pair.c);
            }
        }
        hasher.finalize().into()
    }

    /// The signed hash: the digest input plus the random vector.
    pub fn hash_shuffle(&self, election_id: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(election_id);
        for ciphervote in &self.shuffled_ballots {
            for pair in ciphervote {
                hasher.update(&pair.k);
                hasher.update(&pair.c);
            }
        }
        for scalar in &self.random_vector.0 {
            hasher.update(scalar);
        }
        hasher.finalize().into()
    }
}

/// Payload of the RegisterPubShares command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPubSharesTransaction {
    pub election_id: String,
    /// Zero-based, contiguous submission round.
    pub round: usize,
    pub pub_shares: PubShareSubmission,
    /// BLS key of the submitting trustee.
    pub public_key: Vec<u8>,
    /// BLS signature over [`RegisterPubSharesTransaction::hash_pub_shares`].
    pub signature: Vec<u8>,
}

impl RegisterPubSharesTransaction {
    /// The signed hash: election id, every share in order, and the round.
    pub fn hash_pub_shares(&self, election_id: &[u8]) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(election_id);
        for ballot in &self.pub_shares {
            for share in ballot {
                hasher.update(share.index.to_le_bytes());
                hasher.update(&share.value);
            }
        }
        hasher.update((self.round as u64).to_le_bytes());
        hasher.finalize().into()
    }
}

/// Payload of the DecryptBallots command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecryptBallotsTransaction {
    pub election_id: String,
    pub user_id: String,
}

/// Payload of the CancelElection command.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelElectionTransaction {
    pub election_id: String,
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_question_configuration() -> Configuration {
        Configuration {
            main_title: "Board election".into(),
            questions: vec![
                Question {
                    id: "q1".into(),
                    title: "Chair".into(),
                    max_choices: 1,
                    choices: vec!["alice".into(), "bob".into()],
                },
                Question {
                    id: "q2".into(),
                    title: "Auditors".into(),
                    max_choices: 2,
                    choices: vec!["carol".into(), "dave".into(), "erin".into()],
                },
            ],
        }
    }

    #[test]
    fn configuration_validity() {
        let configuration = two_question_configuration();
        assert!(configuration.is_valid());

        let mut duplicated = configuration.clone();
        duplicated.questions[1].id = "q1".into();
        assert!(!duplicated.is_valid());

        let mut incoherent = configuration.clone();
        incoherent.questions[0].max_choices = 3;
        assert!(!incoherent.is_valid());

        let empty = Configuration {
            main_title: "none".into(),
            questions: vec![],
        };
        assert!(!empty.is_valid());
    }

    #[test]
    fn ballot_size_is_exact() {
        let configuration = two_question_configuration();
        let ballot = Ballot {
            selections: vec![
                QuestionSelection {
                    question_id: "q1".into(),
                    picks: vec![true, false],
                },
                QuestionSelection {
                    question_id: "q2".into(),
                    picks: vec![false, true, true],
                },
            ],
        };
        assert_eq!(ballot.marshal().len(), configuration.max_ballot_size());
    }

    #[test]
    fn ballot_roundtrip() {
        let configuration = two_question_configuration();
        let ballot = Ballot {
            selections: vec![
                QuestionSelection {
                    question_id: "q1".into(),
                    picks: vec![false, true],
                },
                QuestionSelection {
                    question_id: "q2".into(),
                    picks: vec![true, false, true],
                },
            ],
        };
        let decoded = Ballot::unmarshal(ballot.marshal().as_bytes(), &configuration).unwrap();
        assert_eq!(decoded, ballot);
    }

    #[test]
    fn ballot_unmarshal_rejections() {
        let configuration = two_question_configuration();
        let size = configuration.max_ballot_size();

        // wrong total size
        assert!(matches!(
            Ballot::unmarshal(b"short", &configuration),
            Err(BallotError::Size { got: 5, .. })
        ));

        // right size, wrong question id
        let text = "qX:1,0\nq2:0,1,1\n";
        assert_eq!(text.len(), size);
        assert!(matches!(
            Ballot::unmarshal(text.as_bytes(), &configuration),
            Err(BallotError::QuestionMismatch { .. })
        ));

        // too many selections for q1
        let text = "q1:1,1\nq2:0,1,1\n";
        assert!(matches!(
            Ballot::unmarshal(text.as_bytes(), &configuration),
            Err(BallotError::TooManySelections(_))
        ));

        // invalid marker
        let text = "q1:1,2\nq2:0,1,1\n";
        assert!(matches!(
            Ballot::unmarshal(text.as_bytes(), &configuration),
            Err(BallotError::PickMarker(_))
        ));
    }

    #[test]
    fn bulletin_board_overwrites_in_place() {
        let mut board = BulletinBoard::default();
        board.cast_vote("u1", vec![]);
        board.cast_vote("u2", vec![]);
        board.cast_vote(
            "u1",
            vec![EncryptedPair {
                k: vec![1],
                c: vec![2],
            }],
        );

        assert_eq!(board.len(), 2);
        assert_eq!(board.user_ids, vec!["u1", "u2"]);
        assert_eq!(board.ciphervotes[0].len(), 1);
    }

    #[test]
    fn byzantine_threshold() {
        let roster = |n: usize| Roster {
            public_keys: vec![vec![0u8; 48]; n],
        };
        assert_eq!(roster(1).byzantine_threshold(), 1);
        assert_eq!(roster(3).byzantine_threshold(), 1);
        assert_eq!(roster(4).byzantine_threshold(), 2);
        assert_eq!(roster(7).byzantine_threshold(), 3);
        assert_eq!(roster(10).byzantine_threshold(), 4);
    }

    #[test]
    fn status_serializes_as_discriminant() {
        let json = serde_json::to_string(&Status::ShuffledBallots).unwrap();
        assert_eq!(json, "3");
        let status: Status = serde_json::from_str("6").unwrap();
        assert_eq!(status, Status::Canceled);
        assert!(serde_json::from_str::<Status>("9").is_err());
    }

    #[test]
    fn election_serialization_is_canonical() {
        let configuration = two_question_configuration();
        let election = Election {
            election_id: "deadbeef".into(),
            admin_id: "admin".into(),
            status: Status::Open,
            ballot_size: configuration.max_ballot_size(),
            configuration,
            public_key: Some(vec![9u8; 32]),
            bulletin_board: BulletinBoard::default(),
            shuffle_instances: vec![],
            pub_shares_archive: PubSharesArchive::default(),
            decrypted_ballots: vec![],
            roster_buf: vec![1, 2, 3],
            shuffle_threshold: 2,
        };

        let bytes = election_common::encode(&election).unwrap();
        let decoded: Election = election_common::decode(&bytes).unwrap();
        assert_eq!(decoded, election);
        assert_eq!(election_common::encode(&decoded).unwrap(), bytes);
    }
}
