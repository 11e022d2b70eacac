//! The e-voting contract: a deterministic state machine over an ordered log
//! of transactions.
//!
//! The ordering layer invokes [`Contract::execute`] sequentially for every
//! transaction of a block, handing it an exclusive snapshot of the
//! key-value store. Each command handler is an atomic
//! read-validate-mutate-write: any failed check returns an error and leaves
//! the snapshot untouched.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use curve25519_dalek::edwards::EdwardsPoint;
use election_common::bls::BlsError;
use election_common::elgamal::PointError;
use election_common::shuffle::ShuffleError;
use election_common::stream::StreamError;

pub mod types;

mod commands;

use types::{Command, Election, ElectionsMetadata, Roster, Status};

/// Name of the contract, as carried in transaction arguments.
pub const CONTRACT_NAME: &str = "evoting";

/// Transaction argument holding the contract name.
pub const CONTRACT_ARG: &str = "contract";

/// Transaction argument holding the command tag.
pub const CMD_ARG: &str = "cmd";

/// Transaction argument holding the JSON command payload.
pub const ELECTION_ARG: &str = "election";

/// Snapshot key of the global metadata record.
pub const ELECTIONS_METADATA_KEY: &[u8] = b"m";

/// Snapshot key of the serialized trustee roster.
pub const ROSTER_KEY: &[u8] = b"roster";

#[derive(Debug, thiserror::Error)]
#[error("storage: {0}")]
pub struct StorageError(pub String);

/// Read-write view of the key-value store a block executes against.
pub trait Snapshot {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;
    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError>;
}

/// An ordered transaction as delivered by the ordering layer.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: Vec<u8>,
    pub nonce: u64,
    pub args: Vec<(String, Vec<u8>)>,
}

impl Transaction {
    pub fn get_arg(&self, key: &str) -> Option<&[u8]> {
        self.args
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_slice())
    }
}

/// The executor's view of the current transaction within its block:
/// `previous` holds the transactions already executed in the same block.
#[derive(Clone, Copy, Debug)]
pub struct Step<'a> {
    pub previous: &'a [Transaction],
    pub current: &'a Transaction,
}

/// Boundary to the DKG collaborator: the executor only ever asks a
/// registered actor for the collective public key.
pub trait DkgRegistry: Send + Sync {
    /// The collective key of the actor registered for this election, if
    /// any.
    fn public_key(&self, election_id: &[u8]) -> Option<EdwardsPoint>;
}

/// Keys of the record deserializer registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RecordKey {
    Election,
    Roster,
}

/// A record deserialized through the registry.
pub enum Record {
    Election(Box<Election>),
    Roster(Roster),
}

type RecordFactory = fn(&[u8]) -> Result<Record, serde_json::Error>;

/// Registry of snapshot-record deserializers, keyed by record type and
/// populated at startup.
pub struct FactoryRegistry {
    factories: HashMap<RecordKey, RecordFactory>,
}

impl Default for FactoryRegistry {
    fn default() -> Self {
        let mut factories: HashMap<RecordKey, RecordFactory> = HashMap::new();
        factories.insert(RecordKey::Election, |buf| {
            election_common::decode(buf).map(|election| Record::Election(Box::new(election)))
        });
        factories.insert(RecordKey::Roster, |buf| {
            election_common::decode(buf).map(Record::Roster)
        });
        Self { factories }
    }
}

impl FactoryRegistry {
    fn factory(&self, key: RecordKey) -> Result<&RecordFactory, ExecutionError> {
        self.factories
            .get(&key)
            .ok_or(ExecutionError::MissingFactory(key))
    }

    /// Deserializes an election record.
    pub fn election(&self, buf: &[u8]) -> Result<Election, ExecutionError> {
        match (self.factory(RecordKey::Election)?)(buf)
            .map_err(|err| ExecutionError::MalformedRecord(RecordKey::Election, err.to_string()))?
        {
            Record::Election(election) => Ok(*election),
            _ => Err(ExecutionError::WrongRecordType(RecordKey::Election)),
        }
    }

    /// Deserializes a roster record.
    pub fn roster(&self, buf: &[u8]) -> Result<Roster, ExecutionError> {
        match (self.factory(RecordKey::Roster)?)(buf)
            .map_err(|err| ExecutionError::MalformedRecord(RecordKey::Roster, err.to_string()))?
        {
            Record::Roster(roster) => Ok(roster),
            _ => Err(ExecutionError::WrongRecordType(RecordKey::Roster)),
        }
    }
}

/// Describes everything that can make a command fail. Handlers never
/// mutate the snapshot on any of these.
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("{0:?} not found in tx arg")]
    MissingArgument(&'static str),
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    #[error("failed to decode transaction payload: {0}")]
    MalformedPayload(String),
    #[error("failed to decode electionIDHex: {0}")]
    MalformedElectionId(#[from] hex::FromHexError),
    #[error("election {0} does not exist")]
    UnknownElection(String),
    #[error("electionID does not match: {requested} != {stored}")]
    ElectionIdMismatch { requested: String, stored: String },
    #[error("record factory not found: {0:?}")]
    MissingFactory(RecordKey),
    #[error("failed to deserialize {0:?} record: {1}")]
    MalformedRecord(RecordKey, String),
    #[error("wrong record type from {0:?} factory")]
    WrongRecordType(RecordKey),
    #[error("failed to serialize record: {0}")]
    Serialization(String),
    #[error("configuration of election is incoherent or has duplicated IDs")]
    InvalidConfiguration,
    #[error("pubkey is already set")]
    PublicKeyAlreadySet,
    #[error("the election has no public key")]
    MissingPublicKey,
    #[error("no DKG actor for election {0}")]
    MissingDkgActor(String),
    #[error("status not {expected}: current status is {current}")]
    WrongStatus { expected: Status, current: Status },
    #[error("cannot cancel an election in status {0}")]
    CancelTerminal(Status),
    #[error("the ballot has unexpected length: {got} != {expected}")]
    BallotLength { got: usize, expected: usize },
    #[error("part of the casted ballot has empty ElGamal pairs")]
    EmptyPair,
    #[error("casted ballot has invalid ElGamal pairs: {0}")]
    InvalidPair(PointError),
    #[error("only the admin can {0} the election")]
    NotAdmin(&'static str),
    #[error("at least two ballots are required")]
    NotEnoughBallots,
    #[error("wrong shuffle round: expected {expected}, transaction is for {got}")]
    WrongShuffleRound { expected: usize, got: usize },
    #[error("wrong pubShare submission round: expected {expected}, transaction is for {got}")]
    WrongPubSharesRound { expected: usize, got: usize },
    #[error("a shuffle is already happening in this round ({0})")]
    ShuffleRoundTaken(usize),
    #[error("pubShares have already been submitted in this round ({0})")]
    PubSharesRoundTaken(usize),
    #[error("public key not associated to a member of the roster: {0}")]
    NotRosterMember(String),
    #[error("a node already submitted a shuffle that has been accepted in round {0}")]
    DuplicateShuffler(usize),
    #[error("the node already submitted its pubShares")]
    DuplicatePubShareSubmitter,
    #[error("could not decode signer identity: {0}")]
    MalformedSigner(BlsError),
    #[error("signature does not match the {subject}: {source}")]
    SignatureMismatch {
        subject: &'static str,
        #[source]
        source: BlsError,
    },
    #[error("could not create semi-random stream: {0}")]
    Stream(#[from] StreamError),
    #[error("randomVector has unexpected length: {got} != {expected}")]
    RandomVectorLength { got: usize, expected: usize },
    #[error("random vector from shuffle transaction is different than expected random vector")]
    RandomVectorMismatch,
    #[error("the shuffled ballots are malformed: {0}")]
    MalformedShuffledBallots(PointError),
    #[error("proof verification failed: {0}")]
    Proof(#[from] ShuffleError),
    #[error("pubShares submission has wrong shape: {0}")]
    MalformedPubShares(String),
    #[error("failed to decrypt (K, C) pair: {0}")]
    Decrypt(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// The evoting contract. Dispatches ordered transactions to the command
/// handlers and owns the deserializer registry.
pub struct Contract {
    context: FactoryRegistry,
    dkg: Arc<dyn DkgRegistry>,
}

impl Contract {
    pub fn new(dkg: Arc<dyn DkgRegistry>) -> Self {
        Self {
            context: FactoryRegistry::default(),
            dkg,
        }
    }

    /// Entry point of the executor: reads the command tag from the current
    /// transaction and runs the matching handler against the snapshot.
    pub fn execute(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let cmd = step
            .current
            .get_arg(CMD_ARG)
            .ok_or(ExecutionError::MissingArgument(CMD_ARG))?;
        let cmd = std::str::from_utf8(cmd)
            .map_err(|_| ExecutionError::UnknownCommand("<non-utf8>".into()))?;
        let command = Command::from_str(cmd)
            .map_err(|_| ExecutionError::UnknownCommand(cmd.to_string()))?;

        match command {
            Command::CreateElection => self.create_election(snapshot, step),
            Command::OpenElection => self.open_election(snapshot, step),
            Command::CastVote => self.cast_vote(snapshot, step),
            Command::CloseElection => self.close_election(snapshot, step),
            Command::ShuffleBallots => self.shuffle_ballots(snapshot, step),
            Command::RegisterPubShares => self.register_pub_shares(snapshot, step),
            Command::DecryptBallots => self.decrypt_ballots(snapshot, step),
            Command::CancelElection => self.cancel_election(snapshot, step),
        }
    }

    /// Decodes the command payload of a transaction.
    fn transaction<T: serde::de::DeserializeOwned>(
        tx: &Transaction,
    ) -> Result<T, ExecutionError> {
        let buf = tx
            .get_arg(ELECTION_ARG)
            .ok_or(ExecutionError::MissingArgument(ELECTION_ARG))?;
        election_common::decode(buf).map_err(|err| ExecutionError::MalformedPayload(err.to_string()))
    }

    /// Reads an election from the snapshot. Returns the record and the raw
    /// (non-hex) election id the record is keyed by.
    fn election(
        &self,
        snapshot: &dyn Snapshot,
        election_id_hex: &str,
    ) -> Result<(Election, Vec<u8>), ExecutionError> {
        let election_id = hex::decode(election_id_hex)?;
        let buf = snapshot
            .get(&election_id)?
            .ok_or_else(|| ExecutionError::UnknownElection(election_id_hex.to_string()))?;
        let election = self.context.election(&buf)?;
        if election.election_id != election_id_hex {
            return Err(ExecutionError::ElectionIdMismatch {
                requested: election_id_hex.to_string(),
                stored: election.election_id,
            });
        }
        Ok((election, election_id))
    }

    /// Serializes and writes back an election record.
    fn write_election(
        snapshot: &mut dyn Snapshot,
        election_id: &[u8],
        election: &Election,
    ) -> Result<(), ExecutionError> {
        let buf = election_common::encode(election)
            .map_err(|err| ExecutionError::Serialization(err.to_string()))?;
        snapshot.set(election_id, buf)?;
        Ok(())
    }

    /// Reads the metadata index, defaulting to an empty one.
    fn metadata(snapshot: &dyn Snapshot) -> Result<ElectionsMetadata, ExecutionError> {
        match snapshot.get(ELECTIONS_METADATA_KEY)? {
            Some(buf) if !buf.is_empty() => election_common::decode(&buf)
                .map_err(|err| ExecutionError::MalformedPayload(err.to_string())),
            _ => Ok(ElectionsMetadata::default()),
        }
    }
}
