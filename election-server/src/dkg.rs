//! The DKG actor service: one actor per election, linked on request and
//! populated on setup.
//!
//! The distributed key-generation subprotocol itself is an external
//! collaborator; this service fills the actor interface it would populate
//! by dealing the (t, n) sharing locally across the node's trustees, and
//! computes the public decryption shares the trustees register on chain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
use curve25519_dalek::edwards::EdwardsPoint;
use election_common::bls::Keypair;
use election_common::elgamal::{self, PointError};
use election_common::secretshare::{deal, PriShare};
use evoting_contract::types::{
    Ciphervote, Command, Election, PubShare, PubShareSubmission, RegisterPubSharesTransaction,
    Status,
};
use evoting_contract::DkgRegistry;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use crate::services::{
    wait_for_inclusion, OrderingService, Pool, ServiceError, TransactionManager,
};

#[derive(Debug, thiserror::Error)]
pub enum DkgError {
    #[error("DKG was already initialized for election {0}")]
    AlreadyInitialized(String),
    #[error("no DKG actor has been initialized for election {0}")]
    NotInitialized(String),
    #[error("the DKG for election {0} has not been set up")]
    NotSetup(String),
    #[error("unknown trustee index {0}")]
    UnknownTrustee(usize),
    #[error("election {0} does not exist")]
    UnknownElection(String),
    #[error("malformed ciphertext: {0}")]
    Ciphertext(#[from] PointError),
    #[error("the election is not in status ShuffledBallots: {0}")]
    NotShuffled(Status),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

/// The dealt sharing an actor holds after setup.
struct ActorState {
    public_key: EdwardsPoint,
    /// One private share per local trustee, roster-aligned.
    shares: Vec<PriShare>,
}

/// A per-election actor: linked first, then set up.
enum DkgActor {
    Initialized,
    Ready(ActorState),
}

/// Registry of DKG actors keyed by raw election id.
pub struct DkgService {
    trustees: Vec<Arc<Keypair>>,
    actors: Mutex<HashMap<Vec<u8>, DkgActor>>,
}

impl DkgService {
    pub fn new(trustees: Vec<Arc<Keypair>>) -> Self {
        Self {
            trustees,
            actors: Mutex::new(HashMap::new()),
        }
    }

    pub fn trustee_count(&self) -> usize {
        self.trustees.len()
    }

    /// Links a new actor to the election.
    pub fn init_actor(&self, election_id: &[u8]) -> Result<(), DkgError> {
        let mut actors = self.actors.lock().expect("actor registry poisoned");
        if actors.contains_key(election_id) {
            return Err(DkgError::AlreadyInitialized(hex::encode(election_id)));
        }
        actors.insert(election_id.to_vec(), DkgActor::Initialized);
        tracing::info!(election = %hex::encode(election_id), "DKG actor initialized");
        Ok(())
    }

    /// Runs the key generation for an initialized actor and returns the
    /// collective public key.
    pub fn setup<R: RngCore + CryptoRng>(
        &self,
        election_id: &[u8],
        threshold: usize,
        rng: &mut R,
    ) -> Result<EdwardsPoint, DkgError> {
        let mut actors = self.actors.lock().expect("actor registry poisoned");
        match actors.get(election_id) {
            None => return Err(DkgError::NotInitialized(hex::encode(election_id))),
            Some(DkgActor::Ready(_)) => {
                return Err(DkgError::AlreadyInitialized(hex::encode(election_id)))
            }
            Some(DkgActor::Initialized) => {}
        }

        let secret = curve25519_dalek::scalar::Scalar::random(rng);
        let public_key = ED25519_BASEPOINT_POINT * secret;
        let shares = deal(&secret, threshold, self.trustees.len(), rng);

        actors.insert(
            election_id.to_vec(),
            DkgActor::Ready(ActorState { public_key, shares }),
        );
        tracing::info!(election = %hex::encode(election_id), "DKG setup done");
        Ok(public_key)
    }

    /// Computes one trustee's `[ballot][pair]` decryption shares of the
    /// given ciphervotes: `d_i · K` for every pair.
    pub fn compute_pub_shares(
        &self,
        election_id: &[u8],
        trustee: usize,
        ciphervotes: &[Ciphervote],
    ) -> Result<PubShareSubmission, DkgError> {
        let actors = self.actors.lock().expect("actor registry poisoned");
        let state = match actors.get(election_id) {
            None => return Err(DkgError::NotInitialized(hex::encode(election_id))),
            Some(DkgActor::Initialized) => {
                return Err(DkgError::NotSetup(hex::encode(election_id)))
            }
            Some(DkgActor::Ready(state)) => state,
        };
        let share = state
            .shares
            .get(trustee)
            .ok_or(DkgError::UnknownTrustee(trustee))?;

        ciphervotes
            .iter()
            .map(|ciphervote| {
                ciphervote
                    .iter()
                    .map(|pair| {
                        let (k, _) = pair.points()?;
                        Ok(PubShare {
                            index: share.index,
                            value: elgamal::encode_point(&(k * share.value)).to_vec(),
                        })
                    })
                    .collect()
            })
            .collect::<Result<PubShareSubmission, PointError>>()
            .map_err(DkgError::Ciphertext)
    }
}

impl DkgRegistry for DkgService {
    fn public_key(&self, election_id: &[u8]) -> Option<EdwardsPoint> {
        let actors = self.actors.lock().ok()?;
        match actors.get(election_id)? {
            DkgActor::Ready(state) => Some(state.public_key),
            DkgActor::Initialized => None,
        }
    }
}

/// Submits the local trustees' public shares one round at a time until the
/// election reaches PubSharesSubmitted.
pub async fn submit_pub_shares(
    dkg: &DkgService,
    ordering: &Arc<dyn OrderingService>,
    pool: &Arc<dyn Pool>,
    manager: &TransactionManager,
    election_id: &[u8],
    timeout: Duration,
) -> Result<(), DkgError> {
    loop {
        let election = get_election(ordering.as_ref(), election_id)?;
        match election.status {
            Status::ShuffledBallots => {}
            Status::PubSharesSubmitted | Status::ResultAvailable => return Ok(()),
            status => return Err(DkgError::NotShuffled(status)),
        }

        let shuffled_ballots = &election
            .shuffle_instances
            .last()
            .ok_or(DkgError::NotShuffled(election.status))?
            .shuffled_ballots;
        let round = election.pub_shares_archive.submissions.len();

        // the first local trustee that has not submitted yet goes next
        let Some(trustee) = (0..dkg.trustee_count()).find(|&trustee| {
            let key = dkg.trustees[trustee].public_key().to_bytes();
            !election
                .pub_shares_archive
                .public_keys
                .iter()
                .any(|submitted| submitted[..] == key[..])
        }) else {
            return Ok(());
        };

        let pub_shares = dkg.compute_pub_shares(election_id, trustee, shuffled_ballots)?;
        let mut payload = RegisterPubSharesTransaction {
            election_id: election.election_id.clone(),
            round,
            pub_shares,
            public_key: dkg.trustees[trustee].public_key().to_bytes().to_vec(),
            signature: vec![],
        };
        let hash = payload.hash_pub_shares(election_id);
        payload.signature = dkg.trustees[trustee].sign(&hash).to_bytes().to_vec();

        let tx = manager.make(Command::RegisterPubShares, &payload)?;
        let mut events = ordering.watch();
        pool.add(tx.clone()).await.map_err(DkgError::Service)?;
        let (accepted, message) =
            wait_for_inclusion(&mut events, &tx.id, timeout).await.map_err(DkgError::Service)?;
        if !accepted {
            tracing::info!(%message, "pubShares transaction denied, rechecking state");
        }
    }
}

/// Reads a committed election record.
fn get_election(
    ordering: &dyn OrderingService,
    election_id: &[u8],
) -> Result<Election, DkgError> {
    let buf = ordering
        .get_proof(election_id)?
        .ok_or_else(|| DkgError::UnknownElection(hex::encode(election_id)))?;
    election_common::decode(&buf)
        .map_err(|err| DkgError::Service(ServiceError::Payload(err.to_string())))
}

/// Generates the dev-cluster trustee keypairs of this node.
pub fn generate_trustees(count: usize) -> Vec<Arc<Keypair>> {
    let mut rng = OsRng;
    (0..count)
        .map(|_| {
            Arc::new(Keypair::generate(&mut rng).expect("operating system randomness available"))
        })
        .collect()
}
