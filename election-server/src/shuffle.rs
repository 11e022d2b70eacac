//! The shuffle orchestrator: the per-node driver that contributes this
//! trustee's shuffle round once an election closes.
//!
//! The orchestrator is idempotent: it re-reads the committed state before
//! every attempt and stops as soon as the threshold is reached, its own
//! key already appears as a shuffler, or the election has moved on.

use std::sync::Arc;
use std::time::Duration;

use curve25519_dalek::scalar::Scalar;
use election_common::bls::Keypair;
use election_common::elgamal::PointError;
use election_common::shuffle::{shuffle_sequences, ShuffleError};
use election_common::stream::SemiRandomStream;
use evoting_contract::types::{
    elgamal_columns, Ciphervote, Command, Election, EncryptedPair, RandomVector,
    ShuffleBallotsTransaction, Status,
};
use evoting_contract::Transaction;
use rand::rngs::OsRng;
use tokio::sync::watch;

use crate::services::{
    wait_for_inclusion, OrderingService, Pool, ServiceError, TransactionManager,
};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("election {0} does not exist")]
    UnknownElection(String),
    #[error("failed to decode election record: {0}")]
    MalformedElection(String),
    #[error("the election must be closed: but status is {0}")]
    NotClosed(Status),
    #[error("the election has no public key")]
    MissingPublicKey,
    #[error("malformed ciphertext on the board: {0}")]
    Ciphertext(#[from] PointError),
    #[error("failed to shuffle: {0}")]
    Shuffle(#[from] ShuffleError),
    #[error(transparent)]
    Service(#[from] ServiceError),
}

pub struct ShuffleOrchestrator {
    keypair: Arc<Keypair>,
    ordering: Arc<dyn OrderingService>,
    pool: Arc<dyn Pool>,
    manager: Arc<TransactionManager>,
    inclusion_timeout: Duration,
}

impl ShuffleOrchestrator {
    pub fn new(
        keypair: Arc<Keypair>,
        ordering: Arc<dyn OrderingService>,
        pool: Arc<dyn Pool>,
        manager: Arc<TransactionManager>,
        inclusion_timeout: Duration,
    ) -> Self {
        Self {
            keypair,
            ordering,
            pool,
            manager,
            inclusion_timeout,
        }
    }

    /// Drives shuffling for the election until this trustee's contribution
    /// is no longer needed, or `shutdown` fires.
    pub async fn run(
        &self,
        election_id: &[u8],
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), OrchestratorError> {
        loop {
            let election = self.get_election(election_id)?;
            match election.status {
                Status::Closed => {}
                // the mix already completed without us
                Status::ShuffledBallots
                | Status::PubSharesSubmitted
                | Status::ResultAvailable => return Ok(()),
                status => return Err(OrchestratorError::NotClosed(status)),
            }
            if election.shuffle_instances.len() >= election.shuffle_threshold {
                return Ok(());
            }
            let own_key = self.keypair.public_key().to_bytes();
            if election
                .shuffle_instances
                .iter()
                .any(|instance| instance.shuffler_public_key[..] == own_key[..])
            {
                return Ok(());
            }

            let tx = self.make_transaction(&election, election_id)?;
            let mut events = self.ordering.watch();
            self.pool.add(tx.clone()).await?;

            tokio::select! {
                included = wait_for_inclusion(&mut events, &tx.id, self.inclusion_timeout) => {
                    let (accepted, message) = included?;
                    if accepted {
                        tracing::info!(
                            election = %election.election_id,
                            "shuffle transaction accepted"
                        );
                    } else {
                        // most likely lost the round race, recheck the state
                        tracing::info!(%message, "shuffle transaction denied");
                    }
                }
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Builds a signed shuffle transaction for the next round.
    fn make_transaction(
        &self,
        election: &Election,
        election_id: &[u8],
    ) -> Result<Transaction, OrchestratorError> {
        let round = election.shuffle_instances.len();
        let input: &[Ciphervote] = if round == 0 {
            &election.bulletin_board.ciphervotes
        } else {
            &election.shuffle_instances[round - 1].shuffled_ballots
        };
        let public_key = election
            .public_key_point()?
            .ok_or(OrchestratorError::MissingPublicKey)?;

        let (x, y) = elgamal_columns(input)?;
        let mut rng = OsRng;

        // shuffle until the output digest seeds the stream; the weight
        // vector is then fully determined by the transaction content
        let (shuffled_ballots, weights, proof) = loop {
            let (x_bar, y_bar, secrets) = shuffle_sequences(&public_key, &x, &y, &mut rng)?;
            let shuffled_ballots = columns_to_ciphervotes(&x_bar, &y_bar);
            let digest =
                ShuffleBallotsTransaction::shuffle_digest(election_id, &shuffled_ballots);
            let Ok(mut stream) = SemiRandomStream::new(&digest) else {
                continue;
            };
            let weights: Vec<Scalar> = (0..election.chunks_per_ballot())
                .map(|_| stream.pick_scalar())
                .collect();
            let proof = secrets.prove(&public_key, &x, &y, &x_bar, &y_bar, &weights, &mut rng)?;
            break (shuffled_ballots, weights, proof);
        };

        let mut payload = ShuffleBallotsTransaction {
            election_id: election.election_id.clone(),
            round,
            shuffled_ballots,
            proof: proof.serialize()?,
            random_vector: RandomVector::from_scalars(&weights),
            public_key: self.keypair.public_key().to_bytes().to_vec(),
            signature: vec![],
        };
        let hash = payload.hash_shuffle(election_id);
        payload.signature = self.keypair.sign(&hash).to_bytes().to_vec();

        Ok(self.manager.make(Command::ShuffleBallots, &payload)?)
    }

    fn get_election(&self, election_id: &[u8]) -> Result<Election, OrchestratorError> {
        let buf = self
            .ordering
            .get_proof(election_id)?
            .ok_or_else(|| OrchestratorError::UnknownElection(hex::encode(election_id)))?;
        election_common::decode(&buf)
            .map_err(|err| OrchestratorError::MalformedElection(err.to_string()))
    }
}

fn columns_to_ciphervotes(
    x: &[Vec<curve25519_dalek::edwards::EdwardsPoint>],
    y: &[Vec<curve25519_dalek::edwards::EdwardsPoint>],
) -> Vec<Ciphervote> {
    let ballots = x[0].len();
    (0..ballots)
        .map(|i| {
            (0..x.len())
                .map(|j| EncryptedPair::from_points(&x[j][i], &y[j][i]))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use curve25519_dalek::constants::ED25519_BASEPOINT_POINT;
    use evoting_contract::types::{
        BulletinBoard, Configuration, PubSharesArchive, Question, ShuffleInstance,
    };
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Mutex;
    use tokio::sync::broadcast;

    /// Serves a fixed election record and swallows pool submissions.
    struct FakeLedger {
        election: Mutex<Option<Election>>,
        election_id: Vec<u8>,
        added: Mutex<Vec<Transaction>>,
        events: broadcast::Sender<crate::services::OrderingEvent>,
    }

    impl FakeLedger {
        fn new(election_id: Vec<u8>, election: Option<Election>) -> Arc<Self> {
            let (events, _) = broadcast::channel(8);
            Arc::new(Self {
                election: Mutex::new(election),
                election_id,
                added: Mutex::new(vec![]),
                events,
            })
        }
    }

    impl OrderingService for FakeLedger {
        fn get_proof(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
            if key != self.election_id {
                return Ok(None);
            }
            Ok(self
                .election
                .lock()
                .unwrap()
                .as_ref()
                .map(|election| election_common::encode(election).unwrap()))
        }

        fn watch(&self) -> broadcast::Receiver<crate::services::OrderingEvent> {
            self.events.subscribe()
        }

        fn next_nonce(&self) -> u64 {
            0
        }
    }

    #[async_trait]
    impl Pool for FakeLedger {
        async fn add(&self, transaction: Transaction) -> Result<(), ServiceError> {
            self.added.lock().unwrap().push(transaction);
            Ok(())
        }
    }

    fn configuration() -> Configuration {
        Configuration {
            main_title: "test".into(),
            questions: vec![Question {
                id: "q1".into(),
                title: "t".into(),
                max_choices: 1,
                choices: vec!["a".into(), "b".into()],
            }],
        }
    }

    fn election(status: Status, threshold: usize) -> Election {
        let configuration = configuration();
        Election {
            election_id: hex::encode([7u8; 32]),
            admin_id: "admin".into(),
            status,
            ballot_size: configuration.max_ballot_size(),
            configuration,
            public_key: Some(
                election_common::elgamal::encode_point(&ED25519_BASEPOINT_POINT).to_vec(),
            ),
            bulletin_board: BulletinBoard::default(),
            shuffle_instances: vec![],
            pub_shares_archive: PubSharesArchive::default(),
            decrypted_ballots: vec![],
            roster_buf: vec![],
            shuffle_threshold: threshold,
        }
    }

    fn orchestrator(ledger: Arc<FakeLedger>, keypair: Arc<Keypair>) -> ShuffleOrchestrator {
        let ordering: Arc<dyn OrderingService> = ledger.clone();
        let manager = Arc::new(TransactionManager::new(ordering.clone()));
        ShuffleOrchestrator::new(
            keypair,
            ordering,
            ledger,
            manager,
            Duration::from_millis(100),
        )
    }

    #[tokio::test]
    async fn fails_when_the_election_is_not_closed() {
        let mut rng = StdRng::seed_from_u64(41);
        let keypair = Arc::new(Keypair::generate(&mut rng).unwrap());
        let ledger = FakeLedger::new(vec![7u8; 32], Some(election(Status::Open, 1)));
        let (_, shutdown) = watch::channel(false);

        let err = orchestrator(ledger, keypair)
            .run(&[7u8; 32], shutdown)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "the election must be closed: but status is Open");
    }

    #[tokio::test]
    async fn fails_on_an_unknown_election() {
        let mut rng = StdRng::seed_from_u64(42);
        let keypair = Arc::new(Keypair::generate(&mut rng).unwrap());
        let ledger = FakeLedger::new(vec![7u8; 32], None);
        let (_, shutdown) = watch::channel(false);

        let err = orchestrator(ledger, keypair)
            .run(&[7u8; 32], shutdown)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[tokio::test]
    async fn stops_when_the_mix_is_complete() {
        let mut rng = StdRng::seed_from_u64(43);
        let keypair = Arc::new(Keypair::generate(&mut rng).unwrap());
        let ledger = FakeLedger::new(
            vec![7u8; 32],
            Some(election(Status::ShuffledBallots, 1)),
        );
        let (_, shutdown) = watch::channel(false);

        orchestrator(ledger.clone(), keypair)
            .run(&[7u8; 32], shutdown)
            .await
            .unwrap();
        assert!(ledger.added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn does_not_submit_a_second_shuffle() {
        let mut rng = StdRng::seed_from_u64(44);
        let keypair = Arc::new(Keypair::generate(&mut rng).unwrap());

        let mut record = election(Status::Closed, 2);
        record.shuffle_instances.push(ShuffleInstance {
            shuffled_ballots: vec![],
            proof: vec![],
            shuffler_public_key: keypair.public_key().to_bytes().to_vec(),
        });
        let ledger = FakeLedger::new(vec![7u8; 32], Some(record));
        let (_, shutdown) = watch::channel(false);

        orchestrator(ledger.clone(), keypair)
            .run(&[7u8; 32], shutdown)
            .await
            .unwrap();
        assert!(ledger.added.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stops_when_the_threshold_is_reached() {
        let mut rng = StdRng::seed_from_u64(45);
        let keypair = Arc::new(Keypair::generate(&mut rng).unwrap());
        let other = Keypair::generate(&mut rng).unwrap();

        let mut record = election(Status::Closed, 1);
        record.shuffle_instances.push(ShuffleInstance {
            shuffled_ballots: vec![],
            proof: vec![],
            shuffler_public_key: other.public_key().to_bytes().to_vec(),
        });
        let ledger = FakeLedger::new(vec![7u8; 32], Some(record));
        let (_, shutdown) = watch::channel(false);

        orchestrator(ledger.clone(), keypair)
            .run(&[7u8; 32], shutdown)
            .await
            .unwrap();
        assert!(ledger.added.lock().unwrap().is_empty());
    }
}
