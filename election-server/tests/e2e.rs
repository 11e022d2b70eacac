//! Full pipeline through the node services: create, open, vote, close,
//! concurrent orchestrators racing for the shuffle rounds, public-share
//! submission, and decryption.

use std::sync::Arc;
use std::time::Duration;

use election_server::dkg::{self, DkgService};
use election_server::ordering::SoloOrdering;
use election_server::services::{
    wait_for_inclusion, OrderingService, Pool, TransactionManager,
};
use election_server::shuffle::ShuffleOrchestrator;
use election_common::bls::Keypair;
use election_common::elgamal;
use evoting_contract::types::{
    ciphervote_from_pairs, Ballot, BallotStatus, CastVoteTransaction, CloseElectionTransaction,
    Command, Configuration, CreateElectionTransaction, DecryptBallotsTransaction, Election,
    OpenElectionTransaction, Question, QuestionSelection, Roster, Status,
};
use evoting_contract::Contract;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sha2::{Digest, Sha256};
use tokio::sync::watch;

const TIMEOUT: Duration = Duration::from_secs(5);

struct Node {
    ordering: Arc<dyn OrderingService>,
    pool: Arc<dyn Pool>,
    manager: Arc<TransactionManager>,
    dkg: Arc<DkgService>,
    trustees: Vec<Arc<Keypair>>,
}

fn start_node(trustee_count: usize) -> Node {
    let mut rng = StdRng::seed_from_u64(51);
    let trustees: Vec<Arc<Keypair>> = (0..trustee_count)
        .map(|_| Arc::new(Keypair::generate(&mut rng).unwrap()))
        .collect();
    let roster = Roster {
        public_keys: trustees
            .iter()
            .map(|keypair| keypair.public_key().to_bytes().to_vec())
            .collect(),
    };

    let dkg = Arc::new(DkgService::new(trustees.clone()));
    let contract = Contract::new(dkg.clone());
    let (solo, _sequencer) = SoloOrdering::start(contract, &roster).unwrap();

    let ordering: Arc<dyn OrderingService> = solo.clone();
    let pool: Arc<dyn Pool> = solo;
    let manager = Arc::new(TransactionManager::new(ordering.clone()));

    Node {
        ordering,
        pool,
        manager,
        dkg,
        trustees,
    }
}

impl Node {
    async fn submit(&self, command: Command, payload: &impl serde::Serialize) -> (Vec<u8>, bool, String) {
        let tx = self.manager.make(command, payload).unwrap();
        let id = tx.id.clone();
        let mut events = self.ordering.watch();
        self.pool.add(tx).await.unwrap();
        let (accepted, message) = wait_for_inclusion(&mut events, &id, TIMEOUT).await.unwrap();
        (id, accepted, message)
    }

    fn election(&self, election_id: &[u8]) -> Election {
        let buf = self.ordering.get_proof(election_id).unwrap().unwrap();
        election_common::decode(&buf).unwrap()
    }
}

fn configuration() -> Configuration {
    Configuration {
        main_title: "Referendum".into(),
        questions: vec![Question {
            id: "q1".into(),
            title: "Approve the budget?".into(),
            max_choices: 1,
            choices: vec!["yes".into(), "no".into()],
        }],
    }
}

fn ballot(yes: bool) -> Ballot {
    Ballot {
        selections: vec![QuestionSelection {
            question_id: "q1".into(),
            picks: vec![yes, !yes],
        }],
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn full_election_through_the_node_services() {
    let node = start_node(3);
    let mut rng = StdRng::seed_from_u64(52);

    // create
    let payload = CreateElectionTransaction {
        configuration: configuration(),
        admin_id: "admin".into(),
    };
    let tx = node.manager.make(Command::CreateElection, &payload).unwrap();
    let election_id = Sha256::digest(&tx.id).to_vec();
    let election_id_hex = hex::encode(&election_id);
    let mut events = node.ordering.watch();
    node.pool.add(tx.clone()).await.unwrap();
    let (accepted, message) = wait_for_inclusion(&mut events, &tx.id, TIMEOUT).await.unwrap();
    assert!(accepted, "create denied: {message}");
    assert_eq!(node.election(&election_id).status, Status::Initial);

    // open: link and set up the DKG actor first
    node.dkg.init_actor(&election_id).unwrap();
    let threshold = node.election(&election_id).shuffle_threshold;
    node.dkg.setup(&election_id, threshold, &mut rng).unwrap();

    let (_, accepted, message) = node
        .submit(
            Command::OpenElection,
            &OpenElectionTransaction {
                election_id: election_id_hex.clone(),
            },
        )
        .await;
    assert!(accepted, "open denied: {message}");
    let election = node.election(&election_id);
    assert_eq!(election.status, Status::Open);

    // two voters
    let public_key = election.public_key_point().unwrap().unwrap();
    let ballots = [ballot(true), ballot(false)];
    for (user, plaintext) in ["u1", "u2"].iter().zip(&ballots) {
        let pairs =
            elgamal::encrypt(&public_key, plaintext.marshal().as_bytes(), &mut rng).unwrap();
        let (_, accepted, message) = node
            .submit(
                Command::CastVote,
                &CastVoteTransaction {
                    election_id: election_id_hex.clone(),
                    user_id: user.to_string(),
                    ballot: ciphervote_from_pairs(&pairs),
                },
            )
            .await;
        assert!(accepted, "vote denied: {message}");
    }

    // close
    let (_, accepted, message) = node
        .submit(
            Command::CloseElection,
            &CloseElectionTransaction {
                election_id: election_id_hex.clone(),
                user_id: "admin".into(),
            },
        )
        .await;
    assert!(accepted, "close denied: {message}");

    // every trustee races to contribute a shuffle; threshold is one
    let (_shutdown_sender, shutdown) = watch::channel(false);
    let mut tasks = Vec::new();
    for keypair in &node.trustees {
        let orchestrator = ShuffleOrchestrator::new(
            keypair.clone(),
            node.ordering.clone(),
            node.pool.clone(),
            node.manager.clone(),
            TIMEOUT,
        );
        let id = election_id.clone();
        let shutdown = shutdown.clone();
        tasks.push(tokio::spawn(async move {
            orchestrator.run(&id, shutdown).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    let election = node.election(&election_id);
    assert_eq!(election.status, Status::ShuffledBallots);
    assert_eq!(election.shuffle_instances.len(), election.shuffle_threshold);

    // public shares from the local trustees
    dkg::submit_pub_shares(
        &node.dkg,
        &node.ordering,
        &node.pool,
        &node.manager,
        &election_id,
        TIMEOUT,
    )
    .await
    .unwrap();
    assert_eq!(
        node.election(&election_id).status,
        Status::PubSharesSubmitted
    );

    // decrypt
    let (_, accepted, message) = node
        .submit(
            Command::DecryptBallots,
            &DecryptBallotsTransaction {
                election_id: election_id_hex.clone(),
                user_id: "admin".into(),
            },
        )
        .await;
    assert!(accepted, "decrypt denied: {message}");

    let election = node.election(&election_id);
    assert_eq!(election.status, Status::ResultAvailable);

    let mut decrypted: Vec<String> = election
        .decrypted_ballots
        .iter()
        .map(|entry| {
            assert_eq!(entry.status, BallotStatus::Valid);
            entry.ballot.marshal()
        })
        .collect();
    decrypted.sort();
    let mut expected: Vec<String> = ballots.iter().map(Ballot::marshal).collect();
    expected.sort();
    assert_eq!(decrypted, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn denied_transactions_report_their_cause() {
    let node = start_node(3);

    // closing an election that does not exist is denied with a message
    let (_, accepted, message) = node
        .submit(
            Command::CloseElection,
            &CloseElectionTransaction {
                election_id: hex::encode([1u8; 32]),
                user_id: "admin".into(),
            },
        )
        .await;
    assert!(!accepted);
    assert!(message.contains("does not exist"));
}
