//! Command handlers of the evoting contract.

use curve25519_dalek::edwards::EdwardsPoint;
use election_common::bls;
use election_common::elgamal;
use election_common::secretshare::{self, PubShare as SharePoint};
use election_common::shuffle::{self, PairShuffleProof};
use election_common::stream::SemiRandomStream;
use sha2::{Digest, Sha256};

use crate::types::{
    elgamal_columns, Ballot, BallotStatus, CancelElectionTransaction, CastVoteTransaction,
    Ciphervote, CloseElectionTransaction, Command, CreateElectionTransaction, DecryptBallotsTransaction,
    DecryptedBallot, Election, OpenElectionTransaction, PubShareSubmission,
    PubSharesArchive, RegisterPubSharesTransaction, ShuffleBallotsTransaction, ShuffleInstance,
    Status,
};
use crate::{
    Contract, ExecutionError, Snapshot, Step, Transaction, CMD_ARG, CONTRACT_ARG, CONTRACT_NAME,
    ELECTIONS_METADATA_KEY, ROSTER_KEY,
};

impl Contract {
    /// Performs the CreateElection command.
    pub(crate) fn create_election(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: CreateElectionTransaction = Self::transaction(step.current)?;

        let roster_buf = snapshot
            .get(ROSTER_KEY)?
            .ok_or_else(|| crate::StorageError("failed to get roster".into()))?;
        let roster = self.context.roster(&roster_buf)?;

        // the election is addressed by the digest of its creation transaction
        let election_id: [u8; 32] = Sha256::digest(&step.current.id).into();

        if !tx.configuration.is_valid() {
            return Err(ExecutionError::InvalidConfiguration);
        }

        let election = Election {
            election_id: hex::encode(election_id),
            admin_id: tx.admin_id,
            status: Status::Initial,
            ballot_size: tx.configuration.max_ballot_size(),
            configuration: tx.configuration,
            // the public key is set by the open command
            public_key: None,
            bulletin_board: Default::default(),
            shuffle_instances: vec![],
            pub_shares_archive: PubSharesArchive::default(),
            decrypted_ballots: vec![],
            // the participants are set once and for all; if a third of them
            // go away the election will never end
            roster_buf,
            shuffle_threshold: roster.byzantine_threshold(),
        };

        Self::write_election(snapshot, &election_id, &election)?;

        let mut metadata = Self::metadata(snapshot)?;
        metadata.add(&election.election_id);
        let metadata = election_common::encode(&metadata)
            .map_err(|err| ExecutionError::Serialization(err.to_string()))?;
        snapshot.set(ELECTIONS_METADATA_KEY, metadata)?;

        Ok(())
    }

    /// Performs the OpenElection command: sets the collective key fetched
    /// from the DKG actor of this election.
    pub(crate) fn open_election(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: OpenElectionTransaction = Self::transaction(step.current)?;
        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        if election.status != Status::Initial {
            return Err(ExecutionError::WrongStatus {
                expected: Status::Initial,
                current: election.status,
            });
        }
        if election.public_key.is_some() {
            return Err(ExecutionError::PublicKeyAlreadySet);
        }

        let public_key = self
            .dkg
            .public_key(&election_id)
            .ok_or_else(|| ExecutionError::MissingDkgActor(tx.election_id.clone()))?;

        election.status = Status::Open;
        election.public_key = Some(elgamal::encode_point(&public_key).to_vec());

        Self::write_election(snapshot, &election_id, &election)
    }

    /// Performs the CastVote command.
    pub(crate) fn cast_vote(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: CastVoteTransaction = Self::transaction(step.current)?;
        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        if election.status != Status::Open {
            return Err(ExecutionError::WrongStatus {
                expected: Status::Open,
                current: election.status,
            });
        }

        if tx.ballot.len() != election.chunks_per_ballot() {
            return Err(ExecutionError::BallotLength {
                got: tx.ballot.len(),
                expected: election.chunks_per_ballot(),
            });
        }
        for pair in &tx.ballot {
            if pair.k.is_empty() || pair.c.is_empty() {
                return Err(ExecutionError::EmptyPair);
            }
            pair.points().map_err(ExecutionError::InvalidPair)?;
        }

        election.bulletin_board.cast_vote(&tx.user_id, tx.ballot);

        Self::write_election(snapshot, &election_id, &election)
    }

    /// Performs the CloseElection command.
    pub(crate) fn close_election(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: CloseElectionTransaction = Self::transaction(step.current)?;
        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        if election.admin_id != tx.user_id {
            return Err(ExecutionError::NotAdmin("close"));
        }
        if election.status != Status::Open {
            return Err(ExecutionError::WrongStatus {
                expected: Status::Open,
                current: election.status,
            });
        }
        if election.bulletin_board.len() <= 1 {
            return Err(ExecutionError::NotEnoughBallots);
        }

        election.status = Status::Closed;

        Self::write_election(snapshot, &election_id, &election)
    }

    /// Performs the ShuffleBallots command: validates one shuffle round and
    /// appends it, advancing the status once the threshold is reached.
    pub(crate) fn shuffle_ballots(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: ShuffleBallotsTransaction = Self::transaction(step.current)?;

        check_previous_shuffles(&step, &tx.election_id, tx.round)?;

        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        // rounds start at 0 and are contiguous; a stale round is reported
        // as such even when the status has already advanced
        let expected_round = election.shuffle_instances.len();
        if tx.round != expected_round {
            return Err(ExecutionError::WrongShuffleRound {
                expected: expected_round,
                got: tx.round,
            });
        }

        if election.status != Status::Closed {
            return Err(ExecutionError::WrongStatus {
                expected: Status::Closed,
                current: election.status,
            });
        }

        let roster = self.context.roster(&election.roster_buf)?;
        if !roster.contains(&tx.public_key) {
            return Err(ExecutionError::NotRosterMember(hex::encode(&tx.public_key)));
        }

        // a node may contribute at most one accepted shuffle
        for (round, instance) in election.shuffle_instances.iter().enumerate() {
            if instance.shuffler_public_key == tx.public_key {
                return Err(ExecutionError::DuplicateShuffler(round));
            }
        }

        let signer =
            bls::PublicKey::from_bytes(&tx.public_key).map_err(ExecutionError::MalformedSigner)?;
        let signature =
            bls::Signature::from_bytes(&tx.signature).map_err(ExecutionError::MalformedSigner)?;
        let shuffle_hash = tx.hash_shuffle(&election_id);
        signer
            .verify(&shuffle_hash, &signature)
            .map_err(|source| ExecutionError::SignatureMismatch {
                subject: "shuffle",
                source,
            })?;

        // the random vector must regenerate from the shuffle digest
        let random_vector = tx
            .random_vector
            .unmarshal()
            .map_err(|err| ExecutionError::MalformedPayload(err.to_string()))?;
        if random_vector.len() != election.chunks_per_ballot() {
            return Err(ExecutionError::RandomVectorLength {
                got: random_vector.len(),
                expected: election.chunks_per_ballot(),
            });
        }
        let digest =
            ShuffleBallotsTransaction::shuffle_digest(&election_id, &tx.shuffled_ballots);
        let mut stream = SemiRandomStream::new(&digest)?;
        for scalar in &random_vector {
            if stream.pick_scalar() != *scalar {
                return Err(ExecutionError::RandomVectorMismatch);
            }
        }

        let input_ballots: &[Ciphervote] = if tx.round == 0 {
            &election.bulletin_board.ciphervotes
        } else {
            &election.shuffle_instances[election.shuffle_instances.len() - 1].shuffled_ballots
        };

        let (x, y) =
            elgamal_columns(input_ballots).map_err(ExecutionError::MalformedShuffledBallots)?;
        let (x_bar, y_bar) = elgamal_columns(&tx.shuffled_ballots)
            .map_err(ExecutionError::MalformedShuffledBallots)?;

        let public_key = election
            .public_key_point()
            .map_err(ExecutionError::MalformedShuffledBallots)?
            .ok_or(ExecutionError::MissingPublicKey)?;

        let proof = PairShuffleProof::deserialize(&tx.proof)?;
        shuffle::verify_sequences(&public_key, &x, &y, &x_bar, &y_bar, &random_vector, &proof)?;

        election.shuffle_instances.push(ShuffleInstance {
            shuffled_ballots: tx.shuffled_ballots,
            proof: tx.proof,
            shuffler_public_key: tx.public_key,
        });

        if election.shuffle_instances.len() >= election.shuffle_threshold {
            election.status = Status::ShuffledBallots;
        }

        Self::write_election(snapshot, &election_id, &election)
    }

    /// Performs the RegisterPubShares command.
    pub(crate) fn register_pub_shares(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: RegisterPubSharesTransaction = Self::transaction(step.current)?;

        check_previous_pub_shares(&step, &tx.election_id, tx.round)?;

        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        let expected_round = election.pub_shares_archive.submissions.len();
        if tx.round != expected_round {
            return Err(ExecutionError::WrongPubSharesRound {
                expected: expected_round,
                got: tx.round,
            });
        }

        if election.status != Status::ShuffledBallots {
            return Err(ExecutionError::WrongStatus {
                expected: Status::ShuffledBallots,
                current: election.status,
            });
        }

        let roster = self.context.roster(&election.roster_buf)?;
        if !roster.contains(&tx.public_key) {
            return Err(ExecutionError::NotRosterMember(hex::encode(&tx.public_key)));
        }

        if election
            .pub_shares_archive
            .public_keys
            .iter()
            .any(|key| *key == tx.public_key)
        {
            return Err(ExecutionError::DuplicatePubShareSubmitter);
        }

        let signer =
            bls::PublicKey::from_bytes(&tx.public_key).map_err(ExecutionError::MalformedSigner)?;
        let signature =
            bls::Signature::from_bytes(&tx.signature).map_err(ExecutionError::MalformedSigner)?;
        let hash = tx.hash_pub_shares(&election_id);
        signer
            .verify(&hash, &signature)
            .map_err(|source| ExecutionError::SignatureMismatch {
                subject: "pubShares",
                source,
            })?;

        // the submission must be shaped like the final shuffle output, so
        // reconstruction can index it blindly
        // TODO: also verify each share against the trustee's committed
        // verification point from the DKG transcript
        let last_shuffle = election
            .shuffle_instances
            .last()
            .ok_or_else(|| ExecutionError::MalformedPubShares("no shuffle output".into()))?;
        check_submission_shape(&tx.pub_shares, last_shuffle, election.chunks_per_ballot())?;

        election.pub_shares_archive.submissions.push(tx.pub_shares);
        election.pub_shares_archive.public_keys.push(tx.public_key);

        if election.pub_shares_archive.submissions.len() >= election.shuffle_threshold {
            election.status = Status::PubSharesSubmitted;
        }

        Self::write_election(snapshot, &election_id, &election)
    }

    /// Performs the DecryptBallots command: recovers every plaintext chunk
    /// from the archived public shares and publishes the result.
    pub(crate) fn decrypt_ballots(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: DecryptBallotsTransaction = Self::transaction(step.current)?;
        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        if election.admin_id != tx.user_id {
            return Err(ExecutionError::NotAdmin("decrypt"));
        }
        if election.status != Status::PubSharesSubmitted {
            return Err(ExecutionError::WrongStatus {
                expected: Status::PubSharesSubmitted,
                current: election.status,
            });
        }

        let submissions = &election.pub_shares_archive.submissions;
        if submissions.len() != election.shuffle_threshold {
            return Err(ExecutionError::MalformedPubShares(format!(
                "{} submissions, need exactly {}",
                submissions.len(),
                election.shuffle_threshold
            )));
        }

        let last_shuffle = election
            .shuffle_instances
            .last()
            .ok_or_else(|| ExecutionError::MalformedPubShares("no shuffle output".into()))?;

        let ballots = submissions[0].len();
        let pairs = election.chunks_per_ballot();

        let mut decrypted_ballots = Vec::with_capacity(ballots);
        for ballot in 0..ballots {
            let mut plaintext = Vec::with_capacity(election.ballot_size);
            let mut intact = true;
            for pair in 0..pairs {
                let commit = recover_pair(ballot, pair, submissions)?;
                let (_, c) = last_shuffle.shuffled_ballots[ballot][pair]
                    .points()
                    .map_err(ExecutionError::MalformedShuffledBallots)?;
                let message = c - commit;
                match elgamal::extract(&message) {
                    Ok(chunk) => plaintext.extend(chunk),
                    Err(_) => {
                        intact = false;
                        break;
                    }
                }
            }

            let decrypted = match Ballot::unmarshal(&plaintext, &election.configuration) {
                Ok(ballot) if intact => DecryptedBallot {
                    ballot,
                    status: BallotStatus::Valid,
                },
                // the raw decryption is unusable; keep the position with an
                // explicit flag instead of a silent zero ballot
                _ => DecryptedBallot {
                    ballot: Ballot::default(),
                    status: BallotStatus::Invalid,
                },
            };
            decrypted_ballots.push(decrypted);
        }

        election.decrypted_ballots = decrypted_ballots;
        election.status = Status::ResultAvailable;

        Self::write_election(snapshot, &election_id, &election)
    }

    /// Performs the CancelElection command.
    pub(crate) fn cancel_election(
        &self,
        snapshot: &mut dyn Snapshot,
        step: Step<'_>,
    ) -> Result<(), ExecutionError> {
        let tx: CancelElectionTransaction = Self::transaction(step.current)?;
        let (mut election, election_id) = self.election(snapshot, &tx.election_id)?;

        if election.admin_id != tx.user_id {
            return Err(ExecutionError::NotAdmin("cancel"));
        }
        if matches!(election.status, Status::ResultAvailable | Status::Canceled) {
            return Err(ExecutionError::CancelTerminal(election.status));
        }

        election.status = Status::Canceled;

        Self::write_election(snapshot, &election_id, &election)
    }
}

/// Rejects a shuffle if an earlier transaction of the same block already
/// shuffled this round of this election.
fn check_previous_shuffles(
    step: &Step<'_>,
    election_id: &str,
    round: usize,
) -> Result<(), ExecutionError> {
    for tx in previous_commands(step, Command::ShuffleBallots) {
        let previous: ShuffleBallotsTransaction = Contract::transaction(tx)?;
        if previous.election_id == election_id && previous.round == round {
            return Err(ExecutionError::ShuffleRoundTaken(round));
        }
    }
    Ok(())
}

/// Rejects a submission if an earlier transaction of the same block already
/// registered shares for this round of this election.
fn check_previous_pub_shares(
    step: &Step<'_>,
    election_id: &str,
    round: usize,
) -> Result<(), ExecutionError> {
    for tx in previous_commands(step, Command::RegisterPubShares) {
        let previous: RegisterPubSharesTransaction = Contract::transaction(tx)?;
        if previous.election_id == election_id && previous.round == round {
            return Err(ExecutionError::PubSharesRoundTaken(round));
        }
    }
    Ok(())
}

/// The transactions already executed in this block that carry the given
/// command of this contract.
fn previous_commands<'a>(
    step: &'a Step<'_>,
    command: Command,
) -> impl Iterator<Item = &'a Transaction> {
    let tag = command.to_string();
    step.previous.iter().filter(move |tx| {
        tx.get_arg(CONTRACT_ARG) == Some(CONTRACT_NAME.as_bytes())
            && tx.get_arg(CMD_ARG) == Some(tag.as_bytes())
    })
}

/// Checks a submission is a full `[ballot][pair]` matrix matching the final
/// shuffle output.
fn check_submission_shape(
    submission: &PubShareSubmission,
    last_shuffle: &ShuffleInstance,
    chunks_per_ballot: usize,
) -> Result<(), ExecutionError> {
    if submission.len() != last_shuffle.shuffled_ballots.len() {
        return Err(ExecutionError::MalformedPubShares(format!(
            "{} ballots, expected {}",
            submission.len(),
            last_shuffle.shuffled_ballots.len()
        )));
    }
    for ballot in submission {
        if ballot.len() != chunks_per_ballot {
            return Err(ExecutionError::MalformedPubShares(format!(
                "{} pairs per ballot, expected {chunks_per_ballot}",
                ballot.len()
            )));
        }
    }
    Ok(())
}

/// Recovers the commit `d · K` of one (ballot, pair) cell by interpolating
/// the submitted share points at the origin.
fn recover_pair(
    ballot: usize,
    pair: usize,
    submissions: &[PubShareSubmission],
) -> Result<EdwardsPoint, ExecutionError> {
    let shares = submissions
        .iter()
        .map(|submission| {
            let share = &submission[ballot][pair];
            let value = elgamal::decode_point(&share.value)
                .map_err(|err| ExecutionError::Decrypt(err.to_string()))?;
            Ok(SharePoint {
                index: share.index,
                value,
            })
        })
        .collect::<Result<Vec<SharePoint>, ExecutionError>>()?;

    secretshare::recover_commit(&shares, submissions.len())
        .map_err(|err| ExecutionError::Decrypt(err.to_string()))
}
