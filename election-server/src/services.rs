//! Boundary traits towards the ordering layer and the mempool, plus the
//! signed-transaction manager the off-chain drivers submit through.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use evoting_contract::types::Command;
use evoting_contract::{StorageError, Transaction, CMD_ARG, CONTRACT_ARG, CONTRACT_NAME, ELECTION_ARG};
use sha2::{Digest, Sha256};
use tokio::sync::broadcast;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("failed to add transaction to the pool: {0}")]
    Pool(String),
    #[error("failed to serialize transaction payload: {0}")]
    Payload(String),
    #[error("the event stream closed before the transaction was included")]
    StreamClosed,
    #[error("timed out waiting for the transaction to be included")]
    Timeout,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Outcome of one ordered transaction.
#[derive(Clone, Debug)]
pub struct TransactionResult {
    pub transaction: Transaction,
    pub accepted: bool,
    pub message: String,
}

/// One committed block of results.
#[derive(Clone, Debug)]
pub struct OrderingEvent {
    pub index: u64,
    pub transactions: Vec<TransactionResult>,
}

/// Read access to committed state, the committed-transaction stream, and
/// the nonce view.
pub trait OrderingService: Send + Sync {
    /// The committed record under `key`, if any.
    fn get_proof(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ServiceError>;

    /// Subscribes to per-block commit events.
    fn watch(&self) -> broadcast::Receiver<OrderingEvent>;

    /// Hands out the next transaction nonce.
    fn next_nonce(&self) -> u64;
}

/// The mempool boundary.
#[async_trait]
pub trait Pool: Send + Sync {
    async fn add(&self, transaction: Transaction) -> Result<(), ServiceError>;
}

/// Wraps command payloads into transactions with a fresh nonce from the
/// ordering service and a content-derived id.
pub struct TransactionManager {
    ordering: Arc<dyn OrderingService>,
}

impl TransactionManager {
    pub fn new(ordering: Arc<dyn OrderingService>) -> Self {
        Self { ordering }
    }

    pub fn make(
        &self,
        command: Command,
        payload: &impl serde::Serialize,
    ) -> Result<Transaction, ServiceError> {
        let payload =
            serde_json::to_vec(payload).map_err(|err| ServiceError::Payload(err.to_string()))?;
        let nonce = self.ordering.next_nonce();

        let args = vec![
            (CONTRACT_ARG.to_string(), CONTRACT_NAME.as_bytes().to_vec()),
            (CMD_ARG.to_string(), command.to_string().into_bytes()),
            (ELECTION_ARG.to_string(), payload),
        ];

        let mut hasher = Sha256::new();
        hasher.update(nonce.to_le_bytes());
        for (key, value) in &args {
            hasher.update(key.as_bytes());
            hasher.update(value);
        }

        Ok(Transaction {
            id: hasher.finalize().to_vec(),
            nonce,
            args,
        })
    }
}

/// Blocks until the transaction `id` is included or the stream closes,
/// returning whether it was accepted together with the result message.
pub async fn wait_for_inclusion(
    events: &mut broadcast::Receiver<OrderingEvent>,
    id: &[u8],
    timeout: Duration,
) -> Result<(bool, String), ServiceError> {
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) => {
                    for result in event.transactions {
                        if result.transaction.id == id {
                            return Ok((result.accepted, result.message));
                        }
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return Err(ServiceError::StreamClosed),
            }
        }
    };

    tokio::time::timeout(timeout, wait)
        .await
        .map_err(|_| ServiceError::Timeout)?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transaction(id: u8) -> Transaction {
        Transaction {
            id: vec![id],
            nonce: 0,
            args: vec![],
        }
    }

    #[tokio::test]
    async fn inclusion_is_reported_with_its_outcome() {
        let (sender, mut events) = broadcast::channel(4);
        sender
            .send(OrderingEvent {
                index: 0,
                transactions: vec![TransactionResult {
                    transaction: transaction(1),
                    accepted: false,
                    message: "at least two ballots are required".into(),
                }],
            })
            .unwrap();

        let (accepted, message) =
            wait_for_inclusion(&mut events, &[1], Duration::from_secs(1))
                .await
                .unwrap();
        assert!(!accepted);
        assert!(message.contains("two ballots"));
    }

    #[tokio::test]
    async fn unrelated_transactions_are_skipped() {
        let (sender, mut events) = broadcast::channel(4);
        sender
            .send(OrderingEvent {
                index: 0,
                transactions: vec![TransactionResult {
                    transaction: transaction(1),
                    accepted: true,
                    message: String::new(),
                }],
            })
            .unwrap();
        sender
            .send(OrderingEvent {
                index: 1,
                transactions: vec![TransactionResult {
                    transaction: transaction(2),
                    accepted: true,
                    message: String::new(),
                }],
            })
            .unwrap();

        let (accepted, _) = wait_for_inclusion(&mut events, &[2], Duration::from_secs(1))
            .await
            .unwrap();
        assert!(accepted);
    }

    #[tokio::test]
    async fn a_closed_stream_is_an_error() {
        let (sender, mut events) = broadcast::channel::<OrderingEvent>(1);
        drop(sender);

        let err = wait_for_inclusion(&mut events, &[1], Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::StreamClosed));
    }

    #[tokio::test]
    async fn waiting_times_out() {
        let (_sender, mut events) = broadcast::channel::<OrderingEvent>(1);

        let err = wait_for_inclusion(&mut events, &[1], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Timeout));
    }
}
