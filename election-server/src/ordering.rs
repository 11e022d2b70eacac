//! Single-node sequencer: the minimal implementation of the ordering
//! boundary. Pooled transactions are drained into blocks, executed
//! sequentially against the snapshot, and the per-block results are
//! broadcast to watchers.
//!
//! The byzantine ordering layer this stands in for is an external
//! collaborator; nothing here survives a restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use evoting_contract::types::Roster;
use evoting_contract::{Contract, Snapshot, Step, StorageError, Transaction, ROSTER_KEY};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::services::{OrderingEvent, OrderingService, Pool, ServiceError, TransactionResult};

const EVENT_CAPACITY: usize = 256;
const QUEUE_CAPACITY: usize = 256;

pub struct SoloOrdering {
    inner: Arc<Inner>,
}

struct Inner {
    store: RwLock<HashMap<Vec<u8>, Vec<u8>>>,
    contract: Contract,
    events: broadcast::Sender<OrderingEvent>,
    queue: mpsc::Sender<Transaction>,
    nonce: AtomicU64,
    blocks: AtomicU64,
}

struct StoreSnapshot<'a>(&'a mut HashMap<Vec<u8>, Vec<u8>>);

impl Snapshot for StoreSnapshot<'_> {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.0.get(key).cloned())
    }

    fn set(&mut self, key: &[u8], value: Vec<u8>) -> Result<(), StorageError> {
        self.0.insert(key.to_vec(), value);
        Ok(())
    }
}

impl SoloOrdering {
    /// Starts the sequencer over a snapshot seeded with the trustee
    /// roster. Returns the handle of the block loop.
    pub fn start(
        contract: Contract,
        roster: &Roster,
    ) -> Result<(Arc<Self>, JoinHandle<()>), ServiceError> {
        let roster_buf = election_common::encode(roster)
            .map_err(|err| ServiceError::Payload(err.to_string()))?;
        let mut store = HashMap::new();
        store.insert(ROSTER_KEY.to_vec(), roster_buf);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (queue, receiver) = mpsc::channel(QUEUE_CAPACITY);

        let inner = Arc::new(Inner {
            store: RwLock::new(store),
            contract,
            events,
            queue,
            nonce: AtomicU64::new(0),
            blocks: AtomicU64::new(0),
        });

        let ordering = Arc::new(Self {
            inner: inner.clone(),
        });
        let handle = tokio::spawn(run(inner, receiver));
        Ok((ordering, handle))
    }
}

/// The block loop: waits for a transaction, drains whatever else is
/// pending into the same block, executes, and broadcasts the results.
async fn run(inner: Arc<Inner>, mut receiver: mpsc::Receiver<Transaction>) {
    loop {
        let Some(first) = receiver.recv().await else {
            return;
        };
        let mut block = vec![first];
        while let Ok(tx) = receiver.try_recv() {
            block.push(tx);
        }

        let mut results = Vec::with_capacity(block.len());
        let mut executed: Vec<Transaction> = Vec::new();
        {
            let Ok(mut store) = inner.store.write() else {
                tracing::error!("sequencer store poisoned, stopping the block loop");
                return;
            };
            let mut snapshot = StoreSnapshot(&mut store);
            for tx in block {
                let outcome = inner.contract.execute(
                    &mut snapshot,
                    Step {
                        previous: &executed,
                        current: &tx,
                    },
                );
                let (accepted, message) = match outcome {
                    Ok(()) => (true, String::new()),
                    Err(err) => (false, err.to_string()),
                };
                if accepted {
                    executed.push(tx.clone());
                } else {
                    tracing::debug!(id = %hex::encode(&tx.id), %message, "transaction denied");
                }
                results.push(TransactionResult {
                    transaction: tx,
                    accepted,
                    message,
                });
            }
        }

        let index = inner.blocks.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(index, transactions = results.len(), "block committed");
        // nobody watching is fine
        let _ = inner.events.send(OrderingEvent {
            index,
            transactions: results,
        });
    }
}

impl OrderingService for SoloOrdering {
    fn get_proof(&self, key: &[u8]) -> Result<Option<Vec<u8>>, ServiceError> {
        let store = self
            .inner
            .store
            .read()
            .map_err(|_| StorageError("sequencer store poisoned".into()))?;
        Ok(store.get(key).cloned())
    }

    fn watch(&self) -> broadcast::Receiver<OrderingEvent> {
        self.inner.events.subscribe()
    }

    fn next_nonce(&self) -> u64 {
        self.inner.nonce.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl Pool for SoloOrdering {
    async fn add(&self, transaction: Transaction) -> Result<(), ServiceError> {
        self.inner
            .queue
            .send(transaction)
            .await
            .map_err(|err| ServiceError::Pool(err.to_string()))
    }
}
