mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{available_slots, is_date_bookable};
pub use error::EngineError;
pub use mutations::{BookingRequest, DetailsPatch, RescheduleTo};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::SalonClock;
use crate::limits::*;
use crate::notify::NotifyHub;
use crate::store::{DocStore, StoreError, Txn};

/// One salon: its document store, the clock that places wall times, and
/// the hub that hears about committed booking changes.
pub struct Engine {
    pub(super) store: DocStore,
    clock: SalonClock,
    pub notify: Arc<NotifyHub>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, clock: SalonClock, notify: Arc<NotifyHub>) -> io::Result<Self> {
        Ok(Self {
            store: DocStore::open(wal_path)?,
            clock,
            notify,
        })
    }

    pub fn clock(&self) -> &SalonClock {
        &self.clock
    }

    pub async fn compact(&self) -> Result<(), EngineError> {
        self.store.compact().await.map_err(EngineError::from)
    }

    pub async fn appends_since_compact(&self) -> u64 {
        self.store.appends_since_compact().await
    }

    /// Run `body` in a fresh transaction and commit. A commit that loses a
    /// race re-runs `body` from scratch, so it must read everything it needs
    /// through the transaction it is given. Any error from `body` aborts
    /// without retrying.
    pub(super) async fn run_txn<T, F>(&self, op: &'static str, mut body: F) -> Result<T, EngineError>
    where
        F: FnMut(&mut Txn<'_>) -> Result<T, EngineError>,
    {
        let mut backoff = Duration::from_millis(TXN_BACKOFF_BASE_MS);
        for attempt in 1..=MAX_TXN_ATTEMPTS {
            let mut txn = self.store.begin();
            let value = body(&mut txn)?;
            match self.store.commit(txn).await {
                Ok(()) => return Ok(value),
                Err(StoreError::Contention(key)) => {
                    metrics::counter!(crate::observability::TXN_CONFLICTS_TOTAL, "op" => op)
                        .increment(1);
                    if attempt == MAX_TXN_ATTEMPTS {
                        break;
                    }
                    tracing::debug!(op, %key, attempt, "commit conflict, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(e) => return Err(e.into()),
            }
        }
        tracing::warn!(op, attempts = MAX_TXN_ATTEMPTS, "transaction retries exhausted");
        Err(EngineError::Contention)
    }
}
