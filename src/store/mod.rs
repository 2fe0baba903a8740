//! Transactional document store: versioned documents, optimistic
//! transactions, durable through the WAL.

mod txn;

pub use txn::Txn;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A key read by the transaction changed before it could commit.
    Contention(DocKey),
    /// Reads must all happen before the first staged write.
    ReadAfterWrite(DocKey),
    /// The document under a key is not the kind the key implies.
    Corrupt(DocKey),
    Wal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Contention(key) => write!(f, "concurrent modification of {key}"),
            StoreError::ReadAfterWrite(key) => {
                write!(f, "read of {key} after a write in the same transaction")
            }
            StoreError::Corrupt(key) => write!(f, "unexpected document kind at {key}"),
            StoreError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Takes the first append, drains whatever else is already
/// queued, and covers the whole batch with a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let _ = tx.send(match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            });
        }

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[PendingAppend]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so stray buffered bytes don't leak
    // into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Store ────────────────────────────────────────────────

struct Versioned {
    /// Sequence number of the commit that last wrote this document.
    version: u64,
    doc: Doc,
}

pub struct DocStore {
    docs: DashMap<DocKey, Versioned>,
    /// Per-key commit locks, always taken in `DocKey` order.
    key_locks: DashMap<DocKey, Arc<Mutex<()>>>,
    /// Commits hold this shared; compaction holds it exclusively so its
    /// snapshot can't miss a commit that is already in the log.
    gate: RwLock<()>,
    seq: AtomicU64,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl DocStore {
    /// Replay the WAL at `wal_path` and start its writer task. Must be
    /// called inside a tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            docs: DashMap::new(),
            key_locks: DashMap::new(),
            gate: RwLock::new(()),
            seq: AtomicU64::new(0),
            wal_tx,
        };
        for event in &replay.events {
            let Event::Committed { seq, writes } = event;
            store.apply(*seq, writes);
            store.seq.fetch_max(*seq, Ordering::SeqCst);
        }
        tracing::debug!(
            path = %wal_path.display(),
            records = replay.events.len(),
            documents = store.docs.len(),
            "store replayed"
        );
        Ok(store)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Version 0 means absent.
    pub fn version(&self, key: &DocKey) -> u64 {
        self.docs.get(key).map_or(0, |v| v.version)
    }

    fn read_versioned(&self, key: &DocKey) -> (u64, Option<Doc>) {
        self.docs
            .get(key)
            .map_or((0, None), |v| (v.version, Some(v.doc.clone())))
    }

    pub fn get(&self, key: &DocKey) -> Option<Doc> {
        self.read_versioned(key).1
    }

    // ── Non-transactional reads (may be stale) ───────────────

    pub fn read_day_index(&self, date: NaiveDate) -> Option<DayIndex> {
        match self.get(&DocKey::Day(date))? {
            Doc::Day(day) => Some(day),
            _ => None,
        }
    }

    pub fn read_appointment(&self, id: Ulid) -> Option<Appointment> {
        match self.get(&DocKey::Appointment(id))? {
            Doc::Appointment(a) => Some(a),
            _ => None,
        }
    }

    pub fn read_schedule(&self) -> Option<ScheduleConfig> {
        match self.get(&DocKey::Schedule)? {
            Doc::Schedule(cfg) => Some(cfg),
            _ => None,
        }
    }

    pub fn appointments(&self) -> Vec<Appointment> {
        self.docs
            .iter()
            .filter_map(|entry| match &entry.value().doc {
                Doc::Appointment(a) => Some(a.clone()),
                _ => None,
            })
            .collect()
    }

    // ── Transactions ─────────────────────────────────────────

    pub fn begin(&self) -> Txn<'_> {
        Txn::new(self)
    }

    /// Validate and commit. Every key the transaction read must still be at
    /// the version it saw; otherwise nothing is written and the caller gets
    /// `Contention`. All writes land in one WAL record.
    pub async fn commit(&self, txn: Txn<'_>) -> Result<(), StoreError> {
        let (reads, writes) = txn.into_parts();
        if writes.is_empty() {
            return Ok(());
        }

        let mut keys: Vec<DocKey> = reads
            .keys()
            .copied()
            .chain(writes.iter().map(|w| w.key))
            .collect();
        keys.sort();
        keys.dedup();

        let result = {
            let _gate = self.gate.read().await;
            let mut guards = Vec::with_capacity(keys.len());
            for key in &keys {
                let lock = self.key_locks.entry(*key).or_default().clone();
                guards.push(lock.lock_owned().await);
            }
            self.commit_locked(&reads, writes).await
        };
        self.release_key_locks(&keys);
        result
    }

    async fn commit_locked(
        &self,
        reads: &HashMap<DocKey, u64>,
        writes: Vec<DocWrite>,
    ) -> Result<(), StoreError> {
        validate_reads(reads, |key| self.version(key))?;

        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event::Committed { seq, writes };
        self.wal_append(&event).await?;
        let Event::Committed { writes, .. } = event;
        self.apply(seq, &writes);
        Ok(())
    }

    /// Drop lock entries nobody else holds or waits on. A committer that
    /// cloned the `Arc` keeps the count above one, and cloning happens under
    /// the same shard lock as this check.
    fn release_key_locks(&self, keys: &[DocKey]) {
        for key in keys {
            self.key_locks
                .remove_if(key, |_, lock| Arc::strong_count(lock) == 1);
        }
    }

    #[cfg(test)]
    pub(crate) fn lock_entries(&self) -> usize {
        self.key_locks.len()
    }

    /// Write straight into memory under a fresh version, skipping the WAL.
    /// Lets tests land a competing commit in the middle of a transaction.
    #[cfg(test)]
    pub(crate) fn write_unlogged(&self, key: DocKey, doc: Doc) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.apply(seq, &[DocWrite { key, doc: Some(doc) }]);
    }

    fn apply(&self, seq: u64, writes: &[DocWrite]) {
        for write in writes {
            match &write.doc {
                Some(doc) => {
                    self.docs.insert(write.key, Versioned { version: seq, doc: doc.clone() });
                }
                None => {
                    self.docs.remove(&write.key);
                }
            }
        }
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL as a single snapshot record of the live documents.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;
        let writes: Vec<DocWrite> = self
            .docs
            .iter()
            .map(|entry| DocWrite {
                key: *entry.key(),
                doc: Some(entry.value().doc.clone()),
            })
            .collect();
        let seq = self.seq.load(Ordering::SeqCst);
        let events = vec![Event::Committed { seq, writes }];

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn validate_reads(
    reads: &HashMap<DocKey, u64>,
    current: impl Fn(&DocKey) -> u64,
) -> Result<(), StoreError> {
    for (key, seen) in reads {
        if current(key) != *seen {
            return Err(StoreError::Contention(*key));
        }
    }
    Ok(())
}
