mod error;
mod lessons;
mod occupancy;
mod queries;
mod registry;
mod transaction;

pub use error::EngineError;
pub use lessons::LessonTable;
pub use occupancy::{occupancy_percent, occupied_slots, Capacity};
pub use registry::{Draft, Reference, References, Table};
pub use transaction::{ImportSummary, Transaction};

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, RwLock};
use tracing::{debug, info, warn};

use crate::model::*;
use crate::wal::Wal;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
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

pub(super) type Pending = oneshot::Receiver<io::Result<()>>;

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends.
/// 4. One flush_sync for the whole batch.
/// 5. Respond to every sender with the batch result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
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
                flush_and_respond(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
    debug!("WAL writer stopped");
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        warn!(error = %e, records = batch.len(), "WAL flush failed");
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after an append error so buffered bytes don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let mut batch = vec![(event, response)];
            flush_and_respond(wal, &mut batch);
        }
    }
}

/// Wait for the writer to confirm a queued record is durable.
pub(super) async fn wal_wait(pending: Pending) -> Result<(), EngineError> {
    pending
        .await
        .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
        .map_err(|e| EngineError::WalError(e.to_string()))
}

/// The timetable store: reference registry, lesson table, and the WAL behind them.
pub struct Engine {
    pub(crate) refs: References,
    pub(crate) lessons: Arc<RwLock<LessonTable>>,
    wal_tx: mpsc::Sender<WalCommand>,
    next_id: AtomicU64,
}

fn replay_event(refs: &References, lessons: &mut LessonTable, event: Event) {
    match event {
        Event::Committed(events) => {
            for inner in events {
                replay_event(refs, lessons, inner);
            }
        }
        Event::LessonCreated(lesson) => lessons.insert(lesson),
        Event::LessonDeleted { id } => {
            lessons.remove(id);
        }
        other => {
            if !refs.apply_event(&other) {
                warn!(?other, "replay skipped duplicate reference row");
            }
        }
    }
}

impl Engine {
    /// Rebuild state from the WAL at `wal_path` and start its writer task.
    /// Must be called inside a tokio runtime.
    pub fn new(wal_path: PathBuf) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let record_count = events.len();

        let refs = References::default();
        let mut lessons = LessonTable::default();
        for event in events {
            replay_event(&refs, &mut lessons, event);
        }
        let next_id = refs.max_id().max(lessons.max_id()) + 1;

        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        info!(
            path = %wal_path.display(),
            records = record_count,
            lessons = lessons.len(),
            next_id,
            "engine state restored"
        );

        Ok(Self {
            refs,
            lessons: Arc::new(RwLock::new(lessons)),
            wal_tx,
            next_id: AtomicU64::new(next_id),
        })
    }

    pub(super) fn next_id(&self) -> Id {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn references(&self) -> &References {
        &self.refs
    }

    /// Queue a record with the group-commit writer. Once this returns the
    /// record will be written whether or not the caller waits for it.
    pub(super) async fn wal_enqueue(&self, event: Event) -> Result<Pending, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        Ok(rx)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let pending = self.wal_enqueue(event.clone()).await?;
        wal_wait(pending).await
    }

    /// Rewrite the WAL as the creation events of the current state.
    /// Returns the number of records in the new log.
    pub async fn compact_wal(&self) -> Result<usize, EngineError> {
        // Hold off every writer so no record lands between snapshot and swap.
        let _inserts = self.refs.lock_all_inserts().await;
        let lessons = self.lessons.read().await;

        let mut events = self.refs.snapshot_events();
        events.extend(lessons.iter().cloned().map(Event::LessonCreated));
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        wal_wait(rx).await?;
        info!(records = count, "WAL compacted");
        Ok(count)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
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
