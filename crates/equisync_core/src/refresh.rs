//! The refresh loop.
//!
//! A single background worker pulls the three tables from the record store
//! on a fixed interval and merges them into the shared state.
//!
//! ## Cycle
//!
//! 1. Equipment batch: upserts identity/config attributes, creating entities
//!    (and their nodes) for ids never seen before
//! 2. Record batch: latest values, applied only to known entities
//! 3. Abnormity batch: latest anomalies, applied only to known entities
//!
//! Each batch queries and converts rows outside the lock, then merges all of
//! its rows in one critical section. A failing batch is logged and skipped;
//! the other batches of the cycle still run and earlier state is kept.

use crate::batch::{EntityUpdate, EquipmentUpdate};
use crate::entity::Upserted;
use crate::error::{CoreError, CoreResult};
use crate::state::SharedState;
use chrono::Utc;
use equisync_store::{QueryKind, RecordStore, Row};
use parking_lot::{Condvar, Mutex, RwLock};
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Worker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshState {
    /// Sleeping between cycles.
    Idle,
    /// Executing a cycle.
    Polling,
}

/// The three batches of a cycle, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    /// Full equipment scan.
    Equipment,
    /// Most recent value records.
    Record,
    /// Most recent anomaly records.
    Abnormity,
}

impl BatchKind {
    /// All batches, in cycle order.
    pub const ALL: [BatchKind; 3] = [BatchKind::Equipment, BatchKind::Record, BatchKind::Abnormity];

    /// Returns the store query this batch issues.
    pub fn query_kind(&self) -> QueryKind {
        match self {
            BatchKind::Equipment => QueryKind::Equipment,
            BatchKind::Record => QueryKind::Records,
            BatchKind::Abnormity => QueryKind::Abnormities,
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BatchKind::Equipment => "equipment",
            BatchKind::Record => "record",
            BatchKind::Abnormity => "abnormity",
        };
        f.write_str(name)
    }
}

/// Result of one successful batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows returned by the store.
    pub fetched: usize,
    /// Rows merged into the table.
    pub applied: usize,
    /// Entities created (equipment batch only).
    pub created: usize,
    /// Rows for ids not in the table.
    pub ignored: usize,
    /// Rows that failed conversion or merge.
    pub rejected: usize,
}

/// Outcome of one batch within a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The batch ran; some rows may still have been rejected.
    Completed {
        /// Which batch.
        kind: BatchKind,
        /// Row counts.
        report: BatchReport,
    },
    /// The batch was skipped because the store failed.
    Failed {
        /// Which batch.
        kind: BatchKind,
        /// Error message.
        error: String,
    },
}

impl BatchOutcome {
    /// Returns the batch kind.
    pub fn kind(&self) -> BatchKind {
        match self {
            BatchOutcome::Completed { kind, .. } | BatchOutcome::Failed { kind, .. } => *kind,
        }
    }

    /// Returns true if the batch completed.
    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed { .. })
    }
}

/// Result of a refresh cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// One outcome per batch, in execution order.
    pub outcomes: Vec<BatchOutcome>,
    /// Duration of the cycle.
    pub duration: Duration,
}

impl CycleReport {
    /// Returns true if every batch completed.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(BatchOutcome::is_completed)
    }

    /// Returns the outcome of `kind`.
    pub fn outcome(&self, kind: BatchKind) -> Option<&BatchOutcome> {
        self.outcomes.iter().find(|o| o.kind() == kind)
    }
}

/// Statistics about refresh cycles.
#[derive(Debug, Clone, Default)]
pub struct RefreshStats {
    /// Total cycles run.
    pub cycles_completed: u64,
    /// Total batches skipped on store failure.
    pub batches_failed: u64,
    /// Total rows merged.
    pub rows_applied: u64,
    /// Total rows dropped because their entity does not exist yet.
    pub rows_ignored: u64,
    /// Total rows rejected on conversion or merge.
    pub rows_rejected: u64,
    /// Entities created.
    pub entities_created: u64,
    /// End of the last cycle.
    pub last_cycle_time: Option<Instant>,
    /// Last batch error.
    pub last_error: Option<String>,
}

/// Runs batches against the shared state.
pub struct Refresher {
    store: Arc<dyn RecordStore>,
    state: SharedState,
    record_limit: u32,
    abnormity_limit: u32,
    /// Held for a whole cycle or batch so there is only ever one writer.
    cycle: Mutex<()>,
    status: RwLock<RefreshState>,
    stats: RwLock<RefreshStats>,
}

impl Refresher {
    /// Creates a refresher reading from `store` into `state`.
    pub fn new(
        store: Arc<dyn RecordStore>,
        state: SharedState,
        record_limit: u32,
        abnormity_limit: u32,
    ) -> Self {
        Self {
            store,
            state,
            record_limit,
            abnormity_limit,
            cycle: Mutex::new(()),
            status: RwLock::new(RefreshState::Idle),
            stats: RwLock::new(RefreshStats::default()),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> RefreshState {
        *self.status.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> RefreshStats {
        self.stats.read().clone()
    }

    /// Runs the three batches in order and records the outcome.
    ///
    /// Never fails: a failed batch is reported and the next one still runs.
    /// A call made while another cycle is running waits for it to finish.
    pub fn run_cycle(&self) -> CycleReport {
        let _cycle = self.cycle.lock();
        let start = Instant::now();
        *self.status.write() = RefreshState::Polling;

        let mut outcomes = Vec::with_capacity(BatchKind::ALL.len());
        for kind in BatchKind::ALL {
            let outcome = match self.batch(kind) {
                Ok(report) => BatchOutcome::Completed { kind, report },
                Err(e) => {
                    if e.is_recoverable() {
                        warn!(batch = %kind, error = %e, "batch failed, keeping previous state");
                    } else {
                        error!(batch = %kind, error = %e, "batch failed with unexpected error");
                    }
                    BatchOutcome::Failed {
                        kind,
                        error: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let report = CycleReport {
            outcomes,
            duration: start.elapsed(),
        };

        {
            let mut stats = self.stats.write();
            stats.cycles_completed += 1;
            stats.last_cycle_time = Some(Instant::now());
        }
        *self.status.write() = RefreshState::Idle;

        debug!(
            duration_ms = report.duration.as_millis() as u64,
            success = report.is_success(),
            "refresh cycle finished"
        );
        report
    }

    /// Runs one batch.
    ///
    /// # Errors
    ///
    /// Returns the store error if the query fails. Row-level problems are
    /// counted in the report instead.
    pub fn run_batch(&self, kind: BatchKind) -> CoreResult<BatchReport> {
        let _cycle = self.cycle.lock();
        self.batch(kind)
    }

    fn batch(&self, kind: BatchKind) -> CoreResult<BatchReport> {
        debug!(batch = %kind, table = kind.query_kind().table(), "starting batch");
        let result = match kind {
            BatchKind::Equipment => self.equipment_batch(),
            BatchKind::Record => {
                let rows = self.store.query_recent_records(self.record_limit);
                rows.map_err(CoreError::from)
                    .map(|rows| self.entity_batch(kind, &rows, EntityUpdate::from_record_row))
            }
            BatchKind::Abnormity => {
                let rows = self.store.query_recent_abnormities(self.abnormity_limit);
                rows.map_err(CoreError::from)
                    .map(|rows| self.entity_batch(kind, &rows, EntityUpdate::from_abnormity_row))
            }
        };

        let mut stats = self.stats.write();
        match &result {
            Ok(report) => {
                stats.rows_applied += report.applied as u64;
                stats.rows_ignored += report.ignored as u64;
                stats.rows_rejected += report.rejected as u64;
                stats.entities_created += report.created as u64;
                info!(
                    batch = %kind,
                    fetched = report.fetched,
                    applied = report.applied,
                    created = report.created,
                    ignored = report.ignored,
                    rejected = report.rejected,
                    "batch succeeded"
                );
            }
            Err(e) => {
                stats.batches_failed += 1;
                stats.last_error = Some(e.to_string());
            }
        }
        result
    }

    fn equipment_batch(&self) -> CoreResult<BatchReport> {
        let rows = self.store.query_equipment()?;
        let mut report = BatchReport {
            fetched: rows.len(),
            ..BatchReport::default()
        };

        let updates: Vec<EquipmentUpdate> = rows
            .iter()
            .filter_map(|row| match EquipmentUpdate::from_row(row) {
                Ok(update) => Some(update),
                Err(e) => {
                    warn!(batch = %BatchKind::Equipment, error = %e, "skipping row");
                    report.rejected += 1;
                    None
                }
            })
            .collect();

        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for update in &updates {
            match state.table.upsert(
                update.id,
                &update.name,
                &update.attributes,
                &mut state.space,
                &state.projector,
                now,
            ) {
                Ok(Upserted::Created) => {
                    report.created += 1;
                    report.applied += 1;
                }
                Ok(Upserted::Updated) => report.applied += 1,
                Err(e) => {
                    warn!(id = update.id, error = %e, "cannot apply equipment row");
                    report.rejected += 1;
                }
            }
        }
        Ok(report)
    }

    /// Rows arrive newest first; they are merged oldest first so the newest
    /// record is what remains.
    fn entity_batch(
        &self,
        kind: BatchKind,
        rows: &[Row],
        convert: fn(&Row) -> CoreResult<EntityUpdate>,
    ) -> BatchReport {
        let mut report = BatchReport {
            fetched: rows.len(),
            ..BatchReport::default()
        };

        let updates: Vec<EntityUpdate> = rows
            .iter()
            .rev()
            .filter_map(|row| match convert(row) {
                Ok(update) => Some(update),
                Err(e) => {
                    warn!(batch = %kind, error = %e, "skipping row");
                    report.rejected += 1;
                    None
                }
            })
            .collect();

        let now = Utc::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        for update in &updates {
            match state
                .table
                .update_existing(update.id, &update.attributes, &mut state.space, now)
            {
                Ok(true) => report.applied += 1,
                Ok(false) => report.ignored += 1,
                Err(e) => {
                    warn!(batch = %kind, id = update.id, error = %e, "cannot apply row");
                    report.rejected += 1;
                }
            }
        }
        report
    }
}

/// A cooperative stop signal that can interrupt a sleep.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    /// Creates an unsignalled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation and wakes any waiter.
    pub fn cancel(&self) {
        let (lock, cvar) = &*self.inner;
        *lock.lock() = true;
        cvar.notify_all();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock()
    }

    /// Sleeps up to `timeout`; returns true if cancelled meanwhile.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let (lock, cvar) = &*self.inner;
        let deadline = Instant::now() + timeout;
        let mut cancelled = lock.lock();
        while !*cancelled {
            if cvar.wait_until(&mut cancelled, deadline).timed_out() {
                break;
            }
        }
        *cancelled
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// The background thread driving [`Refresher::run_cycle`].
///
/// Cancellation is observed before each cycle and during the sleep between
/// cycles. [`shutdown`](Self::shutdown) blocks until the thread has exited.
pub struct RefreshWorker {
    token: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl RefreshWorker {
    /// Starts the worker. The first cycle runs immediately.
    pub fn spawn(refresher: Arc<Refresher>, interval: Duration) -> CoreResult<Self> {
        let token = CancelToken::new();
        let worker_token = token.clone();

        let handle = std::thread::Builder::new()
            .name("equisync-refresh".into())
            .spawn(move || {
                info!(interval_secs = interval.as_secs(), "refresh worker started");
                loop {
                    if worker_token.is_cancelled() {
                        break;
                    }
                    refresher.run_cycle();
                    if worker_token.wait_timeout(interval) {
                        break;
                    }
                }
                info!("refresh worker stopped");
            })?;

        Ok(Self {
            token,
            handle: Some(handle),
        })
    }

    /// Returns true until the worker has been shut down.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the worker and waits for it to exit.
    ///
    /// A cycle already in progress finishes first. Idempotent.
    pub fn shutdown(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("refresh worker panicked");
            }
        }
    }
}

impl Drop for RefreshWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
