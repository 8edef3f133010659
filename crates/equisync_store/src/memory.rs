//! In-memory record store for testing.

use crate::error::{StoreError, StoreResult};
use crate::row::{Row, StoreValue};
use crate::store::{QueryKind, RecordStore};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct InjectedFailure {
    error: StoreError,
    persistent: bool,
}

#[derive(Debug, Default)]
struct Tables {
    equipment: Vec<Row>,
    records: Vec<Row>,
    abnormities: Vec<Row>,
}

/// An in-memory record store.
///
/// Holds the three legacy tables as plain row vectors. Suitable for:
/// - Unit and integration tests
/// - Demos without a database
/// - Fault injection (connectivity failures, slow queries)
///
/// # Thread Safety
///
/// This store is thread-safe; tests mutate it while a refresh worker
/// queries it.
///
/// # Example
///
/// ```rust
/// use equisync_store::{MemoryStore, QueryKind, RecordStore, StoreError};
///
/// let store = MemoryStore::new();
/// store.fail_once(QueryKind::Records, StoreError::connectivity("down"));
/// assert!(store.query_recent_records(10).is_err());
/// assert!(store.query_recent_records(10).is_ok());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
    failures: Mutex<HashMap<QueryKind, InjectedFailure>>,
    query_counts: Mutex<HashMap<QueryKind, u64>>,
    latency: Mutex<Duration>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the equipment table.
    pub fn set_equipment(&self, rows: Vec<Row>) {
        self.tables.lock().equipment = rows;
    }

    /// Adds or replaces one equipment row, keyed by its `ID` column.
    pub fn upsert_equipment(&self, row: Row) {
        let mut tables = self.tables.lock();
        let id = row.get("ID").cloned();
        match tables
            .equipment
            .iter_mut()
            .find(|existing| id.is_some() && existing.get("ID") == id.as_ref())
        {
            Some(existing) => *existing = row,
            None => tables.equipment.push(row),
        }
    }

    /// Replaces the value record table.
    pub fn set_records(&self, rows: Vec<Row>) {
        self.tables.lock().records = rows;
    }

    /// Replaces the anomaly record table.
    pub fn set_abnormities(&self, rows: Vec<Row>) {
        self.tables.lock().abnormities = rows;
    }

    /// Makes the next query of `kind` fail with `error`.
    pub fn fail_once(&self, kind: QueryKind, error: StoreError) {
        self.failures.lock().insert(
            kind,
            InjectedFailure {
                error,
                persistent: false,
            },
        );
    }

    /// Makes every query of `kind` fail until [`clear_failures`](Self::clear_failures).
    pub fn fail_always(&self, kind: QueryKind, error: StoreError) {
        self.failures.lock().insert(
            kind,
            InjectedFailure {
                error,
                persistent: true,
            },
        );
    }

    /// Removes all injected failures.
    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Delays every query by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Returns how many times `kind` has been queried (failures included).
    pub fn query_count(&self, kind: QueryKind) -> u64 {
        self.query_counts.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Closes the store; every later query fails with [`StoreError::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn begin(&self, kind: QueryKind) -> StoreResult<()> {
        *self.query_counts.lock().entry(kind).or_insert(0) += 1;

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }

        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }

        let mut failures = self.failures.lock();
        if let Some(failure) = failures.get(&kind) {
            let error = failure.error.clone();
            if !failure.persistent {
                failures.remove(&kind);
            }
            return Err(error);
        }
        Ok(())
    }
}

/// Newest-first by the `ID` column, bounded by `limit`.
fn most_recent(rows: &[Row], limit: u32) -> Vec<Row> {
    let mut sorted: Vec<Row> = rows.to_vec();
    sorted.sort_by_key(|row| {
        std::cmp::Reverse(match row.get("ID") {
            Some(StoreValue::Int(id)) => *id,
            _ => i64::MIN,
        })
    });
    sorted.truncate(limit as usize);
    sorted
}

impl RecordStore for MemoryStore {
    fn query_equipment(&self) -> StoreResult<Vec<Row>> {
        self.begin(QueryKind::Equipment)?;
        Ok(self.tables.lock().equipment.clone())
    }

    fn query_recent_records(&self, limit: u32) -> StoreResult<Vec<Row>> {
        self.begin(QueryKind::Records)?;
        Ok(most_recent(&self.tables.lock().records, limit))
    }

    fn query_recent_abnormities(&self, limit: u32) -> StoreResult<Vec<Row>> {
        self.begin(QueryKind::Abnormities)?;
        Ok(most_recent(&self.tables.lock().abnormities, limit))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, equipment: i64, value: f64) -> Row {
        Row::new()
            .with("ID", id)
            .with("EquipmentID", equipment)
            .with("clValue", value)
    }

    #[test]
    fn recent_records_are_newest_first_and_bounded() {
        let store = MemoryStore::new();
        store.set_records(vec![
            record(1, 7, 1.0),
            record(3, 7, 3.0),
            record(2, 7, 2.0),
        ]);

        let rows = store.query_recent_records(2).unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.get("ID").cloned()).collect();
        assert_eq!(ids, vec![Some(StoreValue::Int(3)), Some(StoreValue::Int(2))]);
    }

    #[test]
    fn fail_once_recovers() {
        let store = MemoryStore::new();
        store.fail_once(QueryKind::Equipment, StoreError::connectivity("down"));

        assert_eq!(
            store.query_equipment(),
            Err(StoreError::Connectivity("down".into()))
        );
        assert!(store.query_equipment().is_ok());
        assert_eq!(store.query_count(QueryKind::Equipment), 2);
    }

    #[test]
    fn fail_always_until_cleared() {
        let store = MemoryStore::new();
        store.fail_always(QueryKind::Abnormities, StoreError::query("bad sql"));

        assert!(store.query_recent_abnormities(10).is_err());
        assert!(store.query_recent_abnormities(10).is_err());
        // Other kinds are unaffected
        assert!(store.query_recent_records(10).is_ok());

        store.clear_failures();
        assert!(store.query_recent_abnormities(10).is_ok());
    }

    #[test]
    fn upsert_equipment_replaces_by_id() {
        let store = MemoryStore::new();
        store.upsert_equipment(Row::new().with("ID", 7i64).with("State", 1i64));
        store.upsert_equipment(Row::new().with("ID", 7i64).with("State", 2i64));
        store.upsert_equipment(Row::new().with("ID", 8i64).with("State", 1i64));

        let rows = store.query_equipment().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("State"), Some(&StoreValue::Int(2)));
    }

    #[test]
    fn closed_store_rejects_queries() {
        let store = MemoryStore::new();
        store.close();
        assert_eq!(store.query_equipment(), Err(StoreError::Closed));
    }
}
