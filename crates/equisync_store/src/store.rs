//! Record store trait definition.

use crate::error::StoreResult;
use crate::row::Row;
use std::fmt;

/// Default row bound for the "most recent" queries.
pub const DEFAULT_RECENT_LIMIT: u32 = 1000;

/// The three queries the refresh engine issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    /// Full scan of the equipment table.
    Equipment,
    /// Most recent value records.
    Records,
    /// Most recent anomaly records.
    Abnormities,
}

impl QueryKind {
    /// Returns the backing table name.
    pub fn table(&self) -> &'static str {
        match self {
            QueryKind::Equipment => "tblEquipment",
            QueryKind::Records => "tblRecord",
            QueryKind::Abnormities => "tblAbnormity",
        }
    }
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.table())
    }
}

/// A read-only client for the relational backing store.
///
/// Implementations block the calling thread for the duration of a query.
/// The refresh engine calls them from its worker thread, outside of any
/// lock, so a slow store delays refreshes but never readers.
///
/// # Invariants
///
/// - Queries never modify the store
/// - `query_recent_*` return at most `limit` rows, ordered by descending
///   record id (newest first)
/// - Implementations must be `Send + Sync`
///
/// # Implementors
///
/// - [`super::MemoryStore`] - For testing
pub trait RecordStore: Send + Sync {
    /// Returns every row of the equipment table.
    ///
    /// Columns: `ID, Name, Address, MinValue, MaxValue, UpperLimit,
    /// LowerLimit, State`.
    fn query_equipment(&self) -> StoreResult<Vec<Row>>;

    /// Returns the `limit` most recent value records.
    ///
    /// Columns: `ID, EquipmentID, clValue, clTime`.
    fn query_recent_records(&self, limit: u32) -> StoreResult<Vec<Row>>;

    /// Returns the `limit` most recent anomaly records.
    ///
    /// Columns: `ID, EquipmentID, Status, MaxValue, BeginTime, EndTime`.
    fn query_recent_abnormities(&self, limit: u32) -> StoreResult<Vec<Row>>;
}

impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    fn query_equipment(&self) -> StoreResult<Vec<Row>> {
        (**self).query_equipment()
    }

    fn query_recent_records(&self, limit: u32) -> StoreResult<Vec<Row>> {
        (**self).query_recent_records(limit)
    }

    fn query_recent_abnormities(&self, limit: u32) -> StoreResult<Vec<Row>> {
        (**self).query_recent_abnormities(limit)
    }
}
