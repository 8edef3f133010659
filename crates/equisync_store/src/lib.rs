//! # equisync Store
//!
//! Record store client contract and implementations for equisync.
//!
//! The refresh engine never talks to a database directly. It issues three
//! read-only queries through the [`RecordStore`] trait and receives result
//! sets as ordered rows of named, loosely typed columns. Interpreting those
//! columns is the engine's job, not the store's.
//!
//! ## Available Stores
//!
//! - [`MemoryStore`] - For tests, demos and fault injection
//! - `PgStore` - PostgreSQL via sqlx (feature `postgres`)
//!
//! ## Example
//!
//! ```rust
//! use equisync_store::{MemoryStore, RecordStore, Row, StoreValue};
//!
//! let store = MemoryStore::new();
//! store.set_equipment(vec![Row::new()
//!     .with("ID", StoreValue::Int(7))
//!     .with("Name", StoreValue::Text("Pump1".into()))]);
//!
//! let rows = store.query_equipment().unwrap();
//! assert_eq!(rows.len(), 1);
//! assert_eq!(rows[0].get("Name").and_then(StoreValue::as_text), Some("Pump1"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod row;
mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgStore;
pub use row::{Row, StoreValue};
pub use store::{QueryKind, RecordStore, DEFAULT_RECENT_LIMIT};
