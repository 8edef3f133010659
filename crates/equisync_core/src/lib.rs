//! # equisync Core
//!
//! Live synchronization engine for equipment state.
//!
//! This crate provides:
//! - The entity table (latest known state per equipment id)
//! - The hosted address space and the projector building nodes into it
//! - The refresh loop pulling rows from a [`RecordStore`](equisync_store::RecordStore)
//! - The lookup/validation gateway serving client node ids
//! - The node manager tying these together across startup and teardown
//!
//! ## Architecture
//!
//! There is exactly one writer, the refresh worker, and any number of
//! readers. The entity table and the address space sit behind **one**
//! exclusive lock. The worker queries the store and converts rows without
//! holding it, then merges a whole batch in a single critical section.
//!
//! ## Key Invariants
//!
//! - The entity table only grows
//! - Each entity's node is created exactly once
//! - Record and anomaly rows never create entities
//! - A failed batch leaves the previous state in place
//! - Teardown returns only after the worker has exited
//!
//! ## Example
//!
//! ```rust
//! use equisync_core::{EquipmentNodeManager, ExternalReferences, NodeId, ServerConfig};
//! use equisync_store::{MemoryStore, Row};
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! store.set_equipment(vec![Row::new()
//!     .with("ID", 7i64)
//!     .with("Name", "Pump1")
//!     .with("Address", "A1")
//!     .with("MinValue", 0.0)
//!     .with("MaxValue", 100.0)
//!     .with("UpperLimit", 90.0)
//!     .with("LowerLimit", 10.0)
//!     .with("State", 1i64)]);
//!
//! let manager = EquipmentNodeManager::new(ServerConfig::new("memory"), store).unwrap();
//! manager.create_address_space(&mut ExternalReferences::new()).unwrap();
//!
//! let handle = manager.resolve_node_id(&NodeId::numeric(2, 7)).unwrap();
//! assert_eq!(handle.node.browse_name, "Pump1");
//!
//! manager.delete_address_space();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod config;
mod entity;
mod error;
mod gateway;
mod manager;
mod projector;
mod refresh;
mod schema;
mod state;
mod tree;

pub use batch::{EntityUpdate, EquipmentUpdate};
pub use config::{ConfigError, ServerConfig, CONNECTION_STRING_ENV};
pub use entity::{AttributeUpdates, Entity, EntityId, EntityTable, Upserted};
pub use error::{CoreError, CoreResult, LookupError, LookupResult};
pub use gateway::{Gateway, NodeHandle};
pub use manager::EquipmentNodeManager;
pub use projector::{object_node_id, property_node_id, TreeProjector};
pub use refresh::{
    BatchKind, BatchOutcome, BatchReport, CancelToken, CycleReport, RefreshState, RefreshStats, RefreshWorker,
    Refresher,
};
pub use schema::{default_timestamp, AttributeKey, AttributeType, AttributeValue};
pub use state::{shared, EngineState, SharedState};
pub use tree::{
    AddressSpace, ChangeListener, DataValue, ExternalReferences, HostedNode, Identifier, NodeClass, NodeId,
    ParseNodeIdError, PropertySource, Reference, ReferenceType, OBJECTS_FOLDER,
};
