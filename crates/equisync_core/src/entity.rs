//! The entity table: latest known state of every equipment item.
//!
//! ## Invariants
//!
//! - Ids are only ever added; there is no removal.
//! - Every entity holds exactly the keys in [`AttributeKey::ALL`].
//! - An entity's node is created once, with the entity, and never replaced.
//! - Every attribute change is pushed to its hosted property in the same
//!   call, so callers holding the shared lock publish table and tree
//!   together.

use crate::error::{CoreError, CoreResult};
use crate::projector::{property_node_id, TreeProjector};
use crate::schema::{AttributeKey, AttributeValue};
use crate::tree::{AddressSpace, NodeId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Backing-store primary key of an equipment item.
pub type EntityId = u32;

/// Attribute values to merge into an entity.
pub type AttributeUpdates = Vec<(AttributeKey, AttributeValue)>;

/// One equipment item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Primary key.
    pub id: EntityId,
    /// Display label, fixed at creation.
    pub name: String,
    /// Current attribute values.
    pub attributes: BTreeMap<AttributeKey, AttributeValue>,
    /// The hosted object node mirroring this entity.
    pub node: NodeId,
}

impl Entity {
    /// Returns the value of `key`.
    pub fn get(&self, key: AttributeKey) -> Option<&AttributeValue> {
        self.attributes.get(&key)
    }
}

/// Outcome of [`EntityTable::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upserted {
    /// A new entity (and its node) was created.
    Created,
    /// An existing entity was updated.
    Updated,
}

/// Map from entity id to latest state.
#[derive(Debug, Default)]
pub struct EntityTable {
    entities: BTreeMap<EntityId, Entity>,
}

impl EntityTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the entity with `id`.
    pub fn lookup(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Returns the number of entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns a copy of every entity, ordered by id.
    pub fn snapshot(&self) -> Vec<Entity> {
        self.entities.values().cloned().collect()
    }

    /// Creates entity `id` or merges `updates` into it.
    ///
    /// A new entity starts from the schema defaults, takes `ID` and `Name`
    /// from the arguments and then `updates`; its object node and property
    /// nodes are created in `space`. An existing entity keeps its name and
    /// merges `updates` key by key.
    ///
    /// # Errors
    ///
    /// Fails without touching the table if an update has the wrong type or
    /// targets `ID`/`Name`.
    pub fn upsert(
        &mut self,
        id: EntityId,
        name: &str,
        updates: &[(AttributeKey, AttributeValue)],
        space: &mut AddressSpace,
        projector: &TreeProjector,
        now: DateTime<Utc>,
    ) -> CoreResult<Upserted> {
        check_updates(updates)?;

        if self.entities.contains_key(&id) {
            self.merge(id, updates, space, now)?;
            return Ok(Upserted::Updated);
        }

        let mut attributes: BTreeMap<AttributeKey, AttributeValue> = AttributeKey::ALL
            .iter()
            .map(|key| (*key, key.default_value()))
            .collect();
        attributes.insert(AttributeKey::Id, AttributeValue::UInt32(id));
        attributes.insert(AttributeKey::Name, AttributeValue::String(name.to_string()));
        for (key, value) in updates {
            attributes.insert(*key, value.clone());
        }

        let node = projector.create_node(space, id, name)?;
        for (key, value) in &attributes {
            projector.create_property(space, &node, *key, value.clone(), now)?;
        }

        debug!(id, name, "created entity");
        self.entities.insert(
            id,
            Entity {
                id,
                name: name.to_string(),
                attributes,
                node,
            },
        );
        Ok(Upserted::Created)
    }

    /// Merges `updates` into entity `id` if it exists.
    ///
    /// Returns `false`, with no effect, for unknown ids: only the equipment
    /// batch creates entities.
    pub fn update_existing(
        &mut self,
        id: EntityId,
        updates: &[(AttributeKey, AttributeValue)],
        space: &mut AddressSpace,
        now: DateTime<Utc>,
    ) -> CoreResult<bool> {
        if !self.entities.contains_key(&id) {
            return Ok(false);
        }
        check_updates(updates)?;
        self.merge(id, updates, space, now)?;
        Ok(true)
    }

    fn merge(
        &mut self,
        id: EntityId,
        updates: &[(AttributeKey, AttributeValue)],
        space: &mut AddressSpace,
        now: DateTime<Utc>,
    ) -> CoreResult<()> {
        let Some(entity) = self.entities.get_mut(&id) else {
            return Ok(());
        };
        let namespace = entity.node.namespace;

        for (key, value) in updates {
            entity.attributes.insert(*key, value.clone());
            let property = property_node_id(namespace, id, *key);
            space.set_value(&property, value.clone(), now)?;
            space.clear_change_masks(&property);
        }
        Ok(())
    }
}

fn check_updates(updates: &[(AttributeKey, AttributeValue)]) -> CoreResult<()> {
    for (key, value) in updates {
        if matches!(key, AttributeKey::Id | AttributeKey::Name) {
            return Err(CoreError::ImmutableAttribute(key.as_str().to_string()));
        }
        let expected = key.attribute_type();
        let found = value.attribute_type();
        if expected != found {
            return Err(CoreError::TypeMismatch {
                key: key.as_str().to_string(),
                expected,
                found,
            });
        }
    }
    Ok(())
}
