//! Conversion of store rows into entity updates.
//!
//! Conversion runs on the refresh worker before the shared lock is taken.

use crate::entity::{AttributeUpdates, EntityId};
use crate::error::{CoreError, CoreResult};
use crate::schema::{AttributeKey, AttributeValue};
use equisync_store::{Row, StoreValue};

/// Equipment table columns and the attributes they feed.
const EQUIPMENT_COLUMNS: [(&str, AttributeKey); 6] = [
    ("Address", AttributeKey::Address),
    ("MinValue", AttributeKey::MinValue),
    ("MaxValue", AttributeKey::MaxValue),
    ("UpperLimit", AttributeKey::UpperLimit),
    ("LowerLimit", AttributeKey::LowerLimit),
    ("State", AttributeKey::State),
];

const RECORD_COLUMNS: [(&str, AttributeKey); 2] = [
    ("clValue", AttributeKey::Value),
    ("clTime", AttributeKey::TimeStamp),
];

const ABNORMITY_COLUMNS: [(&str, AttributeKey); 4] = [
    ("Status", AttributeKey::AbnormityStatus),
    ("MaxValue", AttributeKey::AbnormityValue),
    ("BeginTime", AttributeKey::AbnormityBeginTime),
    ("EndTime", AttributeKey::AbnormityEndTime),
];

/// An equipment row: identity plus configuration attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct EquipmentUpdate {
    /// Entity id.
    pub id: EntityId,
    /// Display label.
    pub name: String,
    /// Configuration attributes present in the row.
    pub attributes: AttributeUpdates,
}

impl EquipmentUpdate {
    /// Converts a `tblEquipment` row.
    pub fn from_row(row: &Row) -> CoreResult<Self> {
        let id = entity_id(row, "ID")?;
        let name = match AttributeValue::coerce(AttributeKey::Name, "Name", required(row, "Name")?)? {
            Some(AttributeValue::String(name)) => name,
            // A nameless item still needs a browse name
            _ => id.to_string(),
        };
        Ok(Self {
            id,
            name,
            attributes: attributes(row, &EQUIPMENT_COLUMNS)?,
        })
    }
}

/// A value or anomaly row addressed to an existing entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityUpdate {
    /// Target entity id.
    pub id: EntityId,
    /// Attributes present in the row.
    pub attributes: AttributeUpdates,
}

impl EntityUpdate {
    /// Converts a `tblRecord` row.
    pub fn from_record_row(row: &Row) -> CoreResult<Self> {
        Ok(Self {
            id: entity_id(row, "EquipmentID")?,
            attributes: attributes(row, &RECORD_COLUMNS)?,
        })
    }

    /// Converts a `tblAbnormity` row.
    pub fn from_abnormity_row(row: &Row) -> CoreResult<Self> {
        Ok(Self {
            id: entity_id(row, "EquipmentID")?,
            attributes: attributes(row, &ABNORMITY_COLUMNS)?,
        })
    }
}

fn required<'a>(row: &'a Row, column: &'static str) -> CoreResult<&'a StoreValue> {
    row.get(column).ok_or(CoreError::MissingColumn(column))
}

fn entity_id(row: &Row, column: &'static str) -> CoreResult<EntityId> {
    match AttributeValue::coerce(AttributeKey::Id, column, required(row, column)?)? {
        Some(AttributeValue::UInt32(id)) => Ok(id),
        _ => Err(CoreError::MissingColumn(column)),
    }
}

fn attributes(row: &Row, columns: &[(&'static str, AttributeKey)]) -> CoreResult<AttributeUpdates> {
    let mut updates = Vec::with_capacity(columns.len());
    for &(column, key) in columns {
        if let Some(value) = AttributeValue::coerce(key, column, required(row, column)?)? {
            updates.push((key, value));
        }
    }
    Ok(updates)
}
