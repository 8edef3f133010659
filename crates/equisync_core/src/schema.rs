//! The fixed equipment attribute schema.
//!
//! Every entity carries exactly the keys in [`AttributeKey::ALL`], each with
//! a fixed [`AttributeType`]. Store columns are coerced into these types
//! before anything touches the entity table.

use crate::error::{CoreError, CoreResult};
use chrono::{DateTime, NaiveDateTime, Utc};
use equisync_store::StoreValue;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Seconds from the Unix epoch back to 0001-01-01T00:00:00Z.
const YEAR_ONE_SECS: i64 = -62_135_596_800;

/// The "never set" timestamp used as the default for time attributes.
pub fn default_timestamp() -> DateTime<Utc> {
    DateTime::from_timestamp(YEAR_ONE_SECS, 0).unwrap_or_default()
}

/// Attribute keys in the per-entity schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeKey {
    /// Backing-store primary key.
    #[serde(rename = "ID")]
    Id,
    /// Display label.
    Name,
    /// Equipment address.
    Address,
    /// Lower end of the measuring range.
    MinValue,
    /// Upper end of the measuring range.
    MaxValue,
    /// Upper alarm limit.
    UpperLimit,
    /// Lower alarm limit.
    LowerLimit,
    /// Equipment state code.
    State,
    /// Latest recorded value.
    Value,
    /// Time of the latest recorded value.
    TimeStamp,
    /// Status of the latest anomaly.
    AbnormityStatus,
    /// Peak value of the latest anomaly.
    AbnormityValue,
    /// Start of the latest anomaly.
    AbnormityBeginTime,
    /// End of the latest anomaly.
    AbnormityEndTime,
}

impl AttributeKey {
    /// All keys, in projection order.
    pub const ALL: [AttributeKey; 14] = [
        AttributeKey::Id,
        AttributeKey::Name,
        AttributeKey::Address,
        AttributeKey::MinValue,
        AttributeKey::MaxValue,
        AttributeKey::UpperLimit,
        AttributeKey::LowerLimit,
        AttributeKey::State,
        AttributeKey::Value,
        AttributeKey::TimeStamp,
        AttributeKey::AbnormityStatus,
        AttributeKey::AbnormityValue,
        AttributeKey::AbnormityBeginTime,
        AttributeKey::AbnormityEndTime,
    ];

    /// Returns the key as it appears in browse names and property ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            AttributeKey::Id => "ID",
            AttributeKey::Name => "Name",
            AttributeKey::Address => "Address",
            AttributeKey::MinValue => "MinValue",
            AttributeKey::MaxValue => "MaxValue",
            AttributeKey::UpperLimit => "UpperLimit",
            AttributeKey::LowerLimit => "LowerLimit",
            AttributeKey::State => "State",
            AttributeKey::Value => "Value",
            AttributeKey::TimeStamp => "TimeStamp",
            AttributeKey::AbnormityStatus => "AbnormityStatus",
            AttributeKey::AbnormityValue => "AbnormityValue",
            AttributeKey::AbnormityBeginTime => "AbnormityBeginTime",
            AttributeKey::AbnormityEndTime => "AbnormityEndTime",
        }
    }

    /// Returns the fixed type of this key.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeKey::Id => AttributeType::UInt32,
            AttributeKey::Name | AttributeKey::Address | AttributeKey::AbnormityStatus => {
                AttributeType::String
            }
            AttributeKey::MinValue
            | AttributeKey::MaxValue
            | AttributeKey::UpperLimit
            | AttributeKey::LowerLimit
            | AttributeKey::Value
            | AttributeKey::AbnormityValue => AttributeType::Double,
            AttributeKey::State => AttributeType::Int32,
            AttributeKey::TimeStamp
            | AttributeKey::AbnormityBeginTime
            | AttributeKey::AbnormityEndTime => AttributeType::DateTime,
        }
    }

    /// Returns the value a fresh entity holds for this key.
    pub fn default_value(&self) -> AttributeValue {
        self.attribute_type().default_value()
    }
}

impl fmt::Display for AttributeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttributeKey {
    type Err = CoreError;

    fn from_str(s: &str) -> CoreResult<Self> {
        AttributeKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| CoreError::UnknownAttribute(s.to_string()))
    }
}

/// Semantic type of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttributeType {
    /// Unsigned 32-bit integer.
    UInt32,
    /// UTF-8 string.
    String,
    /// 64-bit float.
    Double,
    /// Signed 32-bit integer.
    Int32,
    /// UTC timestamp.
    DateTime,
}

impl AttributeType {
    /// Returns the default value of this type.
    pub fn default_value(&self) -> AttributeValue {
        match self {
            AttributeType::UInt32 => AttributeValue::UInt32(0),
            AttributeType::String => AttributeValue::String(String::new()),
            AttributeType::Double => AttributeValue::Double(0.0),
            AttributeType::Int32 => AttributeValue::Int32(0),
            AttributeType::DateTime => AttributeValue::DateTime(default_timestamp()),
        }
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttributeType::UInt32 => "UInt32",
            AttributeType::String => "String",
            AttributeType::Double => "Double",
            AttributeType::Int32 => "Int32",
            AttributeType::DateTime => "DateTime",
        };
        f.write_str(name)
    }
}

/// A typed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum AttributeValue {
    /// Unsigned 32-bit integer.
    UInt32(u32),
    /// UTF-8 string.
    String(String),
    /// 64-bit float.
    Double(f64),
    /// Signed 32-bit integer.
    Int32(i32),
    /// UTC timestamp.
    DateTime(DateTime<Utc>),
}

impl AttributeValue {
    /// Returns the type of this value.
    pub fn attribute_type(&self) -> AttributeType {
        match self {
            AttributeValue::UInt32(_) => AttributeType::UInt32,
            AttributeValue::String(_) => AttributeType::String,
            AttributeValue::Double(_) => AttributeType::Double,
            AttributeValue::Int32(_) => AttributeType::Int32,
            AttributeValue::DateTime(_) => AttributeType::DateTime,
        }
    }

    /// Returns the value as a float, if it is a `Double`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the value as a string slice, if it is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value as a timestamp, if it is a `DateTime`.
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            AttributeValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }

    /// Coerces a store column into the type of `key`.
    ///
    /// Returns `Ok(None)` for SQL NULL: the attribute keeps its current value.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::RowConversion`] if the value cannot be
    /// represented in the key's type without loss.
    pub fn coerce(key: AttributeKey, column: &str, value: &StoreValue) -> CoreResult<Option<Self>> {
        let expected = key.attribute_type();
        let fail = |detail: &str| CoreError::RowConversion {
            column: column.to_string(),
            expected,
            found: format!("{} {}", value.kind(), detail).trim_end().to_string(),
        };

        let converted = match (expected, value) {
            (_, StoreValue::Null) => return Ok(None),

            (AttributeType::UInt32, StoreValue::Int(v)) => {
                u32::try_from(*v).map(AttributeValue::UInt32).map_err(|_| fail("out of range"))?
            }
            (AttributeType::UInt32, StoreValue::Float(v)) => integral(*v)
                .and_then(|v| u32::try_from(v).ok())
                .map(AttributeValue::UInt32)
                .ok_or_else(|| fail("not an unsigned integer"))?,
            (AttributeType::UInt32, StoreValue::Text(s)) => s
                .trim()
                .parse::<u32>()
                .map(AttributeValue::UInt32)
                .map_err(|_| fail("not an unsigned integer"))?,

            (AttributeType::Int32, StoreValue::Int(v)) => {
                i32::try_from(*v).map(AttributeValue::Int32).map_err(|_| fail("out of range"))?
            }
            (AttributeType::Int32, StoreValue::Float(v)) => integral(*v)
                .and_then(|v| i32::try_from(v).ok())
                .map(AttributeValue::Int32)
                .ok_or_else(|| fail("not an integer"))?,
            (AttributeType::Int32, StoreValue::Text(s)) => s
                .trim()
                .parse::<i32>()
                .map(AttributeValue::Int32)
                .map_err(|_| fail("not an integer"))?,

            (AttributeType::Double, StoreValue::Int(v)) => AttributeValue::Double(*v as f64),
            (AttributeType::Double, StoreValue::Float(v)) => AttributeValue::Double(*v),
            (AttributeType::Double, StoreValue::Text(s)) => s
                .trim()
                .parse::<f64>()
                .map(AttributeValue::Double)
                .map_err(|_| fail("not a number"))?,

            (AttributeType::String, StoreValue::Text(s)) => AttributeValue::String(s.clone()),
            (AttributeType::String, StoreValue::Int(v)) => AttributeValue::String(v.to_string()),
            (AttributeType::String, StoreValue::Float(v)) => AttributeValue::String(v.to_string()),
            (AttributeType::String, StoreValue::Timestamp(v)) => {
                AttributeValue::String(v.to_rfc3339())
            }

            (AttributeType::DateTime, StoreValue::Timestamp(v)) => AttributeValue::DateTime(*v),
            (AttributeType::DateTime, StoreValue::Text(s)) => parse_timestamp(s.trim())
                .map(AttributeValue::DateTime)
                .ok_or_else(|| fail("not a timestamp"))?,

            _ => return Err(fail("")),
        };
        Ok(Some(converted))
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::UInt32(v) => write!(f, "{v}"),
            AttributeValue::String(v) => write!(f, "{v}"),
            AttributeValue::Double(v) => write!(f, "{v}"),
            AttributeValue::Int32(v) => write!(f, "{v}"),
            AttributeValue::DateTime(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

fn integral(v: f64) -> Option<i64> {
    if v.is_finite() && v.fract() == 0.0 && v >= i64::MIN as f64 && v <= i64::MAX as f64 {
        Some(v as i64)
    } else {
        None
    }
}

/// Accepts RFC 3339 or the SQL `YYYY-MM-DD HH:MM:SS[.fff]` form (taken as UTC).
fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(s, format).ok())
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};
    use proptest::prelude::*;

    #[test]
    fn every_key_round_trips_through_its_name() {
        for key in AttributeKey::ALL {
            assert_eq!(key.as_str().parse::<AttributeKey>().unwrap(), key);
        }
        assert!("Bogus".parse::<AttributeKey>().is_err());
    }

    #[test]
    fn defaults_match_schema() {
        assert_eq!(AttributeKey::Value.default_value(), AttributeValue::Double(0.0));
        assert_eq!(
            AttributeKey::AbnormityStatus.default_value(),
            AttributeValue::String(String::new())
        );
        let ts = AttributeKey::TimeStamp.default_value().as_datetime().unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (1, 1, 1));
    }

    #[test]
    fn null_means_no_update() {
        let v = AttributeValue::coerce(AttributeKey::Address, "Address", &StoreValue::Null);
        assert_eq!(v.unwrap(), None);
    }

    #[test]
    fn integers_widen_to_double() {
        let v = AttributeValue::coerce(AttributeKey::Value, "clValue", &StoreValue::Int(55));
        assert_eq!(v.unwrap(), Some(AttributeValue::Double(55.0)));
    }

    #[test]
    fn out_of_range_state_is_rejected() {
        let err = AttributeValue::coerce(
            AttributeKey::State,
            "State",
            &StoreValue::Int(i64::from(i32::MAX) + 1),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::RowConversion { ref column, .. } if column == "State"));
    }

    #[test]
    fn negative_id_is_rejected() {
        assert!(AttributeValue::coerce(AttributeKey::Id, "ID", &StoreValue::Int(-1)).is_err());
    }

    #[test]
    fn fractional_float_is_not_an_integer() {
        assert!(AttributeValue::coerce(AttributeKey::State, "State", &StoreValue::Float(1.5)).is_err());
        assert_eq!(
            AttributeValue::coerce(AttributeKey::State, "State", &StoreValue::Float(2.0)).unwrap(),
            Some(AttributeValue::Int32(2))
        );
    }

    #[test]
    fn sql_timestamp_text_parses_as_utc() {
        let v = AttributeValue::coerce(
            AttributeKey::TimeStamp,
            "clTime",
            &StoreValue::Text("2024-03-01 12:30:00.250".into()),
        )
        .unwrap()
        .unwrap();
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap()
            + chrono::Duration::milliseconds(250);
        assert_eq!(v, AttributeValue::DateTime(expected));
    }

    #[test]
    fn number_is_not_a_timestamp() {
        assert!(
            AttributeValue::coerce(AttributeKey::TimeStamp, "clTime", &StoreValue::Int(5)).is_err()
        );
    }

    proptest! {
        #[test]
        fn any_i32_coerces_to_state(v in any::<i32>()) {
            let out = AttributeValue::coerce(AttributeKey::State, "State", &StoreValue::Int(i64::from(v)));
            prop_assert_eq!(out.unwrap(), Some(AttributeValue::Int32(v)));
        }

        #[test]
        fn coerced_values_have_the_key_type(v in any::<i64>(), key_idx in 0usize..14) {
            let key = AttributeKey::ALL[key_idx];
            if let Ok(Some(value)) = AttributeValue::coerce(key, key.as_str(), &StoreValue::Int(v)) {
                prop_assert_eq!(value.attribute_type(), key.attribute_type());
            }
        }
    }
}
