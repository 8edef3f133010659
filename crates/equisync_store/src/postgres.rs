//! PostgreSQL record store.

use crate::error::{StoreError, StoreResult};
use crate::row::{Row, StoreValue};
use crate::store::RecordStore;
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row as _, TypeInfo};
use tokio::runtime::Runtime;
use tracing::{debug, info};

const EQUIPMENT_SQL: &str = r#"SELECT "ID"::int8 AS "ID", "Name"::text AS "Name",
       "Address"::text AS "Address", "MinValue"::float8 AS "MinValue",
       "MaxValue"::float8 AS "MaxValue", "UpperLimit"::float8 AS "UpperLimit",
       "LowerLimit"::float8 AS "LowerLimit", "State"::int8 AS "State"
  FROM "tblEquipment""#;

const RECORDS_SQL: &str = r#"SELECT "ID"::int8 AS "ID", "EquipmentID"::int8 AS "EquipmentID",
       "clValue"::float8 AS "clValue", "clTime"::timestamptz AS "clTime"
  FROM "tblRecord"
 ORDER BY "ID" DESC
 LIMIT $1"#;

const ABNORMITIES_SQL: &str = r#"SELECT "ID"::int8 AS "ID", "EquipmentID"::int8 AS "EquipmentID",
       "Status"::text AS "Status", "MaxValue"::float8 AS "MaxValue",
       "BeginTime"::timestamptz AS "BeginTime", "EndTime"::timestamptz AS "EndTime"
  FROM "tblAbnormity"
 ORDER BY "ID" DESC
 LIMIT $1"#;

/// A record store backed by PostgreSQL.
///
/// The pool is async; queries are driven to completion on a private
/// current-thread runtime so callers keep the blocking [`RecordStore`]
/// contract. Must not be called from inside another tokio runtime.
pub struct PgStore {
    runtime: Runtime,
    pool: PgPool,
}

impl PgStore {
    /// Creates a store for `connection_string`.
    ///
    /// Connections are opened lazily; an unreachable server surfaces on the
    /// first query as [`StoreError::Connectivity`].
    pub fn connect(connection_string: &str) -> StoreResult<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| StoreError::connectivity(e.to_string()))?;

        let pool = {
            let _guard = runtime.enter();
            PgPoolOptions::new()
                .max_connections(2)
                .connect_lazy(connection_string)
                .map_err(|e| StoreError::connectivity(e.to_string()))?
        };

        info!("PostgreSQL record store configured");
        Ok(Self { runtime, pool })
    }

    fn fetch(&self, sql: &str, limit: Option<u32>) -> StoreResult<Vec<Row>> {
        debug!(sql, "querying record store");
        let rows = self
            .runtime
            .block_on(async {
                let query = sqlx::query(sql);
                let query = match limit {
                    Some(limit) => query.bind(i64::from(limit)),
                    None => query,
                };
                query.fetch_all(&self.pool).await
            })
            .map_err(map_sqlx_error)?;

        rows.iter().map(convert_row).collect()
    }
}

fn map_sqlx_error(error: sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::Configuration(_) => StoreError::connectivity(error.to_string()),
        other => StoreError::query(other.to_string()),
    }
}

fn convert_row(row: &PgRow) -> StoreResult<Row> {
    let mut out = Row::new();
    for (index, column) in row.columns().iter().enumerate() {
        let value: Result<StoreValue, sqlx::Error> = match column.type_info().name() {
            "INT2" => row.try_get::<Option<i16>, _>(index).map(|v| v.map(i64::from).into()),
            "INT4" => row.try_get::<Option<i32>, _>(index).map(|v| v.map(i64::from).into()),
            "INT8" => row.try_get::<Option<i64>, _>(index).map(Into::into),
            "FLOAT4" => row
                .try_get::<Option<f32>, _>(index)
                .map(|v| v.map(f64::from).into()),
            "FLOAT8" => row.try_get::<Option<f64>, _>(index).map(Into::into),
            "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(index).map(Into::into),
            "TIMESTAMP" => row
                .try_get::<Option<NaiveDateTime>, _>(index)
                .map(|v| v.map(|naive| naive.and_utc()).into()),
            "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(index).map(Into::into)
            }
            other => {
                return Err(StoreError::query(format!(
                    "unsupported column type {other} for {}",
                    column.name()
                )))
            }
        };
        let value = value.map_err(|e| StoreError::query(e.to_string()))?;
        out.push(column.name(), value);
    }
    Ok(out)
}

impl RecordStore for PgStore {
    fn query_equipment(&self) -> StoreResult<Vec<Row>> {
        self.fetch(EQUIPMENT_SQL, None)
    }

    fn query_recent_records(&self, limit: u32) -> StoreResult<Vec<Row>> {
        self.fetch(RECORDS_SQL, Some(limit))
    }

    fn query_recent_abnormities(&self, limit: u32) -> StoreResult<Vec<Row>> {
        self.fetch(ABNORMITIES_SQL, Some(limit))
    }
}
