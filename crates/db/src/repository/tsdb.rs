//! Time-series repository functions — `tag_values` and `system_metrics`.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use nodes::context::TimeSeriesStore;
use nodes::error::NodeError;
use nodes::tag::{DriverType, TagData, TagValue};
use quality::Quality;

use crate::models::TagValueRow;
use crate::rows::{bind_params, row_to_json};
use crate::DbError;

fn row_to_tag_value(row: TagValueRow) -> TagValue {
    let value = if let Some(n) = row.v_num {
        TagData::Number(n)
    } else if let Some(s) = row.v_text {
        TagData::Text(s)
    } else if let Some(j) = row.v_json {
        TagData::Structured(j)
    } else {
        TagData::Null
    };
    TagValue { value, quality: Quality(row.quality as u8), timestamp: row.ts }
}

/// Append one reading. `system_metrics` rows go through
/// [`insert_system_metric`] instead — this is the path for `DriverType`
/// tags proper (Internal/Opcua/Modbus/Mqtt).
pub async fn insert_tag_value(
    pool: &PgPool,
    connection_id: Uuid,
    tag_id: Uuid,
    quality: Quality,
    value: &TagData,
) -> Result<(), DbError> {
    let (v_num, v_text, v_json) = match value {
        TagData::Null => (None, None, None),
        TagData::Number(n) => (Some(*n), None, None),
        TagData::Text(s) => (None, Some(s.clone()), None),
        TagData::Structured(v) => (None, None, Some(v.clone())),
    };
    sqlx::query!(
        r#"
        INSERT INTO tag_values (ts, connection_id, tag_id, quality, v_num, v_text, v_json)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
        Utc::now(),
        connection_id,
        tag_id,
        quality.0 as i16,
        v_num,
        v_text,
        v_json,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Latest `system_metrics` reading for a `DriverType::System` tag, as a
/// `TagValue` — always `Good` quality, since a row only exists once the
/// engine itself has written it.
async fn latest_system_metric_value(pool: &PgPool, tag_id: Uuid) -> Result<Option<TagValue>, DbError> {
    let row = sqlx::query!(
        r#"SELECT ts, v_num FROM system_metrics WHERE tag_id = $1 ORDER BY ts DESC LIMIT 1"#,
        tag_id,
    )
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| TagValue { value: TagData::Number(row.v_num), quality: Quality::GOOD, timestamp: row.ts }))
}

pub async fn latest_tag_value_row(pool: &PgPool, tag_id: Uuid) -> Result<Option<TagValueRow>, DbError> {
    let row = sqlx::query_as!(
        TagValueRow,
        r#"
        SELECT ts, connection_id, tag_id, quality, v_num, v_text, v_json
        FROM tag_values WHERE tag_id = $1 ORDER BY ts DESC LIMIT 1
        "#,
        tag_id,
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn tag_history_rows(pool: &PgPool, tag_id: Uuid, window_secs: i64) -> Result<Vec<TagValueRow>, DbError> {
    let rows = sqlx::query_as!(
        TagValueRow,
        r#"
        SELECT ts, connection_id, tag_id, quality, v_num, v_text, v_json
        FROM tag_values
        WHERE tag_id = $1 AND ts >= now() - ($2 || ' seconds')::interval
        ORDER BY ts ASC
        "#,
        tag_id,
        window_secs.to_string(),
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Record one engine/runtime telemetry point under a `DriverType::System`
/// tag (scan cycle duration, memory usage, …).
pub async fn insert_system_metric(pool: &PgPool, tag_id: Uuid, value: f64) -> Result<(), DbError> {
    sqlx::query!(
        "INSERT INTO system_metrics (ts, tag_id, v_num) VALUES ($1, $2, $3)",
        Utc::now(),
        tag_id,
        value,
    )
    .execute(pool)
    .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// TimeSeriesStore implementation
// ---------------------------------------------------------------------------

/// The `nodes::context::TimeSeriesStore` implementation backing the engine
/// in production.
pub struct PgTimeSeriesStore {
    pool: PgPool,
}

impl PgTimeSeriesStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TimeSeriesStore for PgTimeSeriesStore {
    async fn query(&self, sql: &str, params: Vec<Value>) -> Result<Vec<Value>, NodeError> {
        let query = bind_params(sqlx::query(sql), &params);
        let rows = query.fetch_all(&self.pool).await.map_err(|e| NodeError::Transient(e.to_string()))?;
        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn latest_tag_value(&self, tag_id: Uuid, driver_type: DriverType) -> Result<Option<TagValue>, NodeError> {
        if driver_type == DriverType::System {
            return Ok(latest_system_metric_value(&self.pool, tag_id).await?);
        }
        let row = latest_tag_value_row(&self.pool, tag_id).await?;
        Ok(row.map(row_to_tag_value))
    }

    async fn history(&self, tag_id: Uuid, window_secs: i64) -> Result<Vec<TagValue>, NodeError> {
        let rows = tag_history_rows(&self.pool, tag_id, window_secs).await?;
        Ok(rows.into_iter().map(row_to_tag_value).collect())
    }
}
