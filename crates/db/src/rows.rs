//! Generic, runtime row <-> JSON conversion for the arbitrary-SQL surface
//! `ControlStore`/`TimeSeriesStore` expose to nodes.
//!
//! Fixed-shape queries elsewhere in this crate use `sqlx::query_as!`, which
//! is checked against the schema at compile time. A node's `query()` call
//! hands us a caller-built SQL string and positional JSON parameters, so
//! there's no fixed shape to check against — this module binds parameters
//! by JSON variant and reads result columns back out by Postgres type name.

use serde_json::Value;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Postgres, Row, TypeInfo};

/// Bind a list of `serde_json::Value` parameters onto a query, positionally.
/// Numbers are bound as `f64` (the quality/tag-value domain has no integer
/// columns that nodes query this way); everything else binds as its natural
/// Rust type.
pub fn bind_params<'q>(mut query: Query<'q, Postgres, PgArguments>, params: &'q [Value]) -> Query<'q, Postgres, PgArguments> {
    for param in params {
        query = match param {
            Value::Null => query.bind(None::<String>),
            Value::Bool(b) => query.bind(*b),
            Value::Number(n) => query.bind(n.as_f64().unwrap_or_default()),
            Value::String(s) => query.bind(s.as_str()),
            Value::Array(_) | Value::Object(_) => query.bind(param.clone()),
        };
    }
    query
}

/// Convert one result row into a `{column_name: value}` JSON object by
/// matching each column's Postgres type name.
#[must_use]
pub fn row_to_json(row: &PgRow) -> Value {
    let mut object = serde_json::Map::with_capacity(row.columns().len());
    for (i, col) in row.columns().iter().enumerate() {
        let name = col.name().to_string();
        let value = match col.type_info().name() {
            "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" => {
                row.try_get::<Option<String>, _>(i).ok().flatten().map_or(Value::Null, Value::String)
            }
            "INT2" | "INT4" | "SERIAL" => {
                row.try_get::<Option<i32>, _>(i).ok().flatten().map_or(Value::Null, |v| serde_json::json!(v))
            }
            "INT8" | "BIGSERIAL" => {
                row.try_get::<Option<i64>, _>(i).ok().flatten().map_or(Value::Null, |v| serde_json::json!(v))
            }
            "FLOAT4" => row.try_get::<Option<f32>, _>(i).ok().flatten().map_or(Value::Null, |v| serde_json::json!(v)),
            "FLOAT8" | "NUMERIC" => {
                row.try_get::<Option<f64>, _>(i).ok().flatten().map_or(Value::Null, |v| serde_json::json!(v))
            }
            "BOOL" => row.try_get::<Option<bool>, _>(i).ok().flatten().map_or(Value::Null, Value::Bool),
            "JSON" | "JSONB" => row.try_get::<Option<Value>, _>(i).ok().flatten().unwrap_or(Value::Null),
            "TIMESTAMPTZ" | "TIMESTAMP" => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)
                .ok()
                .flatten()
                .map_or(Value::Null, |v| Value::String(v.to_rfc3339())),
            "UUID" => row.try_get::<Option<uuid::Uuid>, _>(i).ok().flatten().map_or(Value::Null, |v| Value::String(v.to_string())),
            _ => row.try_get::<Option<String>, _>(i).ok().flatten().map_or(Value::Null, Value::String),
        };
        object.insert(name, value);
    }
    Value::Object(object)
}
