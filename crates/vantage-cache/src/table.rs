//! Row-oriented table payloads.
//!
//! A table stores its column names once and each row as a positional array,
//! which keeps large record sets compact. Stored tables start with a magic
//! header so `get_any` can tell them apart from generic JSON values.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{CacheError, CacheResult};

pub const TABLE_MAGIC: &[u8] = b"VTBL1\n";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table from records that serialize to JSON objects. Columns come
    /// from the first record; fields missing from later records become null.
    pub fn from_records<T: Serialize>(records: &[T]) -> CacheResult<Self> {
        let mut columns: Vec<String> = Vec::new();
        let mut rows = Vec::with_capacity(records.len());

        for record in records {
            let mut object = match serde_json::to_value(record)? {
                Value::Object(map) => map,
                other => {
                    return Err(CacheError::Codec(format!(
                        "table rows must be objects, got {}",
                        other
                    )))
                }
            };
            if columns.is_empty() {
                columns = object.keys().cloned().collect();
            }
            let row = columns
                .iter()
                .map(|c| object.remove(c).unwrap_or(Value::Null))
                .collect();
            rows.push(row);
        }

        Ok(Self { columns, rows })
    }

    pub fn into_records<T: DeserializeOwned>(self) -> CacheResult<Vec<T>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|row| {
                let object: Map<String, Value> = columns.iter().cloned().zip(row).collect();
                serde_json::from_value(Value::Object(object)).map_err(CacheError::from)
            })
            .collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn to_bytes(&self) -> CacheResult<Vec<u8>> {
        let body = serde_json::to_vec(self)?;
        let mut out = Vec::with_capacity(TABLE_MAGIC.len() + body.len());
        out.extend_from_slice(TABLE_MAGIC);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn from_bytes(bytes: &[u8]) -> CacheResult<Self> {
        let body = bytes
            .strip_prefix(TABLE_MAGIC)
            .ok_or_else(|| CacheError::Codec("value is not a table payload".to_string()))?;
        Ok(serde_json::from_slice(body)?)
    }

    pub fn is_table(bytes: &[u8]) -> bool {
        bytes.starts_with(TABLE_MAGIC)
    }
}

/// Any value read back from the store.
#[derive(Debug, Clone, PartialEq)]
pub enum CachePayload {
    Table(Table),
    Json(Value),
}

impl CachePayload {
    pub fn decode(bytes: &[u8]) -> CacheResult<Self> {
        if Table::is_table(bytes) {
            Table::from_bytes(bytes).map(CachePayload::Table)
        } else {
            Ok(CachePayload::Json(serde_json::from_slice(bytes)?))
        }
    }

    /// Render as JSON: tables become an array of row objects.
    pub fn into_json(self) -> Value {
        match self {
            CachePayload::Json(value) => value,
            CachePayload::Table(table) => {
                let columns = table.columns;
                Value::Array(
                    table
                        .rows
                        .into_iter()
                        .map(|row| Value::Object(columns.iter().cloned().zip(row).collect()))
                        .collect(),
                )
            }
        }
    }
}
