//! Recorded database queries.
//!
//! The result carries the table as a JSON-serialized string, which is why
//! the diff engine parses `result.table` before comparing query records.

use crate::errors::RetraceError;
use crate::intercept::intercept;
use crate::operation;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde_json::{Map, Value};

operation! {
    op: Query,
    group: "Database",
    params: QueryParams { sql: String },
    result: QueryResult { table: String },
}

fn column_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::from(n),
        ValueRef::Real(f) => Value::from(f),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::from(blob.to_vec()),
    }
}

/// Runs `sql` and returns the result set as a JSON array of row objects,
/// serialized to a string.
pub fn run_query(conn: &Connection, sql: &str) -> Result<String, RetraceError> {
    intercept::<Query, _, _, _>(
        || QueryParams {
            sql: sql.to_string(),
        },
        || {
            let mut stmt = conn
                .prepare(sql)
                .map_err(|e| RetraceError::Database(e.to_string()))?;
            let columns: Vec<String> = stmt
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();

            let mut table = Vec::new();
            let mut rows = stmt
                .query([])
                .map_err(|e| RetraceError::Database(e.to_string()))?;
            while let Some(row) = rows
                .next()
                .map_err(|e| RetraceError::Database(e.to_string()))?
            {
                let mut object = Map::new();
                for (index, name) in columns.iter().enumerate() {
                    let value = row
                        .get_ref(index)
                        .map_err(|e| RetraceError::Database(e.to_string()))?;
                    object.insert(name.clone(), column_value(value));
                }
                table.push(Value::Object(object));
            }
            serde_json::to_string(&Value::Array(table))
                .map_err(|e| RetraceError::Serialization(e.to_string()))
        },
    )
}
