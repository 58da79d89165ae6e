//! Shared value types: result rows, column descriptions and query hashes.

use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// One result row, keyed by column name.
pub type Row = Map<String, Value>;

/// A full result set as returned by a runner.
pub type Rows = Vec<Row>;

/// Content digest identifying a query by its construction arguments.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryHash([u8; 32]);

impl QueryHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        QueryHash(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Short form used in ids and log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..6])
    }
}

impl fmt::Display for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for QueryHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueryHash({})", self.short())
    }
}

/// One row of a `DESCRIBE` result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDescription {
    pub column_name: String,
    pub column_type: String,
    #[serde(default = "default_nullable")]
    pub nullable: String,
}

fn default_nullable() -> String {
    "YES".to_string()
}

impl ColumnDescription {
    pub fn new(
        column_name: impl Into<String>,
        column_type: impl Into<String>,
        nullable: bool,
    ) -> Self {
        Self {
            column_name: column_name.into(),
            column_type: column_type.into(),
            nullable: if nullable { "YES" } else { "NO" }.to_string(),
        }
    }

    /// Parse externally supplied column metadata.
    ///
    /// The metadata must be a JSON array of objects carrying at least
    /// `column_name` and `column_type`.
    pub fn list_from_json(value: Value) -> Result<Vec<ColumnDescription>, QueryError> {
        if !value.is_array() {
            return Err(QueryError::Schema(format!(
                "Expected column metadata to be an array, got {}",
                value
            )));
        }
        Ok(serde_json::from_value(value)?)
    }

    /// Parse the rows of a `DESCRIBE` statement.
    pub fn list_from_rows(rows: &[Row]) -> Result<Vec<ColumnDescription>, QueryError> {
        rows.iter()
            .map(|row| {
                serde_json::from_value(Value::Object(row.clone())).map_err(|e| {
                    QueryError::Schema(format!("Invalid column description row: {}", e))
                })
            })
            .collect()
    }
}

/// A row with every known column present and mapped to `null`.
pub fn mock_row(columns: &[ColumnDescription]) -> Row {
    columns
        .iter()
        .map(|c| (c.column_name.clone(), Value::Null))
        .collect()
}
