//! Memory-footprint estimate for a resolved result.
//!
//! score = row_count * sum(width(column_type))

use crate::types::ColumnDescription;

/// Estimated bytes per value for a column type.
pub fn column_width(column_type: &str) -> u64 {
    let upper = column_type.trim().to_ascii_uppercase();
    let base = upper.split(['(', ' ']).next().unwrap_or("");
    match base {
        "BOOLEAN" | "BOOL" | "TINYINT" | "UTINYINT" => 1,
        "SMALLINT" | "USMALLINT" | "INTEGER" | "INT" | "UINTEGER" | "FLOAT" | "REAL" => 4,
        "BIGINT" | "UBIGINT" | "DOUBLE" | "DATE" | "TIME" | "TIMESTAMP" | "TIMESTAMPTZ"
        | "INTERVAL" => 8,
        "HUGEINT" | "UHUGEINT" | "DECIMAL" | "NUMERIC" | "UUID" => 16,
        _ => 64,
    }
}

/// Footprint estimate for `row_count` rows of the given schema.
pub fn compute_score(row_count: u64, columns: &[ColumnDescription]) -> u64 {
    let row_width: u64 = columns.iter().map(|c| column_width(&c.column_type)).sum();
    row_count.saturating_mul(row_width)
}
