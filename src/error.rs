//! Error type for recoverable failures in the table layer.
//!
//! Only failures a caller can reasonably handle end up here: bad input when
//! building or mutating tables, query text that does not parse, and JSON
//! rendering problems. Contract violations on views (out-of-range positions,
//! typed access with the wrong type, access through a detached view) panic
//! instead, see `view.rs`.

use crate::column::{ColumnType, ColumnValue};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TableError>;

#[derive(Error, Debug)]
pub enum TableError {
    #[error("Column '{0}' not found")]
    ColumnNotFound(String),

    #[error("Column index {index} out of range [0, {count})")]
    ColumnOutOfRange { index: usize, count: usize },

    #[error("Row {row} out of range [0, {len})")]
    RowOutOfRange { row: usize, len: usize },

    /// Insert positions may equal the length (append), hence the closed range.
    #[error("Insert position {index} out of range [0, {len}]")]
    InsertOutOfRange { index: usize, len: usize },

    #[error("Type mismatch: expected {expected:?}, got {found:?}")]
    TypeMismatch { expected: ColumnType, found: ColumnValue },

    #[error("Column '{0}' is not nullable")]
    NotNullable(String),

    #[error("Missing value for column '{0}'")]
    MissingValue(String),

    #[error("Column '{column}' is not a link column (type {column_type:?})")]
    NotALinkColumn { column: String, column_type: ColumnType },

    #[error("Link target {target} out of range [0, {len})")]
    LinkTargetOutOfRange { target: usize, len: usize },

    #[error("Unknown storage hint: '{0}'. Use 'fast_reads' or 'fast_updates'")]
    UnknownStorageHint(String),

    #[error("Query parse error: {0}")]
    Parse(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
