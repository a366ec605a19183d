//! Structured error types for ingestion.
//!
//! `FormatError` aborts an ingestion and is shown to the operator.
//! `RowParseError` never escapes: the offending row is dropped and counted.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("input is empty")]
    EmptyInput,

    #[error("unrecognized format: no column mapping matches header '{header}'")]
    NoColumnMapping { header: String },

    #[error("headerless input needs at least 5 columns, found {found}")]
    TooFewColumns { found: usize },

    #[error("no usable rows ({dropped} dropped)")]
    NoRows { dropped: usize },

    #[error("failed to read '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum RowParseError {
    #[error("row has {found} fields, need at least 5")]
    TooFewFields { found: usize },

    #[error("column {column} is missing")]
    MissingField { column: usize },

    #[error("column {column}: '{value}' is not a number")]
    BadNumber { column: usize, value: String },

    #[error("unparseable timestamp '{0}'")]
    BadTimestamp(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}
