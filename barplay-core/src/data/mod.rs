//! Data ingestion: format detection and normalization into canonical bars

pub mod detect;
pub mod normalize;
pub mod provider;
pub mod timestamp;

pub use detect::{choose_delimiter, detect, ColumnMapping, DetectionRule, TimeEncoding};
pub use normalize::{normalize_file, normalize_text, suggested_name, IngestReport, NormalizedData};
pub use provider::{FormatError, RowParseError};
