//! Row parsing and canonicalization.
//!
//! Text in, ascending `Bar`s out. Rows that fail to parse are dropped and
//! counted; only a missing column mapping (or nothing usable at all) aborts.

use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::detect::{choose_delimiter, detect, ColumnMapping, DetectionRule, TimeEncoding};
use super::provider::{FormatError, RowParseError};
use super::timestamp::{
    parse_date_and_time, parse_date_time, parse_epoch_by_magnitude, parse_epoch_millis,
};
use crate::domain::Bar;

/// Outcome counters for one ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestReport {
    pub accepted: usize,
    pub dropped: usize,
    pub rule: DetectionRule,
    pub delimiter: char,
}

/// Canonical bars plus the name the session should get by default.
#[derive(Debug, Clone)]
pub struct NormalizedData {
    pub name: String,
    pub bars: Vec<Bar>,
    pub report: IngestReport,
}

/// Session name suggested for a source: file name without directories or extension.
pub fn suggested_name(source: &str) -> String {
    let file = source
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(source)
        .trim();
    let stem = match file.rfind('.') {
        Some(pos) if pos > 0 => &file[..pos],
        _ => file,
    };
    if stem.is_empty() {
        "untitled".to_string()
    } else {
        stem.to_string()
    }
}

/// Read and normalize a file from disk.
pub fn normalize_file(path: &Path) -> Result<NormalizedData, FormatError> {
    let text = std::fs::read_to_string(path).map_err(|source| FormatError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    normalize_text(&path.to_string_lossy(), &text)
}

/// Detect the format of `text` and convert every parseable row into a bar.
pub fn normalize_text(source_name: &str, text: &str) -> Result<NormalizedData, FormatError> {
    if text.trim().is_empty() {
        return Err(FormatError::EmptyInput);
    }

    let delimiter = choose_delimiter(text);
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(text.as_bytes());

    let mut records = reader.records();
    let first = match records.next() {
        Some(Ok(record)) => record,
        Some(Err(e)) => {
            return Err(FormatError::NoColumnMapping {
                header: e.to_string(),
            })
        }
        None => return Err(FormatError::EmptyInput),
    };
    let first_fields: Vec<String> = first.iter().map(String::from).collect();
    let mapping = detect(&first_fields)?;
    debug!(
        source = source_name,
        rule = ?mapping.rule,
        encoding = ?mapping.encoding,
        delimiter = %(delimiter as char),
        "detected column mapping"
    );

    let mut bars = Vec::new();
    let mut dropped = 0usize;

    let header_row = (!mapping.has_header).then_some(Ok(first));
    for (line, record) in header_row.into_iter().chain(records).enumerate() {
        let parsed = record
            .map_err(|e| RowParseError::Malformed(e.to_string()))
            .and_then(|r| parse_row(&r, &mapping));
        match parsed {
            Ok(bar) => bars.push(bar),
            Err(e) => {
                trace!(line, error = %e, "dropping row");
                dropped += 1;
            }
        }
    }

    if bars.is_empty() {
        return Err(FormatError::NoRows { dropped });
    }

    // Stable: co-located duplicates keep file order.
    bars.sort_by_key(|b| b.time);

    debug!(
        source = source_name,
        accepted = bars.len(),
        dropped,
        "normalized bars"
    );

    Ok(NormalizedData {
        name: suggested_name(source_name),
        report: IngestReport {
            accepted: bars.len(),
            dropped,
            rule: mapping.rule,
            delimiter: delimiter as char,
        },
        bars,
    })
}

/// Parse one record according to `mapping`.
pub fn parse_row(record: &StringRecord, mapping: &ColumnMapping) -> Result<Bar, RowParseError> {
    if record.len() < 5 {
        return Err(RowParseError::TooFewFields {
            found: record.len(),
        });
    }

    let time = parse_time(record, mapping)?;
    let open = number(record, mapping.open)?;
    let high = number(record, mapping.high)?;
    let low = number(record, mapping.low)?;
    let close = number(record, mapping.close)?;
    let volume = mapping
        .volume
        .and_then(|col| record.get(col))
        .and_then(|v| v.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.max(0.0))
        .unwrap_or(0.0);

    Ok(Bar::new(time, open, high, low, close, volume))
}

fn field(record: &StringRecord, column: usize) -> Result<&str, RowParseError> {
    record
        .get(column)
        .ok_or(RowParseError::MissingField { column })
}

fn number(record: &StringRecord, column: usize) -> Result<f64, RowParseError> {
    let raw = field(record, column)?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| RowParseError::BadNumber {
            column,
            value: raw.to_string(),
        })
}

fn parse_time(record: &StringRecord, mapping: &ColumnMapping) -> Result<i64, RowParseError> {
    let raw = field(record, mapping.time)?;
    let decoded = match (mapping.encoding, mapping.time_of_day) {
        (TimeEncoding::EpochMillis, _) => parse_epoch_millis(raw),
        (TimeEncoding::CompactDate, Some(col)) => {
            parse_date_and_time(raw, field(record, col)?)
        }
        (TimeEncoding::CompactDate, None) => parse_date_time(raw),
        (TimeEncoding::Auto, _) => {
            parse_epoch_by_magnitude(raw).or_else(|| parse_date_time(raw))
        }
    };
    decoded.ok_or_else(|| RowParseError::BadTimestamp(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_time_scenario() {
        let text = "open_time,open,high,low,close,volume\n1700000000000,100,105,95,102,10\n";
        let data = normalize_text("BTCUSDT-1m.csv", text).unwrap();
        assert_eq!(data.bars, vec![Bar::new(1_700_000_000, 100.0, 105.0, 95.0, 102.0, 10.0)]);
        assert_eq!(data.name, "BTCUSDT-1m");
        assert_eq!(data.report.rule, DetectionRule::OpenTime);
    }

    #[test]
    fn date_header_scenario_is_utc_midnight() {
        let text = "Date,Open,High,Low,Close,Volume\n2021-01-05,10,12,9,11,1000\n";
        let data = normalize_text("spy.csv", text).unwrap();
        assert_eq!(data.bars.len(), 1);
        assert_eq!(data.bars[0].time, 1_609_804_800);
        assert_eq!(data.bars[0].volume, 1000.0);
    }

    #[test]
    fn semicolon_delimited_with_quotes() {
        let text = "\"Time\";\"Open\";\"High\";\"Low\";\"Close\"\n\"120\";1;2;0.5;1.5\n\"60\";1;2;0.5;1.5\n";
        let data = normalize_text("x", text).unwrap();
        assert_eq!(data.report.delimiter, ';');
        assert_eq!(data.bars.iter().map(|b| b.time).collect::<Vec<_>>(), vec![60, 120]);
        assert!(data.bars.iter().all(|b| b.volume == 0.0));
    }

    #[test]
    fn headerless_rows_are_sorted_and_scaled_per_row() {
        let text = "1700000120,1,2,0.5,1.5,3\n1700000060000,1,2,0.5,1.5,3\n1700000000000000,1,2,0.5,1.5,3\n";
        let data = normalize_text("raw.txt", text).unwrap();
        let times: Vec<i64> = data.bars.iter().map(|b| b.time).collect();
        assert_eq!(times, vec![1_700_000_000, 1_700_000_060, 1_700_000_120]);
        assert_eq!(data.report.rule, DetectionRule::Positional);
    }

    #[test]
    fn bad_rows_are_dropped_not_fatal() {
        let text = "time,open,high,low,close,volume\n\
                    60,1,2,0.5,1.5,10\n\
                    120,x,2,0.5,1.5,10\n\
                    180,1,2\n\
                    nope,1,2,0.5,1.5,10\n\
                    240,1,2,0.5,1.5,\n";
        let data = normalize_text("x", text).unwrap();
        assert_eq!(data.report.accepted, 2);
        assert_eq!(data.report.dropped, 3);
        assert_eq!(data.bars[1].volume, 0.0);
    }

    #[test]
    fn duplicates_keep_file_order() {
        let text = "time,open,high,low,close\n60,1,1,1,1\n60,2,2,2,2\n0,3,3,3,3\n";
        let data = normalize_text("x", text).unwrap();
        let opens: Vec<f64> = data.bars.iter().map(|b| b.open).collect();
        assert_eq!(opens, vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn date_like_first_line_is_kept_as_data() {
        let text = "2021.01.05,00:00,1,2,0.5,1.5,10\n2021.01.05,00:01,1,2,0.5,1.5,10\n";
        let data = normalize_text("eurusd.csv", text).unwrap();
        assert_eq!(data.bars.len(), 2);
        assert_eq!(data.bars[1].time - data.bars[0].time, 60);
    }

    #[test]
    fn format_errors() {
        assert!(matches!(normalize_text("x", "  \n"), Err(FormatError::EmptyInput)));
        assert!(matches!(
            normalize_text("x", "a,b,c,d,e\n1,2,3,4,5\n"),
            Err(FormatError::NoColumnMapping { .. })
        ));
        assert!(matches!(
            normalize_text("x", "time,open,high,low,close\nbad,1,1,1,1\n"),
            Err(FormatError::NoRows { dropped: 1 })
        ));
    }

    #[test]
    fn suggested_names() {
        assert_eq!(suggested_name("/data/BTCUSDT-1m-2024.csv"), "BTCUSDT-1m-2024");
        assert_eq!(suggested_name("C:\\x\\eurusd.txt"), "eurusd");
        assert_eq!(suggested_name(".hidden"), ".hidden");
        assert_eq!(suggested_name(""), "untitled");
    }
}
