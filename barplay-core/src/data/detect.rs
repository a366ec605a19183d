//! Column-semantics and timestamp-encoding detection.
//!
//! Detection runs a priority-ordered list of rules over the first line of the
//! input. The first rule that yields a complete mapping wins. Rules are plain
//! functions so the list is easy to extend; none of them is authoritative,
//! they encode what common exports (exchange klines, broker exports, generic
//! spreadsheets) look like.

use serde::{Deserialize, Serialize};

use super::provider::FormatError;
use super::timestamp::{looks_like_date, parse_time_of_day};

/// How the time column(s) of a row decode into epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeEncoding {
    /// Integer milliseconds since the epoch.
    EpochMillis,
    /// Calendar date (`YYYYMMDD` with optional separators), optional time.
    CompactDate,
    /// Numeric epoch scaled by magnitude, or a date string.
    Auto,
}

/// Which detection rule produced a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectionRule {
    OpenTime,
    DateOpen,
    DateLikeFirst,
    NamedColumns,
    Positional,
}

/// Column indices for one ingestion attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub time: usize,
    /// Separate time-of-day column combined with a date column.
    pub time_of_day: Option<usize>,
    pub open: usize,
    pub high: usize,
    pub low: usize,
    pub close: usize,
    pub volume: Option<usize>,
    pub encoding: TimeEncoding,
    pub rule: DetectionRule,
    /// Whether the first line is a header (and so skipped as data).
    pub has_header: bool,
}

impl ColumnMapping {
    fn positional(time: usize, time_of_day: Option<usize>, width: usize) -> Self {
        let first = time_of_day.unwrap_or(time) + 1;
        Self {
            time,
            time_of_day,
            open: first,
            high: first + 1,
            low: first + 2,
            close: first + 3,
            volume: (width > first + 4).then_some(first + 4),
            encoding: TimeEncoding::Auto,
            rule: DetectionRule::Positional,
            has_header: false,
        }
    }
}

/// `;` only when the text has semicolons and no commas at all.
pub fn choose_delimiter(text: &str) -> u8 {
    if text.contains(';') && !text.contains(',') {
        b';'
    } else {
        b','
    }
}

/// Case-fold a header token and strip quoting and bracket decoration.
pub fn normalize_token(raw: &str) -> String {
    raw.trim()
        .trim_start_matches('\u{feff}')
        .trim_matches(|c: char| matches!(c, '"' | '\'' | '`' | '<' | '>' | '[' | ']' | '(' | ')'))
        .trim()
        .to_lowercase()
}

/// Token with every non-alphanumeric character removed (`open_time` -> `opentime`).
fn compact(token: &str) -> String {
    token.chars().filter(|c| c.is_alphanumeric()).collect()
}

const TIME_NAMES: &[&str] = &[
    "timestamp", "time", "datetime", "date", "ts", "t", "unix", "epoch", "gmttime", "localtime",
    "utctime", "opentime",
];
const OPEN_NAMES: &[&str] = &["open", "o", "openprice"];
const HIGH_NAMES: &[&str] = &["high", "h", "highprice"];
const LOW_NAMES: &[&str] = &["low", "l", "lowprice"];
const CLOSE_NAMES: &[&str] = &["close", "c", "closeprice", "last"];
const VOLUME_NAMES: &[&str] = &[
    "volume", "vol", "v", "tickvol", "tickvolume", "realvolume", "basevolume",
];

/// Header fields, raw and as compacted lookup names.
struct Header {
    raw: Vec<String>,
    names: Vec<String>,
}

impl Header {
    fn new(fields: &[String]) -> Self {
        Self {
            raw: fields.iter().map(|f| f.trim().to_string()).collect(),
            names: fields.iter().map(|f| compact(&normalize_token(f))).collect(),
        }
    }

    fn width(&self) -> usize {
        self.names.len()
    }

    fn find(&self, candidates: &[&str]) -> Option<usize> {
        self.names
            .iter()
            .position(|n| candidates.contains(&n.as_str()))
    }

    fn find_exact(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// open/high/low/close by name, volume optional.
    fn ohlcv(&self) -> Option<(usize, usize, usize, usize, Option<usize>)> {
        Some((
            self.find(OPEN_NAMES)?,
            self.find(HIGH_NAMES)?,
            self.find(LOW_NAMES)?,
            self.find(CLOSE_NAMES)?,
            self.find(VOLUME_NAMES),
        ))
    }
}

type Rule = fn(&Header) -> Option<ColumnMapping>;

/// Header rules in priority order.
const RULES: &[Rule] = &[rule_open_time, rule_date_open, rule_date_like_first, rule_named];

fn rule_open_time(h: &Header) -> Option<ColumnMapping> {
    let time = h.names.iter().position(|n| n.ends_with("opentime"))?;
    let (open, high, low, close, volume) = h.ohlcv().or_else(|| {
        // Unnamed price columns directly after the time column.
        (h.width() > time + 4).then(|| {
            let vol = (h.width() > time + 5).then_some(time + 5);
            (time + 1, time + 2, time + 3, time + 4, vol)
        })
    })?;
    Some(ColumnMapping {
        time,
        time_of_day: None,
        open,
        high,
        low,
        close,
        volume,
        encoding: TimeEncoding::EpochMillis,
        rule: DetectionRule::OpenTime,
        has_header: true,
    })
}

fn rule_date_open(h: &Header) -> Option<ColumnMapping> {
    let time = h.find_exact("date")?;
    h.find_exact("open")?;
    let (open, high, low, close, volume) = h.ohlcv()?;
    Some(ColumnMapping {
        time,
        time_of_day: h.find_exact("time"),
        open,
        high,
        low,
        close,
        volume,
        encoding: TimeEncoding::CompactDate,
        rule: DetectionRule::DateOpen,
        has_header: true,
    })
}

/// The "header" is really a data row starting with a date.
fn rule_date_like_first(h: &Header) -> Option<ColumnMapping> {
    if !looks_like_date(&h.raw[0]) {
        return None;
    }
    // date,time,o,h,l,c[,v] exports carry the time of day in column 1.
    let time_of_day = h
        .raw
        .get(1)
        .filter(|f| f.contains(':') && parse_time_of_day(f).is_some())
        .map(|_| 1);
    let needed = if time_of_day.is_some() { 6 } else { 5 };
    if h.width() < needed {
        return None;
    }

    let mut mapping = ColumnMapping::positional(0, time_of_day, h.width());
    mapping.encoding = TimeEncoding::CompactDate;
    mapping.rule = DetectionRule::DateLikeFirst;
    Some(mapping)
}

fn rule_named(h: &Header) -> Option<ColumnMapping> {
    let time = h.find(TIME_NAMES)?;
    let (open, high, low, close, volume) = h.ohlcv()?;
    Some(ColumnMapping {
        time,
        time_of_day: None,
        open,
        high,
        low,
        close,
        volume,
        encoding: TimeEncoding::Auto,
        rule: DetectionRule::NamedColumns,
        has_header: true,
    })
}

/// Detect a column mapping from the first line's fields.
///
/// A first line whose first field is a plain number is data, not a header, and
/// goes straight to the positional fallback.
pub fn detect(first_line: &[String]) -> Result<ColumnMapping, FormatError> {
    let first = first_line.first().map(|f| f.trim()).unwrap_or_default();
    if first_line.is_empty() || (first_line.len() == 1 && first.is_empty()) {
        return Err(FormatError::EmptyInput);
    }

    if first.parse::<f64>().is_ok() {
        if first_line.len() < 5 {
            return Err(FormatError::TooFewColumns {
                found: first_line.len(),
            });
        }
        return Ok(ColumnMapping::positional(0, None, first_line.len()));
    }

    let header = Header::new(first_line);
    RULES
        .iter()
        .find_map(|rule| rule(&header))
        .ok_or_else(|| FormatError::NoColumnMapping {
            header: first_line.join(","),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(line: &str) -> Vec<String> {
        line.split(',').map(String::from).collect()
    }

    #[test]
    fn delimiter_prefers_comma() {
        assert_eq!(choose_delimiter("a;b;c"), b';');
        assert_eq!(choose_delimiter("a;b,c"), b',');
        assert_eq!(choose_delimiter("a,b,c"), b',');
        assert_eq!(choose_delimiter("abc"), b',');
    }

    #[test]
    fn token_normalization_strips_decoration() {
        assert_eq!(normalize_token(" \"<DATE>\" "), "date");
        assert_eq!(normalize_token("[Close]"), "close");
        assert_eq!(normalize_token("\u{feff}Open_Time"), "open_time");
    }

    #[test]
    fn open_time_header_is_millis() {
        let m = detect(&fields("open_time,open,high,low,close,volume")).unwrap();
        assert_eq!(m.rule, DetectionRule::OpenTime);
        assert_eq!(m.encoding, TimeEncoding::EpochMillis);
        assert_eq!((m.time, m.open, m.close, m.volume), (0, 1, 4, Some(5)));
        assert!(m.has_header);
    }

    #[test]
    fn open_time_wins_over_named_columns() {
        let m = detect(&fields("timestamp,open_time,open,high,low,close")).unwrap();
        assert_eq!(m.rule, DetectionRule::OpenTime);
        assert_eq!(m.time, 1);
        assert_eq!(m.volume, None);
    }

    #[test]
    fn date_open_header_with_time_column() {
        let m = detect(&fields("<DATE>,<TIME>,<OPEN>,<HIGH>,<LOW>,<CLOSE>,<VOL>")).unwrap();
        assert_eq!(m.rule, DetectionRule::DateOpen);
        assert_eq!(m.encoding, TimeEncoding::CompactDate);
        assert_eq!(m.time_of_day, Some(1));
        assert_eq!((m.open, m.high, m.low, m.close, m.volume), (2, 3, 4, 5, Some(6)));
    }

    #[test]
    fn date_like_first_row_is_data() {
        let m = detect(&fields("2021-01-05,10,12,9,11,1000")).unwrap();
        assert_eq!(m.rule, DetectionRule::DateLikeFirst);
        assert!(!m.has_header);
        assert_eq!((m.open, m.volume), (1, Some(5)));

        let m = detect(&fields("2021.01.05,13:00,1.1,1.2,1.0,1.15,300")).unwrap();
        assert_eq!(m.time_of_day, Some(1));
        assert_eq!((m.open, m.close, m.volume), (2, 5, Some(6)));
    }

    #[test]
    fn named_columns_any_order_volume_optional() {
        let m = detect(&fields("Close,Low,High,Open,Timestamp")).unwrap();
        assert_eq!(m.rule, DetectionRule::NamedColumns);
        assert_eq!(m.encoding, TimeEncoding::Auto);
        assert_eq!((m.time, m.open, m.high, m.low, m.close), (4, 3, 2, 1, 0));
        assert_eq!(m.volume, None);
    }

    #[test]
    fn numeric_first_field_is_headerless() {
        let m = detect(&fields("1700000000,1,2,0.5,1.5")).unwrap();
        assert_eq!(m.rule, DetectionRule::Positional);
        assert!(!m.has_header);
        assert_eq!(m.volume, None);

        let err = detect(&fields("1700000000,1,2,0.5")).unwrap_err();
        assert!(matches!(err, FormatError::TooFewColumns { found: 4 }));
    }

    #[test]
    fn unknown_header_is_format_error() {
        let err = detect(&fields("foo,bar,baz,qux,quux")).unwrap_err();
        assert!(matches!(err, FormatError::NoColumnMapping { .. }));
    }
}
