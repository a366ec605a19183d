//! Timestamp decoding for the encodings format detection can produce.
//!
//! Everything resolves to UTC epoch seconds. Sub-second precision is floored.

use chrono::NaiveDate;

/// Decode a millisecond epoch value (`1700000000000` -> `1700000000`).
pub fn parse_epoch_millis(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<i64>() {
        return Some(ms.div_euclid(1_000));
    }
    let ms = s.parse::<f64>().ok().filter(|v| v.is_finite())?;
    Some((ms / 1_000.0).floor() as i64)
}

/// Decode a numeric epoch whose unit is inferred from its magnitude.
///
/// Integer part of up to 10 digits is seconds, up to 13 is milliseconds,
/// anything longer is microseconds.
pub fn parse_epoch_by_magnitude(s: &str) -> Option<i64> {
    let s = s.trim();
    let value = s.parse::<f64>().ok().filter(|v| v.is_finite())?;
    let int_part = s.split('.').next().unwrap_or(s);
    let digits = int_part.chars().filter(|c| c.is_ascii_digit()).count();

    let divisor = match digits {
        0..=10 => 1.0,
        11..=13 => 1_000.0,
        _ => 1_000_000.0,
    };
    Some((value / divisor).floor() as i64)
}

/// Decode a calendar date with an optional time of day.
///
/// Accepted date forms: `YYYYMMDD`, `YYYY-MM-DD` (also `.` or `/`),
/// `DD.MM.YYYY` (also `-` or `/`). The time part follows a space or `T` and is
/// `HH:MM[:SS[.fff]]` or compact `HHMM[SS]`. A trailing `Z` is ignored.
pub fn parse_date_time(s: &str) -> Option<i64> {
    let s = s.trim().trim_end_matches(['Z', 'z']);
    let (date_part, time_part) = match s.find([' ', 'T']) {
        Some(pos) => (&s[..pos], Some(s[pos + 1..].trim())),
        None => (s, None),
    };

    let date = parse_date(date_part)?;
    let secs_of_day = match time_part {
        Some(t) if !t.is_empty() => parse_time_of_day(t)?,
        _ => 0,
    };

    let midnight = date.and_hms_opt(0, 0, 0)?.and_utc().timestamp();
    Some(midnight + secs_of_day)
}

/// Decode a separate date column and time-of-day column.
pub fn parse_date_and_time(date: &str, time: &str) -> Option<i64> {
    let midnight = parse_date_time(date)?;
    Some(midnight + parse_time_of_day(time)?)
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.len() == 8 && s.bytes().all(|b| b.is_ascii_digit()) {
        let y = s[0..4].parse().ok()?;
        let m = s[4..6].parse().ok()?;
        let d = s[6..8].parse().ok()?;
        return NaiveDate::from_ymd_opt(y, m, d);
    }

    let parts: Vec<&str> = s.split(['-', '.', '/']).collect();
    if parts.len() != 3 || parts.iter().any(|p| p.is_empty()) {
        return None;
    }
    let (y, m, d) = if parts[0].len() == 4 {
        (parts[0], parts[1], parts[2])
    } else if parts[2].len() == 4 {
        (parts[2], parts[1], parts[0])
    } else {
        return None;
    };
    NaiveDate::from_ymd_opt(y.parse().ok()?, m.parse().ok()?, d.parse().ok()?)
}

/// Seconds since midnight for `HH:MM[:SS[.fff]]` or `HHMM[SS]`.
pub fn parse_time_of_day(s: &str) -> Option<i64> {
    let s = s.trim();
    let whole = s.split('.').next().unwrap_or(s);

    let (h, m, sec): (i64, i64, i64) = if whole.contains(':') {
        let parts: Vec<&str> = whole.split(':').collect();
        match parts.as_slice() {
            [h, m] => (h.parse().ok()?, m.parse().ok()?, 0),
            [h, m, s] => (h.parse().ok()?, m.parse().ok()?, s.parse().ok()?),
            _ => return None,
        }
    } else if whole.bytes().all(|b| b.is_ascii_digit()) {
        match whole.len() {
            4 => (whole[0..2].parse().ok()?, whole[2..4].parse().ok()?, 0),
            6 => (
                whole[0..2].parse().ok()?,
                whole[2..4].parse().ok()?,
                whole[4..6].parse().ok()?,
            ),
            _ => return None,
        }
    } else {
        return None;
    };

    if !(0..24).contains(&h) || !(0..60).contains(&m) || !(0..61).contains(&sec) {
        return None;
    }
    Some(h * 3600 + m * 60 + sec)
}

/// True when `s` decodes as a calendar date (with or without time).
pub fn looks_like_date(s: &str) -> bool {
    parse_date_time(s).is_some()
}
