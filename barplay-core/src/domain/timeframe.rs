//! Timeframe: aggregation bucket width in seconds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const MINUTE: i64 = 60;
const HOUR: i64 = 60 * MINUTE;
const DAY: i64 = 24 * HOUR;
const WEEK: i64 = 7 * DAY;

/// Base resolution assumed when a timeline has fewer than two timestamps.
pub const DEFAULT_BASE_SECS: i64 = MINUTE;

#[derive(Debug, Error, PartialEq)]
pub enum TimeframeError {
    #[error("invalid timeframe '{0}' (expected e.g. 30s, 1m, 5m, 1h, 4h, 1d, 1w)")]
    Invalid(String),

    #[error("timeframe must be positive, got {0}s")]
    NonPositive(i64),
}

/// Bucket width in seconds. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Timeframe(i64);

impl Timeframe {
    pub fn from_secs(secs: i64) -> Result<Self, TimeframeError> {
        if secs <= 0 {
            return Err(TimeframeError::NonPositive(secs));
        }
        Ok(Self(secs))
    }

    pub fn secs(self) -> i64 {
        self.0
    }

    pub fn minutes(n: i64) -> Self {
        Self(n.saturating_mul(MINUTE).max(1))
    }

    pub fn hours(n: i64) -> Self {
        Self(n.saturating_mul(HOUR).max(1))
    }
}

impl FromStr for Timeframe {
    type Err = TimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        let invalid = || TimeframeError::Invalid(s.clone());

        if let Ok(secs) = s.parse::<i64>() {
            return Self::from_secs(secs);
        }

        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(invalid)?;
        let (num, unit) = s.split_at(split);
        let n: i64 = num.parse().map_err(|_| invalid())?;
        let mult = match unit {
            "s" => 1,
            "m" | "min" => MINUTE,
            "h" => HOUR,
            "d" => DAY,
            "w" => WEEK,
            _ => return Err(invalid()),
        };
        Self::from_secs(n.checked_mul(mult).ok_or_else(invalid)?)
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s % WEEK == 0 {
            write!(f, "{}w", s / WEEK)
        } else if s % DAY == 0 {
            write!(f, "{}d", s / DAY)
        } else if s % HOUR == 0 {
            write!(f, "{}h", s / HOUR)
        } else if s % MINUTE == 0 {
            write!(f, "{}m", s / MINUTE)
        } else {
            write!(f, "{s}s")
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = TimeframeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.to_string()
    }
}

/// Smallest positive gap between consecutive distinct timestamps.
///
/// Falls back to one minute for timelines shorter than two entries.
pub fn base_resolution(timestamps: &[i64]) -> Timeframe {
    let gap = timestamps
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|d| *d > 0)
        .min()
        .unwrap_or(DEFAULT_BASE_SECS);
    Timeframe(gap)
}
