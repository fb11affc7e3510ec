//! Duration strings and date patterns used on the wire.
//!
//! Clients express durations as `<n><unit>` and dates with the classic
//! `yyyyMMddHHmmss` style patterns; both are translated to `chrono` values here.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};

use crate::error::{CoreError, Result};

/// Pattern used for scheduling dates in client-visible messages.
pub const DISPLAY_DATE_PATTERN: &str = "MMM dd HH:mm:ss";

/// Default pattern of the `AT` attribute.
pub const DEFAULT_AT_PATTERN: &str = "yyyyMMddHHmmss";

/// Pattern of a product date (`yyyyMMddHH`).
pub const PRODUCT_DATE_PATTERN: &str = "yyyyMMddHH";

const ONE_SECOND: i64 = 1000;
const ONE_MINUTE: i64 = 60 * ONE_SECOND;
const ONE_HOUR: i64 = 60 * ONE_MINUTE;
const ONE_DAY: i64 = 24 * ONE_HOUR;
const ONE_WEEK: i64 = 7 * ONE_DAY;

/// Parse a duration such as `2d`, `30m`, `500z` (milliseconds) or `6` (hours).
///
/// Negative and zero values are accepted here; callers decide what range is legal.
///
/// # Errors
///
/// Returns `CoreError::InvalidDuration` if the string is not a recognised duration.
pub fn parse_duration(value: &str) -> Result<TimeDelta> {
    let text = value.trim();
    let invalid = || CoreError::InvalidDuration(value.to_string());
    let last = text.chars().last().ok_or_else(invalid)?;
    let (number, unit) = match last {
        'y' => (&text[..text.len() - 1], ONE_WEEK * 52),
        'w' => (&text[..text.len() - 1], ONE_WEEK),
        'd' => (&text[..text.len() - 1], ONE_DAY),
        'h' => (&text[..text.len() - 1], ONE_HOUR),
        'm' => (&text[..text.len() - 1], ONE_MINUTE),
        's' => (&text[..text.len() - 1], ONE_SECOND),
        'z' => (&text[..text.len() - 1], 1),
        _ => (text, ONE_HOUR),
    };
    let count: i64 = number.trim().parse().map_err(|_| invalid())?;
    count
        .checked_mul(unit)
        .map(TimeDelta::milliseconds)
        .ok_or_else(invalid)
}

/// A date pattern in `yyyyMMddHHmmss` notation, translated to a `chrono` format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatePattern {
    source: String,
    format: String,
    has_hour: bool,
    has_minute: bool,
}

impl DatePattern {
    /// Translate a pattern.
    ///
    /// Supported letters: `yyyy`, `yy`, `MMM`, `MM`, `dd`, `HH`, `mm`, `ss`, `SSS`.
    /// Text between single quotes is copied literally.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidPattern` on an unsupported letter run.
    pub fn new(pattern: &str) -> Result<Self> {
        let chars: Vec<char> = pattern.chars().collect();
        let mut format = String::with_capacity(pattern.len() * 2);
        let mut has_hour = false;
        let mut has_minute = false;
        let mut i = 0;
        while i < chars.len() {
            let c = chars[i];
            if c == '\'' {
                i += 1;
                while i < chars.len() && chars[i] != '\'' {
                    push_literal(&mut format, chars[i]);
                    i += 1;
                }
                i += 1;
                continue;
            }
            if !c.is_ascii_alphabetic() {
                push_literal(&mut format, c);
                i += 1;
                continue;
            }
            let mut run = 1;
            while i + run < chars.len() && chars[i + run] == c {
                run += 1;
            }
            let spec = match (c, run) {
                ('y', 4) => "%Y",
                ('y', 2) => "%y",
                ('M', 3) => "%b",
                ('M', 2) => "%m",
                ('d', 2) => "%d",
                ('H', 2) => {
                    has_hour = true;
                    "%H"
                }
                ('m', 2) => {
                    has_minute = true;
                    "%M"
                }
                ('s', 2) => "%S",
                ('S', 3) => "%3f",
                _ => return Err(CoreError::InvalidPattern(pattern.to_string())),
            };
            format.push_str(spec);
            i += run;
        }
        Ok(Self {
            source: pattern.to_string(),
            format,
            has_hour,
            has_minute,
        })
    }

    /// The pattern as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Parse a date (interpreted as UTC).
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidDate` if the value does not match the pattern.
    pub fn parse(&self, value: &str) -> Result<DateTime<Utc>> {
        let invalid = || CoreError::InvalidDate {
            value: value.to_string(),
            pattern: self.source.clone(),
        };
        let naive = if self.has_hour {
            if self.has_minute {
                NaiveDateTime::parse_from_str(value, &self.format).map_err(|_| invalid())?
            } else {
                let padded = format!("{value}\u{1}00");
                let format = format!("{}\u{1}%M", self.format);
                NaiveDateTime::parse_from_str(&padded, &format).map_err(|_| invalid())?
            }
        } else {
            NaiveDate::parse_from_str(value, &self.format)
                .map_err(|_| invalid())?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(invalid)?
        };
        Ok(naive.and_utc())
    }

    /// Format a date with this pattern.
    #[must_use]
    pub fn format(&self, date: &DateTime<Utc>) -> String {
        date.format(&self.format).to_string()
    }
}

fn push_literal(format: &mut String, c: char) {
    if c == '%' {
        format.push_str("%%");
    } else {
        format.push(c);
    }
}

/// Midnight (UTC) of the day containing `date`.
#[must_use]
pub fn start_of_day(date: &DateTime<Utc>) -> DateTime<Utc> {
    date.date_naive()
        .and_hms_opt(0, 0, 0)
        .map_or(*date, |midnight| midnight.and_utc())
}

/// A date as shown in client messages (`MMM dd HH:mm:ss`).
#[must_use]
pub fn display_date(date: &DateTime<Utc>) -> String {
    date.format("%b %d %H:%M:%S").to_string()
}
