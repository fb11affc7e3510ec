//! The pending request accumulated by a session.
//!
//! Attribute verbs set one field each through the validating setters below.
//! The terminal command takes the whole request by value.

use chrono::{DateTime, TimeDelta, Utc};
use ecgate_core::{parse_duration, DataFileId, DatePattern};

use crate::error::{ControlError, Result};
use crate::metadata::Metadata;
use crate::types::ControlConfig;

/// Maximum length of `HOSTFORACQUISITION`.
pub const MAX_HOST_LENGTH: usize = 32;

/// Maximum length of `GROUPBY`.
pub const MAX_GROUP_BY_LENGTH: usize = 64;

/// A transfer request under construction.
#[derive(Debug, Clone)]
pub struct PendingRequest {
    /// Destination name.
    pub destination: Option<String>,
    /// Declared size, `-1` when unknown.
    pub size: i64,
    /// Pattern used to parse `AT`.
    pub date_format: String,
    /// Requested transfer group.
    pub transfer_group: Option<String>,
    /// Remove the data file and its transfers.
    pub purge: bool,
    /// Deliver as soon as possible.
    pub asap: bool,
    /// Trigger an event on delivery.
    pub event: bool,
    /// Logical content timestamp.
    pub time_file: Option<DateTime<Utc>>,
    /// `TIMEFILE` as received.
    pub time_file_text: Option<String>,
    /// Priority, 0..=99.
    pub priority: u8,
    /// Source file name.
    pub source: Option<String>,
    /// Original file name.
    pub original: Option<String>,
    /// Host to retrieve from in pull mode.
    pub host_for_acquisition: Option<String>,
    /// Normalised target name.
    pub target: Option<String>,
    /// Identity string.
    pub identity: Option<String>,
    /// Caller string.
    pub caller: Option<String>,
    /// Lifetime.
    pub lifetime: TimeDelta,
    /// `LIFETIME` as received.
    pub lifetime_text: Option<String>,
    /// Delay before the first delivery.
    pub delay: TimeDelta,
    /// Product buffer for notifications.
    pub buffer: Option<TimeDelta>,
    /// Requested start.
    pub at: Option<DateTime<Utc>>,
    /// `AT` as received.
    pub at_text: Option<String>,
    /// Accumulated metadata.
    pub metadata: Metadata,
    /// Explicit data file selection.
    pub request_id: Option<DataFileId>,
    /// Pull-mode group.
    pub group_by: Option<String>,
    /// Re-queue existing transfers.
    pub requeue: bool,
    /// Overwrite an existing data file.
    pub force: bool,
    /// Acquisition flag.
    pub acquisition: bool,
    /// Restrict a requeue to failed transfers.
    pub failed_only: bool,
    /// Use the source host instead of a retrieval.
    pub no_retrieval: bool,
    /// Hold transfers for a manual requeue.
    pub standby: bool,
    /// Index.
    pub index: Option<u32>,
    /// Time-critical session.
    pub time_critical: bool,
    /// Unique name, part of the unique key.
    pub unique_name: Option<String>,
    /// Remove the original once retrieved.
    pub remove: bool,
    /// Scheduler streams for `SCHEDULERCHECK`.
    pub streams: Option<u32>,
    /// Scheduler timeout for `SCHEDULERCHECK`, in milliseconds.
    pub timeout: Option<u64>,
    max_name_length: usize,
}

impl PendingRequest {
    /// An empty request with the configured defaults.
    #[must_use]
    pub fn new(config: &ControlConfig) -> Self {
        let lifetime = parse_duration(&config.default_lifetime)
            .ok()
            .filter(|lifetime| *lifetime > TimeDelta::zero())
            .unwrap_or_else(|| {
                tracing::warn!(lifetime = %config.default_lifetime, "invalid default lifetime, using 2d");
                TimeDelta::days(2)
            });
        Self {
            destination: None,
            size: -1,
            date_format: config.default_date_format.clone(),
            transfer_group: None,
            purge: false,
            asap: false,
            event: false,
            time_file: None,
            time_file_text: None,
            priority: config.default_priority.min(99),
            source: None,
            original: None,
            host_for_acquisition: None,
            target: None,
            identity: None,
            caller: None,
            lifetime,
            lifetime_text: None,
            delay: TimeDelta::zero(),
            buffer: None,
            at: None,
            at_text: None,
            metadata: Metadata::default(),
            request_id: None,
            group_by: None,
            requeue: false,
            force: false,
            acquisition: false,
            failed_only: false,
            no_retrieval: false,
            standby: false,
            index: None,
            time_critical: false,
            unique_name: None,
            remove: false,
            streams: None,
            timeout: None,
            max_name_length: config.max_name_length,
        }
    }

    /// `SIZE`: a non-negative byte count.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative or non-numeric size.
    pub fn set_size(&mut self, value: &str) -> Result<()> {
        self.size = parse_size(value)?;
        Ok(())
    }

    /// `TIMEFILE`: seconds since the epoch.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative or non-numeric value.
    pub fn set_time_file(&mut self, value: &str) -> Result<()> {
        let invalid = || ControlError::Invalid(format!("Invalid timefile ({value})"));
        let seconds = value
            .trim()
            .parse::<i64>()
            .ok()
            .filter(|s| *s >= 0)
            .ok_or_else(invalid)?;
        self.time_file = Some(DateTime::from_timestamp(seconds, 0).ok_or_else(invalid)?);
        self.time_file_text = Some(value.to_string());
        Ok(())
    }

    /// `PRIORITY`: 0 to 99.
    ///
    /// # Errors
    ///
    /// Returns an error for a value out of range or not a number.
    pub fn set_priority(&mut self, value: &str) -> Result<()> {
        let priority: i64 = value.trim().parse().map_err(|_| {
            ControlError::Invalid(format!(
                "Invalid format used for the -priority option ({value})"
            ))
        })?;
        self.priority = u8::try_from(priority)
            .ok()
            .filter(|p| *p <= 99)
            .ok_or_else(|| {
                ControlError::Invalid(
                    "Invalid value specified for the -priority option (range is 0..99)".into(),
                )
            })?;
        Ok(())
    }

    /// `SOURCE`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is too long.
    pub fn set_source(&mut self, value: &str) -> Result<()> {
        self.source = Some(self.bounded("source", value)?);
        Ok(())
    }

    /// `ORIGINAL`.
    ///
    /// # Errors
    ///
    /// Returns an error if the name is too long.
    pub fn set_original(&mut self, value: &str) -> Result<()> {
        self.original = Some(self.bounded("original", value)?);
        Ok(())
    }

    /// `IDENTITY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is too long.
    pub fn set_identity(&mut self, value: &str) -> Result<()> {
        self.identity = Some(self.bounded("identity", value)?);
        Ok(())
    }

    /// `HOSTFORACQUISITION`.
    ///
    /// # Errors
    ///
    /// Returns an error if the host name is too long.
    pub fn set_host_for_acquisition(&mut self, value: &str) -> Result<()> {
        self.host_for_acquisition = Some(bounded("hostforacquisition", value, MAX_HOST_LENGTH)?);
        Ok(())
    }

    /// `GROUPBY`.
    ///
    /// # Errors
    ///
    /// Returns an error if the group name is too long.
    pub fn set_group_by(&mut self, value: &str) -> Result<()> {
        self.group_by = Some(bounded("groupby", value, MAX_GROUP_BY_LENGTH)?);
        Ok(())
    }

    /// `TARGET`: normalised, relative, and completed with the source base name
    /// when it names a directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the path escapes its root or is too long.
    pub fn set_target(&mut self, value: &str) -> Result<()> {
        let mut target = normalize_path(value).ok_or_else(|| {
            ControlError::Invalid(format!("Invalid format for the -target option ({value})"))
        })?;
        if target.ends_with('/') {
            let base = self
                .source
                .as_deref()
                .or(self.original.as_deref())
                .map(base_name)
                .unwrap_or_default();
            target.push_str(base);
        }
        self.target = Some(self.bounded("target", &target)?);
        Ok(())
    }

    /// `LIFETIME`: a positive duration.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed or non-positive duration.
    pub fn set_lifetime(&mut self, value: &str) -> Result<()> {
        self.lifetime = positive_duration("lifetime", value)?;
        self.lifetime_text = Some(value.to_string());
        Ok(())
    }

    /// `DELAY`: a positive duration.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed or non-positive duration.
    pub fn set_delay(&mut self, value: &str) -> Result<()> {
        self.delay = positive_duration("delay", value)?;
        Ok(())
    }

    /// `BUFFER`: a non-negative duration.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed or negative duration.
    pub fn set_buffer(&mut self, value: &str) -> Result<()> {
        let buffer = parse_duration(value).map_err(|_| {
            ControlError::Invalid(format!(
                "Invalid duration format for the -buffer option ({value})"
            ))
        })?;
        if buffer < TimeDelta::zero() {
            return Err(ControlError::Invalid(
                "Invalid value specified for the -buffer option (should be >= 0)".into(),
            ));
        }
        self.buffer = Some(buffer);
        Ok(())
    }

    /// `FORMAT`: the pattern used by later `AT` attributes.
    ///
    /// # Errors
    ///
    /// Returns an error for a pattern with unsupported letters.
    pub fn set_date_format(&mut self, value: &str) -> Result<()> {
        DatePattern::new(value.trim())
            .map_err(|_| ControlError::Invalid(format!("Invalid date format ({value})")))?;
        self.date_format = value.trim().to_string();
        Ok(())
    }

    /// `AT`: parsed with the current `FORMAT`.
    ///
    /// # Errors
    ///
    /// Returns an error if the date does not match the pattern.
    pub fn set_at(&mut self, value: &str) -> Result<()> {
        let at = DatePattern::new(&self.date_format)
            .and_then(|pattern| pattern.parse(value.trim()))
            .map_err(|_| {
                ControlError::Invalid(format!(
                    "Invalid date format for the -at option ({})",
                    self.date_format
                ))
            })?;
        self.at = Some(at);
        self.at_text = Some(value.to_string());
        Ok(())
    }

    /// `REQID`: a non-negative data file identifier.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative or non-numeric value.
    pub fn set_request_id(&mut self, value: &str) -> Result<()> {
        let id: i64 = value.trim().parse().map_err(|_| {
            ControlError::Invalid(format!("Invalid format used for the -reqid option ({value})"))
        })?;
        let id = u64::try_from(id).map_err(|_| {
            ControlError::Invalid("Invalid value specified for the -reqid option (<0)".into())
        })?;
        self.request_id = Some(DataFileId::new(id));
        Ok(())
    }

    /// `INDEX`: a positive number.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive or non-numeric value.
    pub fn set_index(&mut self, value: &str) -> Result<()> {
        let index: i64 = value.trim().parse().map_err(|_| {
            ControlError::Invalid(format!("Invalid format used for index ({value})"))
        })?;
        self.index = Some(
            u32::try_from(index)
                .ok()
                .filter(|i| *i > 0)
                .ok_or_else(|| {
                    ControlError::Invalid("Invalid value specified for index (should be >0)".into())
                })?,
        );
        Ok(())
    }

    /// `STREAMS`: a positive number.
    ///
    /// # Errors
    ///
    /// Returns an error for a non-positive or non-numeric value.
    pub fn set_streams(&mut self, value: &str) -> Result<()> {
        self.streams = Some(
            value
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|s| *s > 0)
                .ok_or_else(|| ControlError::Invalid(format!("Invalid streams ({value})")))?,
        );
        Ok(())
    }

    /// `TIMEOUT`: a non-negative duration, kept in milliseconds.
    ///
    /// # Errors
    ///
    /// Returns an error for a negative or malformed duration.
    pub fn set_timeout(&mut self, value: &str) -> Result<()> {
        let timeout = parse_duration(value)
            .ok()
            .and_then(|d| u64::try_from(d.num_milliseconds()).ok())
            .ok_or_else(|| ControlError::Invalid(format!("Invalid timeout ({value})")))?;
        self.timeout = Some(timeout);
        Ok(())
    }

    fn bounded(&self, option: &'static str, value: &str) -> Result<String> {
        bounded(option, value, self.max_name_length)
    }
}

/// A `SIZE` value: a non-negative byte count.
///
/// # Errors
///
/// Returns an error for a negative or non-numeric size.
pub fn parse_size(value: &str) -> Result<i64> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|size| *size >= 0)
        .ok_or_else(|| ControlError::Invalid(format!("Invalid source file size ({value})")))
}

/// Boolean attribute value: `true` in any case, anything else is false.
#[must_use]
pub fn parse_flag(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

fn bounded(option: &'static str, value: &str, max: usize) -> Result<String> {
    if value.chars().count() > max {
        return Err(ControlError::TooLong { option, max });
    }
    Ok(value.to_string())
}

fn positive_duration(option: &str, value: &str) -> Result<TimeDelta> {
    let duration = parse_duration(value).map_err(|_| {
        ControlError::Invalid(format!(
            "Invalid duration format for the -{option} option ({value})"
        ))
    })?;
    if duration <= TimeDelta::zero() {
        return Err(ControlError::Invalid(format!(
            "Invalid value specified for the -{option} option (should be > 0)"
        )));
    }
    Ok(duration)
}

/// Last path component.
#[must_use]
pub fn base_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// Resolve `.` and `..` segments and strip the leading separator.
///
/// A trailing separator is kept. Returns `None` if the path climbs above its root.
#[must_use]
pub fn normalize_path(path: &str) -> Option<String> {
    let path = path.trim().replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            other => segments.push(other),
        }
    }
    let mut normalized = segments.join("/");
    if path.ends_with('/') && !normalized.is_empty() {
        normalized.push('/');
    }
    Some(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PendingRequest {
        PendingRequest::new(&ControlConfig::default())
    }

    #[test]
    fn defaults() {
        let request = request();
        assert_eq!(request.size, -1);
        assert_eq!(request.priority, 99);
        assert_eq!(request.lifetime, TimeDelta::days(2));
        assert_eq!(request.delay, TimeDelta::zero());
    }

    #[test]
    fn size_and_time_file() {
        let mut request = request();
        request.set_size("1024").unwrap();
        assert_eq!(request.size, 1024);
        assert_eq!(
            request.set_size("-1").unwrap_err().to_string(),
            "Invalid source file size (-1)"
        );
        request.set_time_file("86400").unwrap();
        assert_eq!(request.time_file.unwrap().timestamp(), 86_400);
        assert_eq!(
            request.set_time_file("x").unwrap_err().to_string(),
            "Invalid timefile (x)"
        );
    }

    #[test]
    fn priority_range() {
        let mut request = request();
        request.set_priority("0").unwrap();
        assert_eq!(request.priority, 0);
        assert_eq!(
            request.set_priority("100").unwrap_err().to_string(),
            "Invalid value specified for the -priority option (range is 0..99)"
        );
        assert_eq!(
            request.set_priority("high").unwrap_err().to_string(),
            "Invalid format used for the -priority option (high)"
        );
    }

    #[test]
    fn target_normalisation() {
        let mut request = request();
        request.set_source("/data/in/file.grib").unwrap();
        request.set_target("/out/./x/../dir/").unwrap();
        assert_eq!(request.target.as_deref(), Some("out/dir/file.grib"));

        request.set_target("plain.bin").unwrap();
        assert_eq!(request.target.as_deref(), Some("plain.bin"));

        assert!(request.set_target("../escape").is_err());
        assert_eq!(
            request.set_target(&"t".repeat(256)).unwrap_err().to_string(),
            "Invalid value specified for the -target option (max length is 255)"
        );
    }

    #[test]
    fn durations() {
        let mut request = request();
        request.set_lifetime("3h").unwrap();
        assert_eq!(request.lifetime, TimeDelta::hours(3));
        assert_eq!(
            request.set_delay("0").unwrap_err().to_string(),
            "Invalid value specified for the -delay option (should be > 0)"
        );
        assert_eq!(
            request.set_lifetime("soon").unwrap_err().to_string(),
            "Invalid duration format for the -lifetime option (soon)"
        );
        request.set_buffer("0").unwrap();
        assert_eq!(request.buffer, Some(TimeDelta::zero()));
    }

    #[test]
    fn at_uses_format() {
        let mut request = request();
        request.set_at("20240101120000").unwrap();
        assert_eq!(request.at.unwrap().to_rfc3339(), "2024-01-01T12:00:00+00:00");

        request.date_format = "yyyy-MM-dd".into();
        request.set_at("2024-02-03").unwrap();
        assert_eq!(request.at.unwrap().to_rfc3339(), "2024-02-03T00:00:00+00:00");
        assert_eq!(
            request.set_at("tomorrow").unwrap_err().to_string(),
            "Invalid date format for the -at option (yyyy-MM-dd)"
        );
    }

    #[test]
    fn date_format_applies_to_at() {
        let mut request = request();
        assert!(request.set_date_format("yyyy-QQ").is_err());
        request.set_date_format("yyyy-MM-dd HH").unwrap();
        request.set_at("2024-03-01 06").unwrap();
        assert_eq!(request.at.unwrap().to_rfc3339(), "2024-03-01T06:00:00+00:00");
    }

    #[test]
    fn numeric_options() {
        let mut request = request();
        request.set_request_id("42").unwrap();
        assert_eq!(request.request_id, Some(DataFileId::new(42)));
        assert!(request.set_request_id("-3").is_err());
        assert!(request.set_index("0").is_err());
        request.set_index("3").unwrap();
        assert_eq!(request.index, Some(3));
        assert_eq!(
            request.set_streams("0").unwrap_err().to_string(),
            "Invalid streams (0)"
        );
        assert!(request.set_timeout("-1").is_err());
        request.set_timeout("0").unwrap();
        request.set_timeout("90s").unwrap();
        assert_eq!(request.timeout, Some(90_000));
    }

    #[test]
    fn flags() {
        assert!(parse_flag("TRUE"));
        assert!(parse_flag("true"));
        assert!(!parse_flag("yes"));
        assert!(!parse_flag(""));
    }

    #[test]
    fn lengths() {
        let mut request = request();
        assert!(request.set_host_for_acquisition(&"h".repeat(33)).is_err());
        assert!(request.set_group_by(&"g".repeat(64)).is_ok());
        assert!(request.set_group_by(&"g".repeat(65)).is_err());
    }
}
