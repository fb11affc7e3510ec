//! Request log records.
//!
//! Accepted requests are recorded as one line each on the `ecgate::requests`
//! tracing target:
//!
//! ```text
//! [TYPE] put [TIMESTAMP] 1704067200000 [USER] alice [DESTINATION] dest ...
//! ```
//!
//! Empty fields are omitted. The same line is decoded back into a
//! [`RequestRecord`] by [`RequestRecord::parse`].

use std::fmt;
use std::str::FromStr;

/// Target of the request log events.
pub const REQUEST_LOG_TARGET: &str = "ecgate::requests";

/// Kind of a recorded request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// Product completed notification.
    Completed,
    /// Product expected notification.
    Expected,
    /// File admission.
    Put,
    /// Database query.
    Select,
    /// Product started notification.
    Started,
    /// Wait on a pull group.
    WaitForGroup,
}

impl RequestKind {
    /// The tag written in the `TYPE` field.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Expected => "expected",
            Self::Put => "put",
            Self::Select => "select",
            Self::Started => "started",
            Self::WaitForGroup => "waitforgroup",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for RequestKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "completed" => Ok(Self::Completed),
            "expected" => Ok(Self::Expected),
            "put" => Ok(Self::Put),
            "select" => Ok(Self::Select),
            "started" => Ok(Self::Started),
            "waitforgroup" => Ok(Self::WaitForGroup),
            other => Err(format!("unknown request type {other}")),
        }
    }
}

/// One request log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRecord {
    /// Kind of request.
    pub kind: RequestKind,
    /// When the request was received, in epoch milliseconds.
    pub timestamp_ms: i64,
    /// Remaining fields in insertion order.
    pub fields: Vec<(String, String)>,
}

impl RequestRecord {
    /// A record stamped now.
    #[must_use]
    pub fn new(kind: RequestKind) -> Self {
        Self {
            kind,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            fields: Vec::new(),
        }
    }

    /// Add a field; `None` and empty values are skipped.
    #[must_use]
    pub fn field(mut self, name: &str, value: Option<impl ToString>) -> Self {
        if let Some(value) = value.map(|v| v.to_string()).filter(|v| !v.is_empty()) {
            self.fields.push((name.to_string(), value));
        }
        self
    }

    /// Value of a field.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Emit the record on the request log target.
    pub fn emit(&self) {
        tracing::info!(target: REQUEST_LOG_TARGET, "{self}");
    }

    /// Decode a request log line.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when the type or timestamp is
    /// missing or invalid.
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut kind = None;
        let mut timestamp_ms = None;
        let mut fields = Vec::new();
        let mut rest = line.trim();
        while let Some(open) = rest.find('[') {
            let Some(close) = rest[open..].find(']').map(|c| open + c) else {
                break;
            };
            let name = rest[open + 1..close].trim();
            let after = &rest[close + 1..];
            let end = after.find('[').unwrap_or(after.len());
            let value = after[..end].trim();
            match name {
                "TYPE" => kind = Some(value.parse::<RequestKind>()?),
                "TIMESTAMP" => {
                    timestamp_ms = Some(
                        value
                            .parse::<i64>()
                            .map_err(|_| format!("invalid timestamp {value}"))?,
                    );
                }
                _ => fields.push((name.to_string(), value.to_string())),
            }
            rest = &after[end..];
        }
        Ok(Self {
            kind: kind.ok_or("missing TYPE")?,
            timestamp_ms: timestamp_ms.ok_or("missing TIMESTAMP")?,
            fields,
        })
    }
}

impl fmt::Display for RequestRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[TYPE] {} [TIMESTAMP] {}", self.kind, self.timestamp_ms)?;
        for (name, value) in &self.fields {
            write!(f, " [{name}] {value}")?;
        }
        Ok(())
    }
}
