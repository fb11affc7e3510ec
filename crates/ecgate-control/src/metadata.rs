//! Parsing of the `METADATA` attribute.
//!
//! The attribute is a comma-separated list of `name=value` tokens. A token
//! without `=` continues the value of the previous free-form name, so values may
//! contain commas. The monitoring keys (`step`, `application`, `date`, `domain`,
//! `type`, `time`, `target`, `stream`) are extracted into typed fields.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use ecgate_core::time::PRODUCT_DATE_PATTERN;
use ecgate_core::DatePattern;

use crate::error::{ControlError, Result};

/// Application of the regular production chain; other applications get their
/// own stream.
pub const DEFAULT_APPLICATION: &str = "pgen";

const RECOGNISED: [&str; 8] = [
    "application",
    "step",
    "date",
    "time",
    "domain",
    "type",
    "target",
    "stream",
];

/// Metadata accumulated by a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Values stored with the data file, by name.
    pub values: BTreeMap<String, String>,
    /// Last raw attribute, quotes stripped.
    pub raw: Option<String>,
    /// Monitoring stream, without the domain.
    pub stream: Option<String>,
    /// Monitoring time.
    pub time: Option<String>,
    /// Monitoring target.
    pub target: Option<String>,
    /// Monitoring type.
    pub meta_type: Option<String>,
    /// Stream prefix.
    pub domain: Option<String>,
    /// Forecast step.
    pub step: Option<i64>,
    /// Product date built from `date` and `time`.
    pub product_date: Option<DateTime<Utc>>,
}

impl Metadata {
    /// Seed the values a dissemination session always stores.
    pub fn seed_defaults(&mut self) {
        self.values.insert("target".into(), "None".into());
        self.values.insert("stream".into(), "None".into());
        self.values.insert("time".into(), "00".into());
    }

    /// Parse one `METADATA` attribute into this set.
    ///
    /// `dissemination` is false for acquisition sessions, which tolerate a
    /// non-numeric step and keep `step` and `date` in the stored values.
    ///
    /// # Errors
    ///
    /// Returns an error for an oversized name or value, or a non-numeric step
    /// in a dissemination session.
    pub fn apply(&mut self, attribute: &str, dissemination: bool) -> Result<()> {
        let text = strip_quotes(attribute);
        self.raw = Some(text.to_string());

        let mut previous: Option<String> = None;
        let mut application: Option<String> = None;
        let mut date: Option<String> = None;

        let tokens: Vec<&str> = text.trim().split(',').collect();
        // Trailing empty tokens are dropped, inner ones continue the previous value
        let end = tokens.iter().rposition(|token| !token.is_empty()).map_or(0, |i| i + 1);
        for &token in &tokens[..end] {
            let Some(index) = token.find('=').filter(|i| *i > 0) else {
                self.continue_previous(previous.as_deref(), token);
                continue;
            };
            let name = token[..index].trim().to_string();
            let value = token[index + 1..].trim().to_string();
            previous = Some(name.clone());
            self.values.insert(name.clone(), value.clone());

            match name.as_str() {
                "step" => {
                    if dissemination {
                        self.values.remove("step");
                    }
                    match value.parse::<i64>() {
                        Ok(step) => self.step = Some(step),
                        Err(_) if dissemination => {
                            return Err(ControlError::Invalid(format!(
                                "Invalid number format for metadata step ({value})"
                            )));
                        }
                        Err(_) => {}
                    }
                }
                "application" => application = Some(value),
                "date" => {
                    if dissemination {
                        self.values.remove("date");
                    }
                    date = Some(value);
                }
                "domain" => self.domain = Some(value),
                "type" => self.meta_type = Some(checked("value", "type", value, 25)?),
                "time" => self.time = Some(checked("value", "time", value, 16)?),
                "target" => self.target = Some(checked("value", "target", value, 25)?),
                "stream" => self.stream = Some(checked("value", "stream", value, 25)?),
                _ => {
                    checked("name", &name, name.clone(), 25)?;
                    checked("value", &name, value, 255)?;
                }
            }
        }

        if let (Some(stream), Some(application)) = (self.stream.as_deref(), application.as_deref())
        {
            if !stream.is_empty()
                && !application.is_empty()
                && !application.eq_ignore_ascii_case(DEFAULT_APPLICATION)
            {
                tracing::debug!(application, "not a {DEFAULT_APPLICATION} product");
                let stream = checked("value", "stream", format!("{stream}-{application}"), 25)?;
                self.stream = Some(stream);
            }
        }

        if let Some(date) = date {
            self.set_product_date(&date, dissemination);
        }
        Ok(())
    }

    fn continue_previous(&mut self, previous: Option<&str>, token: &str) {
        let Some(name) = previous.filter(|name| !name.is_empty()) else {
            return;
        };
        if RECOGNISED.contains(&name) {
            return;
        }
        if let Some(value) = self.values.get_mut(name).filter(|v| !v.is_empty()) {
            value.push(',');
            value.push_str(token);
        }
    }

    fn set_product_date(&mut self, date: &str, dissemination: bool) {
        let text = match date.len() {
            8 => match self.time.as_deref() {
                Some(time) if time.len() == 2 => format!("{date}{time}"),
                _ => format!("{date}00"),
            },
            10 => date.to_string(),
            _ => {
                tracing::warn!(date, "unexpected metadata date length, expected 8 or 10 chars");
                return;
            }
        };
        let parsed = DatePattern::new(PRODUCT_DATE_PATTERN).and_then(|p| p.parse(&text));
        match parsed {
            Ok(product_date) => {
                self.product_date = Some(product_date);
                if dissemination {
                    self.values
                        .insert("time".into(), product_date.format("%H").to_string());
                }
            }
            Err(e) => tracing::warn!(date, error = %e, "ignoring metadata date"),
        }
    }

    /// Stream recorded on the data file: domain and stream, or `None`.
    #[must_use]
    pub fn meta_stream(&self) -> String {
        self.stream.as_ref().map_or_else(
            || "None".to_string(),
            |stream| format!("{}{stream}", self.domain.as_deref().unwrap_or_default()),
        )
    }

    /// Time recorded on the data file, `00` when unset.
    #[must_use]
    pub fn meta_time(&self) -> String {
        self.time.clone().unwrap_or_else(|| "00".to_string())
    }

    /// Target recorded on the data file, `None` when unset.
    #[must_use]
    pub fn meta_target(&self) -> String {
        self.target.clone().unwrap_or_else(|| "None".to_string())
    }
}

fn strip_quotes(value: &str) -> &str {
    if value.len() > 1 && value.starts_with('"') && value.ends_with('"') {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

fn checked(what: &'static str, name: &str, value: String, max: usize) -> Result<String> {
    if value.chars().count() > max {
        return Err(ControlError::MetadataTooLong {
            what,
            name: name.to_string(),
            max,
        });
    }
    Ok(value)
}
