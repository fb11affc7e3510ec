//! Override resolution against a destination's scheduling policy.
//!
//! A force rule applies to a target when the target fully matches its `pattern`
//! (`.*` when absent) and does not fully match its `ignore` pattern. For a given
//! key the first applicable rule declaring it wins, then the destination default,
//! then whatever the client supplied.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::TimeDelta;
use ecgate_core::parse_duration;
use ecgate_store::{DestinationPolicy, ForceRule};
use parking_lot::RwLock;
use regex::Regex;

/// Compiled patterns by source text; `None` marks an invalid pattern.
static PATTERNS: LazyLock<RwLock<HashMap<String, Option<Regex>>>> = LazyLock::new(RwLock::default);

/// Policy keys understood by the coordinator.
pub mod key {
    /// `true` holds queued transfers, `never` releases held ones.
    pub const STANDBY: &str = "standby";
    /// Lifetime duration.
    pub const LIFETIME: &str = "lifetime";
    /// Additional delay.
    pub const DELAY: &str = "delay";
    /// Use the source host instead of a retrieval.
    pub const NO_RETRIEVAL: &str = "noRetrieval";
    /// Deliver as soon as possible.
    pub const ASAP: &str = "asap";
    /// Transfer group of new data files.
    pub const TRANSFER_GROUP: &str = "transferGroup";
    /// Unique name template.
    pub const VERSION: &str = "version";
    /// Date pattern for `$date` in the unique name template.
    pub const DATE_FORMAT: &str = "dateFormat";
    /// Stop transfers to a stopped destination.
    pub const FORCE_STOP: &str = "forceStop";
}

/// Whether `value` fully matches `pattern`.
///
/// An invalid pattern never matches.
#[must_use]
pub fn full_match(pattern: &str, value: &str) -> bool {
    compiled(pattern).is_some_and(|re| re.is_match(value))
}

fn compiled(pattern: &str) -> Option<Regex> {
    if let Some(compiled) = PATTERNS.read().get(pattern) {
        return compiled.clone();
    }
    let compiled = match Regex::new(&format!("^(?:{pattern})$")) {
        Ok(re) => Some(re),
        Err(e) => {
            tracing::warn!(pattern, error = %e, "ignoring invalid pattern");
            None
        }
    };
    PATTERNS.write().insert(pattern.to_string(), compiled.clone());
    compiled
}

/// Whether a rule with these patterns applies to `target`.
#[must_use]
pub fn applies(pattern: Option<&str>, ignore: Option<&str>, target: &str) -> bool {
    full_match(pattern.unwrap_or(".*"), target)
        && !ignore.is_some_and(|ignore| full_match(ignore, target))
}

fn rule_applies(rule: &ForceRule, target: &str) -> bool {
    applies(rule.pattern.as_deref(), rule.ignore.as_deref(), target)
}

/// Resolve a policy key for a target; `None` means the client value stands.
#[must_use]
pub fn resolve<'a>(policy: &'a DestinationPolicy, key: &str, target: &str) -> Option<&'a str> {
    policy
        .rules
        .iter()
        .filter(|rule| rule.values.contains_key(key))
        .find(|rule| rule_applies(rule, target))
        .and_then(|rule| rule.values.get(key))
        .or_else(|| policy.defaults.get(key))
        .map(String::as_str)
}

/// Interpret a policy value as a boolean (`true` or `yes`).
#[must_use]
pub fn as_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value.eq_ignore_ascii_case("yes")
}

/// Resolve a boolean key, falling back to the client value.
#[must_use]
pub fn resolve_bool(policy: &DestinationPolicy, key: &str, target: &str, client: bool) -> bool {
    resolve(policy, key, target).map_or(client, as_bool)
}

/// Resolve a duration key; only positive durations are returned.
#[must_use]
pub fn resolve_duration(policy: &DestinationPolicy, key: &str, target: &str) -> Option<TimeDelta> {
    let value = resolve(policy, key, target)?;
    match parse_duration(value) {
        Ok(duration) if duration > TimeDelta::zero() => Some(duration),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(key, value, error = %e, "invalid duration in destination policy");
            None
        }
    }
}

/// Effect of the `standby` key on a finalised transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StandbyPolicy {
    /// Queued transfers are held.
    Hold,
    /// Held transfers are queued.
    Never,
    /// No effect.
    Keep,
}

/// Resolve the standby policy for a target.
#[must_use]
pub fn standby_policy(policy: &DestinationPolicy, target: &str) -> StandbyPolicy {
    match resolve(policy, key::STANDBY, target) {
        Some(value) if value.eq_ignore_ascii_case("never") => StandbyPolicy::Never,
        Some(value) if as_bool(value) => StandbyPolicy::Hold,
        _ => StandbyPolicy::Keep,
    }
}
