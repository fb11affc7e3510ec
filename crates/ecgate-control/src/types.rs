//! Configuration of the admission coordinator.

use serde::{Deserialize, Serialize};

/// Process-scoped switches and defaults of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Reject `USER` from unprivileged peer ports.
    #[serde(default = "default_true")]
    pub check_port: bool,
    /// Force standby for every push not coming from an acquisition host.
    #[serde(default)]
    pub force_standby: bool,
    /// Reject unknown destinations even in group-by mode.
    #[serde(default = "default_true")]
    pub fail_on_destination_not_found: bool,
    /// Reply with a message instead of an error for unknown products without `AT`.
    #[serde(default = "default_true")]
    pub ignore_missing_schedule_time: bool,
    /// Emit request log events.
    #[serde(default)]
    pub log_requests: bool,
    /// Priority of a request that does not set one.
    #[serde(default = "ControlConfig::default_priority")]
    pub default_priority: u8,
    /// Lifetime of a request that does not set one.
    #[serde(default = "ControlConfig::default_lifetime")]
    pub default_lifetime: String,
    /// Pattern used to parse `AT` when no `FORMAT` is given.
    #[serde(default = "ControlConfig::default_date_format")]
    pub default_date_format: String,
    /// Initial wait before `WAITFORGROUP` starts polling (seconds).
    #[serde(default = "ControlConfig::default_initial_wait")]
    pub wait_for_group_initial_wait_seconds: u64,
    /// Polling interval of `WAITFORGROUP` (milliseconds).
    #[serde(default = "ControlConfig::default_poll_millis")]
    pub wait_for_group_poll_millis: u64,
    /// Interval between detailed `WAITFORGROUP` progress reports (seconds).
    #[serde(default = "ControlConfig::default_refresh")]
    pub wait_for_group_refresh_seconds: u64,
    /// Reset the schedule of a group's transfers before waiting on it.
    #[serde(default)]
    pub reset_schedules_by_group: bool,
    /// Maximum length of source, original, identity and target names.
    #[serde(default = "ControlConfig::default_max_name_length")]
    pub max_name_length: usize,
}

fn default_true() -> bool {
    true
}

impl ControlConfig {
    const fn default_priority() -> u8 {
        99
    }

    fn default_lifetime() -> String {
        "2d".to_string()
    }

    fn default_date_format() -> String {
        ecgate_core::time::DEFAULT_AT_PATTERN.to_string()
    }

    const fn default_initial_wait() -> u64 {
        60
    }

    const fn default_poll_millis() -> u64 {
        1000
    }

    const fn default_refresh() -> u64 {
        5
    }

    const fn default_max_name_length() -> usize {
        255
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            check_port: true,
            force_standby: false,
            fail_on_destination_not_found: true,
            ignore_missing_schedule_time: true,
            log_requests: false,
            default_priority: Self::default_priority(),
            default_lifetime: Self::default_lifetime(),
            default_date_format: Self::default_date_format(),
            wait_for_group_initial_wait_seconds: Self::default_initial_wait(),
            wait_for_group_poll_millis: Self::default_poll_millis(),
            wait_for_group_refresh_seconds: Self::default_refresh(),
            reset_schedules_by_group: false,
            max_name_length: Self::default_max_name_length(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_config_defaults() {
        let config = ControlConfig::default();
        assert!(config.check_port);
        assert!(!config.force_standby);
        assert_eq!(config.default_priority, 99);
        assert_eq!(config.default_lifetime, "2d");
        assert_eq!(config.default_date_format, "yyyyMMddHHmmss");
        assert_eq!(config.wait_for_group_poll_millis, 1000);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config: ControlConfig =
            serde_json::from_str(r#"{"check_port":false,"default_priority":50}"#).unwrap();
        assert!(!config.check_port);
        assert_eq!(config.default_priority, 50);
        assert!(config.fail_on_destination_not_found);
        assert_eq!(config.max_name_length, 255);
    }
}
