use serde::{Deserialize, Serialize};

use aps_core::ValidationError;

/// Unit the retention window is expressed in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionUnit {
    Hours,
    Days,
    Weeks,
    /// Fixed 30 days; deliberately not calendar-aware.
    Months,
    /// Anything else a client sends. Treated as hours.
    #[serde(other)]
    Unrecognized,
}

impl RetentionUnit {
    pub const HOUR_MS: i64 = 3_600_000;
    pub const DAY_MS: i64 = 86_400_000;
    pub const WEEK_MS: i64 = 604_800_000;
    pub const MONTH_MS: i64 = 2_592_000_000;

    pub fn millis(self) -> i64 {
        match self {
            Self::Hours | Self::Unrecognized => Self::HOUR_MS,
            Self::Days => Self::DAY_MS,
            Self::Weeks => Self::WEEK_MS,
            Self::Months => Self::MONTH_MS,
        }
    }
}

/// Per-session settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SettingsWire")]
pub struct SessionSettings {
    pub timezone: String,
    pub retention_unit: RetentionUnit,
    pub retention_value: f64,
    pub auto_cleanup: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            retention_unit: RetentionUnit::Hours,
            retention_value: 24.0,
            auto_cleanup: true,
        }
    }
}

impl SessionSettings {
    /// Length of the retention window in milliseconds.
    pub fn retention_window_ms(&self) -> i64 {
        (self.retention_value * self.retention_unit.millis() as f64) as i64
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if !self.retention_value.is_finite() || self.retention_value <= 0.0 {
            violations.push(format!(
                "settings.retentionValue must be > 0 (got {})",
                self.retention_value
            ));
        }
        ValidationError::check(violations)
    }
}

/// Accepts the legacy `historyRetentionHours` key alongside the unit/value
/// pair; an explicit unit or value wins over the legacy key.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SettingsWire {
    timezone: Option<String>,
    retention_unit: Option<RetentionUnit>,
    retention_value: Option<f64>,
    history_retention_hours: Option<f64>,
    auto_cleanup: Option<bool>,
}

impl From<SettingsWire> for SessionSettings {
    fn from(wire: SettingsWire) -> Self {
        let defaults = SessionSettings::default();
        let (unit, value) = match (wire.retention_unit, wire.retention_value, wire.history_retention_hours) {
            (None, None, Some(hours)) => (RetentionUnit::Hours, hours),
            (unit, value, _) => (
                unit.unwrap_or(defaults.retention_unit),
                value.unwrap_or(defaults.retention_value),
            ),
        };
        Self {
            timezone: wire.timezone.unwrap_or(defaults.timezone),
            retention_unit: unit,
            retention_value: value,
            auto_cleanup: wire.auto_cleanup.unwrap_or(defaults.auto_cleanup),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unit_lengths() {
        assert_eq!(RetentionUnit::Hours.millis(), 3_600_000);
        assert_eq!(RetentionUnit::Days.millis(), 86_400_000);
        assert_eq!(RetentionUnit::Weeks.millis(), 604_800_000);
        assert_eq!(RetentionUnit::Months.millis(), 30 * 86_400_000);
    }

    #[test]
    fn unknown_unit_falls_back_to_hours() {
        let s: SessionSettings =
            serde_json::from_value(json!({"retentionUnit": "fortnights", "retentionValue": 2})).unwrap();
        assert_eq!(s.retention_unit, RetentionUnit::Unrecognized);
        assert_eq!(s.retention_window_ms(), 2 * 3_600_000);
    }

    #[test]
    fn empty_object_gets_defaults() {
        let s: SessionSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(s, SessionSettings::default());
        assert_eq!(s.retention_window_ms(), 24 * 3_600_000);
    }

    #[test]
    fn legacy_hours_key() {
        let s: SessionSettings = serde_json::from_value(json!({
            "timezone": "America/New_York", "historyRetentionHours": 6
        }))
        .unwrap();
        assert_eq!(s.timezone, "America/New_York");
        assert_eq!(s.retention_unit, RetentionUnit::Hours);
        assert_eq!(s.retention_value, 6.0);
    }

    #[test]
    fn explicit_unit_beats_legacy_key() {
        let s: SessionSettings = serde_json::from_value(json!({
            "retentionUnit": "days", "retentionValue": 3, "historyRetentionHours": 6,
            "autoCleanup": false
        }))
        .unwrap();
        assert_eq!(s.retention_unit, RetentionUnit::Days);
        assert_eq!(s.retention_value, 3.0);
        assert!(!s.auto_cleanup);
    }

    #[test]
    fn serializes_camel_case() {
        let v = serde_json::to_value(SessionSettings::default()).unwrap();
        assert_eq!(v["retentionUnit"], "hours");
        assert_eq!(v["autoCleanup"], true);
    }

    #[test]
    fn non_positive_retention_rejected() {
        let s = SessionSettings {
            retention_value: 0.0,
            ..Default::default()
        };
        assert!(s.validate().is_err());
    }
}
