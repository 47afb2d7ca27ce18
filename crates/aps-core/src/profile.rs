//! Patient algorithm profile.
//!
//! Keys follow the oref0 naming the pump-side tooling already speaks
//! (`carb_ratio`, `sens`, `dia`, ...). The fields the pipeline reads are typed;
//! every other key is preserved verbatim in `extra` so clients can round-trip
//! settings this service does not interpret.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ValidationError;

/// Lowest carb ratio (grams per unit) the meal model is trusted with.
pub const MIN_CARB_RATIO: f64 = 3.0;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub carb_ratio: Option<f64>,
    /// Insulin sensitivity factor (mg/dL per unit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sens: Option<f64>,
    /// Duration of insulin action, hours.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dia: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_bg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_bg: Option<f64>,
    /// Baseline basal rate, U/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_basal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_basal: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iob: Option<f64>,
    #[serde(
        default,
        rename = "basalprofile",
        skip_serializing_if = "Option::is_none"
    )]
    pub basal_profile: Option<Vec<BasalScheduleEntry>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One segment of a daily basal schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BasalScheduleEntry {
    #[serde(default)]
    pub i: u32,
    #[serde(default = "midnight")]
    pub start: String,
    /// Minutes after midnight the segment begins.
    #[serde(default)]
    pub minutes: u32,
    pub rate: f64,
}

fn midnight() -> String {
    "00:00:00".to_string()
}

impl BasalScheduleEntry {
    pub fn all_day(rate: f64) -> Self {
        Self {
            i: 0,
            start: midnight(),
            minutes: 0,
            rate,
        }
    }
}

impl Profile {
    /// The single validation policy applied at creation and on every update.
    ///
    /// Collects every violation instead of stopping at the first.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();

        let required = [
            ("carb_ratio", self.carb_ratio),
            ("sens", self.sens),
            ("dia", self.dia),
            ("min_bg", self.min_bg),
            ("max_bg", self.max_bg),
            ("current_basal", self.current_basal),
        ];
        for (name, value) in required {
            match value {
                None => violations.push(format!("profile.{name} is required")),
                Some(v) if !v.is_finite() => {
                    violations.push(format!("profile.{name} must be a finite number"))
                }
                Some(_) => {}
            }
        }

        if let Some(cr) = self.carb_ratio {
            if cr < MIN_CARB_RATIO {
                violations.push(format!(
                    "profile.carb_ratio must be >= {MIN_CARB_RATIO} (got {cr})"
                ));
            }
        }
        if let Some(sens) = self.sens {
            if sens <= 0.0 {
                violations.push(format!("profile.sens must be > 0 (got {sens})"));
            }
        }
        if let Some(dia) = self.dia {
            if dia <= 0.0 {
                violations.push(format!("profile.dia must be > 0 (got {dia})"));
            }
        }
        if let (Some(min), Some(max)) = (self.min_bg, self.max_bg) {
            if min > max {
                violations.push(format!(
                    "profile.min_bg ({min}) must not exceed profile.max_bg ({max})"
                ));
            }
        }
        if let Some(basal) = self.current_basal {
            if basal < 0.0 {
                violations.push(format!("profile.current_basal must not be negative (got {basal})"));
            }
        }

        ValidationError::check(violations)
    }

    /// The profile's own basal schedule, or a single all-day segment at the
    /// baseline rate.
    pub fn basal_schedule(&self) -> Vec<BasalScheduleEntry> {
        match &self.basal_profile {
            Some(schedule) if !schedule.is_empty() => schedule.clone(),
            _ => vec![BasalScheduleEntry::all_day(self.current_basal.unwrap_or(0.0))],
        }
    }

    /// Shallow overlay: every key in `overrides` replaces the whole field.
    pub fn overlay(&self, overrides: &Map<String, Value>) -> Result<Profile, serde_json::Error> {
        if overrides.is_empty() {
            return Ok(self.clone());
        }
        let mut merged = self.to_map()?;
        for (key, value) in overrides {
            merged.insert(key.clone(), value.clone());
        }
        serde_json::from_value(Value::Object(merged))
    }

    pub fn to_map(&self) -> Result<Map<String, Value>, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            // A struct with a flattened map always serializes to an object.
            other => Ok(Map::from_iter([("profile".to_string(), other)])),
        }
    }

    /// Target midpoint of the glucose bounds.
    pub fn target_bg(&self) -> Option<f64> {
        match (self.min_bg, self.max_bg) {
            (Some(min), Some(max)) => Some((min + max) / 2.0),
            (Some(v), None) | (None, Some(v)) => Some(v),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid() -> Profile {
        serde_json::from_value(json!({
            "carb_ratio": 10,
            "sens": 50,
            "dia": 6,
            "min_bg": 80,
            "max_bg": 120,
            "current_basal": 1.0,
            "max_basal": 4.0,
            "max_iob": 6.0,
            "curve": "rapid-acting"
        }))
        .unwrap()
    }

    #[test]
    fn valid_profile_passes() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let p = valid();
        assert_eq!(p.extra.get("curve"), Some(&json!("rapid-acting")));
        let back = serde_json::to_value(&p).unwrap();
        assert_eq!(back["curve"], "rapid-acting");
        assert_eq!(back["carb_ratio"], 10.0);
    }

    #[test]
    fn empty_profile_lists_every_missing_field() {
        let err = Profile::default().validate().unwrap_err();
        assert_eq!(err.violations.len(), 6);
        assert!(err.violations.iter().any(|v| v.contains("carb_ratio")));
        assert!(err.violations.iter().any(|v| v.contains("current_basal")));
    }

    #[test]
    fn low_carb_ratio_and_bad_sens_both_reported() {
        let mut p = valid();
        p.carb_ratio = Some(2.0);
        p.sens = Some(0.0);
        let err = p.validate().unwrap_err();
        assert_eq!(err.violations.len(), 2, "{:?}", err.violations);
        assert!(err.violations[0].contains("carb_ratio must be >= 3"));
        assert!(err.violations[1].contains("sens must be > 0"));
    }

    #[test]
    fn carb_ratio_of_exactly_three_is_allowed() {
        let mut p = valid();
        p.carb_ratio = Some(3.0);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn non_positive_dia_rejected() {
        for dia in [0.0, -3.0] {
            let mut p = valid();
            p.dia = Some(dia);
            let err = p.validate().unwrap_err();
            assert_eq!(err.violations.len(), 1);
            assert!(err.violations[0].contains("dia must be > 0"));
        }
    }

    #[test]
    fn inverted_bounds_rejected() {
        let mut p = valid();
        p.min_bg = Some(150.0);
        assert!(p.validate().is_err());
    }

    #[test]
    fn default_basal_schedule_uses_current_basal() {
        let schedule = valid().basal_schedule();
        assert_eq!(schedule, vec![BasalScheduleEntry::all_day(1.0)]);
    }

    #[test]
    fn own_basal_schedule_wins() {
        let mut p = valid();
        p.basal_profile = Some(vec![
            BasalScheduleEntry::all_day(0.8),
            BasalScheduleEntry {
                i: 1,
                start: "06:00:00".into(),
                minutes: 360,
                rate: 1.2,
            },
        ]);
        assert_eq!(p.basal_schedule().len(), 2);
    }

    #[test]
    fn overlay_replaces_fields_shallowly() {
        let p = valid();
        let overrides = json!({"sens": 40, "curve": "ultra-rapid", "new_key": true});
        let merged = p.overlay(overrides.as_object().unwrap()).unwrap();
        assert_eq!(merged.sens, Some(40.0));
        assert_eq!(merged.carb_ratio, Some(10.0));
        assert_eq!(merged.extra.get("curve"), Some(&json!("ultra-rapid")));
        assert_eq!(merged.extra.get("new_key"), Some(&json!(true)));
        // source untouched
        assert_eq!(p.sens, Some(50.0));
    }

    #[test]
    fn overlay_with_null_clears_field() {
        let merged = valid()
            .overlay(json!({"max_iob": null}).as_object().unwrap())
            .unwrap();
        assert_eq!(merged.max_iob, None);
    }

    #[test]
    fn target_is_midpoint() {
        assert_eq!(valid().target_bg(), Some(100.0));
    }
}
