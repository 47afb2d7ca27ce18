use aps_core::collaborators::BasalSetter;
use aps_core::results::{Suggestion, TempBasal};
use aps_core::Profile;

use super::round_to;

/// Pump rate resolution, U/h.
const RATE_STEP: f64 = 0.05;

/// Sets an absolute temp basal, clamped to `[0, max_basal]` and rounded to
/// the pump's rate resolution.
pub struct ClampedBasal;

impl ClampedBasal {
    fn ceiling(profile: &Profile) -> f64 {
        profile
            .max_basal
            .unwrap_or_else(|| profile.current_basal.unwrap_or(0.0) * 4.0)
    }
}

impl BasalSetter for ClampedBasal {
    fn set_temp_basal(
        &self,
        rate: f64,
        duration: f64,
        profile: &Profile,
        mut suggestion: Suggestion,
        current: &TempBasal,
    ) -> Suggestion {
        let ceiling = Self::ceiling(profile);
        let clamped = rate.clamp(0.0, ceiling.max(0.0));
        let rounded = round_to(clamped, RATE_STEP);

        if clamped < rate {
            suggestion
                .reason
                .push_str(&format!("; capped at max_basal {ceiling}"));
        }
        if current.duration > duration / 2.0 && (current.rate - rounded).abs() < RATE_STEP / 2.0 {
            suggestion.reason.push_str(&format!(
                "; temp {rounded} U/h already running ({:.0}m left)",
                current.duration
            ));
        }

        suggestion.temp = Some("absolute".into());
        suggestion.rate = Some(rounded);
        suggestion.duration = Some(duration);
        suggestion
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn profile() -> Profile {
        serde_json::from_value(json!({"current_basal": 1.0, "max_basal": 2.5})).unwrap()
    }

    #[test]
    fn rounds_to_pump_resolution() {
        let s = ClampedBasal.set_temp_basal(1.234, 30.0, &profile(), Suggestion::default(), &TempBasal::baseline(1.0));
        assert_eq!(s.rate, Some(1.25));
        assert_eq!(s.duration, Some(30.0));
        assert_eq!(s.temp.as_deref(), Some("absolute"));
    }

    #[test]
    fn clamps_to_max_basal() {
        let s = ClampedBasal.set_temp_basal(9.0, 30.0, &profile(), Suggestion::default(), &TempBasal::baseline(1.0));
        assert_eq!(s.rate, Some(2.5));
        assert!(s.reason.contains("max_basal"));
    }

    #[test]
    fn never_negative() {
        let s = ClampedBasal.set_temp_basal(-1.0, 30.0, &profile(), Suggestion::default(), &TempBasal::baseline(1.0));
        assert_eq!(s.rate, Some(0.0));
    }

    #[test]
    fn default_ceiling_is_four_times_basal() {
        let p: Profile = serde_json::from_value(json!({"current_basal": 0.5})).unwrap();
        let s = ClampedBasal.set_temp_basal(5.0, 30.0, &p, Suggestion::default(), &TempBasal::baseline(0.5));
        assert_eq!(s.rate, Some(2.0));
    }
}
