use aps_core::collaborators::{AutosensInput, SensitivityDetector};
use aps_core::results::AutosensResult;
use aps_core::CollaboratorError;

use super::{round_to, MINUTE_MS};

const MIN_RATIO: f64 = 0.7;
const MAX_RATIO: f64 = 1.2;
/// Ratio change per mg/dL of average 5-minute rise.
const GAIN: f64 = 0.05;
/// Deltas this soon after a carb entry are attributed to the meal.
const CARB_EXCLUSION_MINUTES: f64 = 180.0;

/// Sensitivity ratio from the average unexplained glucose drift.
///
/// A sustained rise outside meal windows reads as resistance (ratio above
/// 1), a sustained fall as sensitivity. The ratio is bounded.
pub struct DeviationSensitivity;

impl SensitivityDetector for DeviationSensitivity {
    fn detect(&self, input: &AutosensInput<'_>) -> Result<AutosensResult, CollaboratorError> {
        let sens = input
            .iob_inputs
            .profile
            .sens
            .ok_or_else(|| CollaboratorError::failed("autosens", "profile.sens is not set"))?;

        let considered = &input.glucose[..input.glucose.len().min(input.deviation_window + 1)];
        let deviations: Vec<f64> = considered
            .windows(2)
            .filter(|pair| !after_meal(pair[0].date, input))
            .filter_map(|pair| {
                let minutes = (pair[0].date - pair[1].date) as f64 / MINUTE_MS;
                (minutes > 0.0).then(|| (pair[0].glucose - pair[1].glucose) * 5.0 / minutes)
            })
            .collect();

        if deviations.is_empty() {
            return Ok(AutosensResult::neutral(sens));
        }
        let mean = deviations.iter().sum::<f64>() / deviations.len() as f64;
        let ratio = round_to((1.0 + mean * GAIN).clamp(MIN_RATIO, MAX_RATIO), 0.01);

        Ok(AutosensResult {
            ratio,
            new_isf: round_to(sens / ratio, 0.1),
            original_isf: Some(sens),
        })
    }
}

fn after_meal(at_ms: i64, input: &AutosensInput<'_>) -> bool {
    input.carbs.iter().any(|entry| {
        let since = (at_ms - entry.timestamp.timestamp_millis()) as f64 / MINUTE_MS;
        (0.0..CARB_EXCLUSION_MINUTES).contains(&since)
    })
}
