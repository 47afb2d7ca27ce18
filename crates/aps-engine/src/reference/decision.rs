use aps_core::collaborators::{DecisionInput, DiagnosticSink, DosingDecision};
use aps_core::results::Suggestion;
use aps_core::{time, CollaboratorError};

use super::{round_to, MINUTE_MS};

/// Readings at or below this are sensor error codes, not glucose.
const SENSOR_ERROR_BG: f64 = 38.0;
const STALE_AFTER_MINUTES: f64 = 12.0;
const TEMP_MINUTES: f64 = 30.0;
/// 5-minute intervals the short average delta is projected forward.
const TREND_HORIZON: f64 = 6.0;

/// Threshold dosing: suspend when eventual glucose is predicted below
/// range, raise the basal when above, hold the scheduled rate in range.
pub struct ThresholdDecision;

impl DosingDecision for ThresholdDecision {
    fn decide(
        &self,
        input: &DecisionInput<'_>,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> Result<Suggestion, CollaboratorError> {
        let status = input.glucose_status;
        let profile = input.profile;
        let bg = status.glucose;

        if bg <= SENSOR_ERROR_BG {
            diagnostics.write_line(&format!("glucose {bg} is a sensor error code"));
            return Ok(Suggestion::error(format!("CGM sensor error: glucose reported as {bg} mg/dL")));
        }
        let age_minutes = (input.now_ms - status.date) as f64 / MINUTE_MS;
        if age_minutes > STALE_AFTER_MINUTES {
            diagnostics.write_line(&format!("newest glucose is {age_minutes:.1} minutes old"));
            return Ok(Suggestion::error(format!(
                "glucose data is stale: newest reading is {age_minutes:.0} minutes old"
            )));
        }

        let (Some(min_bg), Some(max_bg)) = (profile.min_bg, profile.max_bg) else {
            return Err(CollaboratorError::failed("decision", "profile.min_bg and profile.max_bg are required"));
        };
        let sens = input
            .autosens
            .map(|a| a.new_isf)
            .or(profile.sens)
            .filter(|s| *s > 0.0)
            .ok_or_else(|| CollaboratorError::failed("decision", "no usable insulin sensitivity"))?;
        let ratio = input.autosens.map(|a| a.ratio).unwrap_or(1.0);
        let target = round_to((min_bg + max_bg) / 2.0, 1.0);
        let scheduled = profile.current_basal.unwrap_or(0.0) * ratio;
        let iob = input.iob.first().map(|e| e.iob).unwrap_or(0.0);
        let cob = input.meal.meal_cob;

        let carb_effect = match profile.carb_ratio {
            Some(cr) if cr > 0.0 => cob / cr * sens,
            _ => 0.0,
        };
        let trend_effect = status.short_avgdelta * TREND_HORIZON;
        let eventual = round_to(bg - iob * sens + carb_effect + trend_effect, 1.0);
        let insulin_req = round_to((eventual - target) / sens, 0.01);

        diagnostics.write_line(&format!(
            "bg {bg}, delta {}, short avg {}, iob {iob}, cob {cob}",
            status.delta, status.short_avgdelta
        ));
        diagnostics.write_line(&format!(
            "isf {sens} (ratio {ratio}), target {target}, eventual {eventual}, insulin req {insulin_req}"
        ));

        let mut suggestion = Suggestion {
            bg: Some(bg),
            tick: Some(tick(status.delta)),
            eventual_bg: Some(eventual),
            target_bg: Some(target),
            insulin_req: Some(insulin_req),
            cob: Some(cob),
            iob: Some(iob),
            sensitivity_ratio: Some(ratio),
            deliver_at: time::from_millis(input.now_ms),
            reason: format!("COB: {cob}, BG: {bg}, ISF: {sens}, Target: {target}, Eventual BG: {eventual}"),
            ..Default::default()
        };

        if eventual < min_bg {
            diagnostics.write_line("eventual below range, suspending");
            suggestion.reason.push_str(&format!("; eventual BG {eventual} < {min_bg}, setting 0 temp"));
            return Ok(input
                .basal
                .set_temp_basal(0.0, TEMP_MINUTES, profile, suggestion, input.current_temp));
        }

        if eventual > max_bg {
            let rate = scheduled + insulin_req * 60.0 / TEMP_MINUTES;
            diagnostics.write_line(&format!("eventual above range, raising basal to {rate:.2}"));
            suggestion
                .reason
                .push_str(&format!("; eventual BG {eventual} > {max_bg}, high temp {rate:.2}"));
            let mut suggestion = input
                .basal
                .set_temp_basal(rate, TEMP_MINUTES, profile, suggestion, input.current_temp);

            if input.microbolus_enabled && insulin_req > 0.0 {
                let headroom = profile.max_iob.unwrap_or(0.0) - iob;
                let units = round_to((insulin_req / 2.0).min(headroom), 0.1);
                if units >= 0.1 {
                    diagnostics.write_line(&format!("microbolus {units} U (headroom {headroom:.2})"));
                    suggestion.units = Some(units);
                    suggestion.reason.push_str(&format!("; microbolusing {units}U"));
                }
            }
            return Ok(suggestion);
        }

        diagnostics.write_line("eventual in range, holding scheduled basal");
        suggestion.reason.push_str("; in range, scheduled basal");
        Ok(input
            .basal
            .set_temp_basal(scheduled, TEMP_MINUTES, profile, suggestion, input.current_temp))
    }
}

fn tick(delta: f64) -> String {
    if delta >= 0.0 {
        format!("+{delta:.0}")
    } else {
        format!("{delta:.0}")
    }
}
