use chrono::Duration;

use aps_core::collaborators::{IobCalculator, IobInput};
use aps_core::history::{PumpEvent, PumpEventKind};
use aps_core::results::IobEstimate;
use aps_core::CollaboratorError;

use super::{round_to, MINUTE_MS};

/// Forecast points, 5 minutes apart. Index 0 is the request clock.
const FORECAST_POINTS: i64 = 48;
const STEP_MINUTES: i64 = 5;

/// Insulin on board with linear decay over the duration of insulin action.
///
/// Temp basals contribute the insulin delivered above (or below) the
/// scheduled basal, split into 5-minute doses.
pub struct LinearIob;

#[derive(Clone, Copy, Debug)]
struct Dose {
    at_ms: i64,
    units: f64,
    basal: bool,
}

impl IobCalculator for LinearIob {
    fn calculate(&self, input: &IobInput<'_>) -> Result<Vec<IobEstimate>, CollaboratorError> {
        let dia_hours = input.profile.dia.unwrap_or(3.0);
        if !(dia_hours > 0.0) {
            return Err(CollaboratorError::failed(
                "iob",
                format!("dia must be positive (got {dia_hours})"),
            ));
        }
        let dia_ms = dia_hours * 60.0 * MINUTE_MS;
        let ratio = input.autosens.map(|a| a.ratio).unwrap_or(1.0);
        let scheduled = input.profile.current_basal.unwrap_or(0.0) * ratio;
        let now_ms = input.clock.timestamp_millis();
        let doses = doses(input.history, scheduled, now_ms);

        Ok((0..FORECAST_POINTS)
            .map(|k| {
                let at = input.clock + Duration::minutes(k * STEP_MINUTES);
                estimate_at(&doses, at.timestamp_millis(), dia_ms, at)
            })
            .collect())
    }
}

fn doses(events: &[PumpEvent], scheduled: f64, now_ms: i64) -> Vec<Dose> {
    let mut out = Vec::new();
    for event in events {
        let at_ms = event.timestamp.timestamp_millis();
        match event.kind() {
            PumpEventKind::Bolus => {
                if let Some(units) = event.amount() {
                    out.push(Dose {
                        at_ms,
                        units,
                        basal: false,
                    });
                }
            }
            PumpEventKind::TempBasal => {
                let Some(rate) = event.rate() else { continue };
                let minutes = events
                    .iter()
                    .find(|e| e.kind() == PumpEventKind::TempBasalDuration && e.timestamp == event.timestamp)
                    .and_then(PumpEvent::duration_minutes)
                    .or_else(|| event.duration_minutes())
                    .unwrap_or(0.0);
                let net_per_chunk = (rate - scheduled) * STEP_MINUTES as f64 / 60.0;
                let chunks = (minutes / STEP_MINUTES as f64).ceil() as i64;
                for j in 0..chunks {
                    out.push(Dose {
                        at_ms: at_ms + j * STEP_MINUTES * MINUTE_MS as i64,
                        units: net_per_chunk,
                        basal: true,
                    });
                }
            }
            _ => {}
        }
    }
    out.retain(|d| d.at_ms <= now_ms);
    out
}

fn estimate_at(doses: &[Dose], t_ms: i64, dia_ms: f64, at: chrono::DateTime<chrono::Utc>) -> IobEstimate {
    let (mut basal_iob, mut bolus_iob, mut activity) = (0.0, 0.0, 0.0);
    for dose in doses {
        let elapsed = (t_ms - dose.at_ms) as f64;
        if elapsed < 0.0 || elapsed >= dia_ms {
            continue;
        }
        let remaining = dose.units * (1.0 - elapsed / dia_ms);
        if dose.basal {
            basal_iob += remaining;
        } else {
            bolus_iob += remaining;
        }
        activity += dose.units / (dia_ms / MINUTE_MS);
    }
    IobEstimate {
        iob: round_to(basal_iob + bolus_iob, 0.001),
        activity: round_to(activity, 0.0001),
        basal_iob: round_to(basal_iob, 0.001),
        bolus_iob: round_to(bolus_iob, 0.001),
        time: at,
    }
}
