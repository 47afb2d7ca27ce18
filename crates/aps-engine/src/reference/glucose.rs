use aps_core::collaborators::GlucoseStatusReader;
use aps_core::history::GlucoseSample;
use aps_core::results::GlucoseStatus;

use super::{round_to, MINUTE_MS};

/// Current glucose with short and long average deltas, normalized to
/// mg/dL per 5 minutes.
pub struct DeltaGlucoseStatus;

impl GlucoseStatusReader for DeltaGlucoseStatus {
    fn last_status(&self, glucose: &[GlucoseSample]) -> Option<GlucoseStatus> {
        let newest = glucose.first()?;
        let short_avgdelta = average_delta(newest, glucose, 17.5);
        let long_avgdelta = average_delta(newest, glucose, 42.5);
        let recent = average_delta(newest, glucose, 7.5);
        let delta = if recent == 0.0 { short_avgdelta } else { recent };
        Some(GlucoseStatus {
            glucose: newest.glucose,
            delta: round_to(delta, 0.01),
            short_avgdelta: round_to(short_avgdelta, 0.01),
            long_avgdelta: round_to(long_avgdelta, 0.01),
            date: newest.date,
        })
    }
}

/// Mean 5-minute-normalized change from each older sample within
/// `window_minutes` to `newest`. Samples under 2.5 minutes old are skipped.
fn average_delta(newest: &GlucoseSample, glucose: &[GlucoseSample], window_minutes: f64) -> f64 {
    let deltas: Vec<f64> = glucose
        .iter()
        .skip(1)
        .filter_map(|s| {
            let minutes = (newest.date - s.date) as f64 / MINUTE_MS;
            (minutes > 2.5 && minutes <= window_minutes).then(|| (newest.glucose - s.glucose) / minutes * 5.0)
        })
        .collect();
    if deltas.is_empty() {
        0.0
    } else {
        deltas.iter().sum::<f64>() / deltas.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::time;

    const MIN: i64 = 60_000;

    fn series(values: &[f64]) -> Vec<GlucoseSample> {
        // values are newest first, 5 minutes apart
        let n = values.len() as i64;
        values
            .iter()
            .enumerate()
            .map(|(i, v)| GlucoseSample::new(time::from_millis((n - i as i64) * 5 * MIN).unwrap(), *v, "t"))
            .collect()
    }

    #[test]
    fn empty_has_no_status() {
        assert!(DeltaGlucoseStatus.last_status(&[]).is_none());
    }

    #[test]
    fn single_sample_is_flat() {
        let s = DeltaGlucoseStatus.last_status(&series(&[120.0])).unwrap();
        assert_eq!(s.glucose, 120.0);
        assert_eq!(s.delta, 0.0);
    }

    #[test]
    fn steady_fall() {
        let s = DeltaGlucoseStatus
            .last_status(&series(&[111.0, 113.0, 115.0, 117.0, 119.0]))
            .unwrap();
        assert_eq!(s.delta, -2.0);
        assert_eq!(s.short_avgdelta, -2.0);
        assert_eq!(s.long_avgdelta, -2.0);
        assert_eq!(s.trend(), "stable");
    }

    #[test]
    fn uses_newest_date() {
        let samples = series(&[100.0, 90.0]);
        let s = DeltaGlucoseStatus.last_status(&samples).unwrap();
        assert_eq!(s.date, samples[0].date);
        assert_eq!(s.delta, 10.0);
    }
}
