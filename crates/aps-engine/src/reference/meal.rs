use aps_core::collaborators::{MealCalculator, MealInput};
use aps_core::results::MealResult;
use aps_core::CollaboratorError;

use super::{round_to, MINUTE_MS};

/// Carbs on board absorbed at a constant rate.
pub struct LinearCarbs {
    /// Grams absorbed per hour.
    pub absorption_rate: f64,
    /// Entries older than this are ignored entirely.
    pub max_age_hours: f64,
}

impl Default for LinearCarbs {
    fn default() -> Self {
        Self {
            absorption_rate: 30.0,
            max_age_hours: 6.0,
        }
    }
}

impl MealCalculator for LinearCarbs {
    fn calculate(&self, input: &MealInput<'_>) -> Result<MealResult, CollaboratorError> {
        if !(self.absorption_rate > 0.0) {
            return Err(CollaboratorError::failed("meal", "absorption rate must be positive"));
        }
        let now_ms = input.clock.timestamp_millis();
        let max_age_ms = self.max_age_hours * 60.0 * MINUTE_MS;

        let (mut carbs, mut cob) = (0.0, 0.0);
        for entry in input.carbs {
            let age_ms = (now_ms - entry.timestamp.timestamp_millis()) as f64;
            if age_ms < 0.0 || age_ms > max_age_ms {
                continue;
            }
            carbs += entry.carbs;
            let absorbed = self.absorption_rate * age_ms / (60.0 * MINUTE_MS);
            cob += (entry.carbs - absorbed).max(0.0);
        }

        Ok(MealResult {
            carbs: round_to(carbs, 0.1),
            meal_cob: round_to(cob, 0.1),
            reason: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aps_core::history::CarbEntry;
    use aps_core::{time, Profile};

    const MIN: i64 = 60_000;

    fn run(carbs: &[CarbEntry], now_ms: i64) -> MealResult {
        let profile = Profile::default();
        LinearCarbs::default()
            .calculate(&MealInput {
                history: &[],
                profile: &profile,
                basal_schedule: &[],
                clock: time::from_millis(now_ms).unwrap(),
                carbs,
                glucose: &[],
            })
            .unwrap()
    }

    #[test]
    fn absorbs_at_constant_rate() {
        let entry = CarbEntry::new(time::from_millis(0).unwrap(), 45.0, "t");
        let out = run(&[entry], 60 * MIN);
        assert_eq!(out.carbs, 45.0);
        assert_eq!(out.meal_cob, 15.0);
    }

    #[test]
    fn fully_absorbed_and_expired() {
        let entry = CarbEntry::new(time::from_millis(0).unwrap(), 20.0, "t");
        assert_eq!(run(&[entry.clone()], 120 * MIN).meal_cob, 0.0);
        assert_eq!(run(&[entry], 7 * 60 * MIN).carbs, 0.0);
    }

    #[test]
    fn future_entries_do_not_count() {
        let entry = CarbEntry::new(time::from_millis(30 * MIN).unwrap(), 20.0, "t");
        assert_eq!(run(&[entry], 0), MealResult { carbs: 0.0, meal_cob: 0.0, reason: None });
    }
}
