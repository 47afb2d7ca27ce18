//! Built-in collaborator implementations.
//!
//! These are simple, deterministic models meant for integration testing and
//! demos. They are not clinically validated and should not dose a person.

mod autosens;
mod basal;
mod decision;
mod glucose;
mod iob;
mod meal;

pub use autosens::DeviationSensitivity;
pub use basal::ClampedBasal;
pub use decision::ThresholdDecision;
pub use glucose::DeltaGlucoseStatus;
pub use iob::LinearIob;
pub use meal::LinearCarbs;

const MINUTE_MS: f64 = 60_000.0;

/// Round `value` to the nearest multiple of `step`.
pub(crate) fn round_to(value: f64, step: f64) -> f64 {
    let rounded = (value / step).round() * step;
    // Trim binary noise such as 1.1500000000000001.
    (rounded * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::round_to;

    #[test]
    fn rounding_steps() {
        assert_eq!(round_to(1.23, 0.05), 1.25);
        assert_eq!(round_to(1.22, 0.05), 1.2);
        assert_eq!(round_to(113.4, 1.0), 113.0);
        assert_eq!(round_to(0.0, 0.05), 0.0);
    }
}
