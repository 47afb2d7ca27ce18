//! Scripted glucose scenarios for exercising a session end to end.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aps_core::results::Suggestion;
use aps_core::{time, PatientId};

use crate::error::EngineError;

/// Start value when the session has no glucose yet.
pub const DEFAULT_START_GLUCOSE: f64 = 120.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scenario {
    /// Slow fall: 3 readings, -2 mg/dL every 5 minutes.
    Basic,
    /// 45 g meal followed by a rise: 6 readings, +15 mg/dL every 10 minutes.
    Meal,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScenarioPlan {
    pub steps: u32,
    pub spacing_minutes: i64,
    pub glucose_delta: f64,
    /// Carb entry logged at the base time before the first step.
    pub carbs: Option<f64>,
}

impl Scenario {
    pub fn plan(self) -> ScenarioPlan {
        match self {
            Self::Basic => ScenarioPlan {
                steps: 3,
                spacing_minutes: 5,
                glucose_delta: -2.0,
                carbs: None,
            },
            Self::Meal => ScenarioPlan {
                steps: 6,
                spacing_minutes: 10,
                glucose_delta: 15.0,
                carbs: Some(45.0),
            },
        }
    }
}

impl FromStr for Scenario {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic" => Ok(Self::Basic),
            "meal" => Ok(Self::Meal),
            other => Err(EngineError::UnknownScenario(other.to_string())),
        }
    }
}

impl ScenarioPlan {
    /// Time and glucose value of step `i` (zero-based).
    pub fn step_at(&self, i: u32, base: DateTime<Utc>, start: f64) -> (DateTime<Utc>, f64) {
        let at = base + chrono::Duration::minutes((i as i64 + 1) * self.spacing_minutes);
        (at, start + i as f64 * self.glucose_delta)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ScenarioStep {
    pub step: u32,
    #[serde(with = "time::flexible")]
    pub time: DateTime<Utc>,
    pub glucose: f64,
    pub suggestion: Suggestion,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioSummary {
    pub steps: usize,
    pub final_glucose: Option<f64>,
    pub final_basal_rate: Option<f64>,
}

impl ScenarioSummary {
    pub fn from_steps(steps: &[ScenarioStep]) -> Self {
        let last = steps.last();
        Self {
            steps: steps.len(),
            final_glucose: last.map(|s| s.glucose),
            final_basal_rate: last.and_then(|s| s.suggestion.rate),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub patient_id: PatientId,
    pub scenario: Scenario,
    pub results: Vec<ScenarioStep>,
    pub summary: ScenarioSummary,
}
