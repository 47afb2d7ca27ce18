//! Contracts for the external calculation collaborators.
//!
//! Each stage takes a named-field input struct, so argument order can never
//! be ambiguous. Collaborators are synchronous and treated as deterministic:
//! the pipeline never retries them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::CollaboratorError;
use crate::history::{CarbEntry, GlucoseSample, PumpEvent};
use crate::profile::{BasalScheduleEntry, Profile};
use crate::results::{AutosensResult, GlucoseStatus, IobEstimate, MealResult, Suggestion, TempBasal};

/// Temporary glucose target override. The pipeline always passes none.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempTarget {
    #[serde(with = "crate::time::flexible")]
    pub created_at: DateTime<Utc>,
    pub target_bottom: f64,
    pub target_top: f64,
    pub duration: f64,
}

/// The subset of IOB inputs autosens needs to model expected glucose.
#[derive(Clone, Copy, Debug)]
pub struct IobInputs<'a> {
    pub profile: &'a Profile,
    pub history: &'a [PumpEvent],
    pub clock: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug)]
pub struct AutosensInput<'a> {
    pub glucose: &'a [GlucoseSample],
    pub iob_inputs: IobInputs<'a>,
    pub basal_schedule: &'a [BasalScheduleEntry],
    pub carbs: &'a [CarbEntry],
    pub temp_targets: &'a [TempTarget],
    pub retrospective: bool,
    /// Number of 5-minute deviation points to look back over.
    pub deviation_window: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct IobInput<'a> {
    pub history: &'a [PumpEvent],
    pub history_24h: Option<&'a [PumpEvent]>,
    pub profile: &'a Profile,
    pub clock: DateTime<Utc>,
    pub autosens: Option<&'a AutosensResult>,
}

#[derive(Clone, Copy, Debug)]
pub struct MealInput<'a> {
    pub history: &'a [PumpEvent],
    pub profile: &'a Profile,
    pub basal_schedule: &'a [BasalScheduleEntry],
    pub clock: DateTime<Utc>,
    pub carbs: &'a [CarbEntry],
    pub glucose: &'a [GlucoseSample],
}

pub struct DecisionInput<'a> {
    pub glucose_status: &'a GlucoseStatus,
    pub current_temp: &'a TempBasal,
    /// Index 0 is the current estimate.
    pub iob: &'a [IobEstimate],
    pub profile: &'a Profile,
    pub autosens: Option<&'a AutosensResult>,
    pub meal: &'a MealResult,
    pub basal: &'a dyn BasalSetter,
    pub microbolus_enabled: bool,
    pub reservoir: Option<f64>,
    pub now_ms: i64,
}

pub trait IobCalculator: Send + Sync {
    fn calculate(&self, input: &IobInput<'_>) -> Result<Vec<IobEstimate>, CollaboratorError>;
}

pub trait MealCalculator: Send + Sync {
    fn calculate(&self, input: &MealInput<'_>) -> Result<MealResult, CollaboratorError>;
}

pub trait SensitivityDetector: Send + Sync {
    fn detect(&self, input: &AutosensInput<'_>) -> Result<AutosensResult, CollaboratorError>;
}

pub trait GlucoseStatusReader: Send + Sync {
    /// `None` when there is nothing to report.
    fn last_status(&self, glucose: &[GlucoseSample]) -> Option<GlucoseStatus>;
}

pub trait DosingDecision: Send + Sync {
    /// Anything the algorithm wants to explain goes to `diagnostics`.
    fn decide(
        &self,
        input: &DecisionInput<'_>,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> Result<Suggestion, CollaboratorError>;
}

/// Capability handed to the decision for turning a desired rate into a
/// concrete temp basal on the suggestion.
pub trait BasalSetter: Send + Sync {
    fn set_temp_basal(
        &self,
        rate: f64,
        duration: f64,
        profile: &Profile,
        suggestion: Suggestion,
        current: &TempBasal,
    ) -> Suggestion;
}

/// Line-oriented diagnostic output.
pub trait DiagnosticSink {
    fn write_line(&mut self, line: &str);
}

impl DiagnosticSink for Vec<String> {
    fn write_line(&mut self, line: &str) {
        self.push(line.to_string());
    }
}
