//! The five-stage calculation pipeline.
//!
//! Stages run strictly in order and are never retried: autosens, IOB, meal,
//! glucose status, decision. The pipeline only reads the session; the
//! caller commits the output once every stage has succeeded.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use aps_core::collaborators::{
    AutosensInput, BasalSetter, DecisionInput, DosingDecision, GlucoseStatusReader, IobCalculator,
    IobInput, IobInputs, MealCalculator, MealInput, SensitivityDetector,
};
use aps_core::profile::MIN_CARB_RATIO;
use aps_core::results::{AutosensResult, GlucoseStatus, IobEstimate, MealResult, Suggestion};
use aps_core::{CollaboratorError, History, PatientId, Profile, ValidationError};
use aps_store::PatientSession;

use crate::capture;
use crate::error::EngineError;
use crate::reference;

/// Autosens is skipped below this many glucose samples.
pub const AUTOSENS_MIN_GLUCOSE: usize = 24;
/// Below this many glucose samples COB is forced to zero.
pub const MEAL_MIN_GLUCOSE: usize = 36;
/// 5-minute deviation points autosens looks back over (8 hours).
pub const DEVIATION_WINDOW: usize = 96;

/// The external algorithm implementations the pipeline delegates to.
#[derive(Clone)]
pub struct Collaborators {
    pub iob: Arc<dyn IobCalculator>,
    pub meal: Arc<dyn MealCalculator>,
    pub autosens: Arc<dyn SensitivityDetector>,
    pub glucose: Arc<dyn GlucoseStatusReader>,
    pub decision: Arc<dyn DosingDecision>,
    pub basal: Arc<dyn BasalSetter>,
}

impl Collaborators {
    /// The built-in deterministic implementations.
    pub fn reference() -> Self {
        Self {
            iob: Arc::new(reference::LinearIob),
            meal: Arc::new(reference::LinearCarbs::default()),
            autosens: Arc::new(reference::DeviationSensitivity),
            glucose: Arc::new(reference::DeltaGlucoseStatus),
            decision: Arc::new(reference::ThresholdDecision),
            basal: Arc::new(reference::ClampedBasal),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum AutosensMode {
    #[default]
    Detect,
    /// Stage skipped; nothing reported and a neutral ratio downstream.
    Disabled,
    /// Use this ratio without asking the collaborator.
    Fixed(f64),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PipelineOptions {
    pub microbolus: bool,
    pub autosens: AutosensMode,
    /// Shallow overlay applied to the profile the decision sees.
    pub profile_overrides: Map<String, Value>,
}

/// Everything one successful run produced.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineOutput {
    pub suggestion: Suggestion,
    pub iob: Vec<IobEstimate>,
    pub meal: MealResult,
    pub glucose_status: GlucoseStatus,
    pub autosens: Option<AutosensResult>,
    pub diagnostics: String,
}

pub struct CalculationPipeline {
    collaborators: Collaborators,
}

impl CalculationPipeline {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    #[instrument(skip_all, fields(patient_id = %session.id, now = %now))]
    pub fn run(
        &self,
        session: &PatientSession,
        now: DateTime<Utc>,
        options: &PipelineOptions,
    ) -> Result<PipelineOutput, EngineError> {
        let profile = &session.profile;
        let history = &session.history;

        let autosens = self.autosens_stage(history, profile, now, options.autosens)?;
        let iob = self.iob_stage(history, profile, now, autosens.as_ref())?;
        let meal = self.meal_stage(history, profile, now)?;
        let glucose_status = self.glucose_stage(&session.id, history)?;

        let effective = profile
            .overlay(&options.profile_overrides)
            .map_err(|e| ValidationError::single(format!("options.profileOverrides: {e}")))?;
        let current_temp = session.active_temp(&now, effective.current_basal.unwrap_or(0.0));

        let input = DecisionInput {
            glucose_status: &glucose_status,
            current_temp: &current_temp,
            iob: &iob,
            profile: &effective,
            autosens: autosens.as_ref(),
            meal: &meal,
            basal: self.collaborators.basal.as_ref(),
            microbolus_enabled: options.microbolus,
            reservoir: None,
            now_ms: now.timestamp_millis(),
        };
        let (decided, diagnostics) =
            capture::capture(&session.id, |sink| self.collaborators.decision.decide(&input, sink));

        let suggestion = match decided {
            Ok(s) => match s.error {
                Some(message) => {
                    warn!(error = %message, "decision returned an error");
                    return Err(CollaboratorError::Rejected(message).into());
                }
                None => s,
            },
            Err(e) => {
                warn!(error = %e, "decision stage failed");
                return Err(e.into());
            }
        };

        debug!(
            rate = ?suggestion.rate,
            duration = ?suggestion.duration,
            eventual_bg = ?suggestion.eventual_bg,
            "pipeline complete"
        );

        Ok(PipelineOutput {
            suggestion,
            iob,
            meal,
            glucose_status,
            autosens,
            diagnostics,
        })
    }

    pub fn autosens_stage(
        &self,
        history: &History,
        profile: &Profile,
        now: DateTime<Utc>,
        mode: AutosensMode,
    ) -> Result<Option<AutosensResult>, CollaboratorError> {
        let sens = profile.sens.unwrap_or(0.0);
        match mode {
            AutosensMode::Disabled => Ok(None),
            AutosensMode::Fixed(ratio) => Ok(Some(AutosensResult {
                ratio,
                new_isf: if ratio > 0.0 { sens / ratio } else { sens },
                original_isf: Some(sens),
            })),
            AutosensMode::Detect if history.glucose.len() < AUTOSENS_MIN_GLUCOSE => {
                debug!(
                    samples = history.glucose.len(),
                    "too few glucose samples for autosens, using neutral ratio"
                );
                Ok(Some(AutosensResult::neutral(sens)))
            }
            AutosensMode::Detect => {
                let schedule = profile.basal_schedule();
                let input = AutosensInput {
                    glucose: &history.glucose,
                    iob_inputs: IobInputs {
                        profile,
                        history: &history.pump,
                        clock: now,
                    },
                    basal_schedule: &schedule,
                    carbs: &history.carbs,
                    temp_targets: &[],
                    retrospective: false,
                    deviation_window: DEVIATION_WINDOW,
                };
                self.collaborators.autosens.detect(&input).map(Some)
            }
        }
    }

    pub fn iob_stage(
        &self,
        history: &History,
        profile: &Profile,
        now: DateTime<Utc>,
        autosens: Option<&AutosensResult>,
    ) -> Result<Vec<IobEstimate>, CollaboratorError> {
        let estimates = self.collaborators.iob.calculate(&IobInput {
            history: &history.pump,
            history_24h: None,
            profile,
            clock: now,
            autosens,
        })?;
        if estimates.is_empty() {
            return Err(CollaboratorError::failed("iob", "no estimates returned"));
        }
        Ok(estimates)
    }

    /// Meal stage. Degrades instead of failing when the carb ratio is
    /// missing or implausibly low, or when glucose history is too short.
    pub fn meal_stage(
        &self,
        history: &History,
        profile: &Profile,
        now: DateTime<Utc>,
    ) -> Result<MealResult, CollaboratorError> {
        match profile.carb_ratio {
            None => return Ok(MealResult::degraded("carb_ratio is not set; meal model skipped")),
            Some(cr) if cr < MIN_CARB_RATIO => {
                warn!(carb_ratio = cr, "carb ratio below minimum, meal model skipped");
                return Ok(MealResult::degraded(format!(
                    "carb_ratio {cr} is below the minimum of {MIN_CARB_RATIO}; meal model skipped"
                )));
            }
            Some(_) => {}
        }

        let schedule = profile.basal_schedule();
        let mut meal = self.collaborators.meal.calculate(&MealInput {
            history: &history.pump,
            profile,
            basal_schedule: &schedule,
            clock: now,
            carbs: &history.carbs,
            glucose: &history.glucose,
        })?;

        let samples = history.glucose.len();
        if samples < MEAL_MIN_GLUCOSE {
            meal.meal_cob = 0.0;
            meal.reason = Some(format!(
                "only {samples} glucose samples (need {MEAL_MIN_GLUCOSE}); COB reported as 0"
            ));
        }
        Ok(meal)
    }

    pub fn glucose_stage(&self, id: &PatientId, history: &History) -> Result<GlucoseStatus, EngineError> {
        if history.glucose.is_empty() {
            return Err(EngineError::MissingGlucose(id.clone()));
        }
        self.collaborators
            .glucose
            .last_status(&history.glucose)
            .ok_or_else(|| EngineError::MissingGlucose(id.clone()))
    }
}
