//! Patient-facing operations: session lifecycle, the calculate flow and the
//! test harness.
//!
//! All session state lives in one [`PatientStore`] behind a single mutex.
//! A calculation holds that lock from ingest through commit, so requests
//! for the same patient never interleave. The audit append happens after
//! the lock is released.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument};

use aps_core::history::{CarbEntry, GlucoseSample, InitialData, NewData};
use aps_core::results::{AutosensResult, GlucoseStatus, IobEstimate, MealResult, Suggestion};
use aps_core::{time, PatientId, Profile, RunId, ValidationError};
use aps_store::{
    AuditLogger, AuditRecord, CalculationCommit, HistoryQuery, HistorySlice, LastCalculation,
    PatientSession, PatientStatus, PatientStore, SessionSettings,
};

use crate::error::EngineError;
use crate::pipeline::{AutosensMode, CalculationPipeline, Collaborators, PipelineOptions};
use crate::scenario::{Scenario, ScenarioReport, ScenarioStep, ScenarioSummary, DEFAULT_START_GLUCOSE};
use crate::templates::{self, PatientTemplate};

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeRequest {
    pub profile: Profile,
    #[serde(default)]
    pub initial_data: InitialData,
    #[serde(default)]
    pub settings: SessionSettings,
}

/// `true`/`false` toggles detection; `{"ratio": r}` pins the ratio.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AutosensOption {
    Enabled(bool),
    Fixed { ratio: f64 },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateOptions {
    #[serde(default)]
    pub microbolus: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autosens: Option<AutosensOption>,
    #[serde(default, alias = "profile", skip_serializing_if = "Map::is_empty")]
    pub profile_overrides: Map<String, Value>,
}

impl CalculateOptions {
    pub fn to_pipeline(&self) -> Result<PipelineOptions, ValidationError> {
        let autosens = match self.autosens {
            None | Some(AutosensOption::Enabled(true)) => AutosensMode::Detect,
            Some(AutosensOption::Enabled(false)) => AutosensMode::Disabled,
            Some(AutosensOption::Fixed { ratio }) if ratio.is_finite() && ratio > 0.0 => {
                AutosensMode::Fixed(ratio)
            }
            Some(AutosensOption::Fixed { ratio }) => {
                return Err(ValidationError::single(format!(
                    "options.autosens.ratio must be > 0 (got {ratio})"
                )))
            }
        };
        Ok(PipelineOptions {
            microbolus: self.microbolus,
            autosens,
            profile_overrides: self.profile_overrides.clone(),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateRequest {
    #[serde(with = "time::flexible")]
    pub current_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "NewData::is_empty")]
    pub new_data: NewData,
    #[serde(default)]
    pub options: CalculateOptions,
}

impl CalculateRequest {
    pub fn at(current_time: DateTime<Utc>) -> Self {
        Self {
            current_time,
            new_data: NewData::default(),
            options: CalculateOptions::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalculationContext {
    /// Current estimate (index 0 of the forecast).
    pub iob: IobEstimate,
    pub meal: MealResult,
    pub glucose: GlucoseStatus,
    pub autosens: Option<AutosensResult>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculateResponse {
    pub run_id: RunId,
    pub suggestion: Suggestion,
    pub context: CalculationContext,
    pub diagnostics: String,
}

pub struct PatientService {
    store: Mutex<PatientStore>,
    pipeline: CalculationPipeline,
    audit: AuditLogger,
}

impl PatientService {
    pub fn new(collaborators: Collaborators, log_dir: impl Into<PathBuf>) -> Self {
        Self {
            store: Mutex::new(PatientStore::new()),
            pipeline: CalculationPipeline::new(collaborators),
            audit: AuditLogger::new(log_dir),
        }
    }

    pub fn with_reference_collaborators(log_dir: impl Into<PathBuf>) -> Self {
        Self::new(Collaborators::reference(), log_dir)
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    #[instrument(skip(self, request), fields(patient_id = %id))]
    pub fn initialize(&self, id: PatientId, request: InitializeRequest) -> Result<PatientStatus, EngineError> {
        let mut store = self.store.lock();
        let session = store.create_or_replace(id, request.profile, request.initial_data, request.settings)?;
        Ok(session.status())
    }

    /// Ingest, run the pipeline, commit, then append to the audit log.
    ///
    /// Any stage failure leaves the cached results of the previous run in
    /// place. Data ingested with the request is kept either way.
    #[instrument(skip(self, request), fields(patient_id = %id, current_time = %request.current_time))]
    pub async fn calculate(
        &self,
        id: &PatientId,
        request: CalculateRequest,
    ) -> Result<CalculateResponse, EngineError> {
        let options = request.options.to_pipeline()?;
        let run_id = RunId::new();

        let response = {
            let mut store = self.store.lock();
            if !request.new_data.is_empty() {
                store.add_new_data(id, request.new_data.clone())?;
            }
            let session = store.get_mut(id)?;
            let output = self.pipeline.run(session, request.current_time, &options)?;

            let current_iob = output.iob[0].clone();
            session.commit(CalculationCommit {
                iob: output.iob,
                meal: output.meal.clone(),
                last_calculation: LastCalculation {
                    run_id: run_id.clone(),
                    timestamp: request.current_time,
                    calculated_at: Utc::now(),
                    suggestion: output.suggestion.clone(),
                    diagnostics: output.diagnostics.clone(),
                },
            });

            CalculateResponse {
                run_id: run_id.clone(),
                suggestion: output.suggestion,
                context: CalculationContext {
                    iob: current_iob,
                    meal: output.meal,
                    glucose: output.glucose_status,
                    autosens: output.autosens,
                },
                diagnostics: output.diagnostics,
            }
        };

        info!(
            run_id = %run_id,
            rate = ?response.suggestion.rate,
            eventual_bg = ?response.suggestion.eventual_bg,
            iob = response.context.iob.iob,
            cob = response.context.meal.meal_cob,
            "calculation complete"
        );

        let record = AuditRecord {
            run_id,
            patient_id: id.clone(),
            timestamp: request.current_time,
            request: serde_json::to_value(&request).unwrap_or(Value::Null),
            response: serde_json::to_value(&response).unwrap_or(Value::Null),
            diagnostics: response.diagnostics.clone(),
        };
        self.audit.append_record(&record).await;

        Ok(response)
    }

    pub fn status(&self, id: &PatientId) -> Result<PatientStatus, EngineError> {
        Ok(self.store.lock().get(id)?.status())
    }

    /// A clone of the whole session.
    pub fn session(&self, id: &PatientId) -> Result<PatientSession, EngineError> {
        Ok(self.store.lock().get(id)?.clone())
    }

    pub fn history(
        &self,
        id: &PatientId,
        query: &HistoryQuery,
        now: DateTime<Utc>,
    ) -> Result<HistorySlice, EngineError> {
        query.validate()?;
        let store = self.store.lock();
        Ok(query.slice(&store.get(id)?.history, now))
    }

    pub fn update_profile(&self, id: &PatientId, patch: &Map<String, Value>) -> Result<Profile, EngineError> {
        Ok(self.store.lock().update_profile(id, patch)?.clone())
    }

    pub fn list(&self) -> Vec<PatientStatus> {
        self.store.lock().list()
    }

    pub fn delete(&self, id: &PatientId) -> Result<(), EngineError> {
        Ok(self.store.lock().delete(id)?)
    }

    pub fn patient_count(&self) -> usize {
        self.store.lock().len()
    }

    pub fn templates(&self) -> Vec<PatientTemplate> {
        templates::all()
    }

    /// Initialize `id` from a built-in template with fresh seed glucose.
    #[instrument(skip(self), fields(patient_id = %id))]
    pub fn from_template(&self, id: PatientId, name: &str) -> Result<PatientStatus, EngineError> {
        let template = templates::find(name)?;
        let request = InitializeRequest {
            profile: template.profile.clone(),
            initial_data: template.initial_data(Utc::now()),
            settings: template.settings(),
        };
        info!(template = template.name, "initializing patient from template");
        self.initialize(id, request)
    }

    /// Feed the scenario's readings one at a time through the full
    /// calculate flow.
    #[instrument(skip(self), fields(patient_id = %id, scenario = ?scenario))]
    pub async fn run_scenario(&self, id: &PatientId, scenario: Scenario) -> Result<ScenarioReport, EngineError> {
        let plan = scenario.plan();
        let (start, base) = {
            let store = self.store.lock();
            let session = store.get(id)?;
            match session.history.glucose.first() {
                Some(newest) => (
                    newest.glucose,
                    time::from_millis(newest.date).unwrap_or_else(Utc::now),
                ),
                None => (DEFAULT_START_GLUCOSE, Utc::now()),
            }
        };

        if let Some(grams) = plan.carbs {
            let meal = NewData {
                carb_entries: vec![CarbEntry::new(base, grams, "scenario")],
                ..Default::default()
            };
            self.store.lock().add_new_data(id, meal)?;
        }

        let mut results = Vec::with_capacity(plan.steps as usize);
        for i in 0..plan.steps {
            let (at, glucose) = plan.step_at(i, base, start);
            let request = CalculateRequest {
                new_data: NewData {
                    glucose_readings: vec![GlucoseSample::new(at, glucose, "scenario")],
                    ..Default::default()
                },
                ..CalculateRequest::at(at)
            };
            let response = self.calculate(id, request).await?;
            results.push(ScenarioStep {
                step: i + 1,
                time: at,
                glucose,
                suggestion: response.suggestion,
            });
        }

        let summary = ScenarioSummary::from_steps(&results);
        info!(steps = summary.steps, final_glucose = ?summary.final_glucose, "scenario complete");
        Ok(ScenarioReport {
            patient_id: id.clone(),
            scenario,
            results,
            summary,
        })
    }
}
