use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aps_core::history::{History, HistoryCounts, NewData};
use aps_core::results::{trend_label, IobEstimate, MealResult, Suggestion, TempBasal};
use aps_core::{time, PatientId, Profile, RunId};

use crate::retention::{self, PruneSummary};
use crate::settings::SessionSettings;

/// Snapshot of the most recent completed calculation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastCalculation {
    pub run_id: RunId,
    /// The request's `currentTime`.
    #[serde(with = "time::flexible")]
    pub timestamp: DateTime<Utc>,
    #[serde(with = "time::flexible")]
    pub calculated_at: DateTime<Utc>,
    pub suggestion: Suggestion,
    pub diagnostics: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentState {
    pub temp_basal: Option<TempBasal>,
    pub last_calculation: Option<LastCalculation>,
    #[serde(rename = "cachedIOB")]
    pub cached_iob: Option<Vec<IobEstimate>>,
    pub cached_meal: Option<MealResult>,
}

/// Everything a completed pipeline run commits, applied in one step.
#[derive(Clone, Debug)]
pub struct CalculationCommit {
    pub iob: Vec<IobEstimate>,
    pub meal: MealResult,
    pub last_calculation: LastCalculation,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientSession {
    pub id: PatientId,
    pub profile: Profile,
    pub history: History,
    pub state: CurrentState,
    pub settings: SessionSettings,
    #[serde(with = "time::flexible")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "time::flexible")]
    pub last_updated: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub added: HistoryCounts,
    pub pruned: Option<PruneSummary>,
}

impl PatientSession {
    pub fn new(id: PatientId, profile: Profile, history: History, settings: SessionSettings) -> Self {
        let now = Utc::now();
        let mut session = Self {
            id,
            profile,
            history,
            state: CurrentState::default(),
            settings,
            created_at: now,
            last_updated: now,
        };
        session.history.sort();
        session.state.temp_basal = session.history.latest_temp_basal();
        session
    }

    /// Append, re-sort, then prune when auto-cleanup is on.
    pub fn ingest(&mut self, data: NewData) -> IngestSummary {
        let added = HistoryCounts {
            glucose: data.glucose_readings.len(),
            pump: data.pump_events.len(),
            carbs: data.carb_entries.len(),
        };
        let pump_changed = added.pump > 0;

        self.history.glucose.extend(data.glucose_readings);
        self.history.pump.extend(data.pump_events);
        self.history.carbs.extend(data.carb_entries);
        self.history.sort();

        if pump_changed {
            if let Some(temp) = self.history.latest_temp_basal() {
                self.state.temp_basal = Some(temp);
            }
        }

        let pruned = if self.settings.auto_cleanup {
            retention::prune_logged(&self.id, &mut self.history, &self.settings)
        } else {
            None
        };

        self.last_updated = Utc::now();
        IngestSummary { added, pruned }
    }

    pub fn commit(&mut self, commit: CalculationCommit) {
        self.state.cached_iob = Some(commit.iob);
        self.state.cached_meal = Some(commit.meal);
        self.state.last_calculation = Some(commit.last_calculation);
        self.last_updated = Utc::now();
    }

    /// The temp basal running at `now`, or the baseline with zero duration.
    pub fn active_temp(&self, now: &DateTime<Utc>, baseline_rate: f64) -> TempBasal {
        match &self.state.temp_basal {
            Some(temp) => {
                let remaining = temp.remaining_minutes(now);
                if remaining > 0.0 {
                    TempBasal {
                        duration: remaining,
                        ..temp.clone()
                    }
                } else {
                    TempBasal::baseline(baseline_rate)
                }
            }
            None => TempBasal::baseline(baseline_rate),
        }
    }

    pub fn status(&self) -> PatientStatus {
        let last_glucose = self.history.glucose.first().map(|newest| {
            let trend = match self.history.glucose.get(1) {
                Some(prev) => trend_label(newest.glucose - prev.glucose),
                None => "unknown",
            };
            LastGlucose {
                value: newest.glucose,
                timestamp: newest
                    .timestamp
                    .clone()
                    .or_else(|| time::from_millis(newest.date).map(|t| time::format(&t))),
                trend: newest.direction.clone().unwrap_or_else(|| trend.to_string()),
            }
        });

        PatientStatus {
            patient_id: self.id.clone(),
            last_calculation: self
                .state
                .last_calculation
                .as_ref()
                .map(|c| time::format(&c.timestamp)),
            current_iob: self
                .state
                .cached_iob
                .as_ref()
                .and_then(|iob| iob.first())
                .map(|first| first.iob),
            current_cob: self.state.cached_meal.as_ref().map(|m| m.meal_cob),
            last_glucose,
            current_temp_basal: self.state.temp_basal.clone(),
            history_count: self.history.counts(),
            timestamps: SessionTimestamps {
                created: self.created_at,
                last_updated: self.last_updated,
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastGlucose {
    pub value: f64,
    pub timestamp: Option<String>,
    pub trend: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTimestamps {
    #[serde(with = "time::flexible")]
    pub created: DateTime<Utc>,
    #[serde(with = "time::flexible")]
    pub last_updated: DateTime<Utc>,
}

/// Read-only summary served by the status and list endpoints.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientStatus {
    pub patient_id: PatientId,
    pub last_calculation: Option<String>,
    #[serde(rename = "currentIOB")]
    pub current_iob: Option<f64>,
    #[serde(rename = "currentCOB")]
    pub current_cob: Option<f64>,
    pub last_glucose: Option<LastGlucose>,
    pub current_temp_basal: Option<TempBasal>,
    pub history_count: HistoryCounts,
    pub timestamps: SessionTimestamps,
}
