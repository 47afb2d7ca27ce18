//! Read-side slicing of a patient's history for the history endpoint.
//!
//! Unlike retention, this window is relative to the wall clock the caller
//! passes in.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use aps_core::history::{CarbEntry, GlucoseSample, History, PumpEvent, Timestamped};
use aps_core::ValidationError;

pub const DEFAULT_HOURS: f64 = 24.0;
pub const DEFAULT_LIMIT: usize = 100;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HistoryKind {
    Glucose,
    Pump,
    Carbs,
    #[default]
    All,
}

#[derive(Clone, Copy, Debug, PartialEq, Deserialize)]
pub struct HistoryQuery {
    #[serde(default, rename = "type")]
    pub kind: HistoryKind,
    #[serde(default = "default_hours")]
    pub hours: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_hours() -> f64 {
    DEFAULT_HOURS
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

impl Default for HistoryQuery {
    fn default() -> Self {
        Self {
            kind: HistoryKind::All,
            hours: DEFAULT_HOURS,
            limit: DEFAULT_LIMIT,
        }
    }
}

/// Streams not asked for are left out of the response entirely.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct HistorySlice {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub glucose: Option<Vec<GlucoseSample>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pump: Option<Vec<PumpEvent>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub carbs: Option<Vec<CarbEntry>>,
}

impl HistoryQuery {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut violations = Vec::new();
        if !self.hours.is_finite() || self.hours < 0.0 {
            violations.push(format!("hours must be a non-negative number (got {})", self.hours));
        }
        ValidationError::check(violations)
    }

    /// Newest-first items from the last `hours` before `now`, at most `limit`
    /// per stream.
    pub fn slice(&self, history: &History, now: DateTime<Utc>) -> HistorySlice {
        // `as` saturates, so only the subtraction can overflow
        let span_ms = (self.hours.max(0.0) * 3_600_000.0) as i64;
        let since = now.timestamp_millis().saturating_sub(span_ms);
        let wants = |kind: HistoryKind| self.kind == HistoryKind::All || self.kind == kind;

        HistorySlice {
            glucose: wants(HistoryKind::Glucose).then(|| window(&history.glucose, since, self.limit)),
            pump: wants(HistoryKind::Pump).then(|| window(&history.pump, since, self.limit)),
            carbs: wants(HistoryKind::Carbs).then(|| window(&history.carbs, since, self.limit)),
        }
    }
}

fn window<T: Timestamped + Clone>(items: &[T], since_ms: i64, limit: usize) -> Vec<T> {
    items
        .iter()
        .filter(|item| item.ordering_key() >= since_ms)
        .take(limit)
        .cloned()
        .collect()
}
