//! Values produced by the calculation stages.
//!
//! Field names follow the oref0 wire shapes so existing loop clients can
//! read responses without translation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::time;

/// A temporary basal override.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TempBasal {
    /// U/h.
    pub rate: f64,
    /// Minutes.
    pub duration: f64,
    #[serde(default = "absolute")]
    pub temp: String,
    #[serde(
        default,
        with = "time::flexible_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub started_at: Option<DateTime<Utc>>,
}

fn absolute() -> String {
    "absolute".to_string()
}

impl TempBasal {
    /// No override running: the baseline rate with zero duration.
    pub fn baseline(rate: f64) -> Self {
        Self {
            rate,
            duration: 0.0,
            temp: absolute(),
            started_at: None,
        }
    }

    /// Minutes still to run at `now`, never negative.
    pub fn remaining_minutes(&self, now: &DateTime<Utc>) -> f64 {
        match self.started_at {
            Some(start) => {
                let elapsed = (now.timestamp_millis() - start.timestamp_millis()) as f64 / 60_000.0;
                (self.duration - elapsed).max(0.0)
            }
            None => self.duration,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IobEstimate {
    pub iob: f64,
    pub activity: f64,
    #[serde(rename = "basaliob")]
    pub basal_iob: f64,
    #[serde(rename = "bolusiob")]
    pub bolus_iob: f64,
    #[serde(with = "time::flexible")]
    pub time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MealResult {
    pub carbs: f64,
    #[serde(rename = "mealCOB")]
    pub meal_cob: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MealResult {
    /// Zero-carb result that explains why the model was not trusted.
    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            carbs: 0.0,
            meal_cob: 0.0,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AutosensResult {
    pub ratio: f64,
    /// Sensitivity after applying `ratio`.
    #[serde(rename = "newisf")]
    pub new_isf: f64,
    #[serde(rename = "originalisf", default, skip_serializing_if = "Option::is_none")]
    pub original_isf: Option<f64>,
}

impl AutosensResult {
    pub fn neutral(sens: f64) -> Self {
        Self {
            ratio: 1.0,
            new_isf: sens,
            original_isf: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlucoseStatus {
    pub glucose: f64,
    pub delta: f64,
    pub short_avgdelta: f64,
    pub long_avgdelta: f64,
    /// Epoch ms of the reading.
    pub date: i64,
}

impl GlucoseStatus {
    pub fn trend(&self) -> &'static str {
        trend_label(self.delta)
    }
}

/// Coarse direction for a glucose change in mg/dL per 5 minutes.
pub fn trend_label(delta: f64) -> &'static str {
    if delta > 2.0 {
        "rising"
    } else if delta < -2.0 {
        "falling"
    } else {
        "stable"
    }
}

/// The decision collaborator's answer. Either a usable dosing suggestion or
/// a populated `error`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Suggestion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick: Option<String>,
    #[serde(rename = "eventualBG", default, skip_serializing_if = "Option::is_none")]
    pub eventual_bg: Option<f64>,
    #[serde(rename = "targetBG", default, skip_serializing_if = "Option::is_none")]
    pub target_bg: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insulin_req: Option<f64>,
    #[serde(rename = "COB", default, skip_serializing_if = "Option::is_none")]
    pub cob: Option<f64>,
    #[serde(rename = "IOB", default, skip_serializing_if = "Option::is_none")]
    pub iob: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sensitivity_ratio: Option<f64>,
    /// U/h.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate: Option<f64>,
    /// Minutes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    /// Microbolus, units.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<f64>,
    #[serde(default)]
    pub reason: String,
    #[serde(
        default,
        with = "time::flexible_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub deliver_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Suggestion {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Default::default()
        }
    }
}
