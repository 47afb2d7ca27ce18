//! Built-in patient templates for the test harness.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Map;

use aps_core::history::{GlucoseSample, InitialData};
use aps_core::Profile;
use aps_store::SessionSettings;

use crate::error::EngineError;

/// Seed readings, oldest first, 5 minutes apart. The last one is "now".
const SEED_GLUCOSE: [f64; 5] = [123.0, 121.0, 119.0, 117.0, 115.0];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PatientTemplate {
    pub name: &'static str,
    pub description: &'static str,
    pub profile: Profile,
}

struct Params {
    carb_ratio: f64,
    sens: f64,
    dia: f64,
    min_bg: f64,
    max_bg: f64,
    current_basal: f64,
    max_basal: f64,
    max_iob: f64,
}

fn profile(p: Params) -> Profile {
    Profile {
        carb_ratio: Some(p.carb_ratio),
        sens: Some(p.sens),
        dia: Some(p.dia),
        min_bg: Some(p.min_bg),
        max_bg: Some(p.max_bg),
        current_basal: Some(p.current_basal),
        max_basal: Some(p.max_basal),
        max_iob: Some(p.max_iob),
        basal_profile: None,
        extra: Map::new(),
    }
}

pub fn all() -> Vec<PatientTemplate> {
    vec![
        PatientTemplate {
            name: "adult-standard",
            description: "Typical adult: moderate sensitivity and basal needs",
            profile: profile(Params {
                carb_ratio: 10.0,
                sens: 50.0,
                dia: 4.0,
                min_bg: 100.0,
                max_bg: 120.0,
                current_basal: 1.0,
                max_basal: 3.0,
                max_iob: 3.0,
            }),
        },
        PatientTemplate {
            name: "adolescent-sensitive",
            description: "Insulin-sensitive adolescent: high ISF, low basal",
            profile: profile(Params {
                carb_ratio: 15.0,
                sens: 80.0,
                dia: 4.0,
                min_bg: 100.0,
                max_bg: 130.0,
                current_basal: 0.6,
                max_basal: 2.0,
                max_iob: 2.0,
            }),
        },
        PatientTemplate {
            name: "insulin-resistant",
            description: "Insulin-resistant adult: low ISF, high basal",
            profile: profile(Params {
                carb_ratio: 6.0,
                sens: 25.0,
                dia: 5.0,
                min_bg: 100.0,
                max_bg: 120.0,
                current_basal: 2.0,
                max_basal: 5.0,
                max_iob: 6.0,
            }),
        },
    ]
}

pub fn find(name: &str) -> Result<PatientTemplate, EngineError> {
    all()
        .into_iter()
        .find(|t| t.name == name)
        .ok_or_else(|| EngineError::UnknownTemplate(name.to_string()))
}

impl PatientTemplate {
    /// Seed history ending at `now` with a gentle fall to 115 mg/dL.
    pub fn initial_data(&self, now: DateTime<Utc>) -> InitialData {
        let last = SEED_GLUCOSE.len() as i64 - 1;
        let glucose_history = SEED_GLUCOSE
            .iter()
            .enumerate()
            .map(|(i, value)| {
                let at = now - Duration::minutes((last - i as i64) * 5);
                GlucoseSample::new(at, *value, "template")
            })
            .collect();
        InitialData {
            glucose_history,
            ..Default::default()
        }
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings::default()
    }
}
