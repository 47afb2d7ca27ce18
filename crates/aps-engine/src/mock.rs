//! Scripted collaborators for deterministic tests.
//!
//! Every mock counts its calls so tests can assert which stages ran.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use aps_core::collaborators::{
    AutosensInput, DecisionInput, DiagnosticSink, DosingDecision, GlucoseStatusReader,
    IobCalculator, IobInput, MealCalculator, MealInput, SensitivityDetector,
};
use aps_core::history::GlucoseSample;
use aps_core::results::{AutosensResult, GlucoseStatus, IobEstimate, MealResult, Suggestion};
use aps_core::{CollaboratorError, Profile};

use crate::pipeline::Collaborators;
use crate::reference::ClampedBasal;

/// Returns the same pre-programmed response on every call.
pub struct Scripted<T> {
    response: Result<T, CollaboratorError>,
    call_count: AtomicUsize,
}

impl<T: Clone> Scripted<T> {
    pub fn ok(value: T) -> Self {
        Self {
            response: Ok(value),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: CollaboratorError) -> Self {
        Self {
            response: Err(error),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    fn respond(&self) -> Result<T, CollaboratorError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        self.response.clone()
    }
}

impl IobCalculator for Scripted<Vec<IobEstimate>> {
    fn calculate(&self, input: &IobInput<'_>) -> Result<Vec<IobEstimate>, CollaboratorError> {
        // Stamp with the request clock so results look like a real run.
        let mut estimates = self.respond()?;
        if let Some(first) = estimates.first_mut() {
            first.time = input.clock;
        }
        Ok(estimates)
    }
}

impl MealCalculator for Scripted<MealResult> {
    fn calculate(&self, _input: &MealInput<'_>) -> Result<MealResult, CollaboratorError> {
        self.respond()
    }
}

impl SensitivityDetector for Scripted<AutosensResult> {
    fn detect(&self, _input: &AutosensInput<'_>) -> Result<AutosensResult, CollaboratorError> {
        self.respond()
    }
}

/// Reports the newest sample with a flat trend.
#[derive(Default)]
pub struct FlatGlucose {
    call_count: AtomicUsize,
}

impl FlatGlucose {
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }
}

impl GlucoseStatusReader for FlatGlucose {
    fn last_status(&self, glucose: &[GlucoseSample]) -> Option<GlucoseStatus> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        glucose.first().map(|newest| GlucoseStatus {
            glucose: newest.glucose,
            delta: 0.0,
            short_avgdelta: 0.0,
            long_avgdelta: 0.0,
            date: newest.date,
        })
    }
}

/// Decision that returns a fixed suggestion and remembers what it was
/// asked with.
pub struct MockDecision {
    suggestion: Suggestion,
    call_count: AtomicUsize,
    last_profile: Mutex<Option<Profile>>,
    last_now_ms: Mutex<Option<i64>>,
}

impl MockDecision {
    pub fn new(suggestion: Suggestion) -> Self {
        Self {
            suggestion,
            call_count: AtomicUsize::new(0),
            last_profile: Mutex::new(None),
            last_now_ms: Mutex::new(None),
        }
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    pub fn last_profile(&self) -> Option<Profile> {
        self.last_profile.lock().clone()
    }

    pub fn last_now_ms(&self) -> Option<i64> {
        *self.last_now_ms.lock()
    }
}

impl DosingDecision for MockDecision {
    fn decide(
        &self,
        input: &DecisionInput<'_>,
        diagnostics: &mut dyn DiagnosticSink,
    ) -> Result<Suggestion, CollaboratorError> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_profile.lock() = Some(input.profile.clone());
        *self.last_now_ms.lock() = Some(input.now_ms);
        diagnostics.write_line("mock decision");
        Ok(Suggestion {
            bg: Some(input.glucose_status.glucose),
            ..self.suggestion.clone()
        })
    }
}

/// One mock per stage plus the handles tests inspect afterwards.
pub struct MockSet {
    pub iob: Arc<Scripted<Vec<IobEstimate>>>,
    pub meal: Arc<Scripted<MealResult>>,
    pub autosens: Arc<Scripted<AutosensResult>>,
    pub glucose: Arc<FlatGlucose>,
    pub decision: Arc<MockDecision>,
}

impl MockSet {
    pub fn new() -> Self {
        Self {
            iob: Arc::new(Scripted::ok(vec![Self::default_iob()])),
            meal: Arc::new(Scripted::ok(Self::default_meal())),
            autosens: Arc::new(Scripted::ok(AutosensResult {
                ratio: 1.1,
                new_isf: 45.0,
                original_isf: Some(50.0),
            })),
            glucose: Arc::new(FlatGlucose::default()),
            decision: Arc::new(MockDecision::new(Self::default_suggestion())),
        }
    }

    pub fn default_iob() -> IobEstimate {
        IobEstimate {
            iob: 1.5,
            activity: 0.01,
            basal_iob: 0.5,
            bolus_iob: 1.0,
            time: Default::default(),
        }
    }

    pub fn default_meal() -> MealResult {
        MealResult {
            carbs: 20.0,
            meal_cob: 15.0,
            reason: None,
        }
    }

    pub fn default_suggestion() -> Suggestion {
        Suggestion {
            temp: Some("absolute".into()),
            rate: Some(1.2),
            duration: Some(30.0),
            reason: "mock".into(),
            ..Default::default()
        }
    }

    pub fn with_suggestion(mut self, suggestion: Suggestion) -> Self {
        self.decision = Arc::new(MockDecision::new(suggestion));
        self
    }

    pub fn with_iob_error(mut self, error: CollaboratorError) -> Self {
        self.iob = Arc::new(Scripted::failing(error));
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            iob: self.iob.clone(),
            meal: self.meal.clone(),
            autosens: self.autosens.clone(),
            glucose: self.glucose.clone(),
            decision: self.decision.clone(),
            basal: Arc::new(ClampedBasal),
        }
    }
}

impl Default for MockSet {
    fn default() -> Self {
        Self::new()
    }
}
