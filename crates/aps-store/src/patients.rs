use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use aps_core::history::{InitialData, NewData};
use aps_core::{History, PatientId, Profile, ValidationError};

use crate::error::StoreError;
use crate::session::{IngestSummary, PatientSession, PatientStatus};
use crate::settings::SessionSettings;

/// In-memory repository of patient sessions, keyed by id.
///
/// Not internally synchronized; the engine owns it behind a single lock.
#[derive(Debug, Default)]
pub struct PatientStore {
    sessions: HashMap<PatientId, PatientSession>,
}

impl PatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert a session, replacing any existing one wholesale.
    #[instrument(skip(self, profile, initial_data, settings), fields(patient_id = %id))]
    pub fn create_or_replace(
        &mut self,
        id: PatientId,
        profile: Profile,
        initial_data: InitialData,
        settings: SessionSettings,
    ) -> Result<&PatientSession, StoreError> {
        let mut violations = Vec::new();
        if let Err(e) = profile.validate() {
            violations.extend(e.violations);
        }
        if let Err(e) = settings.validate() {
            violations.extend(e.violations);
        }
        ValidationError::check(violations)?;

        let history = History::from(initial_data);
        let counts = history.counts();
        let session = PatientSession::new(id.clone(), profile, history, settings);
        let replaced = self.sessions.insert(id.clone(), session).is_some();

        info!(
            glucose = counts.glucose,
            pump = counts.pump,
            carbs = counts.carbs,
            replaced,
            "patient initialized"
        );
        self.get(&id)
    }

    pub fn exists(&self, id: &PatientId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn get(&self, id: &PatientId) -> Result<&PatientSession, StoreError> {
        self.sessions
            .get(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    pub fn get_mut(&mut self, id: &PatientId) -> Result<&mut PatientSession, StoreError> {
        self.sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))
    }

    /// Removes the session only. Audit files and their name bindings live
    /// elsewhere and survive.
    #[instrument(skip(self), fields(patient_id = %id))]
    pub fn delete(&mut self, id: &PatientId) -> Result<(), StoreError> {
        match self.sessions.remove(id) {
            Some(_) => {
                info!("patient deleted");
                Ok(())
            }
            None => Err(StoreError::NotFound(id.clone())),
        }
    }

    #[instrument(skip(self, data), fields(patient_id = %id))]
    pub fn add_new_data(&mut self, id: &PatientId, data: NewData) -> Result<IngestSummary, StoreError> {
        let session = self.get_mut(id)?;
        let summary = session.ingest(data);
        debug!(added = summary.added.total(), "ingested new data");
        Ok(summary)
    }

    /// Shallow-merge `patch` over the stored profile and re-validate.
    /// On any failure the stored profile is left as it was.
    #[instrument(skip(self, patch), fields(patient_id = %id, keys = patch.len()))]
    pub fn update_profile(
        &mut self,
        id: &PatientId,
        patch: &Map<String, Value>,
    ) -> Result<&Profile, StoreError> {
        let session = self.get_mut(id)?;
        let merged = session
            .profile
            .overlay(patch)
            .map_err(|e| ValidationError::single(format!("profile: {e}")))?;
        merged.validate()?;

        session.profile = merged;
        session.last_updated = chrono::Utc::now();
        info!("profile updated");
        Ok(&session.profile)
    }

    /// Status of every session, ordered by id.
    pub fn list(&self) -> Vec<PatientStatus> {
        let mut ids: Vec<&PatientId> = self.sessions.keys().collect();
        ids.sort();
        ids.into_iter()
            .filter_map(|id| self.sessions.get(id))
            .map(PatientSession::status)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
