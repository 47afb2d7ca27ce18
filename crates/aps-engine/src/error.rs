use aps_core::{CollaboratorError, PatientId, ValidationError};
use aps_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    #[error("no glucose data available for patient {0}")]
    MissingGlucose(PatientId),

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("unknown template: {0}")]
    UnknownTemplate(String),
}

impl EngineError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(StoreError::NotFound(_)))
    }

    /// Violations for errors the caller can fix by changing the request.
    pub fn violations(&self) -> Option<&[String]> {
        match self {
            Self::Validation(v) | Self::Store(StoreError::Validation(v)) => Some(&v.violations),
            _ => None,
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Store(StoreError::NotFound(_)) => "not_found",
            Self::Store(StoreError::Validation(_)) | Self::Validation(_) => "validation",
            Self::Store(_) => "store",
            Self::Collaborator(e) => e.error_kind(),
            Self::MissingGlucose(_) => "missing_glucose",
            Self::UnknownScenario(_) | Self::UnknownTemplate(_) => "unknown_name",
        }
    }
}
