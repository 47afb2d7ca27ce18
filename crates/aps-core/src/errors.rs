/// Every constraint a profile or request violated, collected in one pass.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("validation failed: {}", .violations.join("; "))]
pub struct ValidationError {
    pub violations: Vec<String>,
}

impl ValidationError {
    pub fn new(violations: Vec<String>) -> Self {
        Self { violations }
    }

    pub fn single(violation: impl Into<String>) -> Self {
        Self {
            violations: vec![violation.into()],
        }
    }

    /// `Ok(())` when nothing was violated.
    pub fn check(violations: Vec<String>) -> Result<(), Self> {
        if violations.is_empty() {
            Ok(())
        } else {
            Err(Self { violations })
        }
    }
}

/// Failure raised by an external calculation collaborator.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("{stage} failed: {message}")]
    Failed { stage: &'static str, message: String },

    /// The decision collaborator answered with an explicit `error` field.
    #[error("decision rejected: {0}")]
    Rejected(String),
}

impl CollaboratorError {
    pub fn failed(stage: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            stage,
            message: message.into(),
        }
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "collaborator_failed",
            Self::Rejected(_) => "decision_rejected",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_passes_when_empty() {
        assert!(ValidationError::check(Vec::new()).is_ok());
    }

    #[test]
    fn check_collects_all_violations() {
        let err = ValidationError::check(vec!["a missing".into(), "b too small".into()]).unwrap_err();
        assert_eq!(err.violations.len(), 2);
        assert_eq!(err.to_string(), "validation failed: a missing; b too small");
    }

    #[test]
    fn collaborator_error_display() {
        let err = CollaboratorError::failed("iob", "bad history");
        assert_eq!(err.to_string(), "iob failed: bad history");
        assert_eq!(err.error_kind(), "collaborator_failed");
        assert_eq!(CollaboratorError::Rejected("x".into()).error_kind(), "decision_rejected");
    }
}
