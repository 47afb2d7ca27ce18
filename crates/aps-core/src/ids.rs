use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

macro_rules! branded_id {
    ($name:ident, $prefix:expr) => {
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!("{}_{}", $prefix, Uuid::now_v7()))
            }

            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;
            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_owned()))
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

// Patient ids come from the caller (URL path segment).
branded_id!(PatientId, "pat");
branded_id!(RunId, "calc");

impl PatientId {
    /// Filesystem-safe rendering of the id.
    ///
    /// Anything outside `[A-Za-z0-9._-]` becomes `_`, and a leading dot is
    /// replaced so the result can never name a hidden or parent directory.
    pub fn file_stem(&self) -> String {
        let mut stem: String = self
            .0
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if stem.starts_with('.') {
            stem.replace_range(0..1, "_");
        }
        if stem.is_empty() {
            stem.push('_');
        }
        stem
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patient_id_has_prefix() {
        let id = PatientId::new();
        assert!(id.as_str().starts_with("pat_"), "got: {id}");
    }

    #[test]
    fn run_id_has_prefix() {
        let id = RunId::new();
        assert!(id.as_str().starts_with("calc_"), "got: {id}");
    }

    #[test]
    fn ids_are_unique() {
        let a = RunId::new();
        let b = RunId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn from_raw_preserves_value() {
        let id = PatientId::from_raw("example-patient");
        assert_eq!(id.as_str(), "example-patient");
        assert_eq!(id.to_string(), "example-patient");
    }

    #[test]
    fn serde_is_transparent() {
        let id = PatientId::from_raw("p1");
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"p1\"");
    }

    #[test]
    fn file_stem_keeps_safe_ids() {
        assert_eq!(PatientId::from_raw("patient-01_a.b").file_stem(), "patient-01_a.b");
    }

    #[test]
    fn file_stem_neutralizes_paths() {
        assert_eq!(PatientId::from_raw("../etc/passwd").file_stem(), "_._etc_passwd");
        assert_eq!(PatientId::from_raw("a b/c").file_stem(), "a_b_c");
        assert_eq!(PatientId::from_raw("").file_stem(), "_");
    }
}
