//! Append-only per-patient calculation logs.
//!
//! Each patient id is bound to one file name the first time it is logged
//! and keeps that name for the life of the process, even across delete and
//! re-initialize. Writes are best-effort: a failure is logged and swallowed.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::{DashMap, DashSet};
use serde::Serialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use aps_core::{time, PatientId, RunId};

use crate::error::StoreError;

/// One calculation as written to the audit file.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    pub run_id: RunId,
    pub patient_id: PatientId,
    #[serde(with = "time::flexible")]
    pub timestamp: DateTime<Utc>,
    pub request: Value,
    pub response: Value,
    pub diagnostics: String,
}

pub struct AuditLogger {
    dir: PathBuf,
    bindings: DashMap<PatientId, PathBuf>,
    /// Every path handed out, so distinct ids with the same stem never share
    /// a file even before either has been written.
    claimed: DashSet<PathBuf>,
}

impl AuditLogger {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            bindings: DashMap::new(),
            claimed: DashSet::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The file already bound to `id`, if it has been logged before.
    pub fn bound_path(&self, id: &PatientId) -> Option<PathBuf> {
        self.bindings.get(id).map(|p| p.value().clone())
    }

    /// Bound file for `id`, choosing one on first use.
    pub fn resolve(&self, id: &PatientId) -> PathBuf {
        self.bindings
            .entry(id.clone())
            .or_insert_with(|| self.claim_path(id, Utc::now()))
            .value()
            .clone()
    }

    /// Canonical name if free, else a timestamp-suffixed one, else the
    /// suffixed name with a counter. A name is free when it is neither on
    /// disk nor claimed by another id.
    fn claim_path(&self, id: &PatientId, now: DateTime<Utc>) -> PathBuf {
        let stem = id.file_stem();
        let suffix = now.format("%Y%m%d_%H%M%S_%3f");
        let mut attempt = 0u32;
        loop {
            let name = match attempt {
                0 => format!("{stem}_calculations.log"),
                1 => format!("{stem}_calculations_{suffix}.log"),
                n => format!("{stem}_calculations_{suffix}_{}.log", n - 1),
            };
            let path = self.dir.join(name);
            if !path.exists() && self.claimed.insert(path.clone()) {
                return path;
            }
            attempt += 1;
        }
    }

    /// Append one record. Never fails the caller.
    pub async fn append_record(&self, record: &AuditRecord) {
        let path = self.resolve(&record.patient_id);
        match write_block(&path, record).await {
            Ok(()) => debug!(
                patient_id = %record.patient_id,
                run_id = %record.run_id,
                path = %path.display(),
                "audit record appended"
            ),
            Err(e) => warn!(
                patient_id = %record.patient_id,
                run_id = %record.run_id,
                path = %path.display(),
                error = %e,
                "failed to append audit record"
            ),
        }
    }
}

pub(crate) fn format_block(record: &AuditRecord) -> Result<String, StoreError> {
    let body = serde_json::to_string_pretty(record)?;
    Ok(format!(
        "===== CALCULATION {} {} =====\n{}\n----- DIAGNOSTICS -----\n{}\n===== END =====\n\n",
        record.run_id,
        time::format(&record.timestamp),
        body,
        record.diagnostics.trim_end(),
    ))
}

async fn write_block(path: &Path, record: &AuditRecord) -> Result<(), StoreError> {
    let block = format_block(record)?;
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(block.as_bytes()).await?;
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, n: u32) -> AuditRecord {
        AuditRecord {
            run_id: RunId::new(),
            patient_id: PatientId::from_raw(id),
            timestamp: time::from_millis(1_700_000_000_000).unwrap(),
            request: json!({"step": n}),
            response: json!({"suggestion": {"rate": 1.0}}),
            diagnostics: format!("line {n}\n"),
        }
    }

    #[tokio::test]
    async fn same_file_across_calls() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path());
        logger.append_record(&record("p1", 1)).await;
        logger.append_record(&record("p1", 2)).await;

        let path = logger.bound_path(&PatientId::from_raw("p1")).unwrap();
        assert_eq!(path, dir.path().join("p1_calculations.log"));
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.matches("===== CALCULATION").count(), 2);
        assert!(text.contains("line 1"));
        assert!(text.contains("line 2"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn existing_canonical_file_gets_suffixed_once() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("p1_calculations.log");
        std::fs::write(&canonical, "from a previous run\n").unwrap();

        let logger = AuditLogger::new(dir.path());
        logger.append_record(&record("p1", 1)).await;
        let first = logger.bound_path(&PatientId::from_raw("p1")).unwrap();
        assert_ne!(first, canonical);
        let name = first.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("p1_calculations_"));
        assert!(name.ends_with(".log"));

        logger.append_record(&record("p1", 2)).await;
        assert_eq!(logger.bound_path(&PatientId::from_raw("p1")).unwrap(), first);
        assert_eq!(std::fs::read_to_string(&canonical).unwrap(), "from a previous run\n");
        let text = std::fs::read_to_string(&first).unwrap();
        assert_eq!(text.matches("===== END =====").count(), 2);
    }

    #[test]
    fn ids_with_the_same_stem_get_distinct_files() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path());
        // both bound before either file exists
        let a = logger.resolve(&PatientId::from_raw("a b"));
        let b = logger.resolve(&PatientId::from_raw("a/b"));
        assert_eq!(a, dir.path().join("a_b_calculations.log"));
        assert_ne!(a, b);

        // a third id needing the same suffix in the same millisecond
        let now = Utc::now();
        let c = logger.claim_path(&PatientId::from_raw("a:b"), now);
        let d = logger.claim_path(&PatientId::from_raw("a?b"), now);
        assert_ne!(c, d);
        assert_ne!(c, a);
        assert_ne!(d, b);
        assert_eq!(logger.resolve(&PatientId::from_raw("a b")), a);
    }

    #[tokio::test]
    async fn ids_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path());
        logger.append_record(&record("../etc/passwd", 1)).await;
        let path = logger.bound_path(&PatientId::from_raw("../etc/passwd")).unwrap();
        assert_eq!(path.parent().unwrap(), dir.path());
        assert!(path.exists());
    }

    #[tokio::test]
    async fn write_failure_is_swallowed() {
        let dir = tempfile::tempdir().unwrap();
        let logger = AuditLogger::new(dir.path().join("missing").join("nested"));
        logger.append_record(&record("p1", 1)).await;
        let path = logger.bound_path(&PatientId::from_raw("p1")).unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn block_layout() {
        let block = format_block(&record("p1", 7)).unwrap();
        assert!(block.starts_with("===== CALCULATION calc_"));
        assert!(block.contains("\"patientId\": \"p1\""));
        assert!(block.contains("----- DIAGNOSTICS -----\nline 7\n===== END ====="));
    }
}
