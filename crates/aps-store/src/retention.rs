//! Sliding retention window anchored to the newest sample on record.
//!
//! The cutoff never looks at the wall clock, so backdated imports and
//! simulated time prune exactly the same way live data does.

use serde::Serialize;
use tracing::info;

use aps_core::history::{History, HistoryCounts, Timestamped};
use aps_core::PatientId;

use crate::settings::SessionSettings;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PruneSummary {
    pub newest_ms: i64,
    pub cutoff_ms: i64,
    pub removed: HistoryCounts,
}

/// Drop every item whose ordering key is older than
/// `newest - window`. Items exactly on the cutoff are kept.
///
/// Returns `None` when all three streams are empty.
pub fn prune(history: &mut History, settings: &SessionSettings) -> Option<PruneSummary> {
    let newest_ms = history.newest_key()?;
    let cutoff_ms = newest_ms - settings.retention_window_ms();

    let removed = HistoryCounts {
        glucose: retain_from(&mut history.glucose, cutoff_ms),
        pump: retain_from(&mut history.pump, cutoff_ms),
        carbs: retain_from(&mut history.carbs, cutoff_ms),
    };

    Some(PruneSummary {
        newest_ms,
        cutoff_ms,
        removed,
    })
}

/// [`prune`] plus the summary log line, emitted only when something went.
pub fn prune_logged(
    patient_id: &PatientId,
    history: &mut History,
    settings: &SessionSettings,
) -> Option<PruneSummary> {
    let summary = prune(history, settings)?;
    if summary.removed.total() > 0 {
        info!(
            patient_id = %patient_id,
            removed_glucose = summary.removed.glucose,
            removed_pump = summary.removed.pump,
            removed_carbs = summary.removed.carbs,
            cutoff_ms = summary.cutoff_ms,
            window_ms = settings.retention_window_ms(),
            "pruned history outside retention window"
        );
    }
    Some(summary)
}

fn retain_from<T: Timestamped>(items: &mut Vec<T>, cutoff_ms: i64) -> usize {
    let before = items.len();
    items.retain(|item| item.ordering_key() >= cutoff_ms);
    before - items.len()
}
