//! Call-scoped collection of decision diagnostics.

use tracing::info;

use aps_core::collaborators::DiagnosticSink;
use aps_core::PatientId;

/// Sink handed to the decision collaborator for a single call.
///
/// Each line is forwarded to the `aps::decision` tracing target as it is
/// written and kept in a local buffer. Nothing here is shared between
/// calls.
pub struct DiagnosticCapture<'a> {
    patient_id: &'a PatientId,
    lines: Vec<String>,
}

impl<'a> DiagnosticCapture<'a> {
    pub fn new(patient_id: &'a PatientId) -> Self {
        Self {
            patient_id,
            lines: Vec::new(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// The captured text, one line per write.
    pub fn finish(self) -> String {
        self.lines.join("\n")
    }
}

impl DiagnosticSink for DiagnosticCapture<'_> {
    fn write_line(&mut self, line: &str) {
        info!(target: "aps::decision", patient_id = %self.patient_id, "{line}");
        self.lines.push(line.to_string());
    }
}

/// Run `f` with a fresh capture and return its result together with the
/// captured text. The text is returned whether `f` succeeded or not.
pub fn capture<T>(
    patient_id: &PatientId,
    f: impl FnOnce(&mut dyn DiagnosticSink) -> T,
) -> (T, String) {
    let mut sink = DiagnosticCapture::new(patient_id);
    let out = f(&mut sink);
    (out, sink.finish())
}
