//! Accumulates per-property decisions made while taming an environment.
//!
//! The sink is a pure accumulator: recording an observation never touches the
//! heap, so running with tracing enabled or disabled yields the same graph.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::severity::Severity;

/// One decision or anomaly, tied to the path it was observed at.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub status: String,
    pub path: String,
}

#[derive(Debug, Default)]
pub struct DiagnosticsSink {
    entries: Vec<Diagnostic>,
}

impl DiagnosticsSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, severity: Severity, status: impl Into<String>, path: impl Into<String>) {
        let status = status.into();
        let path = path.into();
        match severity {
            Severity::NotIsolated => {
                tracing::warn!(target: "primlock::lockdown", %status, %path, "isolation defect")
            }
            Severity::NewSymptom => {
                tracing::warn!(target: "primlock::lockdown", %status, %path, "unrecognised behaviour")
            }
            Severity::SafeSpecViolation => {
                tracing::debug!(target: "primlock::lockdown", %status, %path, "tolerated deviation")
            }
            Severity::Safe => {
                tracing::trace!(target: "primlock::lockdown", %status, %path, "handled")
            }
        }
        self.entries.push(Diagnostic { severity, status, path });
    }

    pub fn entries(&self) -> &[Diagnostic] {
        &self.entries
    }

    pub fn max_severity(&self) -> Severity {
        self.entries
            .iter()
            .map(|entry| entry.severity)
            .max()
            .unwrap_or(Severity::Safe)
    }

    pub fn into_report(self, threshold: Severity) -> LockdownReport {
        LockdownReport::from_entries(self.entries, threshold)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub total: usize,
    pub not_isolated: usize,
    pub new_symptom: usize,
    pub spec_violation: usize,
    pub safe: usize,
}

fn summary_from_entries(entries: &[Diagnostic]) -> Summary {
    let mut summary = Summary { total: entries.len(), not_isolated: 0, new_symptom: 0, spec_violation: 0, safe: 0 };
    for entry in entries {
        match entry.severity {
            Severity::NotIsolated => summary.not_isolated += 1,
            Severity::NewSymptom => summary.new_symptom += 1,
            Severity::SafeSpecViolation => summary.spec_violation += 1,
            Severity::Safe => summary.safe += 1,
        }
    }
    summary
}

/// Final verdict of a lockdown pass.
///
/// `ok` means every recorded severity stayed at or below the configured
/// threshold. Entries are also grouped by status string so repeated outcomes
/// ("Deleted" at forty paths) read as one line.
#[derive(Debug, Clone, Serialize)]
pub struct LockdownReport {
    pub ok: bool,
    pub max_severity: Severity,
    pub threshold: Severity,
    pub summary: Summary,
    pub entries: Vec<Diagnostic>,
    pub grouped: BTreeMap<String, Vec<String>>,
}

impl LockdownReport {
    pub fn from_entries(entries: Vec<Diagnostic>, threshold: Severity) -> Self {
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for entry in &entries {
            grouped.entry(entry.status.clone()).or_default().push(entry.path.clone());
        }
        let summary = summary_from_entries(&entries);
        let max_severity = entries.iter().map(|entry| entry.severity).max().unwrap_or(Severity::Safe);
        Self { ok: max_severity <= threshold, max_severity, threshold, summary, entries, grouped }
    }

    /// Entries recorded at exactly this path, in recording order.
    pub fn at_path<'a>(&'a self, path: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.entries.iter().filter(move |entry| entry.path == path)
    }

    /// Entries carrying this status, in recording order.
    pub fn with_status<'a>(&'a self, status: &'a str) -> impl Iterator<Item = &'a Diagnostic> {
        self.entries.iter().filter(move |entry| entry.status == status)
    }

    pub fn render_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn render_human(&self) -> String {
        use std::fmt::Write;
        let mut out = String::new();
        let verdict = if self.ok { "locked" } else { "not locked" };
        let _ = writeln!(out, "Lockdown {verdict}: worst {} against threshold {}", self.max_severity, self.threshold);
        let _ = writeln!(
            out,
            "Decisions: {} (not-isolated {}, new-symptom {}, spec-violation {}, safe {})",
            self.summary.total,
            self.summary.not_isolated,
            self.summary.new_symptom,
            self.summary.spec_violation,
            self.summary.safe
        );
        for (status, paths) in &self.grouped {
            let _ = writeln!(out, "  {} ({})", status, paths.len());
            for path in paths {
                let _ = writeln!(out, "    - {path}");
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verdict_is_max_severity_against_threshold() {
        let mut sink = DiagnosticsSink::new();
        sink.record(Severity::Safe, "Deleted", "<root>.a");
        sink.record(Severity::SafeSpecViolation, "Strict delete returned false rather than throwing", "<root>.b");
        assert_eq!(sink.max_severity(), Severity::SafeSpecViolation);
        let report = sink.into_report(Severity::SafeSpecViolation);
        assert!(report.ok);
        assert_eq!(report.summary.total, 2);

        let mut sink = DiagnosticsSink::new();
        sink.record(Severity::Safe, "Deleted", "<root>.a");
        sink.record(Severity::NotIsolated, "Bounced back", "<root>.b");
        let report = sink.into_report(Severity::SafeSpecViolation);
        assert!(!report.ok);
        assert_eq!(report.max_severity, Severity::NotIsolated);
    }

    #[test]
    fn grouping_collects_paths_under_status() {
        let mut sink = DiagnosticsSink::new();
        sink.record(Severity::Safe, "Deleted", "<root>.x");
        sink.record(Severity::Safe, "Deleted", "<root>.y");
        sink.record(Severity::Safe, "Frozen harmless", "<root>.z");
        let report = sink.into_report(Severity::Safe);
        assert_eq!(report.grouped["Deleted"], vec!["<root>.x".to_string(), "<root>.y".to_string()]);
        assert_eq!(report.grouped["Frozen harmless"].len(), 1);
        let rendered = report.render_human();
        if !rendered.contains("Deleted (2)") {
            panic!("unexpected rendering: {rendered}");
        }
        let encoded = report.render_json().expect("encode report");
        if !encoded.contains("\"max_severity\": \"Safe\"") {
            panic!("unexpected json: {encoded}");
        }
    }

    #[test]
    fn empty_sink_is_safe() {
        let sink = DiagnosticsSink::new();
        assert_eq!(sink.max_severity(), Severity::Safe);
        let report = sink.into_report(Severity::Safe);
        assert!(report.ok);
        assert!(report.entries.is_empty());
    }
}
