use serde::{Deserialize, Serialize};

/// How badly a single observation undermines isolation.
///
/// Variant order is the comparison order: a report's overall verdict is the
/// maximum severity seen across every recorded decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Severity {
    /// Handled cleanly. The property was removed, replaced, or proven inert.
    Safe,
    /// The host deviated from ideal semantics in a way the standard permits,
    /// and the deviation was contained.
    SafeSpecViolation,
    /// Behaviour we have no rule for. Contained pessimistically, but worth
    /// a human look.
    NewSymptom,
    /// A mutable or authority-bearing channel survived. The environment
    /// cannot be considered confined.
    NotIsolated,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Safe => "safe",
            Severity::SafeSpecViolation => "safe-spec-violation",
            Severity::NewSymptom => "new-symptom",
            Severity::NotIsolated => "not-isolated",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
