//! Pluggable collaborators a lockdown pass is parameterised over.
//!
//! Source admission and free-name discovery are policy, not mechanism, so
//! embedders can swap them. The defaults parse with the runtime's own
//! grammar and reject anything the grammar would later reject anyway, which
//! keeps verification and execution from drifting apart.

use std::sync::OnceLock;

use primlock_heap::{Heap, RuntimeError, Value};
use regex::Regex;

/// Admission control for guest source text.
///
/// Both methods verify the text and return every free name the program can
/// reach for. Returning a superset of the truly-free names is acceptable;
/// missing one is not, since unlisted names would fall through to ambient
/// scope.
pub trait SourceChecks {
    fn expression_names(&self, heap: &Heap, src: &str) -> Result<Vec<String>, RuntimeError>;
    fn body_names(&self, heap: &Heap, src: &str) -> Result<Vec<String>, RuntimeError>;
}

/// Default admission policy: size cap, ASCII-only alphabet, then a full
/// parse with exact free-name extraction from the syntax tree.
#[derive(Debug, Clone)]
pub struct StrictSourceChecks {
    pub ascii_only: bool,
    pub max_source_bytes: usize,
}

impl Default for StrictSourceChecks {
    fn default() -> Self {
        Self { ascii_only: true, max_source_bytes: 1 << 20 }
    }
}

fn non_ascii_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^\x00-\x7F]").ok()).as_ref()
}

impl StrictSourceChecks {
    fn prescreen(&self, src: &str) -> Result<(), RuntimeError> {
        if src.len() > self.max_source_bytes {
            return Err(RuntimeError::eval_error(format!(
                "source too large: {} bytes against a cap of {}",
                src.len(),
                self.max_source_bytes
            )));
        }
        if self.ascii_only {
            let Some(pattern) = non_ascii_pattern() else {
                return Err(RuntimeError::eval_error("source alphabet check unavailable"));
            };
            if let Some(found) = pattern.find(src) {
                return Err(RuntimeError::eval_error(format!(
                    "unexpected characters in source at byte {}",
                    found.start()
                )));
            }
        }
        Ok(())
    }
}

impl SourceChecks for StrictSourceChecks {
    fn expression_names(&self, heap: &Heap, src: &str) -> Result<Vec<String>, RuntimeError> {
        self.prescreen(src)?;
        let program = heap.compile_expression(src)?;
        Ok(program.free_names())
    }

    fn body_names(&self, heap: &Heap, src: &str) -> Result<Vec<String>, RuntimeError> {
        self.prescreen(src)?;
        let program = heap.compile_body(src)?;
        Ok(program.free_names())
    }
}

/// Extra capabilities installed on the vat surface before the graph is
/// cleaned.
///
/// Entries are governed like any other vat property, so an extension that
/// hands out a mutable object will be flagged or neutralised during the
/// pass. Providers should defend what they export.
pub trait Extensions {
    fn extend(&self, heap: &mut Heap) -> anyhow::Result<Vec<(String, Value)>>;
}

/// The usual case: no embedder extensions.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtensions;

impl Extensions for NoExtensions {
    fn extend(&self, _heap: &mut Heap) -> anyhow::Result<Vec<(String, Value)>> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_ascii_source_is_rejected_before_parsing() {
        let heap = Heap::new();
        let checks = StrictSourceChecks::default();
        match checks.expression_names(&heap, "x + caf\u{e9}") {
            Err(RuntimeError::Eval(msg)) => {
                if !msg.contains("unexpected characters") {
                    panic!("unexpected message: {msg}");
                }
            }
            other => panic!("expected eval error, got {other:?}"),
        }
    }

    #[test]
    fn oversized_source_is_rejected() {
        let heap = Heap::new();
        let checks = StrictSourceChecks { ascii_only: true, max_source_bytes: 8 };
        match checks.expression_names(&heap, "aaaa + bbbb + cccc") {
            Err(RuntimeError::Eval(msg)) => {
                if !msg.contains("source too large") {
                    panic!("unexpected message: {msg}");
                }
            }
            other => panic!("expected eval error, got {other:?}"),
        }
    }

    #[test]
    fn free_names_come_from_the_syntax_tree() {
        let heap = Heap::new();
        let checks = StrictSourceChecks::default();
        let names = checks
            .expression_names(&heap, "f(x) + (function (y) { return y + z; })(1)")
            .expect("names");
        assert_eq!(names, vec!["f".to_string(), "x".to_string(), "z".to_string()]);
    }
}
