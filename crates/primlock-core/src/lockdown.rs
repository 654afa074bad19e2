//! The one-shot pass that turns an open environment into a confined one.
//!
//! Order matters here. The ambient evaluation entry points are replaced
//! with their safe equivalents and the vat surface is installed first, so
//! the permit walk governs the world confined code will actually see. Then
//! the graph is registered, cleaned, mirrored into the shared imports,
//! pinned read-only, deep-frozen, and audited. Only a verdict at or below
//! the configured threshold unlocks evaluation; anything worse leaves the
//! evaluator refusing every request, with the report explaining why.

use std::collections::BTreeMap;

use primlock_heap::{Heap, ObjId, PropertyDescriptor, Value};

use crate::cleaner;
use crate::collab::{Extensions, NoExtensions, SourceChecks, StrictSourceChecks};
use crate::defender;
use crate::diagnostics::{DiagnosticsSink, LockdownReport};
use crate::error::LockdownError;
use crate::evaluator::{install_vat_surface, EvalCore, EvalOptions, Vat};
use crate::permit::Permit;
use crate::registrar::Registrar;
use crate::severity::Severity;

/// Name under which the capability surface is published on the root.
pub const VAT_NAME: &str = "vat";

#[derive(Debug, Clone)]
pub struct LockdownConfig {
    /// Worst severity that still counts as a successful pass.
    pub threshold: Severity,
    pub options: EvalOptions,
    pub source: StrictSourceChecks,
}

impl Default for LockdownConfig {
    fn default() -> Self {
        Self {
            threshold: Severity::SafeSpecViolation,
            options: EvalOptions::default(),
            source: StrictSourceChecks::default(),
        }
    }
}

#[derive(Debug)]
pub struct LockdownOutcome {
    pub vat: Vat,
    pub report: LockdownReport,
}

pub fn lockdown(
    heap: &mut Heap,
    permits: &Permit,
    config: LockdownConfig,
) -> Result<LockdownOutcome, LockdownError> {
    let checks = Box::new(config.source.clone());
    lockdown_with(heap, permits, config, checks, &NoExtensions)
}

pub fn lockdown_with(
    heap: &mut Heap,
    permits: &Permit,
    config: LockdownConfig,
    checks: Box<dyn SourceChecks>,
    extensions: &dyn Extensions,
) -> Result<LockdownOutcome, LockdownError> {
    let pass_span = tracing::info_span!("lockdown", threshold = %config.threshold);
    let _pass_guard = pass_span.enter();
    tracing::info!(target: "primlock::lockdown", "beginning lockdown pass");
    let embedder_map = permits.children().ok_or(LockdownError::RootNotSubtree)?;
    let global = heap.global();
    let mut sink = DiagnosticsSink::new();

    // Safe evaluator and capability surface, installed before the walk so
    // the permits govern the replacements rather than the ambient originals.
    let shared_imports = heap.alloc_proto_less();
    let core = EvalCore::new(shared_imports, checks, config.options.clone());
    let extra = extensions.extend(heap).map_err(LockdownError::Extensions)?;
    let extension_names: Vec<String> = extra.iter().map(|(name, _)| name.clone()).collect();
    let surface = install_vat_surface(heap, &core, extra)?;
    heap.set(global, "eval", Value::Obj(surface.eval_fn))?;
    heap.set(global, "Function", Value::Obj(surface.function_fn))?;
    heap.set(global, VAT_NAME, Value::Obj(surface.vat))?;

    let merged = merged_permits(embedder_map, &extension_names)?;
    let registrar = Registrar::build(heap, global, &merged, &mut sink)?;
    let visited = cleaner::clean(heap, global, &registrar, &mut sink)?;

    mirror_shared_imports(heap, global, shared_imports, &merged, &mut sink);
    pin_root_properties(heap, global, &mut sink);

    let defense_roots = [
        ("<root>".to_string(), global),
        ("<imports>".to_string(), shared_imports),
        ("<vat>".to_string(), surface.vat),
        ("[[ThrowTypeError]]".to_string(), heap.intrinsics().throw_type_error),
    ];
    defender::defend(heap, &defense_roots)?;

    audit_ambient_roots(heap, &visited, &mut sink);

    let report = sink.into_report(config.threshold);
    if report.ok {
        core.lock();
        tracing::info!(target: "primlock::lockdown", worst = %report.max_severity, "environment locked");
    } else {
        tracing::warn!(
            target: "primlock::lockdown",
            worst = %report.max_severity,
            "lockdown verdict exceeded threshold; evaluation stays disabled"
        );
    }
    Ok(LockdownOutcome { vat: Vat::new(core), report })
}

/// The grants every pass carries for the runtime's own surface, with the
/// embedder's grants merged in. Rebinding a reserved root name is refused
/// rather than silently resolved.
fn merged_permits(
    embedder: &BTreeMap<String, Permit>,
    extension_names: &[String],
) -> Result<Permit, LockdownError> {
    let object_prototype = Permit::subtree([
        ("toString", Permit::AllowAsIs),
        ("valueOf", Permit::AllowAsIs),
        ("hasOwnProperty", Permit::AllowAsIs),
        ("isPrototypeOf", Permit::AllowAsIs),
    ]);
    let object = Permit::subtree([
        ("prototype", object_prototype),
        ("create", Permit::AllowAsIs),
        ("freeze", Permit::AllowAsIs),
        ("isFrozen", Permit::AllowAsIs),
        ("getPrototypeOf", Permit::AllowAsIs),
        ("defineProperty", Permit::AllowAsIs),
    ]);
    let function = Permit::subtree([(
        "prototype",
        Permit::subtree([("call", Permit::AllowAsIs), ("toString", Permit::AllowAsIs)]),
    )]);
    let mut vat_map: BTreeMap<String, Permit> = [
        "compileExpr",
        "confine",
        "compileModule",
        "eval",
        "Function",
        "def",
        "Nat",
        "log",
        "is",
        "constFunc",
        "makeImports",
        "copyToImports",
        "sharedImports",
    ]
    .into_iter()
    .map(|name| (name.to_string(), Permit::AllowAsIs))
    .collect();
    for name in extension_names {
        vat_map.insert(name.clone(), Permit::AllowAsIs);
    }

    let mut root: BTreeMap<String, Permit> = BTreeMap::new();
    root.insert("Object".to_string(), object);
    root.insert("Function".to_string(), function);
    root.insert("eval".to_string(), Permit::AllowAsIs);
    root.insert("undefined".to_string(), Permit::AllowAsIs);
    root.insert("NaN".to_string(), Permit::AllowAsIs);
    root.insert("Infinity".to_string(), Permit::AllowAsIs);
    root.insert(VAT_NAME.to_string(), Permit::Subtree(vat_map));

    for (name, permit) in embedder {
        if root.contains_key(name) {
            return Err(LockdownError::PermitCollision { name: name.clone() });
        }
        root.insert(name.clone(), permit.clone());
    }
    Ok(Permit::Subtree(root))
}

/// Copies the surviving root bindings into the shared import record as
/// frozen data, so every confined program resolves them without touching
/// the root itself.
fn mirror_shared_imports(
    heap: &mut Heap,
    global: ObjId,
    shared_imports: ObjId,
    merged: &Permit,
    sink: &mut DiagnosticsSink,
) {
    let Some(map) = merged.children() else { return };
    for name in map.keys() {
        if !heap.has_own(global, name) {
            continue;
        }
        let value = match heap.get(global, name) {
            Ok(value) => value,
            Err(err) => {
                sink.record(
                    Severity::NewSymptom,
                    format!("Unreadable for shared imports: {err}"),
                    format!("<root>.{name}"),
                );
                continue;
            }
        };
        if let Err(err) = heap.define_property(
            shared_imports,
            name,
            PropertyDescriptor::frozen_data(value),
        ) {
            sink.record(
                Severity::NotIsolated,
                format!("Shared import rejected: {err}"),
                format!("<root>.{name}"),
            );
        }
    }
}

/// Pins every surviving root binding in place. A root that lets a binding
/// stay writable is an open channel between programs, so refusals are
/// verdict-relevant.
fn pin_root_properties(heap: &mut Heap, global: ObjId, sink: &mut DiagnosticsSink) {
    let names = match heap.own_property_names(global) {
        Ok(names) => names,
        Err(err) => {
            sink.record(Severity::NewSymptom, format!("Enumeration failed with {err}"), "<root>");
            Vec::new()
        }
    };
    for name in names {
        let path = format!("<root>.{name}");
        let descriptor = match heap.own_descriptor(global, &name) {
            Ok(Some(descriptor)) => descriptor,
            Ok(None) => continue,
            Err(err) => {
                sink.record(
                    Severity::NewSymptom,
                    format!("Descriptor lookup failed with {err}"),
                    &path,
                );
                continue;
            }
        };
        let pinned = match descriptor {
            PropertyDescriptor::Data { value, enumerable, .. } => PropertyDescriptor::Data {
                value,
                writable: false,
                enumerable,
                configurable: false,
            },
            other => other.with_configurable(false),
        };
        if let Err(err) = heap.define_property(global, &name, pinned) {
            sink.record(Severity::NotIsolated, format!("Cannot be made readonly: {err}"), &path);
        }
    }
}

/// Post-defense check on the objects every program can reach regardless of
/// endowments. The delegation roots must have been walked and everything
/// must have ended up frozen; the shared thrower is only reachable through
/// function reflection, so it is audited for frozenness alone.
fn audit_ambient_roots(
    heap: &Heap,
    visited: &std::collections::HashSet<ObjId>,
    sink: &mut DiagnosticsSink,
) {
    for (name, id) in heap.ambient_roots() {
        let expect_visited = name != "[[ThrowTypeError]]";
        if expect_visited && !visited.contains(&id) {
            sink.record(Severity::NotIsolated, "Not cleaned", name);
        }
        if !heap.is_frozen(id) {
            sink.record(Severity::NotIsolated, "Not frozen", name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_permits_lock_the_standard_environment() {
        let mut heap = Heap::new();
        let permits = Permit::subtree([]);
        let outcome =
            lockdown(&mut heap, &permits, LockdownConfig::default()).expect("lockdown runs");
        if !outcome.report.ok {
            panic!("expected clean verdict:\n{}", outcome.report.render_human());
        }
        assert!(outcome.vat.is_locked());
        for (_, id) in heap.ambient_roots() {
            assert!(heap.is_frozen(id));
        }
        assert!(heap.is_frozen(heap.global()));
    }

    #[test]
    fn reserved_root_names_cannot_be_rebound() {
        let mut heap = Heap::new();
        let permits = Permit::subtree([("Object", Permit::AllowAsIs)]);
        match lockdown(&mut heap, &permits, LockdownConfig::default()) {
            Err(LockdownError::PermitCollision { name }) => assert_eq!(name, "Object"),
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected permit collision"),
        }
    }

    #[test]
    fn non_subtree_permit_root_is_rejected() {
        let mut heap = Heap::new();
        match lockdown(&mut heap, &Permit::AllowAsIs, LockdownConfig::default()) {
            Err(LockdownError::RootNotSubtree) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected rejection of a leaf permit root"),
        }
    }
}
