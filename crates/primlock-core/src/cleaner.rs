//! Breadth-first sweep that brings an object graph into line with its
//! permits.
//!
//! Every object is visited once. Each own property is resolved to a guard
//! and either kept (its value joining the frontier) or handed to the
//! poisoner. The delegation link is guarded like a property under the
//! reserved name, and objects that promised to be immutable are audited on
//! the way through.

use std::collections::{HashSet, VecDeque};

use primlock_heap::{Heap, ObjId, PropertyDescriptor, RuntimeError, Value};

use crate::diagnostics::DiagnosticsSink;
use crate::error::LockdownError;
use crate::permit::DELEGATE_NAME;
use crate::poison;
use crate::registrar::{Guard, Registrar};
use crate::severity::Severity;

pub(crate) fn clean(
    heap: &mut Heap,
    root: ObjId,
    registrar: &Registrar<'_>,
    sink: &mut DiagnosticsSink,
) -> Result<HashSet<ObjId>, LockdownError> {
    let mut visited: HashSet<ObjId> = HashSet::new();
    let mut frontier: VecDeque<(ObjId, String)> = VecDeque::new();
    frontier.push_back((root, "<root>".to_string()));

    while let Some((id, path)) = frontier.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        check_delegation_chain(heap, id, &path)?;

        let names = match heap.own_property_names(id) {
            Ok(names) => names,
            Err(err) => {
                sink.record(Severity::NewSymptom, format!("Enumeration failed with {err}"), &path);
                Vec::new()
            }
        };
        for name in names {
            let child_path = format!("{path}.{name}");
            if name == "__proto__" {
                // Magic reflection name. Touching it would rewire the
                // delegate, which the delegate edge handles separately.
                sink.record(Severity::SafeSpecViolation, "Skipped", &child_path);
                continue;
            }
            let guard = match registrar.permit_for(heap, id, &name) {
                Ok(guard) => guard,
                Err(err) => {
                    sink.record(
                        Severity::NewSymptom,
                        format!("Guard lookup failed with {err}"),
                        &child_path,
                    );
                    Guard::Denied
                }
            };
            let descriptor = match heap.own_descriptor(id, &name) {
                Ok(Some(descriptor)) => descriptor,
                Ok(None) => {
                    sink.record(Severity::NewSymptom, "Vanished during cleaning", &child_path);
                    continue;
                }
                Err(err) => {
                    sink.record(
                        Severity::NewSymptom,
                        format!("Descriptor lookup failed with {err}"),
                        &child_path,
                    );
                    poison::clean_property(heap, id, &name, &child_path, sink);
                    continue;
                }
            };
            match guard {
                Guard::Denied => poison::clean_property(heap, id, &name, &child_path, sink),
                Guard::Value => match descriptor {
                    PropertyDescriptor::Accessor { .. } => {
                        sink.record(Severity::SafeSpecViolation, "Not a data property", &child_path);
                        poison::clean_property(heap, id, &name, &child_path, sink);
                    }
                    PropertyDescriptor::Data { value: Value::Obj(child), .. } => {
                        frontier.push_back((child, child_path));
                    }
                    PropertyDescriptor::Data { .. } => {}
                },
                Guard::Accessor => match descriptor {
                    PropertyDescriptor::Accessor { get, set, .. } => {
                        if let Some(getter) = get {
                            frontier.push_back((getter, format!("{child_path}<get>")));
                        }
                        if let Some(setter) = set {
                            frontier.push_back((setter, format!("{child_path}<set>")));
                        }
                    }
                    PropertyDescriptor::Data { .. } => {
                        sink.record(
                            Severity::SafeSpecViolation,
                            "Not an accessor property",
                            &child_path,
                        );
                        poison::clean_property(heap, id, &name, &child_path, sink);
                    }
                },
            }
        }

        clean_delegate_edge(heap, id, &path, registrar, &mut frontier, sink);

        if heap.expects_immutable(id) && !heap.is_frozen(id) {
            if heap.is_extensible(id) {
                sink.record(Severity::NotIsolated, "Expected immutable but extensible", &path);
            } else {
                sink.record(Severity::NotIsolated, "Expected immutable but reconfigurable", &path);
            }
        }
    }
    Ok(visited)
}

/// The delegate link is guarded as a synthetic property. A delegate covered
/// by its own registration is simply walked; an ungoverned one is severed,
/// since an unvetted delegate feeds properties to everything below it.
fn clean_delegate_edge(
    heap: &mut Heap,
    id: ObjId,
    path: &str,
    registrar: &Registrar<'_>,
    frontier: &mut VecDeque<(ObjId, String)>,
    sink: &mut DiagnosticsSink,
) {
    let delegate = match heap.prototype_of(id) {
        Ok(Some(delegate)) => delegate,
        Ok(None) => return,
        Err(err) => {
            sink.record(Severity::NotIsolated, format!("Delegate not observable: {err}"), path);
            return;
        }
    };
    let edge_path = format!("{path}.{DELEGATE_NAME}");
    if registrar.is_registered(delegate) {
        frontier.push_back((delegate, edge_path));
        return;
    }
    let guard = match registrar.permit_for(heap, id, DELEGATE_NAME) {
        Ok(guard) => guard,
        Err(err) => {
            sink.record(
                Severity::NewSymptom,
                format!("Guard lookup failed with {err}"),
                &edge_path,
            );
            Guard::Denied
        }
    };
    match guard {
        Guard::Value | Guard::Accessor => frontier.push_back((delegate, edge_path)),
        Guard::Denied => match heap.set_prototype(id, None) {
            Ok(()) => sink.record(Severity::Safe, "Delegate severed", &edge_path),
            Err(_) => sink.record(Severity::NotIsolated, "Delegate cannot be severed", &edge_path),
        },
    }
}

fn check_delegation_chain(heap: &Heap, id: ObjId, path: &str) -> Result<(), LockdownError> {
    let mut seen: HashSet<ObjId> = HashSet::new();
    seen.insert(id);
    let mut cursor = id;
    loop {
        match heap.prototype_of(cursor) {
            Ok(Some(parent)) => {
                if !seen.insert(parent) {
                    return Err(LockdownError::DelegationCycle { path: path.to_string() });
                }
                cursor = parent;
            }
            // An unobservable link is reported where the edge is handled.
            Ok(None) | Err(_) => return Ok(()),
        }
    }
}
