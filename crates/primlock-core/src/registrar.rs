//! Associates objects with the permit nodes that govern them.
//!
//! Registration walks the permit tree and the object graph in lock step,
//! recording at most one association per object. An object reached through
//! two different subtree paths is a policy contradiction and aborts the
//! pass: the two nodes could disagree about what the object's properties
//! are allowed to do.

use std::collections::{BTreeMap, HashMap, HashSet};

use primlock_heap::{Heap, ObjId, RuntimeError, Value};

use crate::diagnostics::DiagnosticsSink;
use crate::error::LockdownError;
use crate::permit::Permit;
use crate::severity::Severity;

/// The cleaner's view of one property decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    /// No permit reaches this property. Remove or neutralise it.
    Denied,
    /// Keep it as a plain value; walk the value if it is an object.
    Value,
    /// Keep it only as an accessor pair; walk both functions.
    Accessor,
}

pub struct Registrar<'p> {
    associations: HashMap<ObjId, &'p BTreeMap<String, Permit>>,
}

impl<'p> Registrar<'p> {
    /// Walks `tree` from `root`, associating every subtree node with the
    /// object found at its path. Leaf permits are not associated; they are
    /// consulted through their owner's node.
    pub fn build(
        heap: &mut Heap,
        root: ObjId,
        tree: &'p Permit,
        sink: &mut DiagnosticsSink,
    ) -> Result<Self, LockdownError> {
        let root_map = tree.children().ok_or(LockdownError::RootNotSubtree)?;
        let mut associations: HashMap<ObjId, &'p BTreeMap<String, Permit>> = HashMap::new();
        associations.insert(root, root_map);
        let mut stack: Vec<(ObjId, &'p BTreeMap<String, Permit>, String)> =
            vec![(root, root_map, "<root>".to_string())];

        while let Some((owner, map, path)) = stack.pop() {
            for (name, child) in map {
                let Some(child_map) = child.children() else { continue };
                let child_path = format!("{path}.{name}");
                let value = match heap.get(owner, name) {
                    Ok(value) => value,
                    Err(err) => {
                        sink.record(
                            Severity::NewSymptom,
                            format!("Unreadable during registration: {err}"),
                            &child_path,
                        );
                        continue;
                    }
                };
                // Subtree permits over primitives or absent properties have
                // nothing to govern yet.
                let Value::Obj(child_id) = value else { continue };
                if associations.insert(child_id, child_map).is_some() {
                    return Err(LockdownError::MultiplePaths { path: child_path });
                }
                stack.push((child_id, child_map, child_path));
            }
        }
        Ok(Self { associations })
    }

    pub fn is_registered(&self, id: ObjId) -> bool {
        self.associations.contains_key(&id)
    }

    /// Resolves the guard for `name` on `owner`.
    ///
    /// The owner's own association wins when it names the property with a
    /// live grant; an explicit `Deny` there reads as unnamed, matching the
    /// way written policies use `false` as documentation. Otherwise the
    /// delegation chain is walked, and the first ancestor whose node names
    /// the property ends the walk: heritable only if the grant is the
    /// wildcard.
    pub fn permit_for(&self, heap: &Heap, owner: ObjId, name: &str) -> Result<Guard, RuntimeError> {
        if let Some(map) = self.associations.get(&owner) {
            match map.get(name) {
                Some(Permit::Deny) | None => {}
                Some(Permit::AllowAccessor) => return Ok(Guard::Accessor),
                Some(_) => return Ok(Guard::Value),
            }
        }
        let mut seen: HashSet<ObjId> = HashSet::new();
        seen.insert(owner);
        let mut cursor = owner;
        loop {
            let Some(parent) = heap.prototype_of(cursor)? else {
                return Ok(Guard::Denied);
            };
            if !seen.insert(parent) {
                return Err(RuntimeError::HostFault(format!(
                    "delegation cycle while resolving guard for '{name}'"
                )));
            }
            if let Some(map) = self.associations.get(&parent) {
                if let Some(permit) = map.get(name) {
                    return Ok(match permit {
                        Permit::AllowWildcard => Guard::Value,
                        _ => Guard::Denied,
                    });
                }
            }
            cursor = parent;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold() -> (Heap, ObjId, ObjId) {
        let mut heap = Heap::new();
        let global = heap.global();
        let clock = heap.alloc_plain();
        let now = heap.alloc_native("now", |_, _, _| Ok(Value::Num(1.0)));
        heap.set(clock, "now", Value::Obj(now)).expect("install now");
        heap.set(global, "clock", Value::Obj(clock)).expect("install clock");
        (heap, global, clock)
    }

    #[test]
    fn registers_subtrees_and_resolves_guards() {
        let (mut heap, global, clock) = scaffold();
        let tree = Permit::subtree([(
            "clock",
            Permit::subtree([("now", Permit::AllowAsIs), ("epoch", Permit::AllowAccessor)]),
        )]);
        let mut sink = DiagnosticsSink::new();
        let registrar = Registrar::build(&mut heap, global, &tree, &mut sink).expect("register");
        assert!(registrar.is_registered(clock));
        assert_eq!(registrar.permit_for(&heap, clock, "now").expect("guard"), Guard::Value);
        assert_eq!(registrar.permit_for(&heap, clock, "epoch").expect("guard"), Guard::Accessor);
        assert_eq!(registrar.permit_for(&heap, clock, "secret").expect("guard"), Guard::Denied);
    }

    #[test]
    fn object_on_two_permit_paths_is_fatal() {
        let (mut heap, global, clock) = scaffold();
        heap.set(global, "alias", Value::Obj(clock)).expect("alias");
        let tree = Permit::subtree([
            ("clock", Permit::subtree([("now", Permit::AllowAsIs)])),
            ("alias", Permit::subtree([("now", Permit::AllowAsIs)])),
        ]);
        let mut sink = DiagnosticsSink::new();
        match Registrar::build(&mut heap, global, &tree, &mut sink) {
            Err(LockdownError::MultiplePaths { path }) => {
                if !path.contains("alias") && !path.contains("clock") {
                    panic!("unexpected path: {path}");
                }
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected multiple-path failure"),
        }
    }

    #[test]
    fn wildcard_grants_flow_down_the_delegation_chain() {
        let mut heap = Heap::new();
        let global = heap.global();
        let base = heap.alloc_plain();
        heap.set(global, "base", Value::Obj(base)).expect("base");
        let derived = heap.alloc(Some(base));
        heap.set(global, "derived", Value::Obj(derived)).expect("derived");
        let tree = Permit::subtree([
            (
                "base",
                Permit::subtree([("shared", Permit::AllowWildcard), ("local", Permit::AllowAsIs)]),
            ),
            ("derived", Permit::subtree([])),
        ]);
        let mut sink = DiagnosticsSink::new();
        let registrar = Registrar::build(&mut heap, global, &tree, &mut sink).expect("register");
        assert_eq!(registrar.permit_for(&heap, derived, "shared").expect("guard"), Guard::Value);
        // Named but not heritable: the first naming ancestor ends the walk.
        assert_eq!(registrar.permit_for(&heap, derived, "local").expect("guard"), Guard::Denied);
    }

    #[test]
    fn own_explicit_deny_reads_as_unnamed() {
        let mut heap = Heap::new();
        let global = heap.global();
        let base = heap.alloc_plain();
        heap.set(global, "base", Value::Obj(base)).expect("base");
        let derived = heap.alloc(Some(base));
        heap.set(global, "derived", Value::Obj(derived)).expect("derived");
        let tree = Permit::subtree([
            ("base", Permit::subtree([("shared", Permit::AllowWildcard)])),
            ("derived", Permit::subtree([("shared", Permit::Deny)])),
        ]);
        let mut sink = DiagnosticsSink::new();
        let registrar = Registrar::build(&mut heap, global, &tree, &mut sink).expect("register");
        // The owner's false entry documents intent but the inherited
        // wildcard still decides.
        assert_eq!(registrar.permit_for(&heap, derived, "shared").expect("guard"), Guard::Value);
    }
}
