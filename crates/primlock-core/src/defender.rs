//! Transitive immutabilisation.
//!
//! `defend` walks everything reachable from the given roots through own
//! properties, accessor functions, and delegation links, freezing each
//! object after its children so no object is sealed while something below
//! it is still open. The walk is all-or-nothing: the first failure aborts
//! with the path that produced it, and the caller must treat the graph as
//! undefended.

use std::collections::HashSet;

use primlock_heap::{Heap, ObjId, PropertyDescriptor, Value};

use crate::error::LockdownError;
use crate::permit::DELEGATE_NAME;

pub(crate) fn defend(
    heap: &mut Heap,
    roots: &[(String, ObjId)],
) -> Result<HashSet<ObjId>, LockdownError> {
    let mut expanded: HashSet<ObjId> = HashSet::new();
    let mut stack: Vec<(ObjId, String, bool)> = roots
        .iter()
        .rev()
        .map(|(path, id)| (*id, path.clone(), false))
        .collect();

    while let Some((id, path, visit_done)) = stack.pop() {
        if visit_done {
            if !heap.is_frozen(id) {
                heap.freeze(id)
                    .map_err(|source| LockdownError::DefenseFailed { path: path.clone(), source })?;
            }
            continue;
        }
        if !expanded.insert(id) {
            continue;
        }
        stack.push((id, path.clone(), true));

        match heap.prototype_of(id) {
            Ok(Some(delegate)) => {
                stack.push((delegate, format!("{path}.{DELEGATE_NAME}"), false));
            }
            Ok(None) => {}
            Err(source) => {
                return Err(LockdownError::DefenseFailed {
                    path: format!("{path}.{DELEGATE_NAME}"),
                    source,
                });
            }
        }

        let names = heap
            .own_property_names(id)
            .map_err(|source| LockdownError::DefenseFailed { path: path.clone(), source })?;
        for name in names {
            let child_path = format!("{path}.{name}");
            match heap.own_descriptor(id, &name) {
                Ok(Some(PropertyDescriptor::Data { value: Value::Obj(child), .. })) => {
                    stack.push((child, child_path, false));
                }
                Ok(Some(PropertyDescriptor::Accessor { get, set, .. })) => {
                    if let Some(getter) = get {
                        stack.push((getter, format!("{child_path}<get>"), false));
                    }
                    if let Some(setter) = set {
                        stack.push((setter, format!("{child_path}<set>"), false));
                    }
                }
                Ok(Some(PropertyDescriptor::Data { .. })) => {}
                Ok(None) => {}
                Err(source) => {
                    return Err(LockdownError::DefenseFailed { path: child_path, source });
                }
            }
        }
    }
    Ok(expanded)
}

/// Defends the graph below a single value. Primitives are already immutable
/// and pass through untouched.
pub fn def(heap: &mut Heap, value: &Value) -> Result<(), LockdownError> {
    match value {
        Value::Obj(id) => {
            defend(heap, &[("<def>".to_string(), *id)])?;
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use primlock_heap::Quirks;

    use super::*;

    #[test]
    fn freezes_everything_reachable() {
        let mut heap = Heap::new();
        let root = heap.alloc_proto_less();
        let left = heap.alloc_proto_less();
        let right = heap.alloc_proto_less();
        let shared = heap.alloc_proto_less();
        heap.set(left, "shared", Value::Obj(shared)).expect("wire");
        heap.set(right, "shared", Value::Obj(shared)).expect("wire");
        heap.set(root, "left", Value::Obj(left)).expect("wire");
        heap.set(root, "right", Value::Obj(right)).expect("wire");
        let defended =
            defend(&mut heap, &[("<root>".to_string(), root)]).expect("defense succeeds");
        for id in [root, left, right, shared] {
            assert!(defended.contains(&id));
            assert!(heap.is_frozen(id));
        }
        match heap.set(shared, "late", Value::Num(1.0)) {
            Err(_) => {}
            Ok(()) => panic!("expected frozen object to reject writes"),
        }
    }

    #[test]
    fn walks_accessors_and_delegates() {
        let mut heap = Heap::new();
        let base = heap.alloc_proto_less();
        let root = heap.alloc(Some(base));
        let getter = heap.alloc_native("get", |_, _, _| Ok(Value::Num(1.0)));
        heap.define_property(
            root,
            "lens",
            PropertyDescriptor::Accessor {
                get: Some(getter),
                set: None,
                enumerable: false,
                configurable: true,
            },
        )
        .expect("define");
        defend(&mut heap, &[("<root>".to_string(), root)]).expect("defense succeeds");
        assert!(heap.is_frozen(base));
        assert!(heap.is_frozen(getter));
        // The accessor survived as an accessor; defense pins, never reshapes.
        match heap.own_descriptor(root, "lens").expect("descriptor") {
            Some(PropertyDescriptor::Accessor { get, configurable, .. }) => {
                assert_eq!(get, Some(getter));
                assert!(!configurable);
            }
            other => panic!("expected accessor to survive, got {other:?}"),
        }
    }

    #[test]
    fn failure_carries_the_path_and_children_are_not_left_behind() {
        let mut heap = Heap::new();
        let root = heap.alloc_proto_less();
        let child = heap.alloc_proto_less();
        heap.set(root, "child", Value::Obj(child)).expect("wire");
        heap.set_quirks(root, Quirks::FREEZE_REFUSES);
        match defend(&mut heap, &[("<root>".to_string(), root)]) {
            Err(LockdownError::DefenseFailed { path, .. }) => {
                assert_eq!(path, "<root>");
            }
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("expected defense to fail"),
        }
        // Children freeze before their parent, so the refusal higher up
        // arrived after the child was already pinned.
        assert!(heap.is_frozen(child));
        assert!(!heap.is_frozen(root));
    }

    #[test]
    fn cycles_terminate() {
        let mut heap = Heap::new();
        let a = heap.alloc_proto_less();
        let b = heap.alloc_proto_less();
        heap.set(a, "next", Value::Obj(b)).expect("wire");
        heap.set(b, "next", Value::Obj(a)).expect("wire");
        defend(&mut heap, &[("<root>".to_string(), a)]).expect("defense succeeds");
        assert!(heap.is_frozen(a));
        assert!(heap.is_frozen(b));
    }

    #[test]
    fn def_passes_primitives_through() {
        let mut heap = Heap::new();
        def(&mut heap, &Value::Num(4.0)).expect("primitive");
        def(&mut heap, &Value::Undefined).expect("primitive");
        let obj = heap.alloc_proto_less();
        def(&mut heap, &Value::Obj(obj)).expect("object");
        assert!(heap.is_frozen(obj));
    }
}
