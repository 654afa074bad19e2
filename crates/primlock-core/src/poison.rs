//! Removal and replacement of properties no permit reaches.
//!
//! The ladder leans gentle-first: delete when the owner lets us, replace
//! with a throwing accessor pair when it does not, and accept an already
//! inert value as harmless. Every rung reports what actually happened, so
//! a hostile owner shows up in the verdict instead of silently keeping its
//! property.

use primlock_heap::{Heap, ObjId, PropertyDescriptor, RuntimeError, Value};

use crate::diagnostics::DiagnosticsSink;
use crate::severity::Severity;

/// Applies the denial ladder to one property.
pub(crate) fn clean_property(
    heap: &mut Heap,
    owner: ObjId,
    name: &str,
    path: &str,
    sink: &mut DiagnosticsSink,
) {
    if heap.is_callable(owner) && (name == "caller" || name == "arguments") {
        neuter_reflection(heap, owner, name, path, sink);
        return;
    }
    if already_poisoned(heap, owner, name) {
        sink.record(Severity::Safe, "Successfully poisoned", path);
        return;
    }
    match heap.delete_property(owner, name) {
        Ok(true) => {
            if !heap.has_own(owner, name) {
                sink.record(Severity::Safe, "Deleted", path);
                return;
            }
            sink.record(Severity::NotIsolated, "Bounced back", path);
        }
        Ok(false) => {
            sink.record(
                Severity::SafeSpecViolation,
                "Strict delete returned false rather than throwing",
                path,
            );
        }
        Err(RuntimeError::Type(_)) => {
            // The expected strict refusal for a non-configurable property.
            // Escalate to poisoning without raising the verdict.
            sink.record(Severity::Safe, "Delete refused on non-configurable property", path);
        }
        Err(err) => {
            sink.record(Severity::NewSymptom, format!("Delete failed with {err}"), path);
        }
    }
    poison(heap, owner, name, path, sink);
}

/// Whether the property already carries one of our throwing guards.
fn already_poisoned(heap: &Heap, owner: ObjId, name: &str) -> bool {
    match heap.own_descriptor(owner, name) {
        Ok(Some(PropertyDescriptor::Accessor { get: Some(getter), .. })) => {
            heap.is_poison_guard(getter)
        }
        _ => false,
    }
}

/// Allocates the frozen accessor that replaces a condemned property.
fn alloc_poison_guard(heap: &mut Heap, path: &str) -> ObjId {
    let message = format!("cannot access property {path}");
    let guard = heap.alloc_native("poisoned", move |_, _, _| {
        Err(RuntimeError::type_error(message.clone()))
    });
    heap.mark_poison_guard(guard);
    heap.mark_expects_immutable(guard);
    let _ = heap.freeze(guard);
    guard
}

fn poison(heap: &mut Heap, owner: ObjId, name: &str, path: &str, sink: &mut DiagnosticsSink) {
    let guard = alloc_poison_guard(heap, path);
    let replacement = PropertyDescriptor::Accessor {
        get: Some(guard),
        set: Some(guard),
        enumerable: false,
        configurable: false,
    };
    match heap.define_property(owner, name, replacement) {
        Ok(()) => match heap.own_descriptor(owner, name) {
            Ok(Some(PropertyDescriptor::Accessor { get: Some(getter), .. })) if getter == guard => {
                sink.record(Severity::Safe, "Successfully poisoned", path);
            }
            _ => sink.record(Severity::NotIsolated, "Failed to be poisoned", path),
        },
        Err(_) => match heap.own_descriptor(owner, name) {
            Ok(Some(PropertyDescriptor::Data {
                value,
                writable: false,
                configurable: false,
                ..
            })) if value.is_primitive() => {
                sink.record(Severity::Safe, "Frozen harmless", path);
            }
            _ => sink.record(Severity::NotIsolated, "Cannot be poisoned", path),
        },
    }
}

/// `caller` and `arguments` on callables go through the runtime's own
/// restricted-reflection accessor rather than the generic ladder. Deleting
/// them outright is not portable across hosts; pinning them to the shared
/// thrower is.
fn neuter_reflection(
    heap: &mut Heap,
    owner: ObjId,
    name: &str,
    path: &str,
    sink: &mut DiagnosticsSink,
) {
    let thrower = heap.intrinsics().throw_type_error;
    if let Ok(Some(PropertyDescriptor::Accessor { get: Some(getter), set: Some(setter), .. })) =
        heap.own_descriptor(owner, name)
    {
        if getter == thrower && setter == thrower {
            sink.record(Severity::Safe, "Already harmless", path);
            return;
        }
    }
    let pinned = PropertyDescriptor::Accessor {
        get: Some(thrower),
        set: Some(thrower),
        enumerable: false,
        configurable: false,
    };
    match heap.define_property(owner, name, pinned) {
        Ok(()) => sink.record(Severity::Safe, "Hardened restricted reflection", path),
        Err(_) => {
            sink.record(Severity::NotIsolated, "Restricted reflection cannot be hardened", path)
        }
    }
}
