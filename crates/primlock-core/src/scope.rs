//! Scope records: the only world a confined program can see.
//!
//! A record carries one binding per free name of the program it backs.
//! Immutable bindings are copied outright; anything live is wrapped in a
//! getter/setter pair that reads and writes the import record at use time,
//! so later changes to a still-writable import are visible without giving
//! the program the record itself.

use primlock_heap::{Heap, ObjId, PropertyDescriptor, RuntimeError, Value};

/// What a read of a name that is absent from the imports should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingNamePolicy {
    /// Raise the scoping error the program would expect.
    #[default]
    Fault,
    /// Yield an innocuous placeholder instead.
    Placeholder,
}

pub(crate) fn make_scope_record(
    heap: &mut Heap,
    imports: ObjId,
    free_names: &[String],
    missing: MissingNamePolicy,
) -> Result<ObjId, RuntimeError> {
    let record = heap.alloc_proto_less();
    for name in free_names {
        if heap.has_own(record, name) {
            continue;
        }
        let descriptor = heap.own_descriptor(imports, name)?;
        match descriptor {
            Some(PropertyDescriptor::Data {
                value,
                writable: false,
                configurable: false,
                ..
            }) => {
                heap.define_property(
                    record,
                    name,
                    PropertyDescriptor::frozen_data(value),
                )?;
            }
            _ => wrap_binding(heap, record, imports, name, missing)?,
        }
    }
    heap.prevent_extensions(record)?;
    Ok(record)
}

fn wrap_binding(
    heap: &mut Heap,
    record: ObjId,
    imports: ObjId,
    name: &str,
    missing: MissingNamePolicy,
) -> Result<(), RuntimeError> {
    let get_name = name.to_string();
    let getter = heap.alloc_native("scopedGet", move |heap, _this, _args| {
        if heap.has(imports, &get_name)? {
            heap.get(imports, &get_name)
        } else {
            match missing {
                MissingNamePolicy::Fault => {
                    Err(RuntimeError::reference(format!("{get_name} is not defined")))
                }
                MissingNamePolicy::Placeholder => Ok(Value::Undefined),
            }
        }
    });
    let set_name = name.to_string();
    let setter = heap.alloc_native("scopedSet", move |heap, _this, args| {
        let value = args.first().cloned().unwrap_or(Value::Undefined);
        if heap.has(imports, &set_name)? {
            heap.set(imports, &set_name, value.clone())?;
            Ok(value)
        } else {
            Err(RuntimeError::reference(format!("{set_name} is not defined")))
        }
    });
    heap.define_property(
        record,
        name,
        PropertyDescriptor::Accessor {
            get: Some(getter),
            set: Some(setter),
            enumerable: false,
            configurable: false,
        },
    )
}
