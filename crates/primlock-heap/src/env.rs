//! The standard environment a fresh heap is born with: delegation
//! roots, a global object, and the ambient (authority-carrying) `eval`
//! and `Function` entry points. This is the world a lockdown pass is
//! expected to tame, so everything here starts mutable except the
//! restricted-access accessor, which is frozen from birth.

use std::collections::HashSet;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::interp;
use crate::object::{Callable, NativeFn, Property, PropertyDescriptor, Slot};
use crate::value::{ObjId, Value};

pub(crate) fn install(heap: &mut Heap) {
    let object_proto = heap.alloc_proto_less();
    heap.intrinsics.object_prototype = object_proto;

    let function_proto = heap.alloc(Some(object_proto));
    heap.intrinsics.function_prototype = function_proto;
    heap.data_mut(function_proto).call = Some(Callable::Native {
        name: Rc::from("Function.prototype"),
        func: Rc::new(|_: &mut Heap, _: Value, _: &[Value]| Ok(Value::Undefined)) as Rc<NativeFn>,
    });

    let global = heap.alloc(Some(object_proto));
    heap.intrinsics.global = global;

    let thrower = heap.alloc_native("ThrowTypeError", |_, _, _| {
        Err(RuntimeError::type_error(
            "access to caller and arguments is restricted",
        ))
    });
    heap.intrinsics.throw_type_error = thrower;
    heap.mark_expects_immutable(thrower);
    heap.force_freeze(thrower);

    install_object_prototype(heap, object_proto);
    install_function_prototype(heap, function_proto);

    let object_ctor = install_object_namespace(heap, object_proto);
    let function_ctor = install_function_ctor(heap, function_proto);
    let eval_fn = heap.alloc_native("eval", ambient_eval);

    define_data(heap, global, "Object", Value::Obj(object_ctor), true, true);
    define_data(heap, global, "Function", Value::Obj(function_ctor), true, true);
    define_data(heap, global, "eval", Value::Obj(eval_fn), true, true);
    define_data(heap, global, "undefined", Value::Undefined, false, false);
    define_data(heap, global, "NaN", Value::Num(f64::NAN), false, false);
    define_data(heap, global, "Infinity", Value::Num(f64::INFINITY), false, false);
}

/// Bootstrap-time property definition. Skips the reflective surface on
/// purpose: nothing here has quirks yet, and methods follow the usual
/// builtin shape of writable, non-enumerable, configurable.
fn define_data(
    heap: &mut Heap,
    target: ObjId,
    name: &str,
    value: Value,
    writable: bool,
    configurable: bool,
) {
    heap.data_mut(target).insert(
        name,
        Property {
            slot: Slot::Data { value, writable },
            enumerable: false,
            configurable,
        },
    );
}

fn method<F>(heap: &mut Heap, target: ObjId, name: &str, func: F)
where
    F: Fn(&mut Heap, Value, &[Value]) -> Result<Value, RuntimeError> + 'static,
{
    let id = heap.alloc_native(name, func);
    define_data(heap, target, name, Value::Obj(id), true, true);
}

fn install_object_prototype(heap: &mut Heap, proto: ObjId) {
    method(heap, proto, "toString", |heap, this, _| {
        let tag = match &this {
            Value::Undefined => "Undefined",
            Value::Null => "Null",
            Value::Bool(_) => "Boolean",
            Value::Num(_) => "Number",
            Value::Str(_) => "String",
            Value::Obj(id) => {
                if heap.is_callable(*id) {
                    "Function"
                } else {
                    "Object"
                }
            }
        };
        Ok(Value::str(&format!("[object {tag}]")))
    });
    method(heap, proto, "valueOf", |_, this, _| Ok(this));
    method(heap, proto, "hasOwnProperty", |heap, this, args| {
        let id = require_object(&this, "hasOwnProperty")?;
        let key = interp::property_key(args.first().unwrap_or(&Value::Undefined))?;
        Ok(Value::Bool(heap.has_own(id, &key)))
    });
    method(heap, proto, "isPrototypeOf", |heap, this, args| {
        let target = match &this {
            Value::Obj(id) => *id,
            _ => return Ok(Value::Bool(false)),
        };
        let mut cur = match args.first() {
            Some(Value::Obj(id)) => Some(*id),
            _ => return Ok(Value::Bool(false)),
        };
        let mut seen = HashSet::new();
        while let Some(id) = cur {
            if !seen.insert(id) {
                return Ok(Value::Bool(false));
            }
            match heap.prototype_of(id)? {
                Some(parent) if parent == target => return Ok(Value::Bool(true)),
                next => cur = next,
            }
        }
        Ok(Value::Bool(false))
    });
}

fn install_function_prototype(heap: &mut Heap, proto: ObjId) {
    method(heap, proto, "call", |heap, this, args| {
        let (this_arg, rest) = match args.split_first() {
            Some((first, rest)) => (first.clone(), rest),
            None => (Value::Undefined, &[][..]),
        };
        heap.call(this, this_arg, rest)
    });
    method(heap, proto, "toString", |_, _, _| {
        Ok(Value::str("function () { [native code] }"))
    });
}

fn install_object_namespace(heap: &mut Heap, object_proto: ObjId) -> ObjId {
    let ctor = heap.alloc_native("Object", |heap, _, _| Ok(Value::Obj(heap.alloc_plain())));
    define_data(
        heap,
        ctor,
        "prototype",
        Value::Obj(object_proto),
        false,
        false,
    );
    method(heap, ctor, "create", |heap, _, args| {
        let proto = match args.first() {
            Some(Value::Obj(id)) => Some(*id),
            Some(Value::Null) => None,
            _ => {
                return Err(RuntimeError::type_error(
                    "Object.create needs an object or null",
                ))
            }
        };
        Ok(Value::Obj(heap.alloc(proto)))
    });
    method(heap, ctor, "freeze", |heap, _, args| {
        let id = require_object(args.first().unwrap_or(&Value::Undefined), "Object.freeze")?;
        heap.freeze(id)?;
        Ok(Value::Obj(id))
    });
    method(heap, ctor, "isFrozen", |heap, _, args| {
        let id = require_object(args.first().unwrap_or(&Value::Undefined), "Object.isFrozen")?;
        Ok(Value::Bool(heap.is_frozen(id)))
    });
    method(heap, ctor, "getPrototypeOf", |heap, _, args| {
        let id = require_object(
            args.first().unwrap_or(&Value::Undefined),
            "Object.getPrototypeOf",
        )?;
        Ok(match heap.prototype_of(id)? {
            Some(parent) => Value::Obj(parent),
            None => Value::Null,
        })
    });
    method(heap, ctor, "defineProperty", |heap, _, args| {
        let id = require_object(
            args.first().unwrap_or(&Value::Undefined),
            "Object.defineProperty",
        )?;
        let key = interp::property_key(args.get(1).unwrap_or(&Value::Undefined))?;
        let desc_obj = require_object(
            args.get(2).unwrap_or(&Value::Undefined),
            "Object.defineProperty",
        )?;
        let desc = read_guest_descriptor(heap, desc_obj)?;
        heap.define_property(id, &key, desc)?;
        Ok(Value::Obj(id))
    });
    ctor
}

fn read_guest_descriptor(heap: &mut Heap, desc: ObjId) -> Result<PropertyDescriptor, RuntimeError> {
    let fetch = |heap: &mut Heap, name: &str| -> Result<Option<Value>, RuntimeError> {
        if heap.has(desc, name)? {
            heap.get(desc, name).map(Some)
        } else {
            Ok(None)
        }
    };
    let enumerable = fetch(heap, "enumerable")?.is_some_and(|v| v.truthy());
    let configurable = fetch(heap, "configurable")?.is_some_and(|v| v.truthy());
    let get = fetch(heap, "get")?;
    let set = fetch(heap, "set")?;
    let value = fetch(heap, "value")?;
    let writable = fetch(heap, "writable")?;
    if get.is_some() || set.is_some() {
        if value.is_some() || writable.is_some() {
            return Err(RuntimeError::type_error(
                "descriptor cannot be both a data and an accessor form",
            ));
        }
        let side = |v: Option<Value>, which: &str| -> Result<Option<ObjId>, RuntimeError> {
            match v {
                None | Some(Value::Undefined) => Ok(None),
                Some(Value::Obj(id)) if heap.is_callable(id) => Ok(Some(id)),
                Some(_) => Err(RuntimeError::type_error(format!(
                    "{which} must be a function or undefined"
                ))),
            }
        };
        return Ok(PropertyDescriptor::Accessor {
            get: side(get, "getter")?,
            set: side(set, "setter")?,
            enumerable,
            configurable,
        });
    }
    Ok(PropertyDescriptor::Data {
        value: value.unwrap_or(Value::Undefined),
        writable: writable.is_some_and(|v| v.truthy()),
        enumerable,
        configurable,
    })
}

fn install_function_ctor(heap: &mut Heap, function_proto: ObjId) -> ObjId {
    let ctor = heap.alloc_native("Function", ambient_function);
    define_data(
        heap,
        ctor,
        "prototype",
        Value::Obj(function_proto),
        false,
        false,
    );
    ctor
}

/// The ambient function constructor. Compiles in full view of the
/// global object, which is exactly the authority leak lockdown exists
/// to replace.
fn ambient_function(heap: &mut Heap, _this: Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let mut params = Vec::new();
    let mut body_src = String::new();
    if let Some((body, heads)) = args.split_last() {
        for head in heads {
            match head.as_str() {
                Some(s) => params.push(s.trim().to_string()),
                None => {
                    return Err(RuntimeError::type_error(
                        "Function parameters must be strings",
                    ))
                }
            }
        }
        body_src = match body.as_str() {
            Some(s) => s.to_string(),
            None => return Err(RuntimeError::type_error("Function body must be a string")),
        };
    }
    let global = heap.global();
    heap.make_function(&params, &body_src, Some(global))
        .map(Value::Obj)
}

/// The ambient `eval`. Runs source with the whole global object in
/// scope. Expression sources give their value back; statement sources
/// give their completion value.
fn ambient_eval(heap: &mut Heap, _this: Value, args: &[Value]) -> Result<Value, RuntimeError> {
    let src = match args.first() {
        Some(Value::Str(s)) => s.clone(),
        Some(other) => return Ok(other.clone()),
        None => return Ok(Value::Undefined),
    };
    let program = match heap.compile_expression(&src) {
        Ok(program) => program,
        Err(RuntimeError::Syntax(_)) => heap.compile_body(&src)?,
        Err(err) => return Err(err),
    };
    let global = heap.global();
    heap.eval_program(&program, Some(global), Value::Obj(global))
}

fn require_object(value: &Value, who: &str) -> Result<ObjId, RuntimeError> {
    match value {
        Value::Obj(id) => Ok(*id),
        other => Err(RuntimeError::type_error(format!(
            "{who} needs an object, not {}",
            other.kind_name()
        ))),
    }
}
