use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::{FunctionDef, Program};
use crate::env;
use crate::error::RuntimeError;
use crate::interp::{self, LexicalEnv};
use crate::object::{Callable, ClosureData, NativeFn, ObjData, Property, PropertyDescriptor, Slot};
use crate::parser;
use crate::quirk::Quirks;
use crate::value::{ObjId, Value};
use crate::verify;

/// Hard ceilings on guest activity. Both are hit by adversarial input
/// long before they are hit by legitimate programs.
#[derive(Debug, Clone, Copy)]
pub struct RuntimeLimits {
    /// Maximum nesting of guest calls (closures and natives combined).
    pub call_depth: usize,
    /// Maximum nesting of expressions while parsing.
    pub parse_depth: usize,
}

impl Default for RuntimeLimits {
    fn default() -> Self {
        RuntimeLimits {
            call_depth: 64,
            parse_depth: 128,
        }
    }
}

/// Well-known objects every heap is born with.
#[derive(Debug, Clone, Copy)]
pub struct Intrinsics {
    pub object_prototype: ObjId,
    pub function_prototype: ObjId,
    /// The shared strict-mode accessor that rejects `caller` and
    /// `arguments` reflection. Frozen and callable.
    pub throw_type_error: ObjId,
    pub global: ObjId,
}

enum SetAction {
    UpdateOwn,
    Setter(ObjId),
    ReadOnly,
    GetterOnly,
    Create,
}

/// An arena of prototype-delegating objects plus the machinery to run
/// guest expressions against them.
///
/// Objects never move and are never collected, so an [`ObjId`] handed
/// out once stays valid for the life of the heap. All reflective
/// operations honor the per-object [`Quirks`] mask, which is how tests
/// simulate hostile or broken host objects.
pub struct Heap {
    slots: Vec<ObjData>,
    limits: RuntimeLimits,
    pub(crate) intrinsics: Intrinsics,
    depth: usize,
}

impl Heap {
    /// Creates a heap populated with the standard environment: a global
    /// object delegating to `Object.prototype`, callable prototypes,
    /// and the ambient (unsafe) `eval` and `Function` entry points.
    pub fn new() -> Self {
        let placeholder = ObjId(0);
        let mut heap = Heap {
            slots: Vec::new(),
            limits: RuntimeLimits::default(),
            intrinsics: Intrinsics {
                object_prototype: placeholder,
                function_prototype: placeholder,
                throw_type_error: placeholder,
                global: placeholder,
            },
            depth: 0,
        };
        env::install(&mut heap);
        heap
    }

    pub fn with_limits(limits: RuntimeLimits) -> Self {
        let mut heap = Heap::new();
        heap.limits = limits;
        heap
    }

    pub fn limits(&self) -> RuntimeLimits {
        self.limits
    }

    pub fn intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    pub fn global(&self) -> ObjId {
        self.intrinsics.global
    }

    /// The objects reachable from every guest program no matter what the
    /// embedder endows: the delegation roots and the shared poison
    /// accessor. Lockdown audits these for deep frozenness.
    pub fn ambient_roots(&self) -> Vec<(&'static str, ObjId)> {
        vec![
            ("Object.prototype", self.intrinsics.object_prototype),
            ("Function.prototype", self.intrinsics.function_prototype),
            ("[[ThrowTypeError]]", self.intrinsics.throw_type_error),
        ]
    }

    pub fn object_count(&self) -> usize {
        self.slots.len()
    }

    pub fn contains(&self, id: ObjId) -> bool {
        id.index() < self.slots.len()
    }

    pub(crate) fn data(&self, id: ObjId) -> &ObjData {
        &self.slots[id.index()]
    }

    pub(crate) fn data_mut(&mut self, id: ObjId) -> &mut ObjData {
        &mut self.slots[id.index()]
    }

    // ---- allocation ----

    /// Allocates an empty extensible object delegating to `proto`.
    pub fn alloc(&mut self, proto: Option<ObjId>) -> ObjId {
        let id = ObjId(self.slots.len() as u32);
        self.slots.push(ObjData::new(proto));
        id
    }

    /// Allocates an ordinary object delegating to `Object.prototype`.
    pub fn alloc_plain(&mut self) -> ObjId {
        let proto = self.intrinsics.object_prototype;
        self.alloc(Some(proto))
    }

    /// Allocates an object with no delegate at all.
    pub fn alloc_proto_less(&mut self) -> ObjId {
        self.alloc(None)
    }

    /// Allocates a callable backed by a host function. Natives carry no
    /// own properties, so a frozen native is exactly as featureless as
    /// it looks.
    pub fn alloc_native<F>(&mut self, name: &str, func: F) -> ObjId
    where
        F: Fn(&mut Heap, Value, &[Value]) -> Result<Value, RuntimeError> + 'static,
    {
        let proto = self.intrinsics.function_prototype;
        let id = self.alloc(Some(proto));
        self.data_mut(id).call = Some(Callable::Native {
            name: Rc::from(name),
            func: Rc::new(func) as Rc<NativeFn>,
        });
        id
    }

    /// Allocates a guest closure over `env`. Closures expose `length`
    /// and poisoned `caller`/`arguments` accessors, matching what a
    /// strict function looks like through reflection.
    pub(crate) fn alloc_closure(&mut self, data: ClosureData) -> ObjId {
        let proto = self.intrinsics.function_prototype;
        let thrower = self.intrinsics.throw_type_error;
        let arity = data.def.params.len();
        let id = self.alloc(Some(proto));
        let obj = self.data_mut(id);
        obj.call = Some(Callable::Closure(Rc::new(data)));
        obj.props.push((
            "length".to_string(),
            Property {
                slot: Slot::Data {
                    value: Value::Num(arity as f64),
                    writable: false,
                },
                enumerable: false,
                configurable: false,
            },
        ));
        for name in ["caller", "arguments"] {
            obj.props.push((
                name.to_string(),
                Property {
                    slot: Slot::Accessor {
                        get: Some(thrower),
                        set: Some(thrower),
                    },
                    enumerable: false,
                    configurable: false,
                },
            ));
        }
        id
    }

    // ---- reflection ----

    /// Own property names in insertion order. Fails when the object's
    /// host quirks make enumeration unreliable.
    pub fn own_property_names(&self, id: ObjId) -> Result<Vec<String>, RuntimeError> {
        let data = self.data(id);
        if data.quirks.contains(Quirks::ENUMERATION_FAILS) {
            return Err(RuntimeError::EnumerationFailed(id));
        }
        Ok(data.props.iter().map(|(name, _)| name.clone()).collect())
    }

    /// The own descriptor for `name`, or `None` when absent.
    pub fn own_descriptor(
        &self,
        id: ObjId,
        name: &str,
    ) -> Result<Option<PropertyDescriptor>, RuntimeError> {
        let data = self.data(id);
        if data.quirks.contains(Quirks::DESCRIPTOR_LOOKUP_FAILS) {
            return Err(RuntimeError::DescriptorLookupFailed(id));
        }
        Ok(data.find(name).map(PropertyDescriptor::from_property))
    }

    /// The object `id` delegates to, if any.
    pub fn prototype_of(&self, id: ObjId) -> Result<Option<ObjId>, RuntimeError> {
        let data = self.data(id);
        if data.quirks.contains(Quirks::PROTO_LOOKUP_FAILS) {
            return Err(RuntimeError::ProtoLookupFailed(id));
        }
        Ok(data.proto)
    }

    /// Repoints the delegate, refusing cycles and edits to
    /// non-extensible objects.
    pub fn set_prototype(&mut self, id: ObjId, proto: Option<ObjId>) -> Result<(), RuntimeError> {
        if !self.data(id).extensible {
            return Err(RuntimeError::type_error(
                "cannot change the delegate of a non-extensible object",
            ));
        }
        if let Some(start) = proto {
            let mut seen = HashSet::new();
            let mut cur = Some(start);
            while let Some(link) = cur {
                if link == id {
                    return Err(RuntimeError::type_error("delegation cycle rejected"));
                }
                if !seen.insert(link) {
                    break;
                }
                cur = self.data(link).proto;
            }
        }
        self.data_mut(id).proto = proto;
        Ok(())
    }

    /// Repoints the delegate with no integrity checks. Tests use this
    /// to build the malformed graphs lockdown must survive.
    pub fn set_prototype_unchecked(&mut self, id: ObjId, proto: Option<ObjId>) {
        self.data_mut(id).proto = proto;
    }

    pub fn has_own(&self, id: ObjId, name: &str) -> bool {
        self.data(id).find(name).is_some()
    }

    /// Whether `name` is found on `id` or anywhere along its delegation
    /// chain.
    pub fn has(&self, id: ObjId, name: &str) -> Result<bool, RuntimeError> {
        let mut seen = HashSet::new();
        let mut cur = Some(id);
        while let Some(link) = cur {
            if !seen.insert(link) {
                return Err(RuntimeError::HostFault("delegation cycle detected".to_string()));
            }
            if self.data(link).find(name).is_some() {
                return Ok(true);
            }
            cur = self.data(link).proto;
        }
        Ok(false)
    }

    /// Reads `name` through the delegation chain, invoking getters with
    /// `id` as the receiver.
    pub fn get(&mut self, id: ObjId, name: &str) -> Result<Value, RuntimeError> {
        enum Hit {
            Value(Value),
            Getter(ObjId),
            Miss(Option<ObjId>),
        }
        let mut seen = HashSet::new();
        let mut cur = id;
        loop {
            if !seen.insert(cur) {
                return Err(RuntimeError::HostFault("delegation cycle detected".to_string()));
            }
            let hit = {
                let data = self.data(cur);
                match data.find(name) {
                    Some(prop) => match &prop.slot {
                        Slot::Data { value, .. } => Hit::Value(value.clone()),
                        Slot::Accessor { get: Some(g), .. } => Hit::Getter(*g),
                        Slot::Accessor { get: None, .. } => Hit::Value(Value::Undefined),
                    },
                    None => Hit::Miss(data.proto),
                }
            };
            match hit {
                Hit::Value(v) => return Ok(v),
                Hit::Getter(g) => return self.call(Value::Obj(g), Value::Obj(id), &[]),
                Hit::Miss(Some(next)) => cur = next,
                Hit::Miss(None) => return Ok(Value::Undefined),
            }
        }
    }

    /// Writes `name` with strict-mode assignment semantics: setters run
    /// with `id` as the receiver, read-only and getter-only properties
    /// reject, and fresh properties require extensibility.
    pub fn set(&mut self, id: ObjId, name: &str, value: Value) -> Result<(), RuntimeError> {
        let mut seen = HashSet::new();
        let mut cur = id;
        let action = loop {
            if !seen.insert(cur) {
                return Err(RuntimeError::HostFault("delegation cycle detected".to_string()));
            }
            let data = self.data(cur);
            match data.find(name) {
                Some(prop) => match &prop.slot {
                    Slot::Data { writable: true, .. } => {
                        if cur == id {
                            break SetAction::UpdateOwn;
                        }
                        break SetAction::Create;
                    }
                    Slot::Data { writable: false, .. } => break SetAction::ReadOnly,
                    Slot::Accessor { set: Some(s), .. } => break SetAction::Setter(*s),
                    Slot::Accessor { set: None, .. } => break SetAction::GetterOnly,
                },
                None => match data.proto {
                    Some(next) => cur = next,
                    None => break SetAction::Create,
                },
            }
        };
        match action {
            SetAction::UpdateOwn => {
                if let Some(prop) = self.data_mut(id).find_mut(name) {
                    if let Slot::Data { value: slot, .. } = &mut prop.slot {
                        *slot = value;
                    }
                }
                Ok(())
            }
            SetAction::Setter(setter) => self
                .call(Value::Obj(setter), Value::Obj(id), &[value])
                .map(|_| ()),
            SetAction::ReadOnly => Err(RuntimeError::type_error(format!(
                "cannot assign to read-only property '{name}'"
            ))),
            SetAction::GetterOnly => Err(RuntimeError::type_error(format!(
                "cannot set property '{name}' which has only a getter"
            ))),
            SetAction::Create => {
                if !self.data(id).extensible {
                    return Err(RuntimeError::type_error(format!(
                        "cannot add property '{name}', object is not extensible"
                    )));
                }
                self.data_mut(id).props.push((
                    name.to_string(),
                    Property {
                        slot: Slot::Data {
                            value,
                            writable: true,
                        },
                        enumerable: true,
                        configurable: true,
                    },
                ));
                Ok(())
            }
        }
    }

    /// Defines or redefines an own property, enforcing the usual
    /// non-configurable compatibility rules and the host's define
    /// quirks.
    pub fn define_property(
        &mut self,
        id: ObjId,
        name: &str,
        desc: PropertyDescriptor,
    ) -> Result<(), RuntimeError> {
        let data = self.data(id);
        if data.quirks.contains(Quirks::DEFINE_REFUSES) {
            return Err(RuntimeError::type_error(format!(
                "host refused to define '{name}' on {id}"
            )));
        }
        match data.find(name) {
            None => {
                if !data.extensible {
                    return Err(RuntimeError::type_error(format!(
                        "cannot define '{name}', object is not extensible"
                    )));
                }
            }
            Some(existing) => {
                if !existing.configurable {
                    validate_non_configurable(existing, &desc, name)?;
                }
            }
        }
        let prop = desc.into_property();
        self.data_mut(id).insert(name, prop);
        Ok(())
    }

    /// Removes an own property with strict `delete` semantics, filtered
    /// through the object's delete quirks. `Ok(true)` means the caller
    /// may believe the property is gone; whether it actually is gone is
    /// a separate question the cleaner re-checks.
    pub fn delete_property(&mut self, id: ObjId, name: &str) -> Result<bool, RuntimeError> {
        let data = self.data(id);
        if data.quirks.contains(Quirks::DELETE_THROWS) {
            return Err(RuntimeError::HostFault(format!(
                "delete of '{name}' trapped by host"
            )));
        }
        let existing = match data.find(name) {
            Some(prop) => prop,
            None => return Ok(true),
        };
        if data.quirks.contains(Quirks::DELETE_BOUNCES) {
            return Ok(true);
        }
        if !existing.configurable {
            if data.quirks.contains(Quirks::DELETE_REFUSES) {
                return Ok(false);
            }
            return Err(RuntimeError::type_error(format!(
                "cannot delete non-configurable property '{name}'"
            )));
        }
        if data.quirks.contains(Quirks::DELETE_REFUSES) {
            return Ok(false);
        }
        self.data_mut(id).remove(name);
        Ok(true)
    }

    // ---- integrity ----

    pub fn is_extensible(&self, id: ObjId) -> bool {
        self.data(id).extensible
    }

    pub fn prevent_extensions(&mut self, id: ObjId) -> Result<(), RuntimeError> {
        if self.data(id).quirks.contains(Quirks::PREVENT_EXTENSIONS_REFUSES) {
            return Err(RuntimeError::type_error(format!(
                "host refused to make {id} non-extensible"
            )));
        }
        self.data_mut(id).extensible = false;
        Ok(())
    }

    /// Makes every own property non-configurable (and data properties
    /// non-writable), then revokes extensibility.
    pub fn freeze(&mut self, id: ObjId) -> Result<(), RuntimeError> {
        if self.data(id).quirks.contains(Quirks::FREEZE_REFUSES) {
            return Err(RuntimeError::type_error(format!(
                "host refused to freeze {id}"
            )));
        }
        self.harden_own_props(id);
        self.prevent_extensions(id)
    }

    /// Freezing that ignores quirks. Bootstrap only.
    pub(crate) fn force_freeze(&mut self, id: ObjId) {
        self.harden_own_props(id);
        self.data_mut(id).extensible = false;
    }

    fn harden_own_props(&mut self, id: ObjId) {
        let data = self.data_mut(id);
        for (_, prop) in &mut data.props {
            prop.configurable = false;
            if let Slot::Data { writable, .. } = &mut prop.slot {
                *writable = false;
            }
        }
    }

    /// Shallow frozenness: non-extensible and every own property
    /// non-configurable, with data properties non-writable.
    pub fn is_frozen(&self, id: ObjId) -> bool {
        let data = self.data(id);
        !data.extensible
            && data.props.iter().all(|(_, prop)| {
                !prop.configurable
                    && match &prop.slot {
                        Slot::Data { writable, .. } => !writable,
                        Slot::Accessor { .. } => true,
                    }
            })
    }

    // ---- host-behavior knobs ----

    pub fn quirks(&self, id: ObjId) -> Quirks {
        self.data(id).quirks
    }

    pub fn set_quirks(&mut self, id: ObjId, quirks: Quirks) {
        self.data_mut(id).quirks = quirks;
    }

    /// Tags an object the embedder promises is already deeply frozen.
    /// Lockdown verifies the promise instead of trusting it.
    pub fn mark_expects_immutable(&mut self, id: ObjId) {
        self.data_mut(id).expects_immutable = true;
    }

    pub fn expects_immutable(&self, id: ObjId) -> bool {
        self.data(id).expects_immutable
    }

    /// Brands an accessor installed to replace a condemned property, so
    /// a later pass can tell its own guards from stranger accessors.
    pub fn mark_poison_guard(&mut self, id: ObjId) {
        self.data_mut(id).poison_guard = true;
    }

    pub fn is_poison_guard(&self, id: ObjId) -> bool {
        self.data(id).poison_guard
    }

    // ---- calling ----

    pub fn is_callable(&self, id: ObjId) -> bool {
        self.data(id).call.is_some()
    }

    /// Invokes a callable value. Depth accounting covers natives and
    /// closures alike, so a getter that re-enters the heap cannot
    /// recurse past the configured limit.
    pub fn call(
        &mut self,
        callee: Value,
        this: Value,
        args: &[Value],
    ) -> Result<Value, RuntimeError> {
        let id = match callee.as_obj() {
            Some(id) => id,
            None => {
                return Err(RuntimeError::type_error(format!(
                    "{} is not a function",
                    callee.kind_name()
                )))
            }
        };
        let callable = match &self.data(id).call {
            Some(callable) => callable.clone(),
            None => return Err(RuntimeError::type_error("object is not callable")),
        };
        if self.depth >= self.limits.call_depth {
            return Err(RuntimeError::RecursionLimit(self.limits.call_depth));
        }
        self.depth += 1;
        let result = match callable {
            Callable::Native { func, .. } => func(self, this, args),
            Callable::Closure(data) => interp::call_closure(self, &data, this, args),
        };
        self.depth -= 1;
        result
    }

    /// What `typeof` reports for a value on this heap.
    pub fn type_of(&self, value: &Value) -> &'static str {
        match value {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Bool(_) => "boolean",
            Value::Num(_) => "number",
            Value::Str(_) => "string",
            Value::Obj(id) => {
                if self.is_callable(*id) {
                    "function"
                } else {
                    "object"
                }
            }
        }
    }

    // ---- evaluation ----

    /// Parses `src` as a single expression. The result runs via
    /// [`Heap::eval_program`].
    pub fn compile_expression(&self, src: &str) -> Result<Rc<Program>, RuntimeError> {
        parser::parse_expression(src, self.limits.parse_depth).map(Rc::new)
    }

    /// Parses `src` as a statement body. Top-level `return` is a
    /// syntax error here; bodies compiled this way run as programs,
    /// not as functions.
    pub fn compile_body(&self, src: &str) -> Result<Rc<Program>, RuntimeError> {
        parser::parse_body(src, self.limits.parse_depth).map(Rc::new)
    }

    /// Builds a function from parts. Parameters are validated as plain
    /// names, the body parses as a function body, and the closure sees
    /// only `scope` beyond its own parameters and vars.
    pub fn make_function(
        &mut self,
        params: &[String],
        body_src: &str,
        scope: Option<ObjId>,
    ) -> Result<ObjId, RuntimeError> {
        for (i, param) in params.iter().enumerate() {
            verify::verify_identifier(param)?;
            if params[..i].contains(param) {
                return Err(RuntimeError::syntax(format!(
                    "duplicate parameter name '{param}'"
                )));
            }
        }
        let body = parser::parse_function_body(body_src, self.limits.parse_depth)?;
        let def = Rc::new(FunctionDef {
            params: params.to_vec(),
            body,
        });
        Ok(self.alloc_closure(ClosureData {
            def,
            env: LexicalEnv::root(scope),
        }))
    }

    /// Runs a compiled program. Free names resolve against `scope` when
    /// one is supplied and nothing else otherwise; an absent scope makes
    /// every free read a `ReferenceError`, never a global touch.
    pub fn eval_program(
        &mut self,
        program: &Rc<Program>,
        scope: Option<ObjId>,
        this: Value,
    ) -> Result<Value, RuntimeError> {
        let env = LexicalEnv::root(scope);
        interp::eval_program(self, program, &env, this)
    }
}

impl Default for Heap {
    fn default() -> Self {
        Heap::new()
    }
}

fn validate_non_configurable(
    existing: &Property,
    desc: &PropertyDescriptor,
    name: &str,
) -> Result<(), RuntimeError> {
    let refuse = |what: &str| {
        Err(RuntimeError::type_error(format!(
            "cannot redefine non-configurable property '{name}': {what}"
        )))
    };
    if desc.configurable() {
        return refuse("configurable may not be restored");
    }
    if desc.enumerable() != existing.enumerable {
        return refuse("enumerable may not change");
    }
    match (&existing.slot, desc) {
        (Slot::Data { .. }, PropertyDescriptor::Accessor { .. })
        | (Slot::Accessor { .. }, PropertyDescriptor::Data { .. }) => {
            refuse("kind may not change")
        }
        (
            Slot::Data { value, writable },
            PropertyDescriptor::Data {
                value: new_value,
                writable: new_writable,
                ..
            },
        ) => {
            if !*writable && *new_writable {
                return refuse("writable may not be restored");
            }
            if !*writable && !crate::value::same_value(value, new_value) {
                return refuse("value may not change");
            }
            Ok(())
        }
        (
            Slot::Accessor { get, set },
            PropertyDescriptor::Accessor {
                get: new_get,
                set: new_set,
                ..
            },
        ) => {
            if get != new_get || set != new_set {
                return refuse("accessors may not change");
            }
            Ok(())
        }
    }
}
