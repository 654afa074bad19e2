use std::fmt;
use std::rc::Rc;

use crate::ast::FunctionDef;
use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::interp::LexicalEnv;
use crate::quirk::Quirks;
use crate::value::{ObjId, Value};

/// One own-property slot as stored.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Data { value: Value, writable: bool },
    Accessor { get: Option<ObjId>, set: Option<ObjId> },
}

#[derive(Debug, Clone)]
pub(crate) struct Property {
    pub slot: Slot,
    pub enumerable: bool,
    pub configurable: bool,
}

/// Reflective projection of a property, as read and written through the
/// introspection surface. Descriptors here are always complete; there is
/// no partial-descriptor merge.
#[derive(Debug, Clone)]
pub enum PropertyDescriptor {
    Data { value: Value, writable: bool, enumerable: bool, configurable: bool },
    Accessor { get: Option<ObjId>, set: Option<ObjId>, enumerable: bool, configurable: bool },
}

impl PropertyDescriptor {
    /// Plain mutable data property.
    pub fn data(value: Value) -> Self {
        PropertyDescriptor::Data { value, writable: true, enumerable: true, configurable: true }
    }

    /// Fully locked data property.
    pub fn frozen_data(value: Value) -> Self {
        PropertyDescriptor::Data { value, writable: false, enumerable: false, configurable: false }
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, PropertyDescriptor::Accessor { .. })
    }

    pub fn enumerable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { enumerable, .. }
            | PropertyDescriptor::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn configurable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { configurable, .. }
            | PropertyDescriptor::Accessor { configurable, .. } => *configurable,
        }
    }

    /// Writable bit of a data property; accessors report false.
    pub fn writable(&self) -> bool {
        match self {
            PropertyDescriptor::Data { writable, .. } => *writable,
            PropertyDescriptor::Accessor { .. } => false,
        }
    }

    pub fn value(&self) -> Option<&Value> {
        match self {
            PropertyDescriptor::Data { value, .. } => Some(value),
            PropertyDescriptor::Accessor { .. } => None,
        }
    }

    pub fn with_enumerable(mut self, flag: bool) -> Self {
        match &mut self {
            PropertyDescriptor::Data { enumerable, .. }
            | PropertyDescriptor::Accessor { enumerable, .. } => *enumerable = flag,
        }
        self
    }

    pub fn with_configurable(mut self, flag: bool) -> Self {
        match &mut self {
            PropertyDescriptor::Data { configurable, .. }
            | PropertyDescriptor::Accessor { configurable, .. } => *configurable = flag,
        }
        self
    }

    pub(crate) fn into_property(self) -> Property {
        match self {
            PropertyDescriptor::Data { value, writable, enumerable, configurable } => Property {
                slot: Slot::Data { value, writable },
                enumerable,
                configurable,
            },
            PropertyDescriptor::Accessor { get, set, enumerable, configurable } => Property {
                slot: Slot::Accessor { get, set },
                enumerable,
                configurable,
            },
        }
    }

    pub(crate) fn from_property(p: &Property) -> Self {
        match &p.slot {
            Slot::Data { value, writable } => PropertyDescriptor::Data {
                value: value.clone(),
                writable: *writable,
                enumerable: p.enumerable,
                configurable: p.configurable,
            },
            Slot::Accessor { get, set } => PropertyDescriptor::Accessor {
                get: *get,
                set: *set,
                enumerable: p.enumerable,
                configurable: p.configurable,
            },
        }
    }
}

pub type NativeFn = dyn Fn(&mut Heap, Value, &[Value]) -> Result<Value, RuntimeError>;

/// Compiled guest function plus its captured environment.
pub(crate) struct ClosureData {
    pub def: Rc<FunctionDef>,
    pub env: LexicalEnv,
}

#[derive(Clone)]
pub(crate) enum Callable {
    Native { name: Rc<str>, func: Rc<NativeFn> },
    Closure(Rc<ClosureData>),
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Native { name, .. } => write!(f, "Native({name})"),
            Callable::Closure(_) => write!(f, "Closure"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct ObjData {
    pub proto: Option<ObjId>,
    pub props: Vec<(String, Property)>,
    pub extensible: bool,
    pub call: Option<Callable>,
    pub quirks: Quirks,
    pub expects_immutable: bool,
    pub poison_guard: bool,
}

impl ObjData {
    pub fn new(proto: Option<ObjId>) -> Self {
        ObjData {
            proto,
            props: Vec::new(),
            extensible: true,
            call: None,
            quirks: Quirks::empty(),
            expects_immutable: false,
            poison_guard: false,
        }
    }

    pub fn find(&self, name: &str) -> Option<&Property> {
        self.props.iter().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Property> {
        self.props.iter_mut().find(|(n, _)| n == name).map(|(_, p)| p)
    }

    pub fn remove(&mut self, name: &str) -> bool {
        match self.props.iter().position(|(n, _)| n == name) {
            Some(idx) => {
                self.props.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn insert(&mut self, name: &str, property: Property) {
        match self.find_mut(name) {
            Some(existing) => *existing = property,
            None => self.props.push((name.to_string(), property)),
        }
    }
}
