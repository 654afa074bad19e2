//! A mutable, reflective, prototype-delegating object runtime with a
//! small strict expression language on top.
//!
//! Objects live in an arena and delegate lookups along explicit
//! prototype links. Every reflective operation (enumeration, descriptor
//! lookup, delete, freeze) is filtered through a per-object [`Quirks`]
//! mask so tests can model hostile or merely broken host objects, from
//! deletes that silently bounce back to enumeration that fails outright.
//!
//! A fresh [`Heap`] comes with the standard unsafe world installed: a
//! global object, `Object` and `Function`, and an ambient `eval` that
//! sees everything. Confining that world is someone else's job; this
//! crate only guarantees the mechanics are faithful.

mod ast;
mod env;
mod error;
mod heap;
mod interp;
mod lexer;
mod object;
mod parser;
mod quirk;
mod value;
mod verify;

pub use ast::Program;
pub use error::RuntimeError;
pub use heap::{Heap, Intrinsics, RuntimeLimits};
pub use object::PropertyDescriptor;
pub use quirk::Quirks;
pub use value::{format_num, same_value, strict_equals, ObjId, Value};
