use thiserror::Error;

use crate::value::ObjId;

/// Guest-visible error taxonomy.
///
/// The first five variants are the error classes sandboxed code can raise
/// and observe. The rest are host-side failures: resource limits and the
/// introspection faults a broken runtime can produce, which callers must
/// treat as anomalies rather than crashes.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RuntimeError {
    #[error("TypeError: {0}")]
    Type(String),
    #[error("ReferenceError: {0}")]
    Reference(String),
    #[error("RangeError: {0}")]
    Range(String),
    #[error("SyntaxError: {0}")]
    Syntax(String),
    #[error("EvalError: {0}")]
    Eval(String),
    #[error("host fault: {0}")]
    HostFault(String),
    #[error("call depth limit of {0} exceeded")]
    RecursionLimit(usize),
    #[error("expression nesting limit of {0} exceeded")]
    ParseDepth(usize),
    #[error("own-property enumeration failed on {0}")]
    EnumerationFailed(ObjId),
    #[error("descriptor lookup failed on {0}")]
    DescriptorLookupFailed(ObjId),
    #[error("delegate lookup failed on {0}")]
    ProtoLookupFailed(ObjId),
}

impl RuntimeError {
    pub fn type_error(msg: impl Into<String>) -> Self {
        RuntimeError::Type(msg.into())
    }

    pub fn reference(msg: impl Into<String>) -> Self {
        RuntimeError::Reference(msg.into())
    }

    pub fn range(msg: impl Into<String>) -> Self {
        RuntimeError::Range(msg.into())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        RuntimeError::Syntax(msg.into())
    }

    pub fn eval_error(msg: impl Into<String>) -> Self {
        RuntimeError::Eval(msg.into())
    }
}
