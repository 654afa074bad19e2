use primlock_heap::RuntimeError;
use thiserror::Error;

/// Structural failures that abort a lockdown pass outright.
///
/// These are distinct from the per-property defects accumulated in the
/// report: a report describes a finished pass, an error means the pass could
/// not finish coherently.
#[derive(Debug, Error)]
pub enum LockdownError {
    #[error("primordial reachable through multiple paths: {path}")]
    MultiplePaths { path: String },
    #[error("delegation cycle detected at {path}")]
    DelegationCycle { path: String },
    #[error("permit tree root must be a subtree node")]
    RootNotSubtree,
    #[error("permits may not rebind the reserved root name {name:?}")]
    PermitCollision { name: String },
    #[error("defense failed at {path}: {source}")]
    DefenseFailed { path: String, source: RuntimeError },
    #[error("extensions provider failed: {0}")]
    Extensions(#[source] anyhow::Error),
    #[error(transparent)]
    Heap(#[from] RuntimeError),
}

/// Failures surfaced by the confined evaluator.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The environment never reached, or has not yet reached, the locked
    /// state. Evaluation refuses to run against an untamed graph.
    #[error("evaluation is disabled: environment is not locked")]
    NotLocked,
    /// The source text failed verification or compilation.
    #[error("source rejected: {0}")]
    Source(RuntimeError),
    /// Deep-freezing an endowment or import record failed partway.
    #[error("defense failed at {path}: {source}")]
    Defense { path: String, source: RuntimeError },
    /// The confined program itself faulted.
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

impl EvalError {
    /// Collapses into the single-error world confined code lives in.
    pub fn into_runtime(self) -> RuntimeError {
        match self {
            EvalError::NotLocked => RuntimeError::type_error("evaluation is disabled: environment is not locked"),
            EvalError::Source(err) | EvalError::Runtime(err) => err,
            EvalError::Defense { path, source } => {
                RuntimeError::type_error(format!("cannot defend {path}: {source}"))
            }
        }
    }
}
