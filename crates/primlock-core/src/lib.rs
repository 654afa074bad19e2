//! Permit-driven lockdown of a reflective object runtime.
//!
//! A [`Permit`] tree names the parts of the ambient environment that
//! confined programs may keep. [`lockdown`] walks the object graph under
//! that tree, deletes or poisons everything the tree does not name,
//! replaces the authority-carrying evaluation entry points with safe
//! equivalents, freezes the survivors transitively, and audits the
//! result. Every observation made along the way lands in a
//! [`LockdownReport`]; only a verdict at or below the configured
//! [`Severity`] threshold arms the returned [`Vat`].
//!
//! The vat is the sole way to run code afterwards. It compiles sources
//! against explicit import records, so a confined program reaches
//! exactly what its caller handed it plus the frozen shared bindings,
//! and nothing else.

mod cleaner;
mod collab;
mod defender;
mod diagnostics;
mod error;
mod evaluator;
mod lockdown;
mod permit;
mod poison;
mod registrar;
mod scope;
mod severity;

pub use collab::{Extensions, NoExtensions, SourceChecks, StrictSourceChecks};
pub use defender::def;
pub use diagnostics::{Diagnostic, LockdownReport, Summary};
pub use error::{EvalError, LockdownError};
pub use evaluator::{nat, Compiled, EvalOptions, Module, Vat, VatState, MAX_NAT};
pub use lockdown::{lockdown, lockdown_with, LockdownConfig, LockdownOutcome, VAT_NAME};
pub use permit::{Permit, DELEGATE_NAME};
pub use scope::MissingNamePolicy;
pub use severity::Severity;
