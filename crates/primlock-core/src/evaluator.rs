//! The confined evaluator: compilation entry points that refuse to run
//! until the environment they close over has been locked down.
//!
//! All entry points share one [`EvalCore`]. Its state starts `Dirty` and
//! moves to `Locked` exactly once, when a lockdown pass ends with an
//! acceptable verdict. Until then every operation fails, which is the
//! fail-closed posture: an untamed graph is never evaluated against.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::OnceLock;

use primlock_heap::{
    format_num, same_value, Heap, ObjId, Program, PropertyDescriptor, RuntimeError, Value,
};
use regex::Regex;

use crate::collab::SourceChecks;
use crate::defender;
use crate::error::{EvalError, LockdownError};
use crate::scope::{make_scope_record, MissingNamePolicy};

/// Largest number exactly representable as a count.
pub const MAX_NAT: f64 = 9_007_199_254_740_991.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VatState {
    Dirty,
    Locked,
}

#[derive(Debug, Clone, Default)]
pub struct EvalOptions {
    pub missing_name: MissingNamePolicy,
}

pub(crate) struct EvalCore {
    state: Cell<VatState>,
    shared_imports: ObjId,
    checks: Box<dyn SourceChecks>,
    options: EvalOptions,
}

impl EvalCore {
    pub(crate) fn new(
        shared_imports: ObjId,
        checks: Box<dyn SourceChecks>,
        options: EvalOptions,
    ) -> Rc<Self> {
        Rc::new(Self { state: Cell::new(VatState::Dirty), shared_imports, checks, options })
    }

    pub(crate) fn lock(&self) {
        self.state.set(VatState::Locked);
    }

    pub(crate) fn state(&self) -> VatState {
        self.state.get()
    }

    fn ensure_locked(&self) -> Result<(), EvalError> {
        match self.state.get() {
            VatState::Locked => Ok(()),
            VatState::Dirty => Err(EvalError::NotLocked),
        }
    }

    fn fresh_imports(&self, heap: &mut Heap) -> ObjId {
        heap.alloc(Some(self.shared_imports))
    }

    /// Runs a compiled program against a fresh scope record. Each
    /// invocation builds its own record, so a compiled program is freely
    /// reusable and reentrant across import records.
    fn run_compiled(
        &self,
        heap: &mut Heap,
        program: &Rc<Program>,
        names: &[String],
        imports_arg: Option<&Value>,
    ) -> Result<Value, RuntimeError> {
        self.ensure_locked().map_err(EvalError::into_runtime)?;
        let imports = match imports_arg {
            Some(Value::Obj(id)) => *id,
            Some(Value::Undefined) | None => self.fresh_imports(heap),
            Some(other) => {
                return Err(RuntimeError::type_error(format!(
                    "imports must be an object, got {}",
                    other.kind_name()
                )))
            }
        };
        let record = make_scope_record(heap, imports, names, self.options.missing_name)?;
        heap.eval_program(program, Some(record), Value::Undefined)
    }
}

/// Handle to a compiled expression living in the heap. The underlying
/// function object is frozen and can be handed to confined code directly.
#[derive(Debug)]
pub struct Compiled {
    func: ObjId,
}

impl Compiled {
    pub fn id(&self) -> ObjId {
        self.func
    }

    pub fn call(&self, heap: &mut Heap, imports: ObjId) -> Result<Value, EvalError> {
        heap.call(Value::Obj(self.func), Value::Undefined, &[Value::Obj(imports)])
            .map_err(EvalError::from)
    }
}

/// A compiled module body plus the names it requires from its imports.
#[derive(Debug)]
pub struct Module {
    func: ObjId,
    requirements: Vec<String>,
}

impl Module {
    pub fn id(&self) -> ObjId {
        self.func
    }

    pub fn requirements(&self) -> &[String] {
        &self.requirements
    }

    pub fn instantiate(&self, heap: &mut Heap, imports: ObjId) -> Result<Value, EvalError> {
        heap.call(Value::Obj(self.func), Value::Undefined, &[Value::Obj(imports)])
            .map_err(EvalError::from)
    }
}

/// The capability bundle a successful lockdown returns.
#[derive(Clone)]
pub struct Vat {
    core: Rc<EvalCore>,
}

impl std::fmt::Debug for Vat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vat").field("state", &self.core.state()).finish()
    }
}

impl Vat {
    pub(crate) fn new(core: Rc<EvalCore>) -> Self {
        Self { core }
    }

    pub fn state(&self) -> VatState {
        self.core.state()
    }

    pub fn is_locked(&self) -> bool {
        self.core.state() == VatState::Locked
    }

    /// The frozen record of tamed globals every import record delegates to.
    pub fn shared_imports(&self) -> ObjId {
        self.core.shared_imports
    }

    /// Compiles an expression into a reusable closure. The closure takes an
    /// import record and evaluates the expression with the record's
    /// contents as its entire world.
    pub fn compile_expr(&self, heap: &mut Heap, src: &str) -> Result<Compiled, EvalError> {
        self.core.ensure_locked()?;
        let func = compile_expr_object(heap, &self.core, src)?;
        Ok(Compiled { func })
    }

    /// Evaluates an expression against a throwaway import record seeded
    /// with deeply-defended endowments.
    pub fn confine(
        &self,
        heap: &mut Heap,
        src: &str,
        endowments: Option<ObjId>,
    ) -> Result<Value, EvalError> {
        self.core.ensure_locked()?;
        let imports = self.core.fresh_imports(heap);
        if let Some(from) = endowments {
            copy_imports(heap, imports, from)?;
        }
        defender::defend(heap, &[("<imports>".to_string(), imports)]).map_err(defense_error)?;
        let compiled = self.compile_expr(heap, src)?;
        compiled.call(heap, imports)
    }

    /// Compiles a statement body whose completion value is the module's
    /// export. Requirements come from the stereotyped `require` prelude;
    /// the body's free names still resolve only through the import record
    /// it is instantiated against.
    pub fn compile_module(&self, heap: &mut Heap, src: &str) -> Result<Module, EvalError> {
        self.core.ensure_locked()?;
        let (func, requirements) = compile_module_object(heap, &self.core, src)?;
        Ok(Module { func, requirements })
    }

    /// The indirect-eval equivalent: expression first, statement body as a
    /// fallback, always against a fresh import record.
    pub fn eval(&self, heap: &mut Heap, src: &str) -> Result<Value, EvalError> {
        self.core.ensure_locked()?;
        let imports = self.core.fresh_imports(heap);
        eval_source(heap, &self.core, src, imports)
    }

    /// The safe `Function` equivalent. The produced function closes over
    /// the shared imports and nothing else.
    pub fn function(&self, heap: &mut Heap, params: &[String], body: &str) -> Result<ObjId, EvalError> {
        self.core.ensure_locked()?;
        self.core.checks.body_names(heap, body).map_err(EvalError::Source)?;
        heap.make_function(params, body, Some(self.core.shared_imports))
            .map_err(EvalError::Source)
    }

    /// A fresh import record delegating to the shared tamed globals.
    pub fn make_imports(&self, heap: &mut Heap) -> Result<ObjId, EvalError> {
        self.core.ensure_locked()?;
        Ok(self.core.fresh_imports(heap))
    }

    /// Copies every own property of `from` onto `imports`, hidden from
    /// enumeration but still replaceable.
    pub fn copy_to_imports(
        &self,
        heap: &mut Heap,
        imports: ObjId,
        from: ObjId,
    ) -> Result<(), EvalError> {
        self.core.ensure_locked()?;
        copy_imports(heap, imports, from)?;
        Ok(())
    }

    /// Deep-freezes the graph below `value`.
    pub fn def(&self, heap: &mut Heap, value: &Value) -> Result<(), EvalError> {
        defender::def(heap, value).map_err(defense_error)
    }
}

fn defense_error(err: LockdownError) -> EvalError {
    match err {
        LockdownError::DefenseFailed { path, source } => EvalError::Defense { path, source },
        other => EvalError::Defense {
            path: "<imports>".to_string(),
            source: RuntimeError::HostFault(other.to_string()),
        },
    }
}

/// Count validation: accepts exactly the non-negative integers that fit
/// without loss in a number, and nothing else.
pub fn nat(value: f64) -> Result<f64, RuntimeError> {
    if value.is_nan() {
        return Err(RuntimeError::range("NaN not natural"));
    }
    if value < 0.0 {
        return Err(RuntimeError::range("negative"));
    }
    if value.floor() != value {
        return Err(RuntimeError::range("not integral"));
    }
    if value > MAX_NAT {
        return Err(RuntimeError::range("too big"));
    }
    Ok(value)
}

pub(crate) fn copy_imports(
    heap: &mut Heap,
    imports: ObjId,
    from: ObjId,
) -> Result<(), RuntimeError> {
    for name in heap.own_property_names(from)? {
        let Some(descriptor) = heap.own_descriptor(from, &name)? else { continue };
        heap.define_property(
            imports,
            &name,
            descriptor.with_enumerable(false).with_configurable(true),
        )?;
    }
    Ok(())
}

fn directive_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^['"][\w\s]*['"]$"#).ok()).as_ref()
}

fn require_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r#"^(?:\w*\s*[\w$.]*\s*=)?\s*require\s*\(\s*['"]([\w$./]+)['"]\s*\)$"#).ok()
        })
        .as_ref()
}

/// Recognises the stereotyped module prelude: any run of directive
/// statements, then a run of `name = require("module")` statements. The
/// scan stops at the first statement that fits neither, so requirements
/// are exactly the module's immediate synchronous dependencies, which is
/// all a loader needs to schedule instantiation order.
fn scan_requirements(src: &str) -> Vec<String> {
    let (Some(directive), Some(require)) = (directive_pattern(), require_pattern()) else {
        return Vec::new();
    };
    let stmts: Vec<&str> = src.split(';').collect();
    let mut found = Vec::new();
    let mut i = 0;
    while i < stmts.len() {
        let stmt = stmts[i].trim();
        if !stmt.is_empty() && !directive.is_match(stmt) {
            break;
        }
        i += 1;
    }
    while i < stmts.len() {
        let stmt = stmts[i].trim();
        if !stmt.is_empty() {
            let Some(caps) = require.captures(stmt) else { break };
            if let Some(name) = caps.get(1) {
                found.push(name.as_str().to_string());
            }
        }
        i += 1;
    }
    found
}

/// Builds the in-heap closure for a compiled program. Left unfrozen so the
/// caller can attach metadata first.
fn compiled_object(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    program: Rc<Program>,
    names: Vec<String>,
) -> ObjId {
    let core = Rc::clone(core);
    heap.alloc_native("compiled", move |heap, _this, args| {
        core.run_compiled(heap, &program, &names, args.first())
    })
}

fn compile_expr_object(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    src: &str,
) -> Result<ObjId, EvalError> {
    let names = core.checks.expression_names(heap, src).map_err(EvalError::Source)?;
    let program = heap.compile_expression(src).map_err(EvalError::Source)?;
    let func = compiled_object(heap, core, program, names);
    heap.freeze(func)?;
    Ok(func)
}

/// Expression-first evaluation with statement-body fallback, sharing the
/// admission checks with the compile entry points.
fn eval_source(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    src: &str,
    imports: ObjId,
) -> Result<Value, EvalError> {
    let (program, names) = match core.checks.expression_names(heap, src) {
        Ok(names) => (heap.compile_expression(src).map_err(EvalError::Source)?, names),
        Err(RuntimeError::Syntax(_)) => {
            let names = core.checks.body_names(heap, src).map_err(EvalError::Source)?;
            (heap.compile_body(src).map_err(EvalError::Source)?, names)
        }
        Err(other) => return Err(EvalError::Source(other)),
    };
    let record = make_scope_record(heap, imports, &names, core.options.missing_name)?;
    heap.eval_program(&program, Some(record), Value::Undefined).map_err(EvalError::Runtime)
}

/// The in-heap face of the vat: what confined code sees as its capability
/// object, and the safe replacements for the ambient evaluation entry
/// points.
pub(crate) struct VatSurface {
    pub vat: ObjId,
    pub eval_fn: ObjId,
    pub function_fn: ObjId,
}

pub(crate) fn install_vat_surface(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    extensions: Vec<(String, Value)>,
) -> Result<VatSurface, RuntimeError> {
    let vat = heap.alloc_plain();

    let compile_core = Rc::clone(core);
    let compile_expr = heap.alloc_native("compileExpr", move |heap, _this, args| {
        compile_core.ensure_locked().map_err(EvalError::into_runtime)?;
        let src = string_arg(args.first(), "compileExpr")?;
        compile_expr_object(heap, &compile_core, &src).map(Value::Obj).map_err(EvalError::into_runtime)
    });

    let confine_core = Rc::clone(core);
    let confine = heap.alloc_native("confine", move |heap, _this, args| {
        let src = string_arg(args.first(), "confine")?;
        let endowments = match args.get(1) {
            Some(Value::Obj(id)) => Some(*id),
            Some(Value::Undefined) | None => None,
            Some(other) => {
                return Err(RuntimeError::type_error(format!(
                    "endowments must be an object, got {}",
                    other.kind_name()
                )))
            }
        };
        guest_confine(heap, &confine_core, &src, endowments)
    });

    let module_core = Rc::clone(core);
    let compile_module = heap.alloc_native("compileModule", move |heap, _this, args| {
        let src = string_arg(args.first(), "compileModule")?;
        guest_compile_module(heap, &module_core, &src)
    });

    let eval_core = Rc::clone(core);
    let eval_fn = heap.alloc_native("eval", move |heap, _this, args| {
        match args.first() {
            Some(Value::Str(src)) => {
                eval_core.ensure_locked().map_err(EvalError::into_runtime)?;
                let src = src.to_string();
                let imports = eval_core.fresh_imports(heap);
                eval_source(heap, &eval_core, &src, imports).map_err(EvalError::into_runtime)
            }
            // Indirect eval of a non-string yields the value unchanged.
            Some(other) => Ok(other.clone()),
            None => Ok(Value::Undefined),
        }
    });

    let function_core = Rc::clone(core);
    let function_fn = heap.alloc_native("Function", move |heap, _this, args| {
        function_core.ensure_locked().map_err(EvalError::into_runtime)?;
        let mut params = Vec::new();
        let mut body = String::new();
        if let Some((last, init)) = args.split_last() {
            for arg in init {
                match arg {
                    Value::Str(name) => params.push(name.trim().to_string()),
                    other => {
                        return Err(RuntimeError::type_error(format!(
                            "parameter names must be strings, got {}",
                            other.kind_name()
                        )))
                    }
                }
            }
            body = match last {
                Value::Str(text) => text.to_string(),
                other => {
                    return Err(RuntimeError::type_error(format!(
                        "function body must be a string, got {}",
                        other.kind_name()
                    )))
                }
            };
        }
        function_core.checks.body_names(heap, &body)?;
        let func = heap.make_function(&params, &body, Some(function_core.shared_imports))?;
        Ok(Value::Obj(func))
    });
    heap.define_property(
        function_fn,
        "prototype",
        PropertyDescriptor::frozen_data(Value::Obj(heap.intrinsics().function_prototype)),
    )?;

    let def_fn = heap.alloc_native("def", move |heap, _this, args| {
        let value = args.first().cloned().unwrap_or(Value::Undefined);
        defender::def(heap, &value).map_err(|err| defense_error(err).into_runtime())?;
        Ok(value)
    });

    let nat_fn = heap.alloc_native("Nat", move |_heap, _this, args| match args.first() {
        Some(Value::Num(n)) => nat(*n).map(Value::Num),
        _ => Err(RuntimeError::range("not a number")),
    });

    let log_fn = heap.alloc_native("log", move |heap, _this, args| {
        let text = args.first().map(|arg| display_value(heap, arg)).unwrap_or_default();
        tracing::info!(target: "primlock::guest", "{text}");
        Ok(Value::Undefined)
    });

    let is_fn = heap.alloc_native("is", move |_heap, _this, args| {
        let a = args.first().cloned().unwrap_or(Value::Undefined);
        let b = args.get(1).cloned().unwrap_or(Value::Undefined);
        Ok(Value::Bool(same_value(&a, &b)))
    });

    // Pins a function that must never act as a constructor: prototype
    // nulled, then shallow-frozen.
    let const_func_fn = heap.alloc_native("constFunc", move |heap, _this, args| {
        let func = object_arg(args.first(), "constFunc")?;
        if !heap.is_callable(func) {
            return Err(RuntimeError::type_error("constFunc expects a function"));
        }
        let pinned = PropertyDescriptor::Data {
            value: Value::Null,
            writable: false,
            enumerable: false,
            configurable: false,
        };
        if let Err(err) = heap.define_property(func, "prototype", pinned) {
            match heap.own_descriptor(func, "prototype")? {
                Some(PropertyDescriptor::Data { value: Value::Null, .. }) => {}
                _ => return Err(err),
            }
        }
        heap.freeze(func)?;
        Ok(Value::Obj(func))
    });

    let imports_core = Rc::clone(core);
    let make_imports_fn = heap.alloc_native("makeImports", move |heap, _this, _args| {
        imports_core.ensure_locked().map_err(EvalError::into_runtime)?;
        Ok(Value::Obj(imports_core.fresh_imports(heap)))
    });

    let copy_fn = heap.alloc_native("copyToImports", move |heap, _this, args| {
        let imports = object_arg(args.first(), "imports")?;
        let from = object_arg(args.get(1), "source")?;
        copy_imports(heap, imports, from)?;
        Ok(Value::Obj(imports))
    });

    let entries = [
        ("compileExpr", compile_expr),
        ("confine", confine),
        ("compileModule", compile_module),
        ("eval", eval_fn),
        ("Function", function_fn),
        ("def", def_fn),
        ("Nat", nat_fn),
        ("log", log_fn),
        ("is", is_fn),
        ("constFunc", const_func_fn),
        ("makeImports", make_imports_fn),
        ("copyToImports", copy_fn),
    ];
    for (name, func) in entries {
        heap.set(vat, name, Value::Obj(func))?;
    }
    heap.set(vat, "sharedImports", Value::Obj(core.shared_imports))?;
    for (name, value) in extensions {
        heap.set(vat, &name, value)?;
    }
    Ok(VatSurface { vat, eval_fn, function_fn })
}

fn guest_confine(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    src: &str,
    endowments: Option<ObjId>,
) -> Result<Value, RuntimeError> {
    core.ensure_locked().map_err(EvalError::into_runtime)?;
    let imports = core.fresh_imports(heap);
    if let Some(from) = endowments {
        copy_imports(heap, imports, from)?;
    }
    defender::defend(heap, &[("<imports>".to_string(), imports)])
        .map_err(|err| defense_error(err).into_runtime())?;
    let func = compile_expr_object(heap, core, src).map_err(EvalError::into_runtime)?;
    heap.call(Value::Obj(func), Value::Undefined, &[Value::Obj(imports)])
}

/// Shared by the host and guest module entry points: the compiled closure
/// plus a frozen in-heap record naming its requirements.
fn compile_module_object(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    src: &str,
) -> Result<(ObjId, Vec<String>), EvalError> {
    let names = core.checks.body_names(heap, src).map_err(EvalError::Source)?;
    let program = heap.compile_body(src).map_err(EvalError::Source)?;
    let func = compiled_object(heap, core, program, names);
    let requirements = scan_requirements(src);
    let record = heap.alloc_proto_less();
    for name in &requirements {
        heap.define_property(record, name, PropertyDescriptor::frozen_data(Value::Bool(true)))?;
    }
    heap.prevent_extensions(record)?;
    heap.define_property(
        func,
        "requirements",
        PropertyDescriptor::frozen_data(Value::Obj(record)),
    )?;
    heap.freeze(func)?;
    Ok((func, requirements))
}

fn guest_compile_module(
    heap: &mut Heap,
    core: &Rc<EvalCore>,
    src: &str,
) -> Result<Value, RuntimeError> {
    core.ensure_locked().map_err(EvalError::into_runtime)?;
    let (func, _) = compile_module_object(heap, core, src).map_err(EvalError::into_runtime)?;
    Ok(Value::Obj(func))
}

fn string_arg(arg: Option<&Value>, what: &str) -> Result<String, RuntimeError> {
    match arg {
        Some(Value::Str(text)) => Ok(text.to_string()),
        other => Err(RuntimeError::type_error(format!(
            "{what} expects a source string, got {}",
            other.map(|v| v.kind_name()).unwrap_or("nothing")
        ))),
    }
}

fn object_arg(arg: Option<&Value>, what: &str) -> Result<ObjId, RuntimeError> {
    match arg {
        Some(Value::Obj(id)) => Ok(*id),
        other => Err(RuntimeError::type_error(format!(
            "{what} must be an object, got {}",
            other.map(|v| v.kind_name()).unwrap_or("nothing")
        ))),
    }
}

fn display_value(heap: &Heap, value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Num(n) => format_num(*n),
        Value::Str(s) => s.to_string(),
        Value::Obj(id) => format!("[{} {id}]", heap.type_of(value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::StrictSourceChecks;

    fn dirty_vat(heap: &mut Heap) -> Vat {
        let shared = heap.alloc_proto_less();
        let core = EvalCore::new(shared, Box::new(StrictSourceChecks::default()), EvalOptions::default());
        Vat::new(core)
    }

    #[test]
    fn everything_fails_closed_before_lock() {
        let mut heap = Heap::new();
        let vat = dirty_vat(&mut heap);
        assert!(!vat.is_locked());
        match vat.compile_expr(&mut heap, "1 + 1") {
            Err(EvalError::NotLocked) => {}
            other => panic!("expected NotLocked, got {other:?}"),
        }
        match vat.confine(&mut heap, "1 + 1", None) {
            Err(EvalError::NotLocked) => {}
            other => panic!("expected NotLocked, got {other:?}"),
        }
        match vat.eval(&mut heap, "1 + 1") {
            Err(EvalError::NotLocked) => {}
            other => panic!("expected NotLocked, got {other:?}"),
        }
    }

    #[test]
    fn requirements_scan_recognises_the_stereotyped_prelude() {
        assert_eq!(
            scan_requirements(
                "'use strict'; var fs = require('fs'); var sub = require(\"lib/util\"); fs(sub);"
            ),
            vec!["fs".to_string(), "lib/util".to_string()]
        );
        // The first statement that is neither directive nor require ends
        // the prelude; later requires are runtime calls, not dependencies.
        assert_eq!(
            scan_requirements("var a = require('a'); a + 1; var b = require('b');"),
            vec!["a".to_string()]
        );
        assert_eq!(scan_requirements("x + 1"), Vec::<String>::new());
        assert_eq!(scan_requirements("'use strict'; x;"), Vec::<String>::new());
    }

    #[test]
    fn nat_accepts_counts_and_rejects_the_rest() {
        assert_eq!(nat(0.0).expect("zero"), 0.0);
        assert_eq!(nat(MAX_NAT).expect("max"), MAX_NAT);
        for (input, needle) in [
            (f64::NAN, "NaN not natural"),
            (-1.0, "negative"),
            (1.5, "not integral"),
            (MAX_NAT + 1.0, "too big"),
            (f64::INFINITY, "too big"),
        ] {
            match nat(input) {
                Err(RuntimeError::Range(msg)) => {
                    if !msg.contains(needle) {
                        panic!("expected {needle:?} for {input}, got {msg}");
                    }
                }
                other => panic!("expected range error for {input}, got {other:?}"),
            }
        }
    }
}
