use primlock_core::{lockdown, LockdownConfig, Permit, Vat};
use primlock_heap::{Heap, PropertyDescriptor, Value};

fn locked_vat(heap: &mut Heap) -> Vat {
    let outcome =
        lockdown(heap, &Permit::subtree([]), LockdownConfig::default()).expect("lockdown runs");
    assert!(outcome.report.ok, "report:\n{}", outcome.report.render_human());
    outcome.vat
}

#[test]
fn compiled_expressions_rebind_per_invocation() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let compiled = vat.compile_expr(&mut heap, "x + 1").expect("compile");

    let first = vat.make_imports(&mut heap).expect("imports");
    heap.set(first, "x", Value::Num(41.0)).expect("seed x");
    assert_eq!(compiled.call(&mut heap, first).expect("run"), Value::Num(42.0));

    let second = vat.make_imports(&mut heap).expect("imports");
    heap.set(second, "x", Value::Num(0.0)).expect("seed x");
    assert_eq!(compiled.call(&mut heap, second).expect("run"), Value::Num(1.0));
}

#[test]
fn confine_reads_its_endowments() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let endowments = heap.alloc_plain();
    heap.set(endowments, "x", Value::Num(41.0)).expect("seed x");
    let got = vat.confine(&mut heap, "x + 1", Some(endowments)).expect("confine");
    assert_eq!(got, Value::Num(42.0));
}

#[test]
fn modules_declare_their_prelude_requirements() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let src = "'use strict'; var fs = require('fs'); var path = require('lib/path'); fs + path;";
    let module = vat.compile_module(&mut heap, src).expect("module");
    assert_eq!(module.requirements(), ["fs", "lib/path"]);

    // A loader satisfies the requirements by endowing a require function.
    let imports = vat.make_imports(&mut heap).expect("imports");
    let require = heap.alloc_native("require", |_, _, args| match args.first() {
        Some(Value::Str(name)) if &**name == "fs" => Ok(Value::Num(3.0)),
        Some(Value::Str(name)) if &**name == "lib/path" => Ok(Value::Num(4.0)),
        other => panic!("unexpected module request: {other:?}"),
    });
    heap.set(imports, "require", Value::Obj(require)).expect("seed require");
    assert_eq!(module.instantiate(&mut heap, imports).expect("instantiate"), Value::Num(7.0));
}

#[test]
fn modules_without_a_prelude_have_no_requirements() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let module =
        vat.compile_module(&mut heap, "var doubled = x * 2; doubled + y;").expect("module");
    assert!(module.requirements().is_empty());

    let imports = vat.make_imports(&mut heap).expect("imports");
    heap.set(imports, "x", Value::Num(3.0)).expect("seed x");
    heap.set(imports, "y", Value::Num(1.0)).expect("seed y");
    assert_eq!(module.instantiate(&mut heap, imports).expect("instantiate"), Value::Num(7.0));
}

#[test]
fn vat_function_builds_callable_closures() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let add = vat
        .function(&mut heap, &["a".to_string(), "b".to_string()], "return a + b;")
        .expect("function");
    let sum = heap
        .call(Value::Obj(add), Value::Undefined, &[Value::Num(2.0), Value::Num(3.0)])
        .expect("call");
    assert_eq!(sum, Value::Num(5.0));
}

#[test]
fn tamed_eval_takes_expressions_and_bodies() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    assert_eq!(vat.eval(&mut heap, "1 + 2").expect("expression"), Value::Num(3.0));
    assert_eq!(vat.eval(&mut heap, "var t = 2; t * 3").expect("body"), Value::Num(6.0));
}

#[test]
fn guest_eval_evaluates_strings_and_passes_other_values_through() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    assert_eq!(vat.confine(&mut heap, "eval('1 + 2')", None).expect("string"), Value::Num(3.0));
    assert_eq!(vat.confine(&mut heap, "eval(7)", None).expect("number"), Value::Num(7.0));
}

#[test]
fn guest_function_ctor_is_tamed() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let made = vat
        .confine(&mut heap, "Function('a', 'b', 'return a * b;')", None)
        .expect("guest constructor");
    let product = heap
        .call(made, Value::Undefined, &[Value::Num(6.0), Value::Num(7.0)])
        .expect("call the produced function");
    assert_eq!(product, Value::Num(42.0));

    let direct = vat
        .confine(&mut heap, "Function('n', 'return n + 1;')(41)", None)
        .expect("construct and call");
    assert_eq!(direct, Value::Num(42.0));
}

#[test]
fn guest_nat_guards_counts() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    assert_eq!(vat.confine(&mut heap, "vat.Nat(5)", None).expect("count"), Value::Num(5.0));
    for bad in ["vat.Nat(-1)", "vat.Nat(1.5)", "vat.Nat('five')"] {
        if vat.confine(&mut heap, bad, None).is_ok() {
            panic!("expected {bad} to be rejected");
        }
    }
}

#[test]
fn guest_log_returns_undefined() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let got = vat.confine(&mut heap, "vat.log('confined hello')", None).expect("log");
    assert_eq!(got, Value::Undefined);
}

#[test]
fn copy_to_imports_hides_bindings_from_enumeration() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let imports = vat.make_imports(&mut heap).expect("imports");
    let bag = heap.alloc_plain();
    heap.set(bag, "k", Value::Num(9.0)).expect("seed k");
    vat.copy_to_imports(&mut heap, imports, bag).expect("copy");

    match heap.own_descriptor(imports, "k").expect("descriptor") {
        Some(PropertyDescriptor::Data { value, enumerable, configurable, .. }) => {
            assert_eq!(value, Value::Num(9.0));
            assert!(!enumerable);
            assert!(configurable);
        }
        other => panic!("expected a data binding, got {other:?}"),
    }

    let compiled = vat.compile_expr(&mut heap, "k * 2").expect("compile");
    assert_eq!(compiled.call(&mut heap, imports).expect("run"), Value::Num(18.0));
}

#[test]
fn def_freezes_the_reachable_graph() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let outer = heap.alloc_plain();
    let inner = heap.alloc_plain();
    heap.set(outer, "inner", Value::Obj(inner)).expect("link");
    vat.def(&mut heap, &Value::Obj(outer)).expect("def");
    assert!(heap.is_frozen(outer));
    assert!(heap.is_frozen(inner));
    primlock_core::def(&mut heap, &Value::Num(3.0)).expect("primitives pass through");
}

#[test]
fn guest_vat_surface_is_frozen() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    match vat.confine(&mut heap, "vat.Nat = 1", None) {
        Err(_) => {}
        Ok(_) => panic!("expected the surface to be sealed"),
    }
    let still = vat.confine(&mut heap, "vat.Nat(4)", None).expect("surface intact");
    assert_eq!(still, Value::Num(4.0));
}

#[test]
fn guest_is_follows_identity_not_coercion() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    for (src, expected) in [
        ("vat.is(2, 2)", true),
        ("vat.is(0 / 0, 0 / 0)", true),
        ("vat.is(0, -0)", false),
        ("vat.is(1, '1')", false),
    ] {
        assert_eq!(vat.confine(&mut heap, src, None).expect(src), Value::Bool(expected), "{src}");
    }
}

#[test]
fn guest_const_func_pins_functions() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let got = vat
        .confine(&mut heap, "vat.constFunc(function (n) { return n + 1; })(4)", None)
        .expect("pinned function still calls");
    assert_eq!(got, Value::Num(5.0));
    let frozen = vat
        .confine(&mut heap, "Object.isFrozen(vat.constFunc(function (n) { return n; }))", None)
        .expect("probe");
    assert_eq!(frozen, Value::Bool(true));
    let proto = vat
        .confine(&mut heap, "vat.constFunc(function (n) { return n; }).prototype === null", None)
        .expect("probe");
    assert_eq!(proto, Value::Bool(true));
}

#[test]
fn confine_defends_what_it_is_endowed_with() {
    let mut heap = Heap::new();
    let vat = locked_vat(&mut heap);
    let tool = heap.alloc_plain();
    heap.set(tool, "teeth", Value::Num(3.0)).expect("seed tool");
    let endowments = heap.alloc_plain();
    heap.set(endowments, "tool", Value::Obj(tool)).expect("endow");
    let got = vat.confine(&mut heap, "tool.teeth", Some(endowments)).expect("confine");
    assert_eq!(got, Value::Num(3.0));
    // The endowed object itself was pinned, not a copy of it.
    assert!(heap.is_frozen(tool));
    match heap.set(tool, "teeth", Value::Num(4.0)) {
        Err(_) => {}
        Ok(()) => panic!("expected the endowed object to be sealed"),
    }
}
