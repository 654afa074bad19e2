use primlock_heap::{Heap, ObjId, RuntimeError, Value};

fn eval_body(heap: &mut Heap, src: &str, scope: Option<ObjId>) -> Result<Value, RuntimeError> {
    let program = heap.compile_body(src)?;
    heap.eval_program(&program, scope, Value::Undefined)
}

fn eval_expr(heap: &mut Heap, src: &str, scope: Option<ObjId>) -> Result<Value, RuntimeError> {
    let program = heap.compile_expression(src)?;
    heap.eval_program(&program, scope, Value::Undefined)
}

#[test]
fn arithmetic_follows_precedence() {
    let mut heap = Heap::new();
    assert_eq!(eval_expr(&mut heap, "1 + 2 * 3", None), Ok(Value::Num(7.0)));
    assert_eq!(eval_expr(&mut heap, "(1 + 2) * 3", None), Ok(Value::Num(9.0)));
    assert_eq!(eval_expr(&mut heap, "7 % 4", None), Ok(Value::Num(3.0)));
}

#[test]
fn strings_concatenate_with_display_formatting() {
    let mut heap = Heap::new();
    match eval_expr(&mut heap, "'a' + 'b' + 1", None) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "ab1"),
        other => panic!("expected a string, got {other:?}"),
    }
    match eval_expr(&mut heap, "'n=' + 0.5", None) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "n=0.5"),
        other => panic!("expected a string, got {other:?}"),
    }
}

#[test]
fn logical_operators_short_circuit() {
    let mut heap = Heap::new();
    assert_eq!(
        eval_expr(&mut heap, "0 && missing", None),
        Ok(Value::Num(0.0))
    );
    match eval_expr(&mut heap, "false || 'x'", None) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "x"),
        other => panic!("expected 'x', got {other:?}"),
    }
    assert_eq!(
        eval_expr(&mut heap, "true ? 1 : missing", None),
        Ok(Value::Num(1.0))
    );
}

#[test]
fn strict_equality_has_no_coercion() {
    let mut heap = Heap::new();
    assert_eq!(eval_expr(&mut heap, "1 === 1.0", None), Ok(Value::Bool(true)));
    assert_eq!(
        eval_expr(&mut heap, "'1' === 1", None),
        Ok(Value::Bool(false))
    );
    assert_eq!(
        eval_expr(&mut heap, "0/0 === 0/0", None),
        Ok(Value::Bool(false))
    );
}

#[test]
fn closures_capture_their_environment() {
    let mut heap = Heap::new();
    let src = "var make = function (n) { return function (m) { return n + m; }; };\n\
               var add2 = make(2);\n\
               add2(40);";
    assert_eq!(eval_body(&mut heap, src, None), Ok(Value::Num(42.0)));
}

#[test]
fn object_literals_support_nesting() {
    let mut heap = Heap::new();
    let src = "var o = { a: 1, b: { c: 2 } }; o.b.c + o.a;";
    assert_eq!(eval_body(&mut heap, src, None), Ok(Value::Num(3.0)));
}

#[test]
fn bare_calls_get_undefined_this() {
    let mut heap = Heap::new();
    let src = "var f = function () { return typeof this; }; f();";
    match eval_body(&mut heap, src, None) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "undefined"),
        other => panic!("expected 'undefined', got {other:?}"),
    }
}

#[test]
fn method_calls_bind_the_receiver() {
    let mut heap = Heap::new();
    let src = "var o = { n: 5, grab: function () { return this.n; } }; o.grab();";
    assert_eq!(eval_body(&mut heap, src, None), Ok(Value::Num(5.0)));
}

#[test]
fn unbound_names_fail_closed() {
    let mut heap = Heap::new();
    match eval_expr(&mut heap, "nothing", None) {
        Err(RuntimeError::Reference(msg)) => assert!(msg.contains("nothing"), "{msg}"),
        other => panic!("expected a reference error, got {other:?}"),
    }
    match eval_expr(&mut heap, "typeof nothing", None) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "undefined"),
        other => panic!("expected 'undefined', got {other:?}"),
    }
}

#[test]
fn var_hoisting_covers_the_whole_function() {
    let mut heap = Heap::new();
    let src = "var f = function () { x = 9; var x; return x; }; f();";
    assert_eq!(eval_body(&mut heap, src, None), Ok(Value::Num(9.0)));
}

#[test]
fn runaway_recursion_is_cut_off() {
    let mut heap = Heap::new();
    let src = "var f = function () { return f(); }; f();";
    match eval_body(&mut heap, src, None) {
        Err(RuntimeError::RecursionLimit(_)) => {}
        other => panic!("expected a recursion limit, got {other:?}"),
    }
}

#[test]
fn string_length_is_visible() {
    let mut heap = Heap::new();
    assert_eq!(eval_expr(&mut heap, "'abc'.length", None), Ok(Value::Num(3.0)));
}

#[test]
fn global_scope_is_opt_in() {
    let mut heap = Heap::new();
    let global = heap.global();
    match eval_expr(&mut heap, "typeof Object", Some(global)) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "function"),
        other => panic!("expected 'function', got {other:?}"),
    }
    match eval_expr(&mut heap, "typeof Object", None) {
        Ok(Value::Str(s)) => assert_eq!(&*s, "undefined"),
        other => panic!("expected 'undefined', got {other:?}"),
    }
}

#[test]
fn ambient_eval_reaches_the_global_object() {
    let mut heap = Heap::new();
    let global = heap.global();
    let via_eval = match eval_expr(&mut heap, "eval('Object')", Some(global)) {
        Ok(value) => value,
        Err(err) => panic!("eval failed: {err}"),
    };
    let direct = match heap.get(global, "Object") {
        Ok(value) => value,
        Err(err) => panic!("global read failed: {err}"),
    };
    assert_eq!(via_eval, direct);
}

#[test]
fn assignment_to_undeclared_names_is_an_error() {
    let mut heap = Heap::new();
    match eval_body(&mut heap, "ghost = 1;", None) {
        Err(RuntimeError::Reference(_)) => {}
        other => panic!("expected a reference error, got {other:?}"),
    }
}

#[test]
fn arithmetic_rejects_non_numbers() {
    let mut heap = Heap::new();
    match eval_expr(&mut heap, "{} - 1", None) {
        Err(RuntimeError::Type(_)) => {}
        other => panic!("expected a type error, got {other:?}"),
    }
    match eval_expr(&mut heap, "true + 1", None) {
        Err(RuntimeError::Type(_)) => {}
        other => panic!("expected a type error, got {other:?}"),
    }
}
