use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::ast::{AssignTarget, BinaryOp, Expr, LogicalOp, Program, Stmt, UnaryOp};
use crate::error::RuntimeError;
use crate::heap::Heap;
use crate::object::ClosureData;
use crate::value::{format_num, strict_equals, ObjId, Value};

/// One activation's variable bindings.
pub(crate) struct Frame {
    vars: RefCell<HashMap<String, Value>>,
}

impl Frame {
    fn new() -> Self {
        Frame {
            vars: RefCell::new(HashMap::new()),
        }
    }
}

/// A chain of activation frames, innermost last, plus an optional scope
/// object consulted for every name no frame binds. Without a scope
/// object, unbound names fail rather than reaching anything ambient.
#[derive(Clone)]
pub(crate) struct LexicalEnv {
    frames: Vec<Rc<Frame>>,
    scope: Option<ObjId>,
}

impl LexicalEnv {
    pub fn root(scope: Option<ObjId>) -> Self {
        LexicalEnv {
            frames: vec![Rc::new(Frame::new())],
            scope,
        }
    }

    fn child(&self) -> Self {
        let mut frames = self.frames.clone();
        frames.push(Rc::new(Frame::new()));
        LexicalEnv {
            frames,
            scope: self.scope,
        }
    }

    fn top_frame(&self) -> &Frame {
        &self.frames[self.frames.len() - 1]
    }
}

enum Flow {
    Normal(Value),
    Return(Value),
}

/// Runs a program to completion. The completion value is the value of
/// the last expression statement, or `undefined` if there was none.
pub(crate) fn eval_program(
    heap: &mut Heap,
    program: &Program,
    env: &LexicalEnv,
    this: Value,
) -> Result<Value, RuntimeError> {
    match exec_block(heap, program, env, &this)? {
        Flow::Normal(value) | Flow::Return(value) => Ok(value),
    }
}

pub(crate) fn call_closure(
    heap: &mut Heap,
    data: &ClosureData,
    this: Value,
    args: &[Value],
) -> Result<Value, RuntimeError> {
    let env = data.env.child();
    {
        let mut vars = env.top_frame().vars.borrow_mut();
        for (i, param) in data.def.params.iter().enumerate() {
            vars.insert(
                param.clone(),
                args.get(i).cloned().unwrap_or(Value::Undefined),
            );
        }
    }
    match exec_block(heap, &data.def.body, &env, &this)? {
        Flow::Return(value) => Ok(value),
        Flow::Normal(_) => Ok(Value::Undefined),
    }
}

fn exec_block(
    heap: &mut Heap,
    program: &Program,
    env: &LexicalEnv,
    this: &Value,
) -> Result<Flow, RuntimeError> {
    {
        let mut vars = env.top_frame().vars.borrow_mut();
        for stmt in &program.stmts {
            if let Stmt::Var { name, .. } = stmt {
                vars.entry(name.clone()).or_insert(Value::Undefined);
            }
        }
    }
    let mut last = Value::Undefined;
    for stmt in &program.stmts {
        match stmt {
            Stmt::Expr(expr) => {
                last = eval_expr(heap, expr, env, this)?;
            }
            Stmt::Var { name, init } => {
                if let Some(expr) = init {
                    let value = eval_expr(heap, expr, env, this)?;
                    env.top_frame().vars.borrow_mut().insert(name.clone(), value);
                }
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => eval_expr(heap, expr, env, this)?,
                    None => Value::Undefined,
                };
                return Ok(Flow::Return(value));
            }
        }
    }
    Ok(Flow::Normal(last))
}

fn eval_expr(
    heap: &mut Heap,
    expr: &Expr,
    env: &LexicalEnv,
    this: &Value,
) -> Result<Value, RuntimeError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Num(n) => Ok(Value::Num(*n)),
        Expr::Str(s) => Ok(Value::Str(s.clone())),
        Expr::This => Ok(this.clone()),
        Expr::Name(name) => resolve_name(heap, env, name),
        Expr::TypeOfName(name) => match resolve_name(heap, env, name) {
            Ok(value) => Ok(Value::str(heap.type_of(&value))),
            Err(RuntimeError::Reference(_)) => Ok(Value::str("undefined")),
            Err(err) => Err(err),
        },
        Expr::Unary { op, operand } => {
            let value = eval_expr(heap, operand, env, this)?;
            apply_unary(heap, *op, value)
        }
        Expr::Binary { op, left, right } => {
            let left = eval_expr(heap, left, env, this)?;
            let right = eval_expr(heap, right, env, this)?;
            apply_binary(*op, left, right)
        }
        Expr::Logical { op, left, right } => {
            let left = eval_expr(heap, left, env, this)?;
            match (op, left.truthy()) {
                (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                _ => eval_expr(heap, right, env, this),
            }
        }
        Expr::Conditional {
            test,
            when_true,
            when_false,
        } => {
            let test = eval_expr(heap, test, env, this)?;
            if test.truthy() {
                eval_expr(heap, when_true, env, this)
            } else {
                eval_expr(heap, when_false, env, this)
            }
        }
        Expr::Member { object, name } => {
            let object = eval_expr(heap, object, env, this)?;
            read_property(heap, &object, name)
        }
        Expr::Index { object, index } => {
            let object = eval_expr(heap, object, env, this)?;
            let index = eval_expr(heap, index, env, this)?;
            let key = property_key(&index)?;
            read_property(heap, &object, &key)
        }
        Expr::Call { callee, args } => {
            let (func, receiver) = match callee.as_ref() {
                Expr::Member { object, name } => {
                    let object = eval_expr(heap, object, env, this)?;
                    let func = read_property(heap, &object, name)?;
                    (func, object)
                }
                Expr::Index { object, index } => {
                    let object = eval_expr(heap, object, env, this)?;
                    let index = eval_expr(heap, index, env, this)?;
                    let key = property_key(&index)?;
                    let func = read_property(heap, &object, &key)?;
                    (func, object)
                }
                other => {
                    let func = eval_expr(heap, other, env, this)?;
                    (func, Value::Undefined)
                }
            };
            let mut evaluated = Vec::with_capacity(args.len());
            for arg in args {
                evaluated.push(eval_expr(heap, arg, env, this)?);
            }
            heap.call(func, receiver, &evaluated)
        }
        Expr::Assign { target, value } => match target {
            AssignTarget::Name(name) => {
                let value = eval_expr(heap, value, env, this)?;
                assign_name(heap, env, name, value.clone())?;
                Ok(value)
            }
            AssignTarget::Member { object, name } => {
                let object = eval_expr(heap, object, env, this)?;
                let value = eval_expr(heap, value, env, this)?;
                write_property(heap, &object, name, value.clone())?;
                Ok(value)
            }
            AssignTarget::Index { object, index } => {
                let object = eval_expr(heap, object, env, this)?;
                let index = eval_expr(heap, index, env, this)?;
                let key = property_key(&index)?;
                let value = eval_expr(heap, value, env, this)?;
                write_property(heap, &object, &key, value.clone())?;
                Ok(value)
            }
        },
        Expr::ObjectLit(entries) => {
            let id = heap.alloc_plain();
            for (key, expr) in entries {
                let value = eval_expr(heap, expr, env, this)?;
                heap.set(id, key, value)?;
            }
            Ok(Value::Obj(id))
        }
        Expr::Function(def) => {
            let id = heap.alloc_closure(ClosureData {
                def: def.clone(),
                env: env.clone(),
            });
            Ok(Value::Obj(id))
        }
    }
}

fn resolve_name(heap: &mut Heap, env: &LexicalEnv, name: &str) -> Result<Value, RuntimeError> {
    for frame in env.frames.iter().rev() {
        if let Some(value) = frame.vars.borrow().get(name) {
            return Ok(value.clone());
        }
    }
    if let Some(scope) = env.scope {
        if heap.has(scope, name)? {
            return heap.get(scope, name);
        }
    }
    Err(RuntimeError::reference(format!("{name} is not defined")))
}

fn assign_name(
    heap: &mut Heap,
    env: &LexicalEnv,
    name: &str,
    value: Value,
) -> Result<(), RuntimeError> {
    for frame in env.frames.iter().rev() {
        let mut vars = frame.vars.borrow_mut();
        if vars.contains_key(name) {
            vars.insert(name.to_string(), value);
            return Ok(());
        }
    }
    if let Some(scope) = env.scope {
        if heap.has(scope, name)? {
            return heap.set(scope, name, value);
        }
    }
    Err(RuntimeError::reference(format!("{name} is not defined")))
}

fn read_property(heap: &mut Heap, object: &Value, name: &str) -> Result<Value, RuntimeError> {
    match object {
        Value::Obj(id) => heap.get(*id, name),
        Value::Str(s) => Ok(if name == "length" {
            Value::Num(s.chars().count() as f64)
        } else {
            Value::Undefined
        }),
        Value::Undefined | Value::Null => Err(RuntimeError::type_error(format!(
            "cannot read property '{name}' of {}",
            object.kind_name()
        ))),
        _ => Ok(Value::Undefined),
    }
}

fn write_property(
    heap: &mut Heap,
    object: &Value,
    name: &str,
    value: Value,
) -> Result<(), RuntimeError> {
    match object {
        Value::Obj(id) => heap.set(*id, name, value),
        _ => Err(RuntimeError::type_error(format!(
            "cannot set property '{name}' on {}",
            object.kind_name()
        ))),
    }
}

pub(crate) fn property_key(value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Num(n) => Ok(format_num(*n)),
        other => Err(RuntimeError::type_error(format!(
            "property keys must be strings or numbers, not {}",
            other.kind_name()
        ))),
    }
}

fn apply_unary(heap: &Heap, op: UnaryOp, value: Value) -> Result<Value, RuntimeError> {
    match op {
        UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
        UnaryOp::Neg => match value.as_num() {
            Some(n) => Ok(Value::Num(-n)),
            None => Err(RuntimeError::type_error(format!(
                "unary - needs a number, not {}",
                value.kind_name()
            ))),
        },
        UnaryOp::Pos => match value.as_num() {
            Some(n) => Ok(Value::Num(n)),
            None => Err(RuntimeError::type_error(format!(
                "unary + needs a number, not {}",
                value.kind_name()
            ))),
        },
        UnaryOp::TypeOf => Ok(Value::str(heap.type_of(&value))),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Result<Value, RuntimeError> {
    match op {
        BinaryOp::StrictEq => Ok(Value::Bool(strict_equals(&left, &right))),
        BinaryOp::StrictNe => Ok(Value::Bool(!strict_equals(&left, &right))),
        BinaryOp::Add => match (&left, &right) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Num(a + b)),
            (Value::Str(_), _) | (_, Value::Str(_)) => {
                let mut text = to_text(&left)?;
                text.push_str(&to_text(&right)?);
                Ok(Value::str(&text))
            }
            _ => Err(type_mismatch("+", &left, &right)),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => {
            match (left.as_num(), right.as_num()) {
                (Some(a), Some(b)) => Ok(Value::Num(match op {
                    BinaryOp::Sub => a - b,
                    BinaryOp::Mul => a * b,
                    BinaryOp::Div => a / b,
                    _ => a % b,
                })),
                _ => Err(type_mismatch(op_text(op), &left, &right)),
            }
        }
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => match (&left, &right) {
            (Value::Num(a), Value::Num(b)) => Ok(Value::Bool(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            })),
            (Value::Str(a), Value::Str(b)) => Ok(Value::Bool(match op {
                BinaryOp::Lt => a < b,
                BinaryOp::Le => a <= b,
                BinaryOp::Gt => a > b,
                _ => a >= b,
            })),
            _ => Err(type_mismatch(op_text(op), &left, &right)),
        },
    }
}

fn op_text(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Rem => "%",
        BinaryOp::Lt => "<",
        BinaryOp::Le => "<=",
        BinaryOp::Gt => ">",
        BinaryOp::Ge => ">=",
        BinaryOp::StrictEq => "===",
        BinaryOp::StrictNe => "!==",
    }
}

fn type_mismatch(op: &str, left: &Value, right: &Value) -> RuntimeError {
    RuntimeError::type_error(format!(
        "operator {op} cannot combine {} and {}",
        left.kind_name(),
        right.kind_name()
    ))
}

fn to_text(value: &Value) -> Result<String, RuntimeError> {
    match value {
        Value::Undefined => Ok("undefined".to_string()),
        Value::Null => Ok("null".to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Num(n) => Ok(format_num(*n)),
        Value::Str(s) => Ok(s.to_string()),
        Value::Obj(_) => Err(RuntimeError::type_error(
            "cannot implicitly convert an object to a string",
        )),
    }
}
