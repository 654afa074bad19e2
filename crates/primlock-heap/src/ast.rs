use std::collections::{BTreeSet, HashSet};
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    Pos,
    TypeOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    StrictEq,
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// Assignment destinations. Only names and property slots; there is no
/// destructuring.
#[derive(Debug, Clone)]
pub enum AssignTarget {
    Name(String),
    Member { object: Box<Expr>, name: String },
    Index { object: Box<Expr>, index: Box<Expr> },
}

#[derive(Debug, Clone)]
pub enum Expr {
    Null,
    Bool(bool),
    Num(f64),
    Str(Rc<str>),
    This,
    Name(String),
    /// `typeof name` never faults on an unbound name, so it gets its
    /// own node rather than reusing the unary operator.
    TypeOfName(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
    },
    Member {
        object: Box<Expr>,
        name: String,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Assign {
        target: AssignTarget,
        value: Box<Expr>,
    },
    ObjectLit(Vec<(String, Expr)>),
    Function(Rc<FunctionDef>),
}

#[derive(Debug, Clone)]
pub enum Stmt {
    Expr(Expr),
    Var { name: String, init: Option<Expr> },
    Return(Option<Expr>),
}

/// An anonymous function literal.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Program,
}

/// A parsed unit: either a lone expression wrapped in a single
/// statement, or a statement body.
#[derive(Debug, Clone)]
pub struct Program {
    pub stmts: Vec<Stmt>,
}

impl Program {
    /// Names read or written by this program that no enclosing binding
    /// supplies. `var` declarations bind for the whole unit they appear
    /// in, and function parameters bind their body.
    pub fn free_names(&self) -> Vec<String> {
        let mut free = BTreeSet::new();
        let mut scopes: Vec<HashSet<String>> = Vec::new();
        walk_program(self, &mut scopes, &mut free);
        free.into_iter().collect()
    }
}

fn local_vars(program: &Program) -> HashSet<String> {
    program
        .stmts
        .iter()
        .filter_map(|stmt| match stmt {
            Stmt::Var { name, .. } => Some(name.clone()),
            _ => None,
        })
        .collect()
}

fn walk_program(
    program: &Program,
    scopes: &mut Vec<HashSet<String>>,
    free: &mut BTreeSet<String>,
) {
    scopes.push(local_vars(program));
    for stmt in &program.stmts {
        match stmt {
            Stmt::Expr(expr) => walk_expr(expr, scopes, free),
            Stmt::Var { init, .. } => {
                if let Some(expr) = init {
                    walk_expr(expr, scopes, free);
                }
            }
            Stmt::Return(value) => {
                if let Some(expr) = value {
                    walk_expr(expr, scopes, free);
                }
            }
        }
    }
    scopes.pop();
}

fn walk_expr(expr: &Expr, scopes: &mut Vec<HashSet<String>>, free: &mut BTreeSet<String>) {
    let note = |name: &str, scopes: &[HashSet<String>], free: &mut BTreeSet<String>| {
        if !scopes.iter().any(|scope| scope.contains(name)) {
            free.insert(name.to_string());
        }
    };
    match expr {
        Expr::Null | Expr::Bool(_) | Expr::Num(_) | Expr::Str(_) | Expr::This => {}
        Expr::Name(name) | Expr::TypeOfName(name) => note(name, scopes, free),
        Expr::Unary { operand, .. } => walk_expr(operand, scopes, free),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            walk_expr(left, scopes, free);
            walk_expr(right, scopes, free);
        }
        Expr::Conditional {
            test,
            when_true,
            when_false,
        } => {
            walk_expr(test, scopes, free);
            walk_expr(when_true, scopes, free);
            walk_expr(when_false, scopes, free);
        }
        Expr::Member { object, .. } => walk_expr(object, scopes, free),
        Expr::Index { object, index } => {
            walk_expr(object, scopes, free);
            walk_expr(index, scopes, free);
        }
        Expr::Call { callee, args } => {
            walk_expr(callee, scopes, free);
            for arg in args {
                walk_expr(arg, scopes, free);
            }
        }
        Expr::Assign { target, value } => {
            match target {
                AssignTarget::Name(name) => note(name, scopes, free),
                AssignTarget::Member { object, .. } => walk_expr(object, scopes, free),
                AssignTarget::Index { object, index } => {
                    walk_expr(object, scopes, free);
                    walk_expr(index, scopes, free);
                }
            }
            walk_expr(value, scopes, free);
        }
        Expr::ObjectLit(entries) => {
            for (_, value) in entries {
                walk_expr(value, scopes, free);
            }
        }
        Expr::Function(def) => {
            scopes.push(def.params.iter().cloned().collect());
            walk_program(&def.body, scopes, free);
            scopes.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser;

    fn names(src: &str) -> Vec<String> {
        match parser::parse_expression(src, 128) {
            Ok(program) => program.free_names(),
            Err(err) => panic!("{src:?} should parse: {err}"),
        }
    }

    #[test]
    fn literals_bind_nothing() {
        assert!(names("1 + 2 * 3").is_empty());
        assert!(names("'a' + \"b\"").is_empty());
    }

    #[test]
    fn parameters_shadow_free_names() {
        assert_eq!(names("x + 1"), vec!["x"]);
        assert_eq!(names("(function (x) { return x + y; })"), vec!["y"]);
    }

    #[test]
    fn var_declarations_bind_the_whole_body() {
        let program = match parser::parse_body("tmp = seed; var tmp;", 128) {
            Ok(p) => p,
            Err(err) => panic!("body should parse: {err}"),
        };
        assert_eq!(program.free_names(), vec!["seed"]);
    }

    #[test]
    fn typeof_counts_as_a_use() {
        assert_eq!(names("typeof flag"), vec!["flag"]);
    }
}
