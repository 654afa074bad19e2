use std::rc::Rc;

use crate::ast::{AssignTarget, BinaryOp, Expr, FunctionDef, LogicalOp, Program, Stmt, UnaryOp};
use crate::error::RuntimeError;
use crate::lexer::{Keyword, Lexer, Punct, Tok};

/// Parses `src` as exactly one expression. Trailing tokens are a
/// syntax error, which is what makes expression compilation safe to
/// expose: there is no way to smuggle a second statement in.
pub(crate) fn parse_expression(src: &str, max_depth: usize) -> Result<Program, RuntimeError> {
    let mut parser = Parser::new(src, max_depth)?;
    let expr = parser.expr()?;
    parser.expect_eof()?;
    Ok(Program {
        stmts: vec![Stmt::Expr(expr)],
    })
}

/// Parses `src` as a statement body. Top-level `return` is refused;
/// it only means something inside a function literal.
pub(crate) fn parse_body(src: &str, max_depth: usize) -> Result<Program, RuntimeError> {
    let mut parser = Parser::new(src, max_depth)?;
    let stmts = parser.statements_until(None)?;
    Ok(Program { stmts })
}

/// Parses `src` as the body of a function under construction, so
/// top-level `return` is allowed.
pub(crate) fn parse_function_body(src: &str, max_depth: usize) -> Result<Program, RuntimeError> {
    let mut parser = Parser::new(src, max_depth)?;
    parser.fn_depth = 1;
    let stmts = parser.statements_until(None)?;
    Ok(Program { stmts })
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    tok: Tok,
    pos: usize,
    depth: usize,
    max_depth: usize,
    fn_depth: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str, max_depth: usize) -> Result<Self, RuntimeError> {
        let mut lexer = Lexer::new(src);
        let (tok, pos) = lexer.next_token()?;
        Ok(Parser {
            lexer,
            tok,
            pos,
            depth: 0,
            max_depth,
            fn_depth: 0,
        })
    }

    fn advance(&mut self) -> Result<Tok, RuntimeError> {
        let (next, pos) = self.lexer.next_token()?;
        self.pos = pos;
        Ok(std::mem::replace(&mut self.tok, next))
    }

    fn eat(&mut self, punct: Punct) -> Result<bool, RuntimeError> {
        if self.tok == Tok::Punct(punct) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn expect(&mut self, punct: Punct, what: &str) -> Result<(), RuntimeError> {
        if self.eat(punct)? {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    fn expect_eof(&mut self) -> Result<(), RuntimeError> {
        if self.tok == Tok::Eof {
            Ok(())
        } else {
            Err(self.unexpected("end of input"))
        }
    }

    fn unexpected(&self, what: &str) -> RuntimeError {
        RuntimeError::syntax(format!(
            "expected {what} at offset {}, found {:?}",
            self.pos, self.tok
        ))
    }

    fn descend<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> Result<T, RuntimeError>,
    ) -> Result<T, RuntimeError> {
        if self.depth >= self.max_depth {
            return Err(RuntimeError::ParseDepth(self.max_depth));
        }
        self.depth += 1;
        let out = parse(self);
        self.depth -= 1;
        out
    }

    // ---- statements ----

    fn statements_until(&mut self, end: Option<Punct>) -> Result<Vec<Stmt>, RuntimeError> {
        let mut stmts = Vec::new();
        loop {
            match (&self.tok, end) {
                (Tok::Eof, None) => return Ok(stmts),
                (Tok::Eof, Some(_)) => return Err(self.unexpected("'}'")),
                (Tok::Punct(p), Some(close)) if *p == close => return Ok(stmts),
                _ => {}
            }
            if self.eat(Punct::Semi)? {
                continue;
            }
            stmts.push(self.statement()?);
        }
    }

    fn statement(&mut self) -> Result<Stmt, RuntimeError> {
        match self.tok {
            Tok::Keyword(Keyword::Var) => {
                self.advance()?;
                let name = self.binding_name()?;
                let init = if self.eat(Punct::Assign)? {
                    Some(self.expr()?)
                } else {
                    None
                };
                self.end_statement()?;
                Ok(Stmt::Var { name, init })
            }
            Tok::Keyword(Keyword::Return) => {
                if self.fn_depth == 0 {
                    return Err(RuntimeError::syntax(format!(
                        "return outside a function at offset {}",
                        self.pos
                    )));
                }
                self.advance()?;
                let value = if self.at_statement_end() {
                    None
                } else {
                    Some(self.expr()?)
                };
                self.end_statement()?;
                Ok(Stmt::Return(value))
            }
            _ => {
                let expr = self.expr()?;
                self.end_statement()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn at_statement_end(&self) -> bool {
        matches!(
            self.tok,
            Tok::Eof | Tok::Punct(Punct::Semi) | Tok::Punct(Punct::RBrace)
        )
    }

    fn end_statement(&mut self) -> Result<(), RuntimeError> {
        if self.eat(Punct::Semi)? {
            return Ok(());
        }
        if matches!(self.tok, Tok::Eof | Tok::Punct(Punct::RBrace)) {
            return Ok(());
        }
        Err(self.unexpected("';'"))
    }

    fn binding_name(&mut self) -> Result<String, RuntimeError> {
        match self.advance()? {
            Tok::Ident(name) => {
                if name == "eval" || name == "arguments" {
                    return Err(RuntimeError::syntax(format!(
                        "cannot bind '{name}' in strict code"
                    )));
                }
                Ok(name)
            }
            other => Err(RuntimeError::syntax(format!(
                "expected a name at offset {}, found {other:?}",
                self.pos
            ))),
        }
    }

    // ---- expressions ----

    fn expr(&mut self) -> Result<Expr, RuntimeError> {
        self.descend(Self::assignment)
    }

    fn assignment(&mut self) -> Result<Expr, RuntimeError> {
        let left = self.conditional()?;
        if !self.eat(Punct::Assign)? {
            return Ok(left);
        }
        let target = match left {
            Expr::Name(name) => {
                if name == "eval" || name == "arguments" {
                    return Err(RuntimeError::syntax(format!(
                        "cannot assign to '{name}' in strict code"
                    )));
                }
                AssignTarget::Name(name)
            }
            Expr::Member { object, name } => AssignTarget::Member { object, name },
            Expr::Index { object, index } => AssignTarget::Index { object, index },
            _ => return Err(RuntimeError::syntax("invalid assignment target")),
        };
        let value = self.expr()?;
        Ok(Expr::Assign {
            target,
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> Result<Expr, RuntimeError> {
        let test = self.binary(0)?;
        if !self.eat(Punct::Question)? {
            return Ok(test);
        }
        let when_true = self.expr()?;
        self.expect(Punct::Colon, "':'")?;
        let when_false = self.expr()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            when_true: Box::new(when_true),
            when_false: Box::new(when_false),
        })
    }

    /// Left-associative binary tiers, loosest first.
    fn binary(&mut self, tier: usize) -> Result<Expr, RuntimeError> {
        if tier >= BINARY_TIERS.len() {
            return self.unary();
        }
        let mut left = self.binary(tier + 1)?;
        loop {
            let found = BINARY_TIERS[tier]
                .iter()
                .find(|(punct, _)| self.tok == Tok::Punct(*punct))
                .copied();
            let (_, kind) = match found {
                Some(pair) => pair,
                None => return Ok(left),
            };
            self.advance()?;
            let right = self.descend(|p| p.binary(tier + 1))?;
            left = match kind {
                TierOp::Logical(op) => Expr::Logical {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                TierOp::Binary(op) => Expr::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
            };
        }
    }

    fn unary(&mut self) -> Result<Expr, RuntimeError> {
        let op = match self.tok {
            Tok::Punct(Punct::Bang) => Some(UnaryOp::Not),
            Tok::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            Tok::Punct(Punct::Plus) => Some(UnaryOp::Pos),
            Tok::Keyword(Keyword::Typeof) => Some(UnaryOp::TypeOf),
            _ => None,
        };
        let op = match op {
            Some(op) => op,
            None => return self.postfix(),
        };
        self.advance()?;
        let operand = self.descend(Self::unary)?;
        if op == UnaryOp::TypeOf {
            if let Expr::Name(name) = operand {
                return Ok(Expr::TypeOfName(name));
            }
            return Ok(Expr::Unary {
                op,
                operand: Box::new(operand),
            });
        }
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, RuntimeError> {
        let mut expr = self.primary()?;
        loop {
            if self.eat(Punct::Dot)? {
                let name = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    name,
                };
            } else if self.eat(Punct::LBracket)? {
                let index = self.expr()?;
                self.expect(Punct::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.eat(Punct::LParen)? {
                let args = self.arguments()?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else {
                return Ok(expr);
            }
        }
    }

    fn arguments(&mut self) -> Result<Vec<Expr>, RuntimeError> {
        let mut args = Vec::new();
        if self.eat(Punct::RParen)? {
            return Ok(args);
        }
        loop {
            args.push(self.expr()?);
            if self.eat(Punct::Comma)? {
                continue;
            }
            self.expect(Punct::RParen, "')'")?;
            return Ok(args);
        }
    }

    fn property_name(&mut self) -> Result<String, RuntimeError> {
        match self.advance()? {
            Tok::Ident(name) => Ok(name),
            Tok::Keyword(keyword) => Ok(keyword_text(keyword).to_string()),
            other => Err(RuntimeError::syntax(format!(
                "expected a property name at offset {}, found {other:?}",
                self.pos
            ))),
        }
    }

    fn primary(&mut self) -> Result<Expr, RuntimeError> {
        match self.advance()? {
            Tok::Num(n) => Ok(Expr::Num(n)),
            Tok::Str(s) => Ok(Expr::Str(s)),
            Tok::Ident(name) => Ok(Expr::Name(name)),
            Tok::Keyword(Keyword::True) => Ok(Expr::Bool(true)),
            Tok::Keyword(Keyword::False) => Ok(Expr::Bool(false)),
            Tok::Keyword(Keyword::Null) => Ok(Expr::Null),
            Tok::Keyword(Keyword::This) => Ok(Expr::This),
            Tok::Keyword(Keyword::Function) => self.function_literal(),
            Tok::Punct(Punct::LParen) => {
                let inner = self.expr()?;
                self.expect(Punct::RParen, "')'")?;
                Ok(inner)
            }
            Tok::Punct(Punct::LBrace) => self.object_literal(),
            Tok::Eof => Err(RuntimeError::syntax("unexpected end of input")),
            other => Err(RuntimeError::syntax(format!(
                "unexpected token {other:?} at offset {}",
                self.pos
            ))),
        }
    }

    fn object_literal(&mut self) -> Result<Expr, RuntimeError> {
        let mut entries: Vec<(String, Expr)> = Vec::new();
        if self.eat(Punct::RBrace)? {
            return Ok(Expr::ObjectLit(entries));
        }
        loop {
            let key = match self.advance()? {
                Tok::Ident(name) => name,
                Tok::Str(s) => s.to_string(),
                Tok::Keyword(keyword) => keyword_text(keyword).to_string(),
                other => {
                    return Err(RuntimeError::syntax(format!(
                        "expected a property name at offset {}, found {other:?}",
                        self.pos
                    )))
                }
            };
            if entries.iter().any(|(existing, _)| *existing == key) {
                return Err(RuntimeError::syntax(format!(
                    "duplicate property name '{key}' in object literal"
                )));
            }
            self.expect(Punct::Colon, "':'")?;
            let value = self.expr()?;
            entries.push((key, value));
            if self.eat(Punct::Comma)? {
                continue;
            }
            self.expect(Punct::RBrace, "'}'")?;
            return Ok(Expr::ObjectLit(entries));
        }
    }

    fn function_literal(&mut self) -> Result<Expr, RuntimeError> {
        self.expect(Punct::LParen, "'('")?;
        let mut params: Vec<String> = Vec::new();
        if !self.eat(Punct::RParen)? {
            loop {
                let param = self.binding_name()?;
                if params.contains(&param) {
                    return Err(RuntimeError::syntax(format!(
                        "duplicate parameter name '{param}'"
                    )));
                }
                params.push(param);
                if self.eat(Punct::Comma)? {
                    continue;
                }
                self.expect(Punct::RParen, "')'")?;
                break;
            }
        }
        self.expect(Punct::LBrace, "'{'")?;
        self.fn_depth += 1;
        let stmts = self.statements_until(Some(Punct::RBrace))?;
        self.fn_depth -= 1;
        self.expect(Punct::RBrace, "'}'")?;
        Ok(Expr::Function(Rc::new(FunctionDef {
            params,
            body: Program { stmts },
        })))
    }
}

#[derive(Clone, Copy)]
enum TierOp {
    Logical(LogicalOp),
    Binary(BinaryOp),
}

const BINARY_TIERS: &[&[(Punct, TierOp)]] = &[
    &[(Punct::OrOr, TierOp::Logical(LogicalOp::Or))],
    &[(Punct::AndAnd, TierOp::Logical(LogicalOp::And))],
    &[
        (Punct::StrictEq, TierOp::Binary(BinaryOp::StrictEq)),
        (Punct::StrictNe, TierOp::Binary(BinaryOp::StrictNe)),
    ],
    &[
        (Punct::Lt, TierOp::Binary(BinaryOp::Lt)),
        (Punct::Le, TierOp::Binary(BinaryOp::Le)),
        (Punct::Gt, TierOp::Binary(BinaryOp::Gt)),
        (Punct::Ge, TierOp::Binary(BinaryOp::Ge)),
    ],
    &[
        (Punct::Plus, TierOp::Binary(BinaryOp::Add)),
        (Punct::Minus, TierOp::Binary(BinaryOp::Sub)),
    ],
    &[
        (Punct::Star, TierOp::Binary(BinaryOp::Mul)),
        (Punct::Slash, TierOp::Binary(BinaryOp::Div)),
        (Punct::Percent, TierOp::Binary(BinaryOp::Rem)),
    ],
];

fn keyword_text(keyword: Keyword) -> &'static str {
    match keyword {
        Keyword::Function => "function",
        Keyword::Return => "return",
        Keyword::Var => "var",
        Keyword::Typeof => "typeof",
        Keyword::This => "this",
        Keyword::True => "true",
        Keyword::False => "false",
        Keyword::Null => "null",
    }
}
