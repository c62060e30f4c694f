//! Recursive descent parser producing a [`Program`].
//!
//! Scope checks that do not need runtime information (`return` outside a
//! function, `break`/`continue` outside a loop, duplicate parameters) are
//! done here so such units never start running.

use std::collections::HashSet;
use std::rc::Rc;

use crate::ast::*;
use crate::error::{CompileError, CompileErrorKind};
use crate::lexer::{tokenize, Spanned, Token};

/// Deepest nesting of expressions and blocks a unit may use. Running a unit
/// recurses once per level on the execution thread.
pub const MAX_NESTING: usize = 256;

/// Compile `source` into a unit named `file`.
pub fn compile(source: &str, file: &str) -> Result<Program, CompileError> {
    let tokens = tokenize(source, file)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        file,
        in_function: false,
        loop_depth: 0,
        depth: 0,
    };
    let mut body = Vec::new();
    while !parser.at(&Token::Eof) {
        body.push(parser.statement()?);
    }
    Ok(Program {
        file: Rc::from(file),
        body,
    })
}

struct Parser<'a> {
    tokens: Vec<Spanned>,
    pos: usize,
    file: &'a str,
    in_function: bool,
    loop_depth: usize,
    /// Nesting of the tree being built at the current position.
    depth: usize,
}

type PResult<T> = Result<T, CompileError>;

impl Parser<'_> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn line(&self) -> u32 {
        self.tokens[self.pos.min(self.tokens.len() - 1)].line
    }

    fn at(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.at(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, kind: CompileErrorKind) -> CompileError {
        CompileError::new(self.file, self.line(), kind)
    }

    fn unexpected(&self, expected: &str) -> CompileError {
        self.error(CompileErrorKind::Syntax(format!(
            "expected {expected}, found {}",
            self.peek()
        )))
    }

    fn expect(&mut self, token: Token, what: &str) -> PResult<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected(what))
        }
    }

    /// One level deeper. Callers reset `depth` when they return.
    fn descend(&mut self) -> PResult<()> {
        if self.depth >= MAX_NESTING {
            return Err(self.error(CompileErrorKind::TooDeep(MAX_NESTING)));
        }
        self.depth += 1;
        Ok(())
    }

    fn ident(&mut self, what: &str) -> PResult<String> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected(what)),
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn statement(&mut self) -> PResult<Stmt> {
        let line = self.line();
        let kind = match self.peek() {
            Token::Let => {
                self.advance();
                let name = self.ident("variable name after `let`")?;
                self.expect(Token::Assign, "`=` after variable name")?;
                let value = self.expression()?;
                self.expect(Token::Semi, "`;` after let binding")?;
                StmtKind::Let { name, value }
            }
            Token::Fn => StmtKind::FnDef(Rc::new(self.function()?)),
            Token::Return => {
                if !self.in_function {
                    return Err(self.error(CompileErrorKind::ReturnOutsideFunction));
                }
                self.advance();
                let value = if self.at(&Token::Semi) {
                    None
                } else {
                    Some(self.expression()?)
                };
                self.expect(Token::Semi, "`;` after return")?;
                StmtKind::Return(value)
            }
            Token::If => self.if_statement()?,
            Token::While => {
                self.advance();
                let cond = self.expression()?;
                let body = self.loop_body()?;
                StmtKind::While { cond, body }
            }
            Token::For => {
                self.advance();
                let var = self.ident("loop variable after `for`")?;
                self.expect(Token::In, "`in` after loop variable")?;
                let iter = self.expression()?;
                let body = self.loop_body()?;
                StmtKind::For { var, iter, body }
            }
            Token::Break | Token::Continue => {
                let token = self.advance();
                if self.loop_depth == 0 {
                    let word = if token == Token::Break { "break" } else { "continue" };
                    return Err(CompileError::new(
                        self.file,
                        line,
                        CompileErrorKind::OutsideLoop(word),
                    ));
                }
                self.expect(Token::Semi, "`;`")?;
                if token == Token::Break {
                    StmtKind::Break
                } else {
                    StmtKind::Continue
                }
            }
            Token::Raise => {
                self.advance();
                let value = self.expression()?;
                self.expect(Token::Semi, "`;` after raise")?;
                StmtKind::Raise(value)
            }
            _ => {
                let expr = self.expression()?;
                if self.eat(&Token::Assign) {
                    let target = match expr {
                        Expr::Name(name) => AssignTarget::Name(name),
                        Expr::Index { target, index } => AssignTarget::Index {
                            target: *target,
                            index: *index,
                        },
                        _ => {
                            return Err(CompileError::new(
                                self.file,
                                line,
                                CompileErrorKind::Syntax("invalid assignment target".into()),
                            ))
                        }
                    };
                    let value = self.expression()?;
                    self.expect(Token::Semi, "`;` after assignment")?;
                    StmtKind::Assign { target, value }
                } else {
                    self.expect(Token::Semi, "`;` after expression")?;
                    StmtKind::Expr(expr)
                }
            }
        };
        Ok(Stmt { line, kind })
    }

    fn function(&mut self) -> PResult<FnDecl> {
        let line = self.line();
        self.expect(Token::Fn, "`fn`")?;
        let name = self.ident("function name")?;
        self.expect(Token::LParen, "`(` after function name")?;
        let mut params = Vec::new();
        let mut seen = HashSet::new();
        if !self.at(&Token::RParen) {
            loop {
                let param = self.ident("parameter name")?;
                if !seen.insert(param.clone()) {
                    return Err(self.error(CompileErrorKind::DuplicateParameter(param)));
                }
                params.push(param);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.expect(Token::RParen, "`)` after parameters")?;

        let outer = (self.in_function, self.loop_depth);
        self.in_function = true;
        self.loop_depth = 0;
        let body = self.block();
        (self.in_function, self.loop_depth) = outer;

        Ok(FnDecl {
            name,
            params,
            body: body?,
            line,
        })
    }

    fn if_statement(&mut self) -> PResult<StmtKind> {
        self.expect(Token::If, "`if`")?;
        let mut branches = vec![(self.expression()?, self.block()?)];
        let mut otherwise = None;
        while self.eat(&Token::Else) {
            if self.eat(&Token::If) {
                branches.push((self.expression()?, self.block()?));
            } else {
                otherwise = Some(self.block()?);
                break;
            }
        }
        Ok(StmtKind::If {
            branches,
            otherwise,
        })
    }

    fn loop_body(&mut self) -> PResult<Vec<Stmt>> {
        self.loop_depth += 1;
        let body = self.block();
        self.loop_depth -= 1;
        body
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect(Token::LBrace, "`{`")?;
        let base = self.depth;
        self.descend()?;
        let mut body = Vec::new();
        while !self.at(&Token::RBrace) {
            if self.at(&Token::Eof) {
                return Err(self.unexpected("`}`"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        self.depth = base;
        Ok(body)
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn expression(&mut self) -> PResult<Expr> {
        let base = self.depth;
        self.descend()?;
        let expr = self.or()?;
        self.depth = base;
        Ok(expr)
    }

    fn or(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.and()?;
        while self.eat(&Token::Or) {
            self.descend()?;
            let rhs = self.and()?;
            lhs = Expr::Logical {
                op: LogicalOp::Or,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        Ok(lhs)
    }

    fn and(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.not()?;
        while self.eat(&Token::And) {
            self.descend()?;
            let rhs = self.not()?;
            lhs = Expr::Logical {
                op: LogicalOp::And,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
        self.depth = base;
        Ok(lhs)
    }

    fn not(&mut self) -> PResult<Expr> {
        if self.eat(&Token::Not) {
            let base = self.depth;
            self.descend()?;
            let operand = self.not()?;
            self.depth = base;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> PResult<Expr> {
        let lhs = self.additive()?;
        let op = match self.peek() {
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::NotEq,
            Token::Lt => BinaryOp::Lt,
            Token::LtEq => BinaryOp::LtEq,
            Token::Gt => BinaryOp::Gt,
            Token::GtEq => BinaryOp::GtEq,
            _ => return Ok(lhs),
        };
        self.advance();
        let rhs = self.additive()?;
        Ok(Expr::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        })
    }

    fn additive(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.descend()?;
            let rhs = self.multiplicative()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => {
                    self.depth = base;
                    return Ok(lhs);
                }
            };
            self.advance();
            self.descend()?;
            let rhs = self.unary()?;
            lhs = Expr::Binary {
                op,
                lhs: Box::new(lhs),
                rhs: Box::new(rhs),
            };
        }
    }

    fn unary(&mut self) -> PResult<Expr> {
        if self.eat(&Token::Minus) {
            let base = self.depth;
            self.descend()?;
            let operand = self.unary()?;
            self.depth = base;
            return Ok(Expr::Unary {
                op: UnaryOp::Neg,
                operand: Box::new(operand),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            if self.eat(&Token::LParen) {
                self.descend()?;
                let args = self.list_items(Token::RParen, "`)` after arguments")?;
                expr = Expr::Call {
                    callee: Box::new(expr),
                    args,
                };
            } else if self.eat(&Token::LBracket) {
                self.descend()?;
                let index = self.expression()?;
                self.expect(Token::RBracket, "`]` after index")?;
                expr = Expr::Index {
                    target: Box::new(expr),
                    index: Box::new(index),
                };
            } else {
                self.depth = base;
                return Ok(expr);
            }
        }
    }

    fn primary(&mut self) -> PResult<Expr> {
        let expr = match self.peek() {
            Token::Int(n) => Expr::Int(*n),
            Token::Float(x) => Expr::Float(*x),
            Token::Str(s) => Expr::Str(s.clone()),
            Token::Bool(b) => Expr::Bool(*b),
            Token::Nil => Expr::Nil,
            Token::Ident(name) => Expr::Name(name.clone()),
            Token::LParen => {
                self.advance();
                let inner = self.expression()?;
                self.expect(Token::RParen, "`)`")?;
                return Ok(inner);
            }
            Token::LBracket => {
                self.advance();
                let items = self.list_items(Token::RBracket, "`]` after list items")?;
                return Ok(Expr::List(items));
            }
            _ => return Err(self.unexpected("an expression")),
        };
        self.advance();
        Ok(expr)
    }

    /// Comma separated expressions up to `close`, which is consumed.
    /// A trailing comma is allowed.
    fn list_items(&mut self, close: Token, what: &str) -> PResult<Vec<Expr>> {
        let mut items = Vec::new();
        while !self.at(&close) {
            items.push(self.expression()?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(close, what)?;
        Ok(items)
    }
}
