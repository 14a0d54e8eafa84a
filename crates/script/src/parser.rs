//! Recursive-descent parser for the script language.
//!
//! Grammar (informal):
//! ```text
//! program    = stmt*
//! stmt       = ("let" | "const") IDENT ["=" expr]
//!            | "if" "(" expr ")" body ["else" (if-stmt | body)]
//!            | "while" "(" expr ")" body
//!            | "for" "(" [("let" | "const")] IDENT "of" expr ")" body
//!            | "for" "(" [simple] ";" [expr] ";" [simple] ")" body
//!            | "return" [expr] | "break" | "continue" | "{" stmt* "}"
//!            | simple
//! simple     = lvalue ("=" | "+=" | "-=" | "*=" | "/=") expr
//!            | lvalue ("++" | "--") | expr
//! expr       = or ["?" expr ":" expr]
//! or         = and (("||" | "??") and)*
//! and        = equality ("&&" equality)*
//! equality   = compare (("==" | "!=") compare)*
//! compare    = additive (("<" | "<=" | ">" | ">=") additive)*
//! additive   = term (("+" | "-") term)*
//! term       = unary (("*" | "/" | "%") unary)*
//! unary      = ("!" | "-" | "+" | "await") unary | postfix
//! postfix    = primary ("." IDENT | "[" expr "]" | "(" args ")")*
//! primary    = NUMBER | STRING | TEMPLATE | "true" | "false" | "null"
//!            | IDENT | arrow | "(" expr ")" | "[" items "]" | "{" props "}"
//! ```
//! Semicolons are optional statement terminators.
//!
//! Nesting is bounded: every statement, expression, unary operator and
//! chained binary or postfix operator adds a level, and a script deeper
//! than the limit is rejected before anything is evaluated. The evaluator
//! recurses over the tree, so this also bounds its stack use.

use serde_json::Value;

use crate::ScriptError;
use crate::ast::*;
use crate::lexer::{Spanned, TemplateChunk, Token, tokenize, tokenize_at};
use crate::value;

/// Nesting limit used by [`parse`].
pub const DEFAULT_MAX_NESTING_DEPTH: usize = 64;

/// Parse script source into a [`Program`].
pub fn parse(source: &str) -> Result<Program, ScriptError> {
    parse_with_depth(source, DEFAULT_MAX_NESTING_DEPTH)
}

/// Parse script source, rejecting scripts nested deeper than `max_depth`.
pub fn parse_with_depth(source: &str, max_depth: usize) -> Result<Program, ScriptError> {
    let mut parser = Parser::new(tokenize(source)?, 0, max_depth);
    let mut body = Vec::new();
    while !parser.check(&Token::Eof) {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Spanned>, depth: usize, max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth,
            max_depth,
        }
    }

    /// Enter one nesting level. Returns the previous depth so the caller
    /// can restore it once the nested construct is parsed.
    fn descend(&mut self) -> Result<usize, ScriptError> {
        let previous = self.depth;
        self.depth += 1;
        if self.depth > self.max_depth {
            let here = self.current();
            return Err(ScriptError::Syntax {
                line: here.line,
                column: here.column,
                message: format!("script is nested more than {} levels deep", self.max_depth),
            });
        }
        Ok(previous)
    }

    fn current(&self) -> &Spanned {
        // The token list always ends with Eof, so clamp to it.
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek(&self) -> &Token {
        &self.current().token
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    fn line(&self) -> usize {
        self.current().line
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, token: &Token) -> bool {
        self.peek() == token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Token, what: &str) -> Result<(), ScriptError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ScriptError> {
        match self.peek() {
            Token::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            _ => Err(self.error(format!("expected {what}"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> ScriptError {
        let here = self.current();
        let found = match &here.token {
            Token::Eof => "end of script".to_string(),
            other => format!("{other:?}"),
        };
        ScriptError::Syntax {
            line: here.line,
            column: here.column,
            message: format!("{}, found {found}", message.into()),
        }
    }

    // ── Statements ──────────────────────────────────────────────────────

    fn statement(&mut self) -> Result<Stmt, ScriptError> {
        let base = self.descend()?;
        let line = self.line();
        let kind = match self.peek() {
            Token::Let | Token::Const => self.declaration()?,
            Token::If => self.if_statement()?,
            Token::While => {
                self.advance();
                self.expect(&Token::LParen, "'(' after 'while'")?;
                let cond = self.expression()?;
                self.expect(&Token::RParen, "')' after loop condition")?;
                StmtKind::While {
                    cond,
                    body: self.body()?,
                }
            }
            Token::For => self.for_statement()?,
            Token::Return => {
                self.advance();
                let ends_here = matches!(
                    self.peek(),
                    Token::Semicolon | Token::RBrace | Token::Eof
                ) || self.line() != line;
                StmtKind::Return(if ends_here {
                    None
                } else {
                    Some(self.expression()?)
                })
            }
            Token::Break => {
                self.advance();
                StmtKind::Break
            }
            Token::Continue => {
                self.advance();
                StmtKind::Continue
            }
            Token::LBrace => StmtKind::Block(self.block()?),
            _ => self.simple()?,
        };
        self.eat(&Token::Semicolon);
        self.depth = base;
        Ok(Stmt { line, kind })
    }

    fn declaration(&mut self) -> Result<StmtKind, ScriptError> {
        let mutable = matches!(self.advance(), Token::Let);
        let name = self.expect_ident("variable name")?;
        let init = if self.eat(&Token::Assign) {
            Some(self.expression()?)
        } else {
            None
        };
        if !mutable && init.is_none() {
            return Err(self.error(format!("missing initializer for const '{name}'")));
        }
        Ok(StmtKind::Declare {
            name,
            mutable,
            init,
        })
    }

    fn if_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.advance();
        self.expect(&Token::LParen, "'(' after 'if'")?;
        let cond = self.expression()?;
        self.expect(&Token::RParen, "')' after condition")?;
        let then_branch = self.body()?;
        let else_branch = if self.eat(&Token::Else) {
            if self.check(&Token::If) {
                self.descend()?;
                let line = self.line();
                let nested = self.if_statement()?;
                Some(vec![Stmt { line, kind: nested }])
            } else {
                Some(self.body()?)
            }
        } else {
            None
        };
        Ok(StmtKind::If {
            cond,
            then_branch,
            else_branch,
        })
    }

    fn for_statement(&mut self) -> Result<StmtKind, ScriptError> {
        self.advance();
        self.expect(&Token::LParen, "'(' after 'for'")?;

        let declared = matches!(self.peek(), Token::Let | Token::Const);
        let offset = usize::from(declared);
        if matches!(self.peek_at(offset), Token::Ident(_)) && self.peek_at(offset + 1) == &Token::Of
        {
            if declared {
                self.advance();
            }
            let name = self.expect_ident("loop variable")?;
            self.expect(&Token::Of, "'of'")?;
            let iterable = self.expression()?;
            self.expect(&Token::RParen, "')' after loop header")?;
            return Ok(StmtKind::ForOf {
                name,
                iterable,
                body: self.body()?,
            });
        }

        let init = if self.check(&Token::Semicolon) {
            None
        } else {
            let line = self.line();
            let kind = if declared {
                self.declaration()?
            } else {
                self.simple()?
            };
            Some(Box::new(Stmt { line, kind }))
        };
        self.expect(&Token::Semicolon, "';' after loop initializer")?;
        let cond = if self.check(&Token::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect(&Token::Semicolon, "';' after loop condition")?;
        let update = if self.check(&Token::RParen) {
            None
        } else {
            let line = self.line();
            Some(Box::new(Stmt {
                line,
                kind: self.simple()?,
            }))
        };
        self.expect(&Token::RParen, "')' after loop header")?;
        Ok(StmtKind::For {
            init,
            cond,
            update,
            body: self.body()?,
        })
    }

    /// Assignment, update or bare expression.
    fn simple(&mut self) -> Result<StmtKind, ScriptError> {
        let expr = self.expression()?;
        let op = match self.peek() {
            Token::Assign => Some(AssignOp::Set),
            Token::PlusAssign => Some(AssignOp::Add),
            Token::MinusAssign => Some(AssignOp::Sub),
            Token::StarAssign => Some(AssignOp::Mul),
            Token::SlashAssign => Some(AssignOp::Div),
            Token::PlusPlus | Token::MinusMinus => {
                if !expr.is_lvalue() {
                    return Err(self.error("invalid update target"));
                }
                let delta = if self.advance() == Token::PlusPlus {
                    1.0
                } else {
                    -1.0
                };
                return Ok(StmtKind::Update {
                    target: expr,
                    delta,
                });
            }
            _ => None,
        };
        let Some(op) = op else {
            return Ok(StmtKind::Expr(expr));
        };
        if !expr.is_lvalue() {
            return Err(self.error("invalid assignment target"));
        }
        self.advance();
        let value = self.expression()?;
        Ok(StmtKind::Assign {
            target: expr,
            op,
            value,
        })
    }

    fn block(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        self.expect(&Token::LBrace, "'{'")?;
        let mut stmts = Vec::new();
        while !self.check(&Token::RBrace) {
            if self.check(&Token::Eof) {
                return Err(self.error("expected '}'"));
            }
            stmts.push(self.statement()?);
        }
        self.advance();
        Ok(stmts)
    }

    fn body(&mut self) -> Result<Vec<Stmt>, ScriptError> {
        if self.check(&Token::LBrace) {
            self.block()
        } else {
            Ok(vec![self.statement()?])
        }
    }

    // ── Expressions ─────────────────────────────────────────────────────

    fn expression(&mut self) -> Result<Expr, ScriptError> {
        let base = self.descend()?;
        let expr = self.conditional()?;
        self.depth = base;
        Ok(expr)
    }

    fn conditional(&mut self) -> Result<Expr, ScriptError> {
        let cond = self.or()?;
        if !self.eat(&Token::Question) {
            return Ok(cond);
        }
        let then = self.expression()?;
        self.expect(&Token::Colon, "':' in conditional expression")?;
        let otherwise = self.expression()?;
        Ok(Expr::Conditional {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn or(&mut self) -> Result<Expr, ScriptError> {
        let base = self.depth;
        let mut left = self.and()?;
        loop {
            let op = match self.peek() {
                Token::OrOr => LogicalOp::Or,
                Token::Nullish => LogicalOp::Nullish,
                _ => {
                    self.depth = base;
                    return Ok(left);
                }
            };
            self.advance();
            self.descend()?;
            let right = self.and()?;
            left = Expr::Logical {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
    }

    fn and(&mut self) -> Result<Expr, ScriptError> {
        let base = self.depth;
        let mut left = self.equality()?;
        while self.eat(&Token::AndAnd) {
            self.descend()?;
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        self.depth = base;
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, ScriptError>,
        ops: &[(Token, BinaryOp)],
    ) -> Result<Expr, ScriptError> {
        let base = self.depth;
        let mut left = next(self)?;
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    self.descend()?;
                    let right = next(self)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            self.depth = base;
            return Ok(left);
        }
    }

    fn equality(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::comparison,
            &[(Token::EqEq, BinaryOp::Eq), (Token::NotEq, BinaryOp::NotEq)],
        )
    }

    fn comparison(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::additive,
            &[
                (Token::Lt, BinaryOp::Lt),
                (Token::Le, BinaryOp::Le),
                (Token::Gt, BinaryOp::Gt),
                (Token::Ge, BinaryOp::Ge),
            ],
        )
    }

    fn additive(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::term,
            &[(Token::Plus, BinaryOp::Add), (Token::Minus, BinaryOp::Sub)],
        )
    }

    fn term(&mut self) -> Result<Expr, ScriptError> {
        self.binary_level(
            Self::unary,
            &[
                (Token::Star, BinaryOp::Mul),
                (Token::Slash, BinaryOp::Div),
                (Token::Percent, BinaryOp::Rem),
            ],
        )
    }

    fn unary(&mut self) -> Result<Expr, ScriptError> {
        let op = match self.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            Token::Plus => UnaryOp::Plus,
            Token::Await => {
                self.advance();
                let base = self.descend()?;
                let inner = self.unary()?;
                self.depth = base;
                return Ok(Expr::Await(Box::new(inner)));
            }
            _ => return self.postfix(),
        };
        self.advance();
        let base = self.descend()?;
        let expr = self.unary()?;
        self.depth = base;
        Ok(Expr::Unary {
            op,
            expr: Box::new(expr),
        })
    }

    fn postfix(&mut self) -> Result<Expr, ScriptError> {
        let base = self.depth;
        let mut expr = self.primary()?;
        loop {
            if matches!(self.peek(), Token::Dot | Token::LBracket | Token::LParen) {
                self.descend()?;
            }
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    let property = self.expect_ident("property name after '.'")?;
                    expr = Expr::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expression()?;
                    self.expect(&Token::RBracket, "']'")?;
                    expr = Expr::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                Token::LParen => {
                    self.advance();
                    let args = self.list(&Token::RParen, Self::expression)?;
                    expr = Expr::Call {
                        callee: Box::new(expr),
                        args,
                    };
                }
                _ => {
                    self.depth = base;
                    return Ok(expr);
                }
            }
        }
    }

    /// Comma-separated items up to `close`, trailing comma allowed.
    fn list<T>(
        &mut self,
        close: &Token,
        item: fn(&mut Self) -> Result<T, ScriptError>,
    ) -> Result<Vec<T>, ScriptError> {
        let mut items = Vec::new();
        while !self.check(close) {
            items.push(item(self)?);
            if !self.eat(&Token::Comma) {
                break;
            }
        }
        self.expect(close, "closing delimiter")?;
        Ok(items)
    }

    fn primary(&mut self) -> Result<Expr, ScriptError> {
        if self.arrow_ahead() {
            return self.arrow();
        }
        let start = self.pos;
        match self.advance() {
            Token::Number(n) => Ok(Expr::Literal(value::number(n))),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(name) => Ok(Expr::Ident(name)),
            Token::Template(chunks) => self.template(chunks),
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(&Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::LBracket => Ok(Expr::Array(self.list(&Token::RBracket, Self::expression)?)),
            Token::LBrace => Ok(Expr::Object(self.list(&Token::RBrace, Self::property)?)),
            _ => {
                self.pos = start;
                Err(self.error("expected an expression"))
            }
        }
    }

    fn property(&mut self) -> Result<(String, Expr), ScriptError> {
        let start = self.pos;
        let key = match self.advance() {
            Token::Ident(name) => {
                if !self.check(&Token::Colon) {
                    // `{ a }` shorthand
                    return Ok((name.clone(), Expr::Ident(name)));
                }
                name
            }
            Token::Str(s) => s,
            Token::Number(n) => value::to_display(&value::number(n)),
            _ => {
                self.pos = start;
                return Err(self.error("expected a property name"));
            }
        };
        self.expect(&Token::Colon, "':' after property name")?;
        Ok((key, self.expression()?))
    }

    fn template(&mut self, chunks: Vec<TemplateChunk>) -> Result<Expr, ScriptError> {
        let mut parts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            match chunk {
                TemplateChunk::Text(text) => parts.push(TemplatePart::Text(text)),
                TemplateChunk::Expr { source, line } => {
                    let tokens = tokenize_at(&source, line)?;
                    let mut inner = Parser::new(tokens, self.depth, self.max_depth);
                    let expr = inner.expression()?;
                    if !inner.check(&Token::Eof) {
                        return Err(inner.error("unexpected token in template expression"));
                    }
                    parts.push(TemplatePart::Expr(expr));
                }
            }
        }
        Ok(Expr::Template(parts))
    }

    /// `x =>` or `(a, b) =>` starts at the current token.
    fn arrow_ahead(&self) -> bool {
        match self.peek() {
            Token::Ident(_) => self.peek_at(1) == &Token::Arrow,
            Token::LParen => {
                let mut offset = 1;
                loop {
                    match self.peek_at(offset) {
                        Token::RParen => return self.peek_at(offset + 1) == &Token::Arrow,
                        Token::Ident(_) => {}
                        _ => return false,
                    }
                    offset += 1;
                    match self.peek_at(offset) {
                        Token::Comma => offset += 1,
                        Token::RParen => return self.peek_at(offset + 1) == &Token::Arrow,
                        _ => return false,
                    }
                }
            }
            _ => false,
        }
    }

    fn arrow(&mut self) -> Result<Expr, ScriptError> {
        let params = if self.eat(&Token::LParen) {
            self.list(&Token::RParen, |p| p.expect_ident("parameter name"))?
        } else {
            vec![self.expect_ident("parameter name")?]
        };
        self.expect(&Token::Arrow, "'=>'")?;
        let body = if self.check(&Token::LBrace) {
            ArrowBody::Block(self.block()?)
        } else {
            ArrowBody::Expr(self.expression()?)
        };
        Ok(Expr::Arrow(Box::new(Arrow { params, body })))
    }
}
