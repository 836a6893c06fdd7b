//! Recursive-descent parser producing a [`Program`] from script source.
//!
//! Nesting depth is capped so hostile input cannot exhaust the worker stack
//! while parsing.

use std::rc::Rc;

use super::ast::{
    AssignOp, BinaryOp, DeclKind, Expr, ForHead, FunctionDef, LogicalOp, Program, Stmt, UnaryOp,
};
use super::lexer::{tokenize, Keyword, Punct, Token, TokenKind};
use super::ParseError;

/// Default cap on syntactic nesting.
pub const DEFAULT_MAX_NESTING: usize = 256;

type PResult<T> = Result<T, ParseError>;

/// Parse a complete script.
pub fn parse_program(src: &str, max_nesting: usize) -> PResult<Program> {
    let mut parser = Parser::new(tokenize(src)?, max_nesting);
    let mut body = Vec::new();
    while !parser.at_eof() {
        body.push(parser.statement()?);
    }
    Ok(Program { body })
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
    max_depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>, max_depth: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
            max_depth,
        }
    }

    // -- token helpers -----------------------------------------------------

    fn peek(&self) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[self.pos.min(last)]
    }

    fn nth_kind(&self, offset: usize) -> &TokenKind {
        let last = self.tokens.len() - 1;
        &self.tokens[(self.pos + offset).min(last)].kind
    }

    fn at_eof(&self) -> bool {
        self.peek().kind == TokenKind::Eof
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn is_punct(&self, punct: Punct) -> bool {
        self.peek().kind == TokenKind::Punct(punct)
    }

    fn is_keyword(&self, kw: Keyword) -> bool {
        self.peek().kind == TokenKind::Keyword(kw)
    }

    fn eat_punct(&mut self, punct: Punct) -> bool {
        if self.is_punct(punct) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, kw: Keyword) -> bool {
        if self.is_keyword(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: Punct, what: &str) -> PResult<()> {
        if self.eat_punct(punct) {
            Ok(())
        } else {
            Err(self.error_here(format!("expected {what}, found {}", describe(&self.peek().kind))))
        }
    }

    fn expect_ident(&mut self) -> PResult<Rc<str>> {
        match &self.peek().kind {
            TokenKind::Ident(name) => {
                let name = name.clone();
                self.advance();
                Ok(name)
            }
            other => Err(self.error_here(format!("expected identifier, found {}", describe(other)))),
        }
    }

    /// Property names after `.` and object literal keys may be reserved words.
    fn property_name(&mut self) -> PResult<Rc<str>> {
        let name = match &self.peek().kind {
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Keyword(kw) => Rc::from(keyword_text(*kw)),
            other => {
                return Err(self.error_here(format!(
                    "expected property name, found {}",
                    describe(other)
                )))
            }
        };
        self.advance();
        Ok(name)
    }

    fn error_here(&self, message: impl Into<String>) -> ParseError {
        let token = self.peek();
        ParseError {
            message: message.into(),
            line: token.line,
            column: token.column,
        }
    }

    fn enter(&mut self) -> PResult<()> {
        self.depth += 1;
        if self.depth > self.max_depth {
            return Err(self.error_here(format!(
                "nesting exceeds the maximum depth of {}",
                self.max_depth
            )));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    fn consume_semicolon(&mut self) -> PResult<()> {
        if self.eat_punct(Punct::Semicolon) {
            return Ok(());
        }
        let token = self.peek();
        if token.newline_before
            || token.kind == TokenKind::Eof
            || token.kind == TokenKind::Punct(Punct::RBrace)
        {
            return Ok(());
        }
        Err(self.error_here(format!("expected ';', found {}", describe(&token.kind))))
    }

    // -- statements --------------------------------------------------------

    fn statement(&mut self) -> PResult<Stmt> {
        self.enter()?;
        let stmt = self.statement_inner();
        self.leave();
        stmt
    }

    fn statement_inner(&mut self) -> PResult<Stmt> {
        match self.peek().kind.clone() {
            TokenKind::Punct(Punct::LBrace) => Ok(Stmt::Block(self.block()?)),
            TokenKind::Punct(Punct::Semicolon) => {
                self.advance();
                Ok(Stmt::Empty)
            }
            TokenKind::Keyword(Keyword::Var | Keyword::Let | Keyword::Const) => {
                let decl = self.declaration(true)?;
                self.consume_semicolon()?;
                Ok(decl)
            }
            TokenKind::Keyword(Keyword::Function) => {
                self.advance();
                let name = self.expect_ident()?;
                Ok(Stmt::Function(self.function_rest(Some(name))?))
            }
            TokenKind::Keyword(Keyword::Return) => {
                self.advance();
                let token = self.peek();
                let bare = token.newline_before
                    || matches!(
                        token.kind,
                        TokenKind::Eof
                            | TokenKind::Punct(Punct::Semicolon)
                            | TokenKind::Punct(Punct::RBrace)
                    );
                let arg = if bare { None } else { Some(self.expression()?) };
                self.consume_semicolon()?;
                Ok(Stmt::Return(arg))
            }
            TokenKind::Keyword(Keyword::If) => {
                self.advance();
                self.expect_punct(Punct::LParen, "'(' after if")?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen, "')' after condition")?;
                let then = Box::new(self.statement()?);
                let otherwise = if self.eat_keyword(Keyword::Else) {
                    Some(Box::new(self.statement()?))
                } else {
                    None
                };
                Ok(Stmt::If {
                    test,
                    then,
                    otherwise,
                })
            }
            TokenKind::Keyword(Keyword::While) => {
                self.advance();
                self.expect_punct(Punct::LParen, "'(' after while")?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen, "')' after condition")?;
                let body = Box::new(self.statement()?);
                Ok(Stmt::While { test, body })
            }
            TokenKind::Keyword(Keyword::Do) => {
                self.advance();
                let body = Box::new(self.statement()?);
                if !self.eat_keyword(Keyword::While) {
                    return Err(self.error_here("expected 'while' after do body"));
                }
                self.expect_punct(Punct::LParen, "'(' after while")?;
                let test = self.expression()?;
                self.expect_punct(Punct::RParen, "')' after condition")?;
                self.eat_punct(Punct::Semicolon);
                Ok(Stmt::DoWhile { body, test })
            }
            TokenKind::Keyword(Keyword::For) => self.for_statement(),
            TokenKind::Keyword(Keyword::Break) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Break)
            }
            TokenKind::Keyword(Keyword::Continue) => {
                self.advance();
                self.consume_semicolon()?;
                Ok(Stmt::Continue)
            }
            TokenKind::Keyword(Keyword::Throw) => {
                self.advance();
                if self.peek().newline_before {
                    return Err(self.error_here("illegal newline after throw"));
                }
                let arg = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Throw(arg))
            }
            TokenKind::Keyword(Keyword::Try) => self.try_statement(),
            _ => {
                let expr = self.expression()?;
                self.consume_semicolon()?;
                Ok(Stmt::Expr(expr))
            }
        }
    }

    fn block(&mut self) -> PResult<Vec<Stmt>> {
        self.expect_punct(Punct::LBrace, "'{'")?;
        let mut body = Vec::new();
        while !self.is_punct(Punct::RBrace) {
            if self.at_eof() {
                return Err(self.error_here("expected '}' before end of input"));
            }
            body.push(self.statement()?);
        }
        self.advance();
        Ok(body)
    }

    fn decl_kind(&self) -> Option<DeclKind> {
        match self.peek().kind {
            TokenKind::Keyword(Keyword::Var) => Some(DeclKind::Var),
            TokenKind::Keyword(Keyword::Let) => Some(DeclKind::Let),
            TokenKind::Keyword(Keyword::Const) => Some(DeclKind::Const),
            _ => None,
        }
    }

    fn declaration(&mut self, require_const_init: bool) -> PResult<Stmt> {
        let kind = self
            .decl_kind()
            .ok_or_else(|| self.error_here("expected declaration"))?;
        self.advance();
        let mut decls = Vec::new();
        loop {
            let name = self.expect_ident()?;
            let init = if self.eat_punct(Punct::Assign) {
                Some(self.assignment()?)
            } else {
                None
            };
            if require_const_init && kind == DeclKind::Const && init.is_none() {
                return Err(self.error_here("missing initializer in const declaration"));
            }
            decls.push((name, init));
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        Ok(Stmt::Decl { kind, decls })
    }

    fn for_each_head(&self, offset: usize) -> Option<ForHead> {
        match self.nth_kind(offset) {
            TokenKind::Keyword(Keyword::In) => Some(ForHead::In),
            TokenKind::Ident(word) if &**word == "of" => Some(ForHead::Of),
            _ => None,
        }
    }

    fn for_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        self.expect_punct(Punct::LParen, "'(' after for")?;

        let kind = self.decl_kind();
        let name_offset = usize::from(kind.is_some());
        if let (TokenKind::Ident(name), Some(head)) = (
            self.nth_kind(name_offset).clone(),
            self.for_each_head(name_offset + 1),
        ) {
            for _ in 0..name_offset + 2 {
                self.advance();
            }
            let iterable = self.expression()?;
            self.expect_punct(Punct::RParen, "')' after for head")?;
            let body = Box::new(self.statement()?);
            return Ok(Stmt::ForEach {
                head,
                kind,
                name,
                iterable,
                body,
            });
        }

        let init = if self.is_punct(Punct::Semicolon) {
            None
        } else if kind.is_some() {
            Some(Box::new(self.declaration(true)?))
        } else {
            Some(Box::new(Stmt::Expr(self.expression()?)))
        };
        self.expect_punct(Punct::Semicolon, "';' after for initializer")?;
        let test = if self.is_punct(Punct::Semicolon) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::Semicolon, "';' after for condition")?;
        let update = if self.is_punct(Punct::RParen) {
            None
        } else {
            Some(self.expression()?)
        };
        self.expect_punct(Punct::RParen, "')' after for clauses")?;
        let body = Box::new(self.statement()?);
        Ok(Stmt::For {
            init,
            test,
            update,
            body,
        })
    }

    fn try_statement(&mut self) -> PResult<Stmt> {
        self.advance();
        let block = self.block()?;
        let mut param = None;
        let mut handler = None;
        if self.eat_keyword(Keyword::Catch) {
            if self.eat_punct(Punct::LParen) {
                param = Some(self.expect_ident()?);
                self.expect_punct(Punct::RParen, "')' after catch parameter")?;
            }
            handler = Some(self.block()?);
        }
        let finalizer = if self.eat_keyword(Keyword::Finally) {
            Some(self.block()?)
        } else {
            None
        };
        if handler.is_none() && finalizer.is_none() {
            return Err(self.error_here("missing catch or finally after try"));
        }
        Ok(Stmt::Try {
            block,
            param,
            handler,
            finalizer,
        })
    }

    fn function_rest(&mut self, name: Option<Rc<str>>) -> PResult<Rc<FunctionDef>> {
        self.expect_punct(Punct::LParen, "'(' before parameters")?;
        let mut params = Vec::new();
        if !self.is_punct(Punct::RParen) {
            loop {
                params.push(self.expect_ident()?);
                if !self.eat_punct(Punct::Comma) {
                    break;
                }
            }
        }
        self.expect_punct(Punct::RParen, "')' after parameters")?;
        let body = self.block()?;
        Ok(Rc::new(FunctionDef { name, params, body }))
    }

    // -- expressions -------------------------------------------------------

    fn expression(&mut self) -> PResult<Expr> {
        let first = self.assignment()?;
        if !self.is_punct(Punct::Comma) {
            return Ok(first);
        }
        let mut items = vec![first];
        while self.eat_punct(Punct::Comma) {
            items.push(self.assignment()?);
        }
        Ok(Expr::Sequence(items))
    }

    fn assignment(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.assignment_inner();
        self.leave();
        expr
    }

    fn assignment_inner(&mut self) -> PResult<Expr> {
        let target = self.conditional()?;
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Assign) => AssignOp::Assign,
            TokenKind::Punct(Punct::PlusAssign) => AssignOp::Compound(BinaryOp::Add),
            TokenKind::Punct(Punct::MinusAssign) => AssignOp::Compound(BinaryOp::Sub),
            TokenKind::Punct(Punct::StarAssign) => AssignOp::Compound(BinaryOp::Mul),
            TokenKind::Punct(Punct::SlashAssign) => AssignOp::Compound(BinaryOp::Div),
            TokenKind::Punct(Punct::PercentAssign) => AssignOp::Compound(BinaryOp::Rem),
            _ => return Ok(target),
        };
        if !is_assignable(&target) {
            return Err(self.error_here("invalid assignment target"));
        }
        self.advance();
        let value = self.assignment()?;
        Ok(Expr::Assign {
            op,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn conditional(&mut self) -> PResult<Expr> {
        let test = self.logical_or()?;
        if !self.eat_punct(Punct::Question) {
            return Ok(test);
        }
        let then = self.assignment()?;
        self.expect_punct(Punct::Colon, "':' in conditional expression")?;
        let otherwise = self.assignment()?;
        Ok(Expr::Conditional {
            test: Box::new(test),
            then: Box::new(then),
            otherwise: Box::new(otherwise),
        })
    }

    fn logical_or(&mut self) -> PResult<Expr> {
        let mut left = self.logical_and()?;
        while self.eat_punct(Punct::OrOr) {
            let right = self.logical_and()?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn logical_and(&mut self) -> PResult<Expr> {
        let mut left = self.equality()?;
        while self.eat_punct(Punct::AndAnd) {
            let right = self.equality()?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> PResult<Expr>,
        ops: fn(&TokenKind) -> Option<BinaryOp>,
    ) -> PResult<Expr> {
        let mut left = next(self)?;
        while let Some(op) = ops(&self.peek().kind) {
            self.advance();
            let right = next(self)?;
            left = Expr::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn equality(&mut self) -> PResult<Expr> {
        self.binary_level(Self::relational, |kind| match kind {
            TokenKind::Punct(Punct::EqEq) => Some(BinaryOp::Eq),
            TokenKind::Punct(Punct::NotEq) => Some(BinaryOp::NotEq),
            TokenKind::Punct(Punct::EqEqEq) => Some(BinaryOp::StrictEq),
            TokenKind::Punct(Punct::NotEqEq) => Some(BinaryOp::StrictNotEq),
            _ => None,
        })
    }

    fn relational(&mut self) -> PResult<Expr> {
        self.binary_level(Self::additive, |kind| match kind {
            TokenKind::Punct(Punct::Lt) => Some(BinaryOp::Lt),
            TokenKind::Punct(Punct::Le) => Some(BinaryOp::Le),
            TokenKind::Punct(Punct::Gt) => Some(BinaryOp::Gt),
            TokenKind::Punct(Punct::Ge) => Some(BinaryOp::Ge),
            TokenKind::Keyword(Keyword::In) => Some(BinaryOp::In),
            _ => None,
        })
    }

    fn additive(&mut self) -> PResult<Expr> {
        self.binary_level(Self::multiplicative, |kind| match kind {
            TokenKind::Punct(Punct::Plus) => Some(BinaryOp::Add),
            TokenKind::Punct(Punct::Minus) => Some(BinaryOp::Sub),
            _ => None,
        })
    }

    fn multiplicative(&mut self) -> PResult<Expr> {
        self.binary_level(Self::unary, |kind| match kind {
            TokenKind::Punct(Punct::Star) => Some(BinaryOp::Mul),
            TokenKind::Punct(Punct::Slash) => Some(BinaryOp::Div),
            TokenKind::Punct(Punct::Percent) => Some(BinaryOp::Rem),
            _ => None,
        })
    }

    fn unary(&mut self) -> PResult<Expr> {
        self.enter()?;
        let expr = self.unary_inner();
        self.leave();
        expr
    }

    fn unary_inner(&mut self) -> PResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Punct(Punct::Bang) => Some(UnaryOp::Not),
            TokenKind::Punct(Punct::Minus) => Some(UnaryOp::Neg),
            TokenKind::Punct(Punct::Plus) => Some(UnaryOp::Plus),
            TokenKind::Keyword(Keyword::Typeof) => Some(UnaryOp::Typeof),
            _ => None,
        };
        if let Some(op) = op {
            self.advance();
            let arg = self.unary()?;
            return Ok(Expr::Unary {
                op,
                arg: Box::new(arg),
            });
        }
        if self.is_punct(Punct::PlusPlus) || self.is_punct(Punct::MinusMinus) {
            let increment = self.is_punct(Punct::PlusPlus);
            self.advance();
            let target = self.unary()?;
            if !is_assignable(&target) {
                return Err(self.error_here("invalid increment/decrement operand"));
            }
            return Ok(Expr::Update {
                increment,
                prefix: true,
                target: Box::new(target),
            });
        }
        self.postfix()
    }

    fn postfix(&mut self) -> PResult<Expr> {
        let expr = self.call_member()?;
        let token = self.peek();
        let increment = match token.kind {
            TokenKind::Punct(Punct::PlusPlus) if !token.newline_before => true,
            TokenKind::Punct(Punct::MinusMinus) if !token.newline_before => false,
            _ => return Ok(expr),
        };
        if !is_assignable(&expr) {
            return Err(self.error_here("invalid increment/decrement operand"));
        }
        self.advance();
        Ok(Expr::Update {
            increment,
            prefix: false,
            target: Box::new(expr),
        })
    }

    fn call_member(&mut self) -> PResult<Expr> {
        let mut expr = if self.is_keyword(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            if self.eat_punct(Punct::Dot) {
                let property = self.property_name()?;
                expr = Expr::Member {
                    object: Box::new(expr),
                    property,
                };
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                expr = Expr::Index {
                    object: Box::new(expr),
                    index: Box::new(index),
                };
            } else if self.is_punct(Punct::LParen) {
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

    fn new_expression(&mut self) -> PResult<Expr> {
        self.enter()?;
        self.advance();
        let mut callee = if self.is_keyword(Keyword::New) {
            self.new_expression()?
        } else {
            self.primary()?
        };
        loop {
            if self.eat_punct(Punct::Dot) {
                let property = self.property_name()?;
                callee = Expr::Member {
                    object: Box::new(callee),
                    property,
                };
            } else if self.eat_punct(Punct::LBracket) {
                let index = self.expression()?;
                self.expect_punct(Punct::RBracket, "']'")?;
                callee = Expr::Index {
                    object: Box::new(callee),
                    index: Box::new(index),
                };
            } else {
                break;
            }
        }
        let args = if self.is_punct(Punct::LParen) {
            self.arguments()?
        } else {
            Vec::new()
        };
        self.leave();
        Ok(Expr::New {
            callee: Box::new(callee),
            args,
        })
    }

    fn arguments(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct(Punct::LParen, "'('")?;
        let mut args = Vec::new();
        while !self.is_punct(Punct::RParen) {
            args.push(self.assignment()?);
            if !self.eat_punct(Punct::Comma) {
                break;
            }
        }
        self.expect_punct(Punct::RParen, "')' after arguments")?;
        Ok(args)
    }

    fn primary(&mut self) -> PResult<Expr> {
        let token = self.advance();
        match token.kind {
            TokenKind::Number(n) => Ok(Expr::Number(n)),
            TokenKind::Str(s) => Ok(Expr::Str(s)),
            TokenKind::Ident(name) if &*name == "undefined" => Ok(Expr::Undefined),
            TokenKind::Ident(name) => Ok(Expr::Ident(name)),
            TokenKind::Keyword(Keyword::True) => Ok(Expr::Bool(true)),
            TokenKind::Keyword(Keyword::False) => Ok(Expr::Bool(false)),
            TokenKind::Keyword(Keyword::Null) => Ok(Expr::Null),
            TokenKind::Keyword(Keyword::This) => Ok(Expr::This),
            TokenKind::Keyword(Keyword::Function) => {
                let name = match &self.peek().kind {
                    TokenKind::Ident(name) => {
                        let name = name.clone();
                        self.advance();
                        Some(name)
                    }
                    _ => None,
                };
                Ok(Expr::Function(self.function_rest(name)?))
            }
            TokenKind::Punct(Punct::LParen) => {
                let expr = self.expression()?;
                self.expect_punct(Punct::RParen, "')'")?;
                Ok(expr)
            }
            TokenKind::Punct(Punct::LBracket) => {
                let mut items = Vec::new();
                while !self.is_punct(Punct::RBracket) {
                    items.push(self.assignment()?);
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RBracket, "']' after array elements")?;
                Ok(Expr::Array(items))
            }
            TokenKind::Punct(Punct::LBrace) => {
                let mut props = Vec::new();
                while !self.is_punct(Punct::RBrace) {
                    let key: Rc<str> = match self.peek().kind.clone() {
                        TokenKind::Str(s) => {
                            self.advance();
                            s
                        }
                        TokenKind::Number(n) => {
                            self.advance();
                            Rc::from(super::ops::number_to_string(n))
                        }
                        _ => self.property_name()?,
                    };
                    self.expect_punct(Punct::Colon, "':' after property name")?;
                    let value = self.assignment()?;
                    props.push((key, value));
                    if !self.eat_punct(Punct::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punct::RBrace, "'}' after object properties")?;
                Ok(Expr::Object(props))
            }
            other => Err(ParseError {
                message: format!("unexpected {}", describe(&other)),
                line: token.line,
                column: token.column,
            }),
        }
    }
}

fn is_assignable(expr: &Expr) -> bool {
    matches!(
        expr,
        Expr::Ident(_) | Expr::Member { .. } | Expr::Index { .. }
    )
}

fn keyword_text(kw: Keyword) -> &'static str {
    match kw {
        Keyword::Var => "var",
        Keyword::Let => "let",
        Keyword::Const => "const",
        Keyword::Function => "function",
        Keyword::Return => "return",
        Keyword::If => "if",
        Keyword::Else => "else",
        Keyword::While => "while",
        Keyword::Do => "do",
        Keyword::For => "for",
        Keyword::Break => "break",
        Keyword::Continue => "continue",
        Keyword::True => "true",
        Keyword::False => "false",
        Keyword::Null => "null",
        Keyword::New => "new",
        Keyword::Typeof => "typeof",
        Keyword::Throw => "throw",
        Keyword::Try => "try",
        Keyword::Catch => "catch",
        Keyword::Finally => "finally",
        Keyword::In => "in",
        Keyword::This => "this",
    }
}

fn describe(kind: &TokenKind) -> String {
    match kind {
        TokenKind::Number(n) => format!("number {n}"),
        TokenKind::Str(_) => "string literal".to_string(),
        TokenKind::Ident(name) => format!("identifier '{name}'"),
        TokenKind::Keyword(kw) => format!("keyword '{}'", keyword_text(*kw)),
        TokenKind::Punct(p) => format!("'{}'", punct_text(*p)),
        TokenKind::Eof => "end of input".to_string(),
    }
}

fn punct_text(p: Punct) -> &'static str {
    match p {
        Punct::LParen => "(",
        Punct::RParen => ")",
        Punct::LBrace => "{",
        Punct::RBrace => "}",
        Punct::LBracket => "[",
        Punct::RBracket => "]",
        Punct::Semicolon => ";",
        Punct::Comma => ",",
        Punct::Dot => ".",
        Punct::Question => "?",
        Punct::Colon => ":",
        Punct::Plus => "+",
        Punct::Minus => "-",
        Punct::Star => "*",
        Punct::Slash => "/",
        Punct::Percent => "%",
        Punct::PlusPlus => "++",
        Punct::MinusMinus => "--",
        Punct::Bang => "!",
        Punct::Assign => "=",
        Punct::EqEq => "==",
        Punct::EqEqEq => "===",
        Punct::NotEq => "!=",
        Punct::NotEqEq => "!==",
        Punct::Lt => "<",
        Punct::Le => "<=",
        Punct::Gt => ">",
        Punct::Ge => ">=",
        Punct::AndAnd => "&&",
        Punct::OrOr => "||",
        Punct::PlusAssign => "+=",
        Punct::MinusAssign => "-=",
        Punct::StarAssign => "*=",
        Punct::SlashAssign => "/=",
        Punct::PercentAssign => "%=",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(src: &str) -> Program {
        parse_program(src, DEFAULT_MAX_NESTING).unwrap()
    }

    fn parse_expression(src: &str, max_nesting: usize) -> PResult<Expr> {
        let mut program = parse_program(&format!("({src});"), max_nesting)?;
        match program.body.pop() {
            Some(Stmt::Expr(expr)) => Ok(expr),
            other => panic!("expected expression statement, got {:?}", other),
        }
    }

    #[test]
    fn parses_summation_script() {
        let program = parse("var s=0; for (var i=1;i<=100;i++){s+=i;} s;");
        assert_eq!(program.body.len(), 3);
        assert!(matches!(program.body[1], Stmt::For { .. }));
        assert_eq!(program.body[2], Stmt::Expr(Expr::Ident(Rc::from("s"))));
    }

    #[test]
    fn dangling_operator_is_a_syntax_error() {
        let err = parse_program("1 +", DEFAULT_MAX_NESTING).unwrap_err();
        assert!(err.message.contains("end of input"), "{}", err.message);
        assert_eq!(err.line, 1);
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let expr = parse_expression("1 + 2 * 3", DEFAULT_MAX_NESTING).unwrap();
        match expr {
            Expr::Binary {
                op: BinaryOp::Add,
                right,
                ..
            } => assert!(matches!(
                *right,
                Expr::Binary {
                    op: BinaryOp::Mul,
                    ..
                }
            )),
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn newline_terminates_statements() {
        let program = parse("var a = 1\nvar b = 2\na + b");
        assert_eq!(program.body.len(), 3);
    }

    #[test]
    fn missing_separator_on_same_line_is_rejected() {
        assert!(parse_program("var a = 1 var b = 2", DEFAULT_MAX_NESTING).is_err());
    }

    #[test]
    fn new_with_member_chain_then_call() {
        let expr = parse_expression("new host.util.ArrayList().size()", DEFAULT_MAX_NESTING)
            .unwrap();
        match expr {
            Expr::Call { callee, .. } => match *callee {
                Expr::Member { object, property } => {
                    assert_eq!(&*property, "size");
                    assert!(matches!(*object, Expr::New { .. }));
                }
                other => panic!("unexpected callee {:?}", other),
            },
            other => panic!("unexpected tree {:?}", other),
        }
    }

    #[test]
    fn for_in_and_for_of_heads() {
        let program = parse("for (var k in o) {} for (x of xs) {}");
        assert!(matches!(
            program.body[0],
            Stmt::ForEach {
                head: ForHead::In,
                kind: Some(DeclKind::Var),
                ..
            }
        ));
        assert!(matches!(
            program.body[1],
            Stmt::ForEach {
                head: ForHead::Of,
                kind: None,
                ..
            }
        ));
    }

    #[test]
    fn invalid_assignment_target() {
        let err = parse_program("1 = 2;", DEFAULT_MAX_NESTING).unwrap_err();
        assert!(err.message.contains("invalid assignment target"));
    }

    #[test]
    fn nesting_limit_is_enforced() {
        let src = format!("{}1{}", "(".repeat(50), ")".repeat(50));
        assert!(parse_program(&src, 20).is_err());
        assert!(parse_program(&src, DEFAULT_MAX_NESTING).is_ok());
    }

    #[test]
    fn try_requires_handler_or_finalizer() {
        assert!(parse_program("try { x; }", DEFAULT_MAX_NESTING).is_err());
        assert!(parse_program("try { x; } finally { y; }", DEFAULT_MAX_NESTING).is_ok());
    }

    #[test]
    fn object_literal_keys() {
        let expr =
            parse_expression("{a: 1, 'b c': 2, 3: 4, new: 5,}", DEFAULT_MAX_NESTING).unwrap();
        match expr {
            Expr::Object(props) => {
                let keys: Vec<&str> = props.iter().map(|(k, _)| &**k).collect();
                assert_eq!(keys, vec!["a", "b c", "3", "new"]);
            }
            other => panic!("unexpected tree {:?}", other),
        }
    }
}
