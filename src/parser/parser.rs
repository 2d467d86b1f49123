//! Parser implementation for the contract dialect
//!
//! A recursive descent parser over the layout-aware token stream produced by
//! the lexer. Grammar levels follow the usual Python precedence ladder.

use std::{panic, thread};

use super::error::{ParseError, ParseResult};
use super::lexer::{Lexer, LexicalToken, Token, TokenKind};
use super::span::{Location, Span};
use crate::ast::*;
use crate::consts::{PARSER_MAX_DEPTH, PARSER_STACK_SIZE};

const BITOR_OPS: &[(Token, BinaryOp)] = &[(Token::Pipe, BinaryOp::BitOr)];
const BITXOR_OPS: &[(Token, BinaryOp)] = &[(Token::Caret, BinaryOp::BitXor)];
const BITAND_OPS: &[(Token, BinaryOp)] = &[(Token::Amp, BinaryOp::BitAnd)];
const SHIFT_OPS: &[(Token, BinaryOp)] = &[
    (Token::LShift, BinaryOp::LShift),
    (Token::RShift, BinaryOp::RShift),
];
const ARITH_OPS: &[(Token, BinaryOp)] = &[
    (Token::Plus, BinaryOp::Add),
    (Token::Minus, BinaryOp::Sub),
];
const TERM_OPS: &[(Token, BinaryOp)] = &[
    (Token::Star, BinaryOp::Mult),
    (Token::At, BinaryOp::MatMult),
    (Token::Slash, BinaryOp::Div),
    (Token::Percent, BinaryOp::Mod),
    (Token::DoubleSlash, BinaryOp::FloorDiv),
];

/// Binary operator levels, loosest first
const BINARY_LEVELS: &[&[(Token, BinaryOp)]] = &[BITOR_OPS, BITXOR_OPS, BITAND_OPS, SHIFT_OPS, ARITH_OPS, TERM_OPS];

/// Parser for the contract dialect
pub struct Parser {
    tokens: Vec<LexicalToken>,
    current: usize,
    depth: usize,
}

impl Parser {
    /// Create a new parser from source code
    pub fn new(source: &str) -> ParseResult<Self> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            tokens,
            current: 0,
            depth: 0,
        })
    }

    /// Parse the source code into a module
    pub fn parse(mut self) -> ParseResult<Module> {
        let start = self.peek().span.start;
        let mut body = Vec::new();
        while !self.check_kind(TokenKind::EndMarker) {
            body.extend(self.parse_statement()?);
        }
        let end = body.last().map(|s: &Stmt| s.span.end).unwrap_or(start);
        Ok(Module {
            body,
            span: Span::new(start, end),
        })
    }

    // Helper methods

    fn peek(&self) -> &LexicalToken {
        let index = self.current.min(self.tokens.len().saturating_sub(1));
        &self.tokens[index]
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        self.tokens
            .get(self.current + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenKind::EndMarker)
    }

    fn check(&self, token: Token) -> bool {
        self.peek().kind == TokenKind::Lexeme(token)
    }

    fn check_kind(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn advance(&mut self) -> LexicalToken {
        let token = self.peek().clone();
        if self.current < self.tokens.len() {
            self.current += 1;
        }
        token
    }

    fn match_token(&mut self, token: Token) -> bool {
        if self.check(token) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn match_kind(&mut self, kind: TokenKind) -> bool {
        if self.check_kind(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn start(&self) -> Location {
        self.peek().span.start
    }

    fn previous_end(&self) -> Location {
        if self.current == 0 {
            self.peek().span.start
        } else {
            self.tokens[self.current - 1].span.end
        }
    }

    fn span_from(&self, start: Location) -> Span {
        Span::new(start, self.previous_end())
    }

    fn error_expected(&self, expected: &str) -> ParseError {
        let current = self.peek();
        let at_end = self.tokens[self.current.min(self.tokens.len() - 1)..]
            .iter()
            .all(|t| matches!(t.kind, TokenKind::Newline | TokenKind::Dedent | TokenKind::EndMarker));
        match current.kind {
            _ if at_end => ParseError::unexpected_end_of_input(expected, current.location()),
            kind => {
                let found = if current.lexeme.is_empty() {
                    kind.describe()
                } else {
                    format!("`{}`", current.lexeme)
                };
                ParseError::unexpected_token(expected, &found, current.location())
            }
        }
    }

    fn consume(&mut self, token: Token, expected: &str) -> ParseResult<LexicalToken> {
        if self.check(token) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(expected))
        }
    }

    fn consume_kind(&mut self, kind: TokenKind, expected: &str) -> ParseResult<LexicalToken> {
        if self.check_kind(kind) {
            Ok(self.advance())
        } else {
            Err(self.error_expected(expected))
        }
    }

    /// Charge one level of tree nesting against the depth budget.
    fn descend(&mut self) -> ParseResult<()> {
        if self.depth >= PARSER_MAX_DEPTH {
            return Err(ParseError::NestingTooDeep {
                limit: PARSER_MAX_DEPTH,
                location: self.start(),
            });
        }
        self.depth += 1;
        Ok(())
    }

    /// Run `f` and give back every level it charged, on success or failure.
    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        let depth = self.depth;
        let result = f(self);
        self.depth = depth;
        result
    }

    fn guarded<T>(&mut self, f: impl FnOnce(&mut Self) -> ParseResult<T>) -> ParseResult<T> {
        self.scoped(|p| {
            p.descend()?;
            f(p)
        })
    }

    fn parse_identifier(&mut self) -> ParseResult<Identifier> {
        let token = self.consume(Token::Name, "identifier")?;
        Ok(Identifier::new(token.lexeme, token.span))
    }

    fn parse_dotted_name(&mut self) -> ParseResult<(String, Span)> {
        let first = self.parse_identifier()?;
        let mut name = first.name;
        let start = first.span.start;
        while self.check(Token::Dot) && self.peek_kind_at(1) == TokenKind::Lexeme(Token::Name) {
            self.advance();
            name.push('.');
            name.push_str(&self.parse_identifier()?.name);
        }
        Ok((name, self.span_from(start)))
    }

    /// True if the current token can begin an expression
    fn starts_expression(&self) -> bool {
        match self.peek().kind {
            TokenKind::Lexeme(token) => matches!(token,
                Token::Name | Token::Number | Token::String |
                Token::LParen | Token::LBracket | Token::LBrace |
                Token::Minus | Token::Plus | Token::Tilde | Token::Star |
                Token::Not | Token::Lambda | Token::Await |
                Token::NoneLiteral | Token::True | Token::False | Token::Ellipsis
            ),
            _ => false,
        }
    }

    fn at_statement_end(&self) -> bool {
        self.check_kind(TokenKind::Newline)
            || self.check_kind(TokenKind::EndMarker)
            || self.check(Token::Semicolon)
    }

    // Statements

    fn parse_statement(&mut self) -> ParseResult<Vec<Stmt>> {
        self.guarded(|p| p.parse_statement_inner())
    }

    fn parse_statement_inner(&mut self) -> ParseResult<Vec<Stmt>> {
        match self.peek().kind {
            TokenKind::Indent => Err(ParseError::indentation_error("unexpected indent", self.start())),
            TokenKind::Dedent => Err(ParseError::indentation_error("unexpected dedent", self.start())),
            TokenKind::Newline => {
                self.advance();
                Ok(Vec::new())
            }
            TokenKind::Lexeme(Token::Def) | TokenKind::Lexeme(Token::At) | TokenKind::Lexeme(Token::Class)
            | TokenKind::Lexeme(Token::If) | TokenKind::Lexeme(Token::While) | TokenKind::Lexeme(Token::For)
            | TokenKind::Lexeme(Token::Try) | TokenKind::Lexeme(Token::With) => {
                Ok(vec![self.parse_compound_statement()?])
            }
            TokenKind::Lexeme(Token::Async)
                if matches!(
                    self.peek_kind_at(1),
                    TokenKind::Lexeme(Token::Def) | TokenKind::Lexeme(Token::For) | TokenKind::Lexeme(Token::With)
                ) =>
            {
                Ok(vec![self.parse_compound_statement()?])
            }
            _ => self.parse_simple_statements(),
        }
    }

    fn parse_simple_statements(&mut self) -> ParseResult<Vec<Stmt>> {
        let mut stmts = vec![self.parse_small_statement()?];
        while self.match_token(Token::Semicolon) {
            if self.check_kind(TokenKind::Newline) || self.check_kind(TokenKind::EndMarker) {
                break;
            }
            stmts.push(self.parse_small_statement()?);
        }
        if !self.match_kind(TokenKind::Newline) && !self.check_kind(TokenKind::EndMarker) {
            return Err(self.error_expected("end of statement"));
        }
        Ok(stmts)
    }

    fn parse_small_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        let kind = match self.peek().kind {
            TokenKind::Lexeme(Token::Pass) => {
                self.advance();
                StmtKind::Pass
            }
            TokenKind::Lexeme(Token::Break) => {
                self.advance();
                StmtKind::Break
            }
            TokenKind::Lexeme(Token::Continue) => {
                self.advance();
                StmtKind::Continue
            }
            TokenKind::Lexeme(Token::Return) => {
                self.advance();
                if self.at_statement_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(self.parse_testlist_star_expr()?))
                }
            }
            TokenKind::Lexeme(Token::Raise) => {
                self.advance();
                let exc = if self.at_statement_end() { None } else { Some(self.parse_test()?) };
                let cause = if exc.is_some() && self.match_token(Token::From) {
                    Some(self.parse_test()?)
                } else {
                    None
                };
                StmtKind::Raise { exc, cause }
            }
            TokenKind::Lexeme(Token::Global) | TokenKind::Lexeme(Token::Nonlocal) => {
                let is_global = self.advance().is(Token::Global);
                let mut names = vec![self.parse_identifier()?];
                while self.match_token(Token::Comma) {
                    names.push(self.parse_identifier()?);
                }
                if is_global { StmtKind::Global(names) } else { StmtKind::Nonlocal(names) }
            }
            TokenKind::Lexeme(Token::Del) => {
                self.advance();
                let targets = self.parse_exprlist_items()?;
                let targets = targets
                    .into_iter()
                    .map(|t| set_context(t, NameContext::Del))
                    .collect::<ParseResult<Vec<_>>>()?;
                StmtKind::Delete(targets)
            }
            TokenKind::Lexeme(Token::Assert) => {
                self.advance();
                let test = self.parse_test()?;
                let msg = if self.match_token(Token::Comma) { Some(self.parse_test()?) } else { None };
                StmtKind::Assert { test, msg }
            }
            TokenKind::Lexeme(Token::Import) => self.parse_import()?,
            TokenKind::Lexeme(Token::From) => self.parse_import_from()?,
            _ => self.parse_expression_statement()?,
        };
        Ok(Stmt {
            kind,
            span: self.span_from(start),
        })
    }

    fn parse_import(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::Import, "'import'")?;
        let mut names = Vec::new();
        loop {
            let (name, span) = self.parse_dotted_name()?;
            let asname = if self.match_token(Token::As) { Some(self.parse_identifier()?) } else { None };
            let span = match &asname {
                Some(asname) => span.merge(asname.span),
                None => span,
            };
            names.push(Alias { name, asname, span });
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        Ok(StmtKind::Import(names))
    }

    fn parse_import_from(&mut self) -> ParseResult<StmtKind> {
        self.consume(Token::From, "'from'")?;
        let mut level = 0;
        loop {
            if self.match_token(Token::Dot) {
                level += 1;
            } else if self.match_token(Token::Ellipsis) {
                level += 3;
            } else {
                break;
            }
        }
        let module = if self.check(Token::Name) {
            Some(self.parse_dotted_name()?.0)
        } else if level == 0 {
            return Err(self.error_expected("module name"));
        } else {
            None
        };
        self.consume(Token::Import, "'import'")?;

        if self.check(Token::Star) {
            let star = self.advance();
            return Ok(StmtKind::ImportFrom {
                module,
                names: vec![Alias { name: "*".to_string(), asname: None, span: star.span }],
                level,
            });
        }

        let parenthesized = self.match_token(Token::LParen);
        let mut names = Vec::new();
        loop {
            let name = self.parse_identifier()?;
            let asname = if self.match_token(Token::As) { Some(self.parse_identifier()?) } else { None };
            let span = match &asname {
                Some(asname) => name.span.merge(asname.span),
                None => name.span,
            };
            names.push(Alias { name: name.name, asname, span });
            if !self.match_token(Token::Comma) {
                break;
            }
            if parenthesized && self.check(Token::RParen) {
                break;
            }
        }
        if parenthesized {
            self.consume(Token::RParen, "')'")?;
        }
        Ok(StmtKind::ImportFrom { module, names, level })
    }

    fn parse_expression_statement(&mut self) -> ParseResult<StmtKind> {
        let first = self.parse_testlist_star_expr()?;

        if self.match_token(Token::Colon) {
            let target = check_single_target(first)?;
            let annotation = self.parse_test()?;
            let value = if self.match_token(Token::Assign) {
                Some(self.parse_assignment_value()?)
            } else {
                None
            };
            return Ok(StmtKind::AnnAssign { target, annotation, value });
        }

        if let TokenKind::Lexeme(token) = self.peek().kind {
            if token.is_augmented_assign() {
                self.advance();
                let target = check_single_target(first)?;
                let op = augmented_op(token);
                let value = self.parse_assignment_value()?;
                return Ok(StmtKind::AugAssign { target, op, value });
            }
        }

        if self.check(Token::Assign) {
            let mut targets = vec![first];
            let mut value = None;
            while self.match_token(Token::Assign) {
                let next = self.parse_assignment_value()?;
                if let Some(previous) = value.replace(next) {
                    targets.push(previous);
                }
            }
            let value = match value {
                Some(value) => value,
                None => return Err(self.error_expected("expression")),
            };
            let targets = targets
                .into_iter()
                .map(|t| set_context(t, NameContext::Store))
                .collect::<ParseResult<Vec<_>>>()?;
            return Ok(StmtKind::Assign { targets, value });
        }

        Ok(StmtKind::Expr(first))
    }

    fn parse_assignment_value(&mut self) -> ParseResult<Expr> {
        if self.check(Token::Yield) {
            self.parse_yield_expr()
        } else {
            self.parse_testlist_star_expr()
        }
    }

    fn parse_compound_statement(&mut self) -> ParseResult<Stmt> {
        let start = self.start();
        match self.peek().kind {
            TokenKind::Lexeme(Token::At) => {
                let mut decorators = Vec::new();
                while self.match_token(Token::At) {
                    decorators.push(self.parse_namedexpr_test()?);
                    self.consume_kind(TokenKind::Newline, "newline after decorator")?;
                }
                let is_async = self.match_token(Token::Async);
                if !is_async && self.check(Token::Class) {
                    let mut stmt = self.parse_class(start)?;
                    if let StmtKind::ClassDef(class) = &mut stmt.kind {
                        class.decorators = decorators;
                    }
                    return Ok(stmt);
                }
                let mut stmt = self.parse_function(start, is_async)?;
                if let StmtKind::FunctionDef(function) = &mut stmt.kind {
                    function.decorators = decorators;
                }
                Ok(stmt)
            }
            TokenKind::Lexeme(Token::Def) => self.parse_function(start, false),
            TokenKind::Lexeme(Token::Class) => self.parse_class(start),
            TokenKind::Lexeme(Token::If) => {
                self.advance();
                self.parse_if_rest(start)
            }
            TokenKind::Lexeme(Token::While) => {
                self.advance();
                let test = self.parse_namedexpr_test()?;
                let body = self.parse_block()?;
                let orelse = self.parse_else_block()?;
                let end = body_end(&[&body, &orelse], start);
                Ok(Stmt {
                    kind: StmtKind::While { test, body, orelse },
                    span: Span::new(start, end),
                })
            }
            TokenKind::Lexeme(Token::For) => self.parse_for(start, false),
            TokenKind::Lexeme(Token::Try) => self.parse_try(start),
            TokenKind::Lexeme(Token::With) => self.parse_with(start, false),
            TokenKind::Lexeme(Token::Async) => {
                self.advance();
                match self.peek().kind {
                    TokenKind::Lexeme(Token::Def) => self.parse_function(start, true),
                    TokenKind::Lexeme(Token::For) => self.parse_for(start, true),
                    TokenKind::Lexeme(Token::With) => self.parse_with(start, true),
                    _ => Err(self.error_expected("'def', 'for' or 'with' after 'async'")),
                }
            }
            _ => Err(self.error_expected("compound statement")),
        }
    }

    fn parse_block(&mut self) -> ParseResult<Vec<Stmt>> {
        self.consume(Token::Colon, "':'")?;
        if self.match_kind(TokenKind::Newline) {
            self.consume_kind(TokenKind::Indent, "an indented block")?;
            let mut body = Vec::new();
            while !self.check_kind(TokenKind::Dedent) && !self.check_kind(TokenKind::EndMarker) {
                body.extend(self.parse_statement()?);
            }
            self.match_kind(TokenKind::Dedent);
            Ok(body)
        } else {
            self.parse_simple_statements()
        }
    }

    fn parse_else_block(&mut self) -> ParseResult<Vec<Stmt>> {
        if self.match_token(Token::Else) {
            self.parse_block()
        } else {
            Ok(Vec::new())
        }
    }

    fn parse_function(&mut self, start: Location, is_async: bool) -> ParseResult<Stmt> {
        self.consume(Token::Def, "'def'")?;
        let name = self.parse_identifier()?;
        self.consume(Token::LParen, "'('")?;
        let params = self.parse_parameters(Token::RParen, true)?;
        self.consume(Token::RParen, "')'")?;
        let returns = if self.match_token(Token::Arrow) { Some(self.parse_test()?) } else { None };
        let header_end = self.previous_end();
        let body = self.parse_block()?;
        let end = body_end(&[&body], header_end);
        Ok(Stmt {
            kind: StmtKind::FunctionDef(FunctionDef {
                name,
                params,
                body,
                decorators: Vec::new(),
                returns,
                is_async,
            }),
            span: Span::new(start, end),
        })
    }

    fn parse_class(&mut self, start: Location) -> ParseResult<Stmt> {
        self.consume(Token::Class, "'class'")?;
        let name = self.parse_identifier()?;
        let (bases, keywords) = if self.match_token(Token::LParen) {
            let arguments = self.parse_arguments()?;
            self.consume(Token::RParen, "')'")?;
            arguments
        } else {
            (Vec::new(), Vec::new())
        };
        let header_end = self.previous_end();
        let body = self.parse_block()?;
        let end = body_end(&[&body], header_end);
        Ok(Stmt {
            kind: StmtKind::ClassDef(ClassDef {
                name,
                bases,
                keywords,
                body,
                decorators: Vec::new(),
            }),
            span: Span::new(start, end),
        })
    }

    fn parse_if_rest(&mut self, start: Location) -> ParseResult<Stmt> {
        let test = self.parse_namedexpr_test()?;
        let header_end = self.previous_end();
        let body = self.parse_block()?;
        let orelse = if self.check(Token::Elif) {
            let elif_start = self.start();
            self.advance();
            vec![self.guarded(|p| p.parse_if_rest(elif_start))?]
        } else {
            self.parse_else_block()?
        };
        let end = body_end(&[&body, &orelse], header_end);
        Ok(Stmt {
            kind: StmtKind::If { test, body, orelse },
            span: Span::new(start, end),
        })
    }

    fn parse_for(&mut self, start: Location, is_async: bool) -> ParseResult<Stmt> {
        self.consume(Token::For, "'for'")?;
        let target = set_context(self.parse_exprlist()?, NameContext::Store)?;
        self.consume(Token::In, "'in'")?;
        let iter = self.parse_testlist()?;
        let header_end = self.previous_end();
        let body = self.parse_block()?;
        let orelse = self.parse_else_block()?;
        let end = body_end(&[&body, &orelse], header_end);
        Ok(Stmt {
            kind: StmtKind::For { is_async, target, iter, body, orelse },
            span: Span::new(start, end),
        })
    }

    fn parse_try(&mut self, start: Location) -> ParseResult<Stmt> {
        self.consume(Token::Try, "'try'")?;
        let header_end = self.previous_end();
        let body = self.parse_block()?;
        let mut handlers = Vec::new();
        while self.check(Token::Except) {
            let handler_start = self.start();
            self.advance();
            let (type_, name) = if self.check(Token::Colon) {
                (None, None)
            } else {
                let type_ = self.parse_test()?;
                let name = if self.match_token(Token::As) { Some(self.parse_identifier()?) } else { None };
                (Some(type_), name)
            };
            let handler_body = self.parse_block()?;
            let end = body_end(&[&handler_body], handler_start);
            handlers.push(ExceptHandler {
                type_,
                name,
                body: handler_body,
                span: Span::new(handler_start, end),
            });
        }
        let orelse = if !handlers.is_empty() { self.parse_else_block()? } else { Vec::new() };
        let finalbody = if self.match_token(Token::Finally) { self.parse_block()? } else { Vec::new() };
        if handlers.is_empty() && finalbody.is_empty() {
            return Err(self.error_expected("'except' or 'finally' block"));
        }
        let handler_end = handlers.last().map(|h| h.span.end).unwrap_or(header_end);
        let end = body_end(&[&orelse, &finalbody], handler_end.max(body_end(&[&body], header_end)));
        Ok(Stmt {
            kind: StmtKind::Try { body, handlers, orelse, finalbody },
            span: Span::new(start, end),
        })
    }

    fn parse_with(&mut self, start: Location, is_async: bool) -> ParseResult<Stmt> {
        self.consume(Token::With, "'with'")?;
        let mut items = Vec::new();
        loop {
            let context_expr = self.parse_test()?;
            let optional_vars = if self.match_token(Token::As) {
                Some(set_context(self.parse_expr()?, NameContext::Store)?)
            } else {
                None
            };
            items.push(WithItem { context_expr, optional_vars });
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        let header_end = self.previous_end();
        let body = self.parse_block()?;
        let end = body_end(&[&body], header_end);
        Ok(Stmt {
            kind: StmtKind::With { is_async, items, body },
            span: Span::new(start, end),
        })
    }

    /// Parameter list of a `def` (annotations allowed) or a `lambda`.
    fn parse_parameters(&mut self, closing: Token, annotations: bool) -> ParseResult<Parameters> {
        let mut params = Parameters::default();
        let mut seen_star = false;
        let mut seen_default = false;
        let mut bare_star_at = None;

        while !self.check(closing) {
            if self.check(Token::Slash) {
                let slash = self.advance();
                if seen_star || params.args.is_empty() || !params.posonly.is_empty() {
                    return Err(ParseError::invalid_syntax("misplaced '/' in parameter list", slash.location()));
                }
                params.posonly = std::mem::take(&mut params.args)
                    .into_iter()
                    .map(|mut p| {
                        p.style = ParamStyle::PositionalOnly;
                        p
                    })
                    .collect();
            } else if self.match_token(Token::DoubleStar) {
                let param = self.parse_param(ParamStyle::VarKeyword, annotations, false)?;
                params.kwarg = Some(param);
                self.match_token(Token::Comma);
                if !self.check(closing) {
                    return Err(self.error_expected("end of parameters after '**' parameter"));
                }
                break;
            } else if self.check(Token::Star) {
                let star = self.advance();
                if seen_star {
                    return Err(ParseError::invalid_syntax("'*' may appear only once in a parameter list", star.location()));
                }
                seen_star = true;
                if self.check(Token::Name) {
                    params.vararg = Some(self.parse_param(ParamStyle::VarPositional, annotations, false)?);
                } else {
                    bare_star_at = Some(star.location());
                }
            } else {
                let style = if seen_star { ParamStyle::KeywordOnly } else { ParamStyle::Regular };
                let param = self.parse_param(style, annotations, true)?;
                if style == ParamStyle::Regular {
                    if param.default.is_some() {
                        seen_default = true;
                    } else if seen_default {
                        return Err(ParseError::invalid_syntax(
                            "non-default argument follows default argument",
                            param.name.span.start,
                        ));
                    }
                    params.args.push(param);
                } else {
                    params.kwonly.push(param);
                }
            }
            if !self.match_token(Token::Comma) {
                break;
            }
        }

        if let Some(location) = bare_star_at {
            if params.kwonly.is_empty() {
                return Err(ParseError::invalid_syntax("named arguments must follow bare *", location));
            }
        }
        Ok(params)
    }

    fn parse_param(&mut self, style: ParamStyle, annotations: bool, defaults: bool) -> ParseResult<Param> {
        let name = self.parse_identifier()?;
        let annotation = if annotations && self.match_token(Token::Colon) {
            Some(self.parse_test()?)
        } else {
            None
        };
        let default = if defaults && self.match_token(Token::Assign) {
            Some(self.parse_test()?)
        } else {
            None
        };
        Ok(Param { name, style, annotation, default })
    }

    // Expressions

    /// Comma-separated `test`/`*expr` items; a tuple when a comma is present
    fn parse_testlist_star_expr(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let first = self.parse_test_or_star()?;
        if !self.check(Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.match_token(Token::Comma) {
            if !self.starts_expression() {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        Ok(Expr::new(ExprKind::Tuple(elts), self.span_from(start)))
    }

    fn parse_testlist(&mut self) -> ParseResult<Expr> {
        self.parse_testlist_star_expr()
    }

    fn parse_exprlist_items(&mut self) -> ParseResult<Vec<Expr>> {
        let mut items = vec![self.parse_expr_or_star()?];
        while self.match_token(Token::Comma) {
            if !self.starts_expression() {
                break;
            }
            items.push(self.parse_expr_or_star()?);
        }
        Ok(items)
    }

    /// Loop and comprehension targets
    fn parse_exprlist(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let first = self.parse_expr_or_star()?;
        if !self.check(Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.match_token(Token::Comma) {
            if !self.starts_expression() || self.check(Token::In) {
                break;
            }
            elts.push(self.parse_expr_or_star()?);
        }
        Ok(Expr::new(ExprKind::Tuple(elts), self.span_from(start)))
    }

    fn parse_test_or_star(&mut self) -> ParseResult<Expr> {
        if self.check(Token::Star) {
            self.parse_star_expr()
        } else {
            self.parse_test()
        }
    }

    fn parse_expr_or_star(&mut self) -> ParseResult<Expr> {
        if self.check(Token::Star) {
            self.parse_star_expr()
        } else {
            self.parse_expr()
        }
    }

    fn parse_namedexpr_or_star(&mut self) -> ParseResult<Expr> {
        if self.check(Token::Star) {
            self.parse_star_expr()
        } else {
            self.parse_namedexpr_test()
        }
    }

    fn parse_star_expr(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.consume(Token::Star, "'*'")?;
        let value = self.parse_expr()?;
        Ok(Expr::new(ExprKind::Starred(Box::new(value)), self.span_from(start)))
    }

    fn parse_namedexpr_test(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let target = self.parse_test()?;
        if !self.match_token(Token::Walrus) {
            return Ok(target);
        }
        if !matches!(target.kind, ExprKind::Name { .. }) {
            return Err(ParseError::invalid_syntax(
                &format!("cannot use assignment expression with {}", target.kind.name()),
                target.span.start,
            ));
        }
        let target = set_context(target, NameContext::Store)?;
        let value = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::NamedExpr { target: Box::new(target), value: Box::new(value) },
            self.span_from(start),
        ))
    }

    fn parse_test(&mut self) -> ParseResult<Expr> {
        self.guarded(|p| p.parse_test_inner())
    }

    fn parse_test_inner(&mut self) -> ParseResult<Expr> {
        if self.check(Token::Lambda) {
            return self.parse_lambda();
        }
        let start = self.start();
        let body = self.parse_or_test()?;
        if !self.check(Token::If) {
            return Ok(body);
        }
        self.advance();
        let test = self.parse_or_test()?;
        self.consume(Token::Else, "'else' in conditional expression")?;
        let orelse = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::IfExp {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            },
            self.span_from(start),
        ))
    }

    fn parse_lambda(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.consume(Token::Lambda, "'lambda'")?;
        let params = self.parse_parameters(Token::Colon, false)?;
        self.consume(Token::Colon, "':' after lambda parameters")?;
        let body = self.parse_test()?;
        Ok(Expr::new(
            ExprKind::Lambda { params: Box::new(params), body: Box::new(body) },
            self.span_from(start),
        ))
    }

    fn parse_or_test(&mut self) -> ParseResult<Expr> {
        self.parse_bool_level(Token::Or, BoolOp::Or, Self::parse_and_test)
    }

    fn parse_and_test(&mut self) -> ParseResult<Expr> {
        self.parse_bool_level(Token::And, BoolOp::And, Self::parse_not_test)
    }

    fn parse_bool_level(
        &mut self,
        token: Token,
        op: BoolOp,
        next: fn(&mut Self) -> ParseResult<Expr>,
    ) -> ParseResult<Expr> {
        let start = self.start();
        let first = next(self)?;
        if !self.check(token) {
            return Ok(first);
        }
        let mut values = vec![first];
        while self.match_token(token) {
            values.push(next(self)?);
        }
        Ok(Expr::new(ExprKind::BoolOp { op, values }, self.span_from(start)))
    }

    fn parse_not_test(&mut self) -> ParseResult<Expr> {
        if !self.check(Token::Not) {
            return self.parse_comparison();
        }
        let start = self.start();
        self.advance();
        let operand = self.guarded(|p| p.parse_not_test())?;
        Ok(Expr::new(
            ExprKind::UnaryOp { op: UnaryOp::Not, operand: Box::new(operand) },
            self.span_from(start),
        ))
    }

    fn parse_comparison(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let left = self.parse_expr()?;
        let mut ops = Vec::new();
        let mut comparators = Vec::new();
        loop {
            let op = match self.peek().kind {
                TokenKind::Lexeme(Token::Lt) => CmpOp::Lt,
                TokenKind::Lexeme(Token::Gt) => CmpOp::Gt,
                TokenKind::Lexeme(Token::Le) => CmpOp::LtE,
                TokenKind::Lexeme(Token::Ge) => CmpOp::GtE,
                TokenKind::Lexeme(Token::EqEq) => CmpOp::Eq,
                TokenKind::Lexeme(Token::NotEq) => CmpOp::NotEq,
                TokenKind::Lexeme(Token::In) => CmpOp::In,
                TokenKind::Lexeme(Token::Not) if self.peek_kind_at(1) == TokenKind::Lexeme(Token::In) => {
                    self.advance();
                    CmpOp::NotIn
                }
                TokenKind::Lexeme(Token::Is) if self.peek_kind_at(1) == TokenKind::Lexeme(Token::Not) => {
                    self.advance();
                    CmpOp::IsNot
                }
                TokenKind::Lexeme(Token::Is) => CmpOp::Is,
                _ => break,
            };
            self.advance();
            ops.push(op);
            comparators.push(self.parse_expr()?);
        }
        if ops.is_empty() {
            return Ok(left);
        }
        Ok(Expr::new(
            ExprKind::Compare { left: Box::new(left), ops, comparators },
            self.span_from(start),
        ))
    }

    /// Bitwise-or level; the `expr` rule of the grammar
    fn parse_expr(&mut self) -> ParseResult<Expr> {
        self.parse_binary(1)
    }

    /// Operator at the cursor with its binding power, if it is a binary one
    fn binary_operator(&self) -> Option<(BinaryOp, u8)> {
        let token = match self.peek().kind {
            TokenKind::Lexeme(token) => token,
            _ => return None,
        };
        BINARY_LEVELS
            .iter()
            .enumerate()
            .find_map(|(level, ops)| {
                ops.iter()
                    .find(|(t, _)| *t == token)
                    .map(|(_, op)| (*op, level as u8 + 1))
            })
    }

    /// Left-associative binary operators from bitwise-or down to the
    /// multiplicative level, by precedence climbing. Each fold nests the
    /// tree one level deeper and is charged against the depth budget.
    fn parse_binary(&mut self, min_precedence: u8) -> ParseResult<Expr> {
        self.scoped(|p| {
            let start = p.start();
            let mut left = p.parse_factor()?;
            while let Some((op, precedence)) = p.binary_operator() {
                if precedence < min_precedence {
                    break;
                }
                p.descend()?;
                p.advance();
                let right = p.parse_binary(precedence + 1)?;
                left = Expr::new(
                    ExprKind::BinOp { left: Box::new(left), op, right: Box::new(right) },
                    p.span_from(start),
                );
            }
            Ok(left)
        })
    }

    fn parse_factor(&mut self) -> ParseResult<Expr> {
        let op = match self.peek().kind {
            TokenKind::Lexeme(Token::Plus) => UnaryOp::UAdd,
            TokenKind::Lexeme(Token::Minus) => UnaryOp::USub,
            TokenKind::Lexeme(Token::Tilde) => UnaryOp::Invert,
            _ => return self.parse_power(),
        };
        let start = self.start();
        self.advance();
        let operand = self.guarded(|p| p.parse_factor())?;
        Ok(Expr::new(
            ExprKind::UnaryOp { op, operand: Box::new(operand) },
            self.span_from(start),
        ))
    }

    fn parse_power(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let base = self.parse_await_primary()?;
        if !self.match_token(Token::DoubleStar) {
            return Ok(base);
        }
        let exponent = self.guarded(|p| p.parse_factor())?;
        Ok(Expr::new(
            ExprKind::BinOp { left: Box::new(base), op: BinaryOp::Pow, right: Box::new(exponent) },
            self.span_from(start),
        ))
    }

    fn parse_await_primary(&mut self) -> ParseResult<Expr> {
        if !self.check(Token::Await) {
            return self.parse_primary();
        }
        let start = self.start();
        self.advance();
        let value = self.parse_primary()?;
        Ok(Expr::new(ExprKind::Await(Box::new(value)), self.span_from(start)))
    }

    /// Atom followed by call, subscript and attribute trailers. Every
    /// trailer wraps the expression so far and costs one nesting level.
    fn parse_primary(&mut self) -> ParseResult<Expr> {
        self.scoped(|p| p.parse_trailers())
    }

    fn parse_trailers(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let mut expr = self.parse_atom()?;
        loop {
            if matches!(
                self.peek().kind,
                TokenKind::Lexeme(Token::LParen | Token::LBracket | Token::Dot)
            ) {
                self.descend()?;
            }
            if self.match_token(Token::LParen) {
                let (args, keywords) = self.parse_arguments()?;
                self.consume(Token::RParen, "')' after arguments")?;
                expr = Expr::new(
                    ExprKind::Call { func: Box::new(expr), args, keywords },
                    self.span_from(start),
                );
            } else if self.match_token(Token::LBracket) {
                let slice = self.parse_subscript_list()?;
                self.consume(Token::RBracket, "']'")?;
                expr = Expr::new(
                    ExprKind::Subscript { value: Box::new(expr), slice: Box::new(slice) },
                    self.span_from(start),
                );
            } else if self.match_token(Token::Dot) {
                let attr = self.consume(Token::Name, "attribute name")?;
                expr = Expr::new(
                    ExprKind::Attribute { value: Box::new(expr), attr: attr.lexeme },
                    self.span_from(start),
                );
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_subscript_list(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let first = self.parse_subscript()?;
        if !self.check(Token::Comma) {
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.match_token(Token::Comma) {
            if self.check(Token::RBracket) {
                break;
            }
            elts.push(self.parse_subscript()?);
        }
        Ok(Expr::new(ExprKind::Tuple(elts), self.span_from(start)))
    }

    fn parse_subscript(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let lower = if self.check(Token::Colon) { None } else { Some(self.parse_namedexpr_or_star()?) };
        if !self.match_token(Token::Colon) {
            return match lower {
                Some(expr) => Ok(expr),
                None => Err(self.error_expected("subscript")),
            };
        }
        let ends_slice = |p: &Self| p.check(Token::Colon) || p.check(Token::RBracket) || p.check(Token::Comma);
        let upper = if ends_slice(self) { None } else { Some(Box::new(self.parse_test()?)) };
        let step = if self.match_token(Token::Colon) {
            if self.check(Token::RBracket) || self.check(Token::Comma) {
                None
            } else {
                Some(Box::new(self.parse_test()?))
            }
        } else {
            None
        };
        Ok(Expr::new(
            ExprKind::Slice { lower: lower.map(Box::new), upper, step },
            self.span_from(start),
        ))
    }

    /// Call arguments (also class bases): positional, `*args`, `name=value`, `**kwargs`
    fn parse_arguments(&mut self) -> ParseResult<(Vec<Expr>, Vec<Keyword>)> {
        let mut args = Vec::new();
        let mut keywords = Vec::new();
        while !self.check(Token::RParen) {
            let start = self.start();
            if self.match_token(Token::DoubleStar) {
                let value = self.parse_test()?;
                keywords.push(Keyword { arg: None, value, span: self.span_from(start) });
            } else if self.check(Token::Star) {
                args.push(self.parse_star_expr()?);
            } else if self.check(Token::Name) && self.peek_kind_at(1) == TokenKind::Lexeme(Token::Assign) {
                let name = self.advance();
                self.advance();
                let value = self.parse_test()?;
                keywords.push(Keyword { arg: Some(name.lexeme), value, span: self.span_from(start) });
            } else {
                let value = self.parse_namedexpr_test()?;
                if self.check(Token::For) || (self.check(Token::Async) && self.peek_kind_at(1) == TokenKind::Lexeme(Token::For)) {
                    let generators = self.parse_comprehension_clauses()?;
                    args.push(Expr::new(
                        ExprKind::GeneratorExp { elt: Box::new(value), generators },
                        self.span_from(start),
                    ));
                } else {
                    args.push(value);
                }
            }
            if !self.match_token(Token::Comma) {
                break;
            }
        }
        Ok((args, keywords))
    }

    fn at_comprehension(&self) -> bool {
        self.check(Token::For)
            || (self.check(Token::Async) && self.peek_kind_at(1) == TokenKind::Lexeme(Token::For))
    }

    fn parse_comprehension_clauses(&mut self) -> ParseResult<Vec<Comprehension>> {
        let mut generators = Vec::new();
        while self.at_comprehension() {
            let is_async = self.match_token(Token::Async);
            self.consume(Token::For, "'for'")?;
            let target = set_context(self.parse_exprlist()?, NameContext::Store)?;
            self.consume(Token::In, "'in'")?;
            let iter = self.parse_or_test()?;
            let mut ifs = Vec::new();
            while self.match_token(Token::If) {
                ifs.push(self.parse_or_test()?);
            }
            generators.push(Comprehension { target, iter, ifs, is_async });
        }
        Ok(generators)
    }

    fn parse_yield_expr(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.consume(Token::Yield, "'yield'")?;
        if self.match_token(Token::From) {
            let value = self.parse_test()?;
            return Ok(Expr::new(ExprKind::YieldFrom(Box::new(value)), self.span_from(start)));
        }
        let value = if self.starts_expression() {
            Some(Box::new(self.parse_testlist_star_expr()?))
        } else {
            None
        };
        Ok(Expr::new(ExprKind::Yield(value), self.span_from(start)))
    }

    fn parse_atom(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let kind = match self.peek().kind {
            TokenKind::Lexeme(Token::Name) => {
                let token = self.advance();
                ExprKind::Name { id: token.lexeme, ctx: NameContext::Load }
            }
            TokenKind::Lexeme(Token::Number) => {
                let token = self.advance();
                ExprKind::Constant(Constant::Number(token.lexeme))
            }
            TokenKind::Lexeme(Token::String) => return self.parse_strings(),
            TokenKind::Lexeme(Token::NoneLiteral) => {
                self.advance();
                ExprKind::Constant(Constant::None)
            }
            TokenKind::Lexeme(Token::True) => {
                self.advance();
                ExprKind::Constant(Constant::Bool(true))
            }
            TokenKind::Lexeme(Token::False) => {
                self.advance();
                ExprKind::Constant(Constant::Bool(false))
            }
            TokenKind::Lexeme(Token::Ellipsis) => {
                self.advance();
                ExprKind::Constant(Constant::Ellipsis)
            }
            TokenKind::Lexeme(Token::LParen) => return self.guarded(|p| p.parse_paren_atom()),
            TokenKind::Lexeme(Token::LBracket) => return self.guarded(|p| p.parse_list_atom()),
            TokenKind::Lexeme(Token::LBrace) => return self.guarded(|p| p.parse_brace_atom()),
            _ => return Err(self.error_expected("expression")),
        };
        Ok(Expr::new(kind, self.span_from(start)))
    }

    fn parse_paren_atom(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.consume(Token::LParen, "'('")?;
        if self.match_token(Token::RParen) {
            return Ok(Expr::new(ExprKind::Tuple(Vec::new()), self.span_from(start)));
        }
        if self.check(Token::Yield) {
            let value = self.parse_yield_expr()?;
            self.consume(Token::RParen, "')'")?;
            return Ok(value);
        }
        let first = self.parse_namedexpr_or_star()?;
        if self.at_comprehension() {
            let generators = self.parse_comprehension_clauses()?;
            self.consume(Token::RParen, "')'")?;
            return Ok(Expr::new(
                ExprKind::GeneratorExp { elt: Box::new(first), generators },
                self.span_from(start),
            ));
        }
        if !self.check(Token::Comma) {
            self.consume(Token::RParen, "')'")?;
            return Ok(first);
        }
        let mut elts = vec![first];
        while self.match_token(Token::Comma) {
            if self.check(Token::RParen) {
                break;
            }
            elts.push(self.parse_namedexpr_or_star()?);
        }
        self.consume(Token::RParen, "')'")?;
        Ok(Expr::new(ExprKind::Tuple(elts), self.span_from(start)))
    }

    fn parse_list_atom(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.consume(Token::LBracket, "'['")?;
        if self.match_token(Token::RBracket) {
            return Ok(Expr::new(ExprKind::List(Vec::new()), self.span_from(start)));
        }
        let first = self.parse_namedexpr_or_star()?;
        if self.at_comprehension() {
            let generators = self.parse_comprehension_clauses()?;
            self.consume(Token::RBracket, "']'")?;
            return Ok(Expr::new(
                ExprKind::ListComp { elt: Box::new(first), generators },
                self.span_from(start),
            ));
        }
        let mut elts = vec![first];
        while self.match_token(Token::Comma) {
            if self.check(Token::RBracket) {
                break;
            }
            elts.push(self.parse_namedexpr_or_star()?);
        }
        self.consume(Token::RBracket, "']'")?;
        Ok(Expr::new(ExprKind::List(elts), self.span_from(start)))
    }

    fn parse_brace_atom(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        self.consume(Token::LBrace, "'{'")?;
        if self.match_token(Token::RBrace) {
            return Ok(Expr::new(
                ExprKind::Dict { keys: Vec::new(), values: Vec::new() },
                self.span_from(start),
            ));
        }

        // Dictionary display or comprehension
        let is_dict = self.check(Token::DoubleStar);
        let first = if is_dict { None } else { Some(self.parse_test_or_star()?) };
        if is_dict || self.check(Token::Colon) {
            let mut keys = Vec::new();
            let mut values = Vec::new();
            let first_value = self.parse_dict_entry(first, &mut keys)?;
            values.push(first_value);
            if keys.len() == 1 && keys[0].is_some() && self.at_comprehension() {
                let generators = self.parse_comprehension_clauses()?;
                self.consume(Token::RBrace, "'}'")?;
                let key = keys.pop().flatten();
                let value = values.pop();
                return match (key, value) {
                    (Some(key), Some(value)) => Ok(Expr::new(
                        ExprKind::DictComp { key: Box::new(key), value: Box::new(value), generators },
                        self.span_from(start),
                    )),
                    _ => Err(self.error_expected("dictionary comprehension")),
                };
            }
            while self.match_token(Token::Comma) {
                if self.check(Token::RBrace) {
                    break;
                }
                let key = if self.check(Token::DoubleStar) { None } else { Some(self.parse_test()?) };
                let value = self.parse_dict_entry(key, &mut keys)?;
                values.push(value);
            }
            self.consume(Token::RBrace, "'}'")?;
            return Ok(Expr::new(ExprKind::Dict { keys, values }, self.span_from(start)));
        }

        // Set display or comprehension
        let first = match first {
            Some(first) => first,
            None => return Err(self.error_expected("expression")),
        };
        if self.at_comprehension() {
            let generators = self.parse_comprehension_clauses()?;
            self.consume(Token::RBrace, "'}'")?;
            return Ok(Expr::new(
                ExprKind::SetComp { elt: Box::new(first), generators },
                self.span_from(start),
            ));
        }
        let mut elts = vec![first];
        while self.match_token(Token::Comma) {
            if self.check(Token::RBrace) {
                break;
            }
            elts.push(self.parse_test_or_star()?);
        }
        self.consume(Token::RBrace, "'}'")?;
        Ok(Expr::new(ExprKind::Set(elts), self.span_from(start)))
    }

    /// Finish one `key: value` or `**mapping` entry whose key (if any) was already parsed
    fn parse_dict_entry(&mut self, key: Option<Expr>, keys: &mut Vec<Option<Expr>>) -> ParseResult<Expr> {
        match key {
            Some(key) => {
                self.consume(Token::Colon, "':' in dictionary")?;
                keys.push(Some(key));
                self.parse_test()
            }
            None => {
                self.consume(Token::DoubleStar, "'**' in dictionary")?;
                keys.push(None);
                self.parse_expr()
            }
        }
    }

    /// One or more adjacent string literals, concatenated
    fn parse_strings(&mut self) -> ParseResult<Expr> {
        let start = self.start();
        let mut text = String::new();
        let mut embedded = Vec::new();
        let mut formatted = false;
        let mut bytes: Option<bool> = None;

        while self.check(Token::String) {
            let token = self.advance();
            let literal = StringLiteral::split(&token.lexeme);
            if let Some(previous) = bytes {
                if previous != literal.is_bytes {
                    return Err(ParseError::invalid_syntax(
                        "cannot mix bytes and nonbytes literals",
                        token.location(),
                    ));
                }
            }
            bytes = Some(literal.is_bytes);
            if literal.is_formatted {
                formatted = true;
                for source in scan_fstring(literal.body, literal.is_raw).map_err(|message| {
                    ParseError::invalid_syntax(&format!("f-string: {}", message), token.location())
                })? {
                    embedded.push(self.parse_embedded_expression(&source, token.span)?);
                }
            }
            text.push_str(literal.body);
        }

        let span = self.span_from(start);
        let kind = if formatted {
            ExprKind::FormattedString(embedded)
        } else if bytes == Some(true) {
            ExprKind::Constant(Constant::Bytes(text))
        } else {
            ExprKind::Constant(Constant::Str(text))
        };
        Ok(Expr::new(kind, span))
    }

    /// Parse the expression inside an f-string replacement field. Spans of
    /// the resulting nodes are pinned to the enclosing string literal.
    fn parse_embedded_expression(&mut self, source: &str, span: Span) -> ParseResult<Expr> {
        let mut text = source.trim_end();
        if text.ends_with('=') && !text.ends_with("==") && !text.ends_with("!=")
            && !text.ends_with("<=") && !text.ends_with(">=")
        {
            text = &text[..text.len() - 1];
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ParseError::invalid_syntax("f-string: empty expression not allowed", span.start));
        }

        let wrapped = format!("({})", text);
        let relocate_error = |e: ParseError| {
            ParseError::invalid_syntax(&format!("f-string: {}", e), span.start)
        };
        let tokens = Lexer::new(&wrapped).tokenize().map_err(relocate_error)?;
        let mut inner = Parser {
            tokens,
            current: 0,
            depth: self.depth,
        };
        let mut expr = inner.parse_testlist_star_expr().map_err(relocate_error)?;
        if !inner.check_kind(TokenKind::Newline) {
            return Err(relocate_error(inner.error_expected("end of f-string expression")));
        }
        relocate(&mut expr, span);
        Ok(expr)
    }
}

/// Prefix flags and body of one string literal token
struct StringLiteral<'a> {
    body: &'a str,
    is_bytes: bool,
    is_formatted: bool,
    is_raw: bool,
}

impl<'a> StringLiteral<'a> {
    fn split(lexeme: &'a str) -> Self {
        let prefix_len = lexeme.find(['"', '\'']).unwrap_or(0);
        let prefix = lexeme[..prefix_len].to_ascii_lowercase();
        let rest = &lexeme[prefix_len..];
        let quote_len = if rest.starts_with("\"\"\"") || rest.starts_with("'''") { 3 } else { 1 };
        let body = if rest.len() >= quote_len * 2 {
            &rest[quote_len..rest.len() - quote_len]
        } else {
            ""
        };
        Self {
            body,
            is_bytes: prefix.contains('b'),
            is_formatted: prefix.contains('f'),
            is_raw: prefix.contains('r'),
        }
    }
}

/// Source text of every replacement-field expression in an f-string body,
/// including fields nested in format specs.
fn scan_fstring(body: &str, raw: bool) -> Result<Vec<String>, &'static str> {
    let chars: Vec<char> = body.chars().collect();
    let mut out = Vec::new();
    scan_fstring_chars(&chars, raw, &mut out)?;
    Ok(out)
}

fn scan_fstring_chars(chars: &[char], raw: bool, out: &mut Vec<String>) -> Result<(), &'static str> {
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' if !raw && chars.get(i + 1) == Some(&'\\') => i += 2,
            // `\N{NAME}` is a character escape, its braces are not a field
            '\\' if !raw && chars.get(i + 1) == Some(&'N') && chars.get(i + 2) == Some(&'{') => {
                let close = chars[i + 3..]
                    .iter()
                    .position(|&c| c == '}')
                    .ok_or("malformed \\N character escape")?;
                i += close + 4;
            }
            '{' if chars.get(i + 1) == Some(&'{') => i += 2,
            '}' if chars.get(i + 1) == Some(&'}') => i += 2,
            '}' => return Err("single '}' is not allowed"),
            '{' => i = scan_replacement_field(chars, i + 1, raw, out)?,
            _ => i += 1,
        }
    }
    Ok(())
}

/// Returns the index just past the field's closing brace
fn scan_replacement_field(
    chars: &[char],
    start: usize,
    raw: bool,
    out: &mut Vec<String>,
) -> Result<usize, &'static str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut j = start;
    while j < chars.len() {
        let c = chars[j];
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            j += 1;
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' => depth = depth.saturating_sub(1),
            '}' if depth > 0 => depth -= 1,
            '}' | ':' if depth == 0 => break,
            '!' if depth == 0 && chars.get(j + 1) != Some(&'=') => break,
            _ => {}
        }
        j += 1;
    }
    if j >= chars.len() {
        return Err("expecting '}'");
    }
    out.push(chars[start..j].iter().collect());

    if chars[j] == '!' {
        j += 2;
    }
    if chars.get(j) == Some(&':') {
        let spec_start = j + 1;
        let mut k = spec_start;
        let mut nested = 0usize;
        while k < chars.len() {
            match chars[k] {
                '{' => nested += 1,
                '}' if nested == 0 => break,
                '}' => nested -= 1,
                _ => {}
            }
            k += 1;
        }
        if k >= chars.len() {
            return Err("expecting '}'");
        }
        scan_fstring_chars(&chars[spec_start..k], raw, out)?;
        j = k;
    }
    if chars.get(j) != Some(&'}') {
        return Err("expecting '}'");
    }
    Ok(j + 1)
}

fn relocate(expr: &mut Expr, span: Span) {
    expr.span = span;
    match &mut expr.kind {
        ExprKind::BoolOp { values, .. } => values.iter_mut().for_each(|e| relocate(e, span)),
        ExprKind::NamedExpr { target, value } => {
            relocate(target, span);
            relocate(value, span);
        }
        ExprKind::BinOp { left, right, .. } => {
            relocate(left, span);
            relocate(right, span);
        }
        ExprKind::UnaryOp { operand, .. } => relocate(operand, span),
        ExprKind::Lambda { params, body } => {
            let params: &mut Parameters = params;
            for param in params
                .posonly
                .iter_mut()
                .chain(params.args.iter_mut())
                .chain(params.vararg.iter_mut())
                .chain(params.kwonly.iter_mut())
                .chain(params.kwarg.iter_mut())
            {
                param.name.span = span;
                if let Some(default) = &mut param.default {
                    relocate(default, span);
                }
            }
            relocate(body, span);
        }
        ExprKind::IfExp { test, body, orelse } => {
            relocate(test, span);
            relocate(body, span);
            relocate(orelse, span);
        }
        ExprKind::Dict { keys, values } => {
            keys.iter_mut().flatten().for_each(|e| relocate(e, span));
            values.iter_mut().for_each(|e| relocate(e, span));
        }
        ExprKind::Set(elts) | ExprKind::List(elts) | ExprKind::Tuple(elts) | ExprKind::FormattedString(elts) => {
            elts.iter_mut().for_each(|e| relocate(e, span))
        }
        ExprKind::ListComp { elt, generators }
        | ExprKind::SetComp { elt, generators }
        | ExprKind::GeneratorExp { elt, generators } => {
            relocate(elt, span);
            relocate_generators(generators, span);
        }
        ExprKind::DictComp { key, value, generators } => {
            relocate(key, span);
            relocate(value, span);
            relocate_generators(generators, span);
        }
        ExprKind::Await(value) | ExprKind::YieldFrom(value) | ExprKind::Starred(value) => relocate(value, span),
        ExprKind::Yield(value) => {
            if let Some(value) = value {
                relocate(value, span);
            }
        }
        ExprKind::Compare { left, comparators, .. } => {
            relocate(left, span);
            comparators.iter_mut().for_each(|e| relocate(e, span));
        }
        ExprKind::Call { func, args, keywords } => {
            relocate(func, span);
            args.iter_mut().for_each(|e| relocate(e, span));
            for keyword in keywords {
                keyword.span = span;
                relocate(&mut keyword.value, span);
            }
        }
        ExprKind::Attribute { value, .. } => relocate(value, span),
        ExprKind::Subscript { value, slice } => {
            relocate(value, span);
            relocate(slice, span);
        }
        ExprKind::Slice { lower, upper, step } => {
            for part in [lower, upper, step].into_iter().flatten() {
                relocate(part, span);
            }
        }
        ExprKind::Constant(_) | ExprKind::Name { .. } => {}
    }
}

fn relocate_generators(generators: &mut [Comprehension], span: Span) {
    for generator in generators {
        relocate(&mut generator.target, span);
        relocate(&mut generator.iter, span);
        generator.ifs.iter_mut().for_each(|e| relocate(e, span));
    }
}

/// Mark an expression as an assignment or deletion target, rejecting
/// expressions that cannot be bound.
fn set_context(expr: Expr, ctx: NameContext) -> ParseResult<Expr> {
    let Expr { kind, span } = expr;
    let kind = match kind {
        ExprKind::Name { id, .. } => ExprKind::Name { id, ctx },
        ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => kind,
        ExprKind::Tuple(elts) => ExprKind::Tuple(
            elts.into_iter().map(|e| set_context(e, ctx)).collect::<ParseResult<Vec<_>>>()?,
        ),
        ExprKind::List(elts) => ExprKind::List(
            elts.into_iter().map(|e| set_context(e, ctx)).collect::<ParseResult<Vec<_>>>()?,
        ),
        ExprKind::Starred(value) if ctx == NameContext::Store => {
            ExprKind::Starred(Box::new(set_context(*value, ctx)?))
        }
        other => {
            let verb = if ctx == NameContext::Del { "delete" } else { "assign to" };
            return Err(ParseError::invalid_syntax(
                &format!("cannot {} {}", verb, other.name()),
                span.start,
            ));
        }
    };
    Ok(Expr { kind, span })
}

/// Targets of annotated and augmented assignment must be a single name,
/// attribute or subscript.
fn check_single_target(expr: Expr) -> ParseResult<Expr> {
    match expr.kind {
        ExprKind::Name { .. } | ExprKind::Attribute { .. } | ExprKind::Subscript { .. } => {
            set_context(expr, NameContext::Store)
        }
        ref other => Err(ParseError::invalid_syntax(
            &format!("illegal target for annotation or augmented assignment: {}", other.name()),
            expr.span.start,
        )),
    }
}

fn augmented_op(token: Token) -> BinaryOp {
    match token {
        Token::PlusAssign => BinaryOp::Add,
        Token::MinusAssign => BinaryOp::Sub,
        Token::StarAssign => BinaryOp::Mult,
        Token::SlashAssign => BinaryOp::Div,
        Token::DoubleSlashAssign => BinaryOp::FloorDiv,
        Token::PercentAssign => BinaryOp::Mod,
        Token::AtAssign => BinaryOp::MatMult,
        Token::AmpAssign => BinaryOp::BitAnd,
        Token::PipeAssign => BinaryOp::BitOr,
        Token::CaretAssign => BinaryOp::BitXor,
        Token::RShiftAssign => BinaryOp::RShift,
        Token::LShiftAssign => BinaryOp::LShift,
        _ => BinaryOp::Pow,
    }
}

/// End of the last statement across the given sections, or `fallback`
fn body_end(sections: &[&[Stmt]], fallback: Location) -> Location {
    sections
        .iter()
        .rev()
        .find_map(|section| section.last().map(|stmt| stmt.span.end))
        .unwrap_or(fallback)
}

/// Parse source code into a module
pub fn parse(source: &str) -> ParseResult<Module> {
    with_parser_stack(|| Parser::new(source)?.parse())
}

/// Run `f` on a thread whose stack holds the deepest tree the parser
/// accepts, whatever the caller's own stack size. Runs `f` on the current
/// thread when no thread can be spawned.
pub(crate) fn with_parser_stack<T, F>(f: F) -> T
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let mut task = Some(f);
    let finished = thread::scope(|scope| {
        let spawned = thread::Builder::new()
            .name("contract-parser".to_string())
            .stack_size(PARSER_STACK_SIZE)
            .spawn_scoped(scope, || task.take().map(|f| f()));
        match spawned {
            Ok(handle) => handle.join().unwrap_or_else(|payload| panic::resume_unwind(payload)),
            Err(err) => {
                log::warn!("parser thread unavailable, running inline: {}", err);
                None
            }
        }
    });
    match (finished, task) {
        (Some(output), _) => output,
        (None, Some(f)) => f(),
        (None, None) => unreachable!("parser task neither ran nor stayed queued"),
    }
}
