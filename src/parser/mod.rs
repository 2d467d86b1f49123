//! Parser module for contract sources
//!
//! This module handles lexical analysis and parsing of contract modules into the AST.

pub mod lexer;
pub mod parser;
pub mod error;
pub mod span;

pub use lexer::{Lexer, LexicalToken, Token, TokenKind};
pub use parser::{parse, Parser};
pub(crate) use parser::with_parser_stack;
pub use error::{ParseError, ParseResult};
pub use span::{Span, Location, HasSpan};

use crate::ast::Module;

/// Parse a contract source into a module
pub fn parse_module(source: &str) -> ParseResult<Module> {
    parser::parse(source)
}

/// Parse multiple contract sources
pub fn parse_modules(sources: &[&str]) -> ParseResult<Vec<Module>> {
    sources.iter().map(|source| parse_module(source)).collect()
}
