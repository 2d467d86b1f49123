//! Syntax tree for contract modules
//!
//! A closed set of node kinds covering the accepted dialect. Every consumer
//! matches exhaustively, so a new node kind fails to build until each walk
//! decides what to do with it.

mod nodes;
mod printer;
mod visitor;

pub use nodes::*;
pub use printer::*;
pub use visitor::*;

pub use crate::parser::span::{HasSpan, Location, Span};
