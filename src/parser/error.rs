use super::span::Location;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unexpected token encountered
    UnexpectedToken {
        expected: String,
        found: String,
        location: Location,
    },

    /// Unexpected end of input
    UnexpectedEndOfInput {
        expected: String,
        location: Location,
    },

    /// Invalid syntax
    InvalidSyntax {
        message: String,
        location: Location,
    },

    /// Lexical error
    LexicalError {
        message: String,
        location: Location,
    },

    /// Inconsistent indentation
    IndentationError {
        message: String,
        location: Location,
    },

    /// Nesting deeper than the parser is willing to follow
    NestingTooDeep {
        limit: usize,
        location: Location,
    },
}

impl ParseError {
    /// Create a new unexpected token error
    pub fn unexpected_token(expected: &str, found: &str, location: Location) -> Self {
        ParseError::UnexpectedToken {
            expected: expected.to_string(),
            found: found.to_string(),
            location,
        }
    }

    /// Create a new unexpected end of input error
    pub fn unexpected_end_of_input(expected: &str, location: Location) -> Self {
        ParseError::UnexpectedEndOfInput {
            expected: expected.to_string(),
            location,
        }
    }

    /// Create a new invalid syntax error
    pub fn invalid_syntax(message: &str, location: Location) -> Self {
        ParseError::InvalidSyntax {
            message: message.to_string(),
            location,
        }
    }

    /// Create a new lexical error
    pub fn lexical_error(message: &str, location: Location) -> Self {
        ParseError::LexicalError {
            message: message.to_string(),
            location,
        }
    }

    /// Create a new indentation error
    pub fn indentation_error(message: &str, location: Location) -> Self {
        ParseError::IndentationError {
            message: message.to_string(),
            location,
        }
    }

    /// Add context to an error
    pub fn with_context(self, context: &str) -> Self {
        match self {
            ParseError::UnexpectedToken { expected, found, location } => {
                ParseError::UnexpectedToken {
                    expected: format!("{} (context: {})", expected, context),
                    found,
                    location,
                }
            }
            ParseError::UnexpectedEndOfInput { expected, location } => {
                ParseError::UnexpectedEndOfInput {
                    expected: format!("{} (context: {})", expected, context),
                    location,
                }
            }
            ParseError::InvalidSyntax { message, location } => {
                ParseError::InvalidSyntax {
                    message: format!("{} (context: {})", message, context),
                    location,
                }
            }
            other => other,
        }
    }

    /// Get the location of the error
    pub fn location(&self) -> Location {
        match self {
            ParseError::UnexpectedToken { location, .. } => *location,
            ParseError::UnexpectedEndOfInput { location, .. } => *location,
            ParseError::InvalidSyntax { location, .. } => *location,
            ParseError::LexicalError { location, .. } => *location,
            ParseError::IndentationError { location, .. } => *location,
            ParseError::NestingTooDeep { location, .. } => *location,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::UnexpectedToken { expected, found, location } => {
                write!(f, "line {}, column {}: expected {}, found {}", location.line, location.column, expected, found)
            }
            ParseError::UnexpectedEndOfInput { expected, location } => {
                write!(f, "line {}, column {}: unexpected end of input, expected {}", location.line, location.column, expected)
            }
            ParseError::InvalidSyntax { message, location } => {
                write!(f, "line {}, column {}: invalid syntax: {}", location.line, location.column, message)
            }
            ParseError::LexicalError { message, location } => {
                write!(f, "line {}, column {}: {}", location.line, location.column, message)
            }
            ParseError::IndentationError { message, location } => {
                write!(f, "line {}, column {}: indentation error: {}", location.line, location.column, message)
            }
            ParseError::NestingTooDeep { limit, location } => {
                write!(f, "line {}, column {}: nesting exceeds {} levels", location.line, location.column, limit)
            }
        }
    }
}

impl std::error::Error for ParseError {}

/// Result type for parsing operations
pub type ParseResult<T> = Result<T, ParseError>;
