use logos::Logos;

use super::error::ParseError;
use super::span::{Location, Span};

/// Raw token types of the contract dialect
#[derive(Logos, Debug, PartialEq, Eq, Clone, Copy, Hash)]
#[logos(skip r"[ \t\x0C]+")]
pub enum Token {
    // Keywords
    #[token("False")]
    False,
    #[token("None")]
    NoneLiteral,
    #[token("True")]
    True,
    #[token("and")]
    And,
    #[token("as")]
    As,
    #[token("assert")]
    Assert,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("break")]
    Break,
    #[token("class")]
    Class,
    #[token("continue")]
    Continue,
    #[token("def")]
    Def,
    #[token("del")]
    Del,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("except")]
    Except,
    #[token("finally")]
    Finally,
    #[token("for")]
    For,
    #[token("from")]
    From,
    #[token("global")]
    Global,
    #[token("if")]
    If,
    #[token("import")]
    Import,
    #[token("in")]
    In,
    #[token("is")]
    Is,
    #[token("lambda")]
    Lambda,
    #[token("nonlocal")]
    Nonlocal,
    #[token("not")]
    Not,
    #[token("or")]
    Or,
    #[token("pass")]
    Pass,
    #[token("raise")]
    Raise,
    #[token("return")]
    Return,
    #[token("try")]
    Try,
    #[token("while")]
    While,
    #[token("with")]
    With,
    #[token("yield")]
    Yield,

    // Operators
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("@")]
    At,
    #[token("<<")]
    LShift,
    #[token(">>")]
    RShift,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token(":=")]
    Walrus,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,

    // Delimiters
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,
    #[token("...")]
    Ellipsis,
    #[token(";")]
    Semicolon,
    #[token("=")]
    Assign,
    #[token("->")]
    Arrow,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("//=")]
    DoubleSlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("@=")]
    AtAssign,
    #[token("&=")]
    AmpAssign,
    #[token("|=")]
    PipeAssign,
    #[token("^=")]
    CaretAssign,
    #[token(">>=")]
    RShiftAssign,
    #[token("<<=")]
    LShiftAssign,
    #[token("**=")]
    DoubleStarAssign,

    // Literals
    #[regex(r#"[rRbBuUfF]{0,2}["']"#, lex_string)]
    String,
    #[regex(r"[0-9][0-9_]*(\.[0-9_]*)?([eE][+-]?[0-9_]+)?[jJ]?")]
    #[regex(r"\.[0-9][0-9_]*([eE][+-]?[0-9_]+)?[jJ]?")]
    #[regex(r"0[xX][0-9a-fA-F_]+")]
    #[regex(r"0[oO][0-7_]+")]
    #[regex(r"0[bB][01_]+")]
    Number,

    // Identifiers
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*")]
    Name,

    // Trivia and line structure
    #[regex(r"#[^\r\n]*")]
    Comment,
    #[regex(r"\\\r?\n")]
    LineContinuation,
    #[regex(r"\r?\n")]
    Newline,
}

/// Consume the body of a string literal whose prefix and opening quote were matched.
fn lex_string(lex: &mut logos::Lexer<Token>) -> bool {
    let quote = match lex.slice().bytes().last() {
        Some(q) => q,
        None => return false,
    };
    let rest = lex.remainder().as_bytes();
    let triple = rest.len() >= 2 && rest[0] == quote && rest[1] == quote;
    let mut i = if triple { 2 } else { 0 };
    while i < rest.len() {
        match rest[i] {
            b'\\' => i += 2,
            b'\n' if !triple => return false,
            c if c == quote => {
                if !triple {
                    lex.bump(i + 1);
                    return true;
                }
                if rest.len() >= i + 3 && rest[i + 1] == quote && rest[i + 2] == quote {
                    lex.bump(i + 3);
                    return true;
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    false
}

impl Token {
    /// Check if this token is a keyword
    pub fn is_keyword(&self) -> bool {
        matches!(self,
            Token::False | Token::NoneLiteral | Token::True | Token::And |
            Token::As | Token::Assert | Token::Async | Token::Await |
            Token::Break | Token::Class | Token::Continue | Token::Def |
            Token::Del | Token::Elif | Token::Else | Token::Except |
            Token::Finally | Token::For | Token::From | Token::Global |
            Token::If | Token::Import | Token::In | Token::Is |
            Token::Lambda | Token::Nonlocal | Token::Not | Token::Or |
            Token::Pass | Token::Raise | Token::Return | Token::Try |
            Token::While | Token::With | Token::Yield
        )
    }

    /// Check if this token is an augmented assignment operator
    pub fn is_augmented_assign(&self) -> bool {
        matches!(self,
            Token::PlusAssign | Token::MinusAssign | Token::StarAssign |
            Token::SlashAssign | Token::DoubleSlashAssign | Token::PercentAssign |
            Token::AtAssign | Token::AmpAssign | Token::PipeAssign |
            Token::CaretAssign | Token::RShiftAssign | Token::LShiftAssign |
            Token::DoubleStarAssign
        )
    }

    /// Check if this token opens a bracketed region
    pub fn opens_bracket(&self) -> bool {
        matches!(self, Token::LParen | Token::LBracket | Token::LBrace)
    }

    /// Check if this token closes a bracketed region
    pub fn closes_bracket(&self) -> bool {
        matches!(self, Token::RParen | Token::RBracket | Token::RBrace)
    }
}

/// Token kind after the layout pass: raw lexemes plus the synthetic
/// line-structure tokens derived from indentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Lexeme(Token),
    Newline,
    Indent,
    Dedent,
    EndMarker,
}

impl TokenKind {
    pub fn describe(&self) -> String {
        match self {
            TokenKind::Lexeme(token) => format!("{:?}", token),
            TokenKind::Newline => "newline".to_string(),
            TokenKind::Indent => "indent".to_string(),
            TokenKind::Dedent => "dedent".to_string(),
            TokenKind::EndMarker => "end of input".to_string(),
        }
    }
}

/// Lexical token with location information
#[derive(Debug, Clone)]
pub struct LexicalToken {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl LexicalToken {
    pub fn new(kind: TokenKind, lexeme: String, span: Span) -> Self {
        Self { kind, lexeme, span }
    }

    /// Get the token kind
    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    /// Get the lexeme (actual text)
    pub fn lexeme(&self) -> &str {
        &self.lexeme
    }

    /// Get the start location
    pub fn location(&self) -> Location {
        self.span.start
    }

    /// Check if this token is the given raw token
    pub fn is(&self, token: Token) -> bool {
        self.kind == TokenKind::Lexeme(token)
    }
}

/// Maps byte offsets to line/column locations.
#[derive(Debug, Clone)]
struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(offset + 1);
            }
        }
        Self { line_starts }
    }

    fn location(&self, source: &str, offset: usize) -> Location {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(index) => index,
            Err(index) => index.saturating_sub(1),
        };
        let line_start = self.line_starts[line_index];
        let column = source
            .get(line_start..offset)
            .map(|prefix| prefix.chars().count())
            .unwrap_or(0)
            + 1;
        Location::new(line_index + 1, column, offset)
    }

    fn line_text<'a>(&self, source: &'a str, line: usize) -> &'a str {
        let start = self.line_starts.get(line - 1).copied().unwrap_or(source.len());
        let end = self
            .line_starts
            .get(line)
            .copied()
            .unwrap_or(source.len());
        source.get(start..end).unwrap_or("")
    }
}

/// Width of the leading whitespace of a physical line (tabs advance to the next multiple of 8).
fn indentation_width(line: &str) -> usize {
    let mut width = 0;
    for ch in line.chars() {
        match ch {
            ' ' => width += 1,
            '\t' => width = (width / 8 + 1) * 8,
            '\x0C' => width = 0,
            _ => break,
        }
    }
    width
}

/// Lexer for the contract dialect
pub struct Lexer<'a> {
    source: &'a str,
    lexer: logos::Lexer<'a, Token>,
    lines: LineIndex,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            source,
            lexer: Token::lexer(source),
            lines: LineIndex::new(source),
        }
    }

    fn span_of(&self, range: std::ops::Range<usize>) -> Span {
        Span::new(
            self.lines.location(self.source, range.start),
            self.lines.location(self.source, range.end),
        )
    }

    /// Get all tokens from the source, with indentation turned into
    /// `Indent`/`Dedent` tokens and logical lines terminated by `Newline`.
    pub fn tokenize(mut self) -> Result<Vec<LexicalToken>, ParseError> {
        let mut tokens = Vec::new();
        let mut indents: Vec<usize> = vec![0];
        let mut depth: usize = 0;
        let mut at_line_start = true;

        while let Some(result) = self.lexer.next() {
            let range = self.lexer.span();
            let span = self.span_of(range.clone());
            let lexeme = self.lexer.slice().to_string();

            let token = match result {
                Ok(token) => token,
                Err(_) => {
                    let message = if lexeme.starts_with(['"', '\''])
                        || lexeme.ends_with(['"', '\''])
                    {
                        "unterminated string literal".to_string()
                    } else {
                        format!("unexpected character `{}`", lexeme)
                    };
                    return Err(ParseError::lexical_error(&message, span.start));
                }
            };

            match token {
                Token::Comment | Token::LineContinuation => continue,
                Token::Newline => {
                    if depth == 0 && !at_line_start {
                        tokens.push(LexicalToken::new(TokenKind::Newline, lexeme, span));
                        at_line_start = true;
                    }
                    continue;
                }
                _ => {}
            }

            if at_line_start && depth == 0 {
                let width = indentation_width(self.lines.line_text(self.source, span.start.line));
                let current = indents.last().copied().unwrap_or(0);
                if width > current {
                    indents.push(width);
                    tokens.push(LexicalToken::new(TokenKind::Indent, String::new(), Span::single(span.start)));
                } else {
                    while width < indents.last().copied().unwrap_or(0) {
                        indents.pop();
                        tokens.push(LexicalToken::new(TokenKind::Dedent, String::new(), Span::single(span.start)));
                    }
                    if width != indents.last().copied().unwrap_or(0) {
                        return Err(ParseError::indentation_error(
                            "unindent does not match any outer indentation level",
                            span.start,
                        ));
                    }
                }
                at_line_start = false;
            }

            if token.opens_bracket() {
                depth += 1;
            } else if token.closes_bracket() {
                depth = depth.saturating_sub(1);
            }

            tokens.push(LexicalToken::new(TokenKind::Lexeme(token), lexeme, span));
        }

        let end = self.lines.location(self.source, self.source.len());
        if !at_line_start {
            tokens.push(LexicalToken::new(TokenKind::Newline, String::new(), Span::single(end)));
        }
        while indents.len() > 1 {
            indents.pop();
            tokens.push(LexicalToken::new(TokenKind::Dedent, String::new(), Span::single(end)));
        }
        tokens.push(LexicalToken::new(TokenKind::EndMarker, String::new(), Span::single(end)));

        Ok(tokens)
    }
}
