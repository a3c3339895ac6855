use super::tokenizer::{Position, Token, TokenError, TokenErrorKind};
use std::fmt;
use thiserror::Error;

/// A lexical or syntactic error. Parsing stops at the first one.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{kind}. {position}")]
pub struct ParseError {
    pub position: Position,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn syntax_error<S: Into<String>>(position: Position, message: S) -> Self {
        Self {
            position,
            kind: ParseErrorKind::SyntaxError(message.into()),
        }
    }

    pub fn semantic_error<S: Into<String>>(position: Position, message: S) -> Self {
        Self {
            position,
            kind: ParseErrorKind::Error(message.into()),
        }
    }

    pub fn mismatch_token<S: AsRef<str>>(token: &Token, expected: S) -> Self {
        Self::syntax_error(
            token.start,
            format!("Expected {}, but found {}", expected.as_ref(), token.kind),
        )
    }

    pub fn message(&self) -> String {
        self.kind.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    SyntaxError(String), // Genetic error
    /// Well-formed input the language rejects, e.g. a statement before a declaration.
    Error(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseErrorKind::SyntaxError(message) => write!(f, "Syntax error: {}", message),
            ParseErrorKind::Error(message) => write!(f, "{}", message),
        }
    }
}

impl From<&TokenError> for ParseError {
    fn from(err: &TokenError) -> Self {
        match &err.kind {
            TokenErrorKind::Error(message) => ParseError {
                position: err.position,
                kind: ParseErrorKind::Error(message.clone()),
            },
        }
    }
}

impl From<TokenError> for ParseError {
    fn from(err: TokenError) -> Self {
        Self::from(&err)
    }
}
