//! The tokenizer turns ChocoPy source text into a stream of tokens, synthesizing `Newline`,
//! `Indent` and `Dedent` tokens from the physical layout of lines.
//!
//! Blank lines and comment-only lines never produce tokens. Inside parentheses and brackets
//! line breaks are insignificant (implicit line joining).
use std::collections::VecDeque;
use std::fmt;
use std::{iter::Peekable, str::Chars};
use thiserror::Error;

/// Tab stops are placed every 8 columns, as in Python.
const TAB_WIDTH: usize = 8;

/// The largest integer literal the language accepts.
pub const MAX_INTEGER: i64 = 2_147_483_647;

/// Position in a source text expressed as one-based line and column.
#[derive(Debug, Eq, PartialEq, Ord, PartialOrd, Copy, Clone)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Self { line: 1, column: 1 }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Token {
    pub kind: TokenKind,
    /// Inclusive start.
    pub start: Position,
    /// Exclusive end.
    pub end: Position,
}

#[derive(Debug, PartialEq, Clone)]
pub enum TokenKind {
    // Primitive
    Identifier(String),
    Integer(i64),
    String(String),

    // Keywords
    Def,
    Class,
    If,
    Elif,
    Else,
    While,
    For,
    In,
    Return,
    Pass,
    Global,
    Nonlocal,
    And,
    Or,
    Not,
    Is,
    None,
    True,
    False,
    Assert,
    // Python keywords that are not part of the language.
    Reserved(String),

    // Operators
    Eq,       // "=="
    Ne,       // "!="
    Le,       // "<="
    Ge,       // ">="
    Arrow,    // "->"
    FloorDiv, // "//"

    // punctuations
    Char(char),

    // Layout
    Newline,
    Indent,
    Dedent,

    // End of input source
    Eos,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("{kind} at {position}")]
pub struct TokenError {
    pub position: Position,
    pub kind: TokenErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenErrorKind {
    Error(String), // Genetic error
}

impl fmt::Display for TokenErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenErrorKind::Error(message) => write!(f, "{}", message),
        }
    }
}

impl TokenError {
    fn new<S: Into<String>>(position: Position, message: S) -> Self {
        Self {
            position,
            kind: TokenErrorKind::Error(message.into()),
        }
    }
}

#[derive(Debug)]
pub struct Tokenizer<'a> {
    chars: Peekable<Chars<'a>>,
    lineno: usize,
    columnno: usize,
    /// Widths of the currently open indentation levels. Always starts with `0`.
    indents: Vec<usize>,
    /// Nesting depth of `(` and `[`.
    depth: usize,
    at_line_start: bool,
    /// `true` once a token other than layout has been produced on the current logical line.
    line_has_tokens: bool,
    /// Layout tokens waiting to be returned.
    pending: VecDeque<Token>,
    at_end: bool,

    /// Remember a peeked value.
    peeked: Option<Result<Token, TokenError>>,
}

impl<'a> Tokenizer<'a> {
    pub fn from_string<S: AsRef<str> + ?Sized>(src: &'a S) -> Tokenizer<'a> {
        Tokenizer {
            chars: src.as_ref().chars().peekable(),
            lineno: 1,
            columnno: 1,
            indents: vec![0],
            depth: 0,
            at_line_start: true,
            line_has_tokens: false,
            pending: VecDeque::new(),
            at_end: false,
            peeked: None,
        }
    }

    /// Returns a reference to the `next()` value without advance the tokenizer.
    pub fn peek(&mut self) -> Result<&Token, &TokenError> {
        if self.peeked.is_none() {
            let token = self.advance_token();
            self.peeked = Some(token);
        }

        match self.peeked {
            Some(Ok(ref token)) => Ok(token),
            Some(Err(ref err)) => Err(err),
            None => unreachable!(),
        }
    }

    pub fn peek_kind(&mut self) -> Result<&TokenKind, &TokenError> {
        self.peek().map(|token| &token.kind)
    }

    pub fn next_token(&mut self) -> Result<Token, TokenError> {
        match self.peeked.take() {
            Some(token) => token,
            None => self.advance_token(),
        }
    }

    pub fn current_position(&self) -> Position {
        Position {
            line: self.lineno,
            column: self.columnno,
        }
    }

    fn layout_token(&self, kind: TokenKind) -> Token {
        let position = self.current_position();

        Token {
            kind,
            start: position,
            end: position,
        }
    }

    fn advance_token(&mut self) -> Result<Token, TokenError> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }
            if self.at_end {
                return Ok(self.layout_token(TokenKind::Eos));
            }
            if self.at_line_start && self.depth == 0 {
                self.read_indentation()?;
                continue;
            }

            self.skip_whitespace();

            let start = self.current_position();
            let c = match self.peek_char() {
                None => {
                    self.finish();
                    continue;
                }
                Some(c) => c,
            };

            let kind = match c {
                '\n' => {
                    self.next_char();
                    if self.depth > 0 {
                        continue;
                    }
                    self.at_line_start = true;
                    self.line_has_tokens = false;
                    TokenKind::Newline
                }
                '#' => {
                    self.skip_comment();
                    continue;
                }
                '0'..='9' => self.read_integer(start)?,
                'a'..='z' | 'A'..='Z' | '_' => self.read_name(),
                '"' => self.read_string(start)?,
                _ => self.read_operator(start)?,
            };

            if kind != TokenKind::Newline {
                self.line_has_tokens = true;
            }

            return Ok(Token {
                kind,
                start,
                end: self.current_position(),
            });
        }
    }

    /// Reached the end of the input: close the logical line and every open block.
    fn finish(&mut self) {
        if self.line_has_tokens {
            self.pending.push_back(self.layout_token(TokenKind::Newline));
            self.line_has_tokens = false;
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.pending.push_back(self.layout_token(TokenKind::Dedent));
        }
        self.at_end = true;
    }

    fn read_indentation(&mut self) -> Result<(), TokenError> {
        let mut width = 0;

        loop {
            match self.peek_char() {
                Some(' ') => width += 1,
                Some('\t') => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
                Some('\r') => {}
                _ => break,
            }
            self.next_char();
        }

        match self.peek_char() {
            // blank lines and comment lines do not affect indentation
            Some('\n') => {
                self.next_char();
                return Ok(());
            }
            Some('#') => {
                self.skip_comment();
                return Ok(());
            }
            None => {
                self.at_line_start = false;
                return Ok(());
            }
            _ => {}
        }

        self.at_line_start = false;

        let current = *self.indents.last().unwrap_or(&0);
        if width > current {
            self.indents.push(width);
            self.pending.push_back(self.layout_token(TokenKind::Indent));
        } else if width < current {
            while let Some(&top) = self.indents.last() {
                if top <= width {
                    break;
                }
                self.indents.pop();
                self.pending.push_back(self.layout_token(TokenKind::Dedent));
            }
            if self.indents.last() != Some(&width) {
                return Err(TokenError::new(
                    self.current_position(),
                    "Unindent does not match any outer indentation level",
                ));
            }
        }

        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !(c == ' ' || c == '\t' || c == '\r') {
                break;
            }
            self.next_char();
        }
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek_char() {
            if c == '\n' {
                break;
            }
            self.next_char();
        }
    }

    fn read_string(&mut self, start: Position) -> Result<TokenKind, TokenError> {
        self.next_char(); // '"'
        let mut string = String::new();

        loop {
            match self.next_char() {
                None | Some('\n') => {
                    return Err(TokenError::new(start, "Unterminated string literal"));
                }
                Some('"') => break,
                Some('\\') => {
                    let position = self.current_position();
                    let c = match self.next_char() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some(c) => {
                            return Err(TokenError::new(
                                position,
                                format!("Unrecognized escape sequence: \\{}", c),
                            ))
                        }
                        None => {
                            return Err(TokenError::new(start, "Unterminated string literal"));
                        }
                    };
                    string.push(c);
                }
                Some(c) if (' '..='~').contains(&c) => string.push(c),
                Some(c) => {
                    return Err(TokenError::new(
                        self.current_position(),
                        format!("Invalid character in string literal: {:?}", c),
                    ))
                }
            }
        }

        Ok(TokenKind::String(string))
    }

    fn read_operator(&mut self, start: Position) -> Result<TokenKind, TokenError> {
        let c = self.next_char().unwrap_or('\0');
        let nextc = self.peek_char();

        let kind = match (c, nextc) {
            ('=', Some('=')) => TokenKind::Eq,
            ('!', Some('=')) => TokenKind::Ne,
            ('<', Some('=')) => TokenKind::Le,
            ('>', Some('=')) => TokenKind::Ge,
            ('-', Some('>')) => TokenKind::Arrow,
            ('/', Some('/')) => TokenKind::FloorDiv,
            ('(', _) | ('[', _) => {
                self.depth += 1;
                return Ok(TokenKind::Char(c));
            }
            (')', _) | (']', _) => {
                self.depth = self.depth.saturating_sub(1);
                return Ok(TokenKind::Char(c));
            }
            ('+', _) | ('-', _) | ('*', _) | ('%', _) | ('<', _) | ('>', _) | ('=', _)
            | (',', _) | (':', _) | ('.', _) | ('/', _) | ('{', _) | ('}', _) | (';', _) => {
                return Ok(TokenKind::Char(c));
            }
            _ => {
                return Err(TokenError::new(
                    start,
                    format!("Unexpected character: {:?}", c),
                ))
            }
        };

        self.next_char();
        Ok(kind)
    }

    fn read_name(&mut self) -> TokenKind {
        let mut value = String::new();

        while let Some(nextc) = self.peek_char() {
            match nextc {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '_' => {
                    value.push(nextc);
                }
                _ => break,
            };
            self.next_char();
        }

        match value.as_str() {
            "def" => TokenKind::Def,
            "class" => TokenKind::Class,
            "if" => TokenKind::If,
            "elif" => TokenKind::Elif,
            "else" => TokenKind::Else,
            "while" => TokenKind::While,
            "for" => TokenKind::For,
            "in" => TokenKind::In,
            "return" => TokenKind::Return,
            "pass" => TokenKind::Pass,
            "global" => TokenKind::Global,
            "nonlocal" => TokenKind::Nonlocal,
            "and" => TokenKind::And,
            "or" => TokenKind::Or,
            "not" => TokenKind::Not,
            "is" => TokenKind::Is,
            "None" => TokenKind::None,
            "True" => TokenKind::True,
            "False" => TokenKind::False,
            "assert" => TokenKind::Assert,
            "as" | "async" | "await" | "break" | "continue" | "del" | "except" | "finally"
            | "from" | "import" | "lambda" | "raise" | "try" | "with" | "yield" => {
                TokenKind::Reserved(value)
            }
            _ => TokenKind::Identifier(value),
        }
    }

    fn read_integer(&mut self, start: Position) -> Result<TokenKind, TokenError> {
        let mut value: i64 = 0;

        while let Some(x @ '0'..='9') = self.peek_char() {
            let n = (x as i64) - ('0' as i64);

            value = value * 10 + n;
            if value > MAX_INTEGER {
                return Err(TokenError::new(start, "Integer literal is too large"));
            }
            self.next_char();
        }

        Ok(TokenKind::Integer(value))
    }

    fn peek_char(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn next_char(&mut self) -> Option<char> {
        let c = self.chars.next()?;

        self.columnno += 1;
        if c == '\n' {
            self.lineno += 1;
            self.columnno = 1;
        }

        Some(c)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Line {} Col {}", self.line, self.column)
    }
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Identifier(name) => write!(f, "identifier `{}`", name),
            TokenKind::Integer(i) => write!(f, "integer {}", i),
            TokenKind::String(s) => write!(f, "string {:?}", s),
            TokenKind::Def => write!(f, "def"),
            TokenKind::Class => write!(f, "class"),
            TokenKind::If => write!(f, "if"),
            TokenKind::Elif => write!(f, "elif"),
            TokenKind::Else => write!(f, "else"),
            TokenKind::While => write!(f, "while"),
            TokenKind::For => write!(f, "for"),
            TokenKind::In => write!(f, "in"),
            TokenKind::Return => write!(f, "return"),
            TokenKind::Pass => write!(f, "pass"),
            TokenKind::Global => write!(f, "global"),
            TokenKind::Nonlocal => write!(f, "nonlocal"),
            TokenKind::And => write!(f, "and"),
            TokenKind::Or => write!(f, "or"),
            TokenKind::Not => write!(f, "not"),
            TokenKind::Is => write!(f, "is"),
            TokenKind::None => write!(f, "None"),
            TokenKind::True => write!(f, "True"),
            TokenKind::False => write!(f, "False"),
            TokenKind::Assert => write!(f, "assert"),
            TokenKind::Reserved(word) => write!(f, "{}", word),
            TokenKind::Eq => write!(f, "=="),
            TokenKind::Ne => write!(f, "!="),
            TokenKind::Le => write!(f, "<="),
            TokenKind::Ge => write!(f, ">="),
            TokenKind::Arrow => write!(f, "->"),
            TokenKind::FloorDiv => write!(f, "//"),
            TokenKind::Char(c) => write!(f, "{}", c),
            TokenKind::Newline => write!(f, "newline"),
            TokenKind::Indent => write!(f, "indent"),
            TokenKind::Dedent => write!(f, "dedent"),
            TokenKind::Eos => write!(f, "(EOF)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn kinds(src: &str) -> Vec<TokenKind> {
        let mut tokenizer = Tokenizer::from_string(src);
        let mut kinds = vec![];

        loop {
            let token = tokenizer.next_token().unwrap();
            if token.kind == TokenKind::Eos {
                break;
            }
            kinds.push(token.kind);
        }
        kinds
    }

    #[test]
    fn empty() {
        let mut tokenizer = Tokenizer::from_string("");
        assert_matches!(tokenizer.next_token(), Ok(Token { kind: TokenKind::Eos, .. }));
    }

    #[test]
    fn tokenize() {
        let mut tokenizer = Tokenizer::from_string("42() ab_01");

        let token = tokenizer.next_token().unwrap();
        assert_matches!(token.kind, TokenKind::Integer(42));
        assert_eq!(token.start, Position { line: 1, column: 1 });
        assert_eq!(token.end, Position { line: 1, column: 3 });

        assert_matches!(tokenizer.next_token().unwrap().kind, TokenKind::Char('('));
        assert_matches!(tokenizer.next_token().unwrap().kind, TokenKind::Char(')'));

        let token = tokenizer.next_token().unwrap();
        assert_matches!(token.kind, TokenKind::Identifier(ref name) if name == "ab_01");
        assert_eq!(token.start, Position { line: 1, column: 6 });

        assert_matches!(tokenizer.next_token().unwrap().kind, TokenKind::Newline);
        assert_matches!(tokenizer.next_token().unwrap().kind, TokenKind::Eos);
    }

    #[test]
    fn operators() {
        assert_eq!(
            kinds("a == b != c <= d >= e // f -> g"),
            vec![
                TokenKind::Identifier("a".to_string()),
                TokenKind::Eq,
                TokenKind::Identifier("b".to_string()),
                TokenKind::Ne,
                TokenKind::Identifier("c".to_string()),
                TokenKind::Le,
                TokenKind::Identifier("d".to_string()),
                TokenKind::Ge,
                TokenKind::Identifier("e".to_string()),
                TokenKind::FloorDiv,
                TokenKind::Identifier("f".to_string()),
                TokenKind::Arrow,
                TokenKind::Identifier("g".to_string()),
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn indent_and_dedent() {
        let src = "def f():\n    x = 1\n\n    # comment\n    if x:\n        pass\ny = 2\n";

        assert_eq!(
            kinds(src),
            vec![
                TokenKind::Def,
                TokenKind::Identifier("f".to_string()),
                TokenKind::Char('('),
                TokenKind::Char(')'),
                TokenKind::Char(':'),
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Char('='),
                TokenKind::Integer(1),
                TokenKind::Newline,
                TokenKind::If,
                TokenKind::Identifier("x".to_string()),
                TokenKind::Char(':'),
                TokenKind::Newline,
                TokenKind::Indent,
                TokenKind::Pass,
                TokenKind::Newline,
                TokenKind::Dedent,
                TokenKind::Dedent,
                TokenKind::Identifier("y".to_string()),
                TokenKind::Char('='),
                TokenKind::Integer(2),
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn dedent_at_eof() {
        let tokens = kinds("while x:\n  pass");

        assert_eq!(
            &tokens[tokens.len() - 3..],
            &[TokenKind::Pass, TokenKind::Newline, TokenKind::Dedent]
        );
    }

    #[test]
    fn implicit_line_joining() {
        assert_eq!(
            kinds("f(1,\n   2)\n"),
            vec![
                TokenKind::Identifier("f".to_string()),
                TokenKind::Char('('),
                TokenKind::Integer(1),
                TokenKind::Char(','),
                TokenKind::Integer(2),
                TokenKind::Char(')'),
                TokenKind::Newline,
            ]
        );
    }

    #[test]
    fn inconsistent_dedent() {
        let mut tokenizer = Tokenizer::from_string("if x:\n    pass\n  pass\n");
        let mut result = Ok(());

        for _ in 0..20 {
            if let Err(err) = tokenizer.next_token() {
                result = Err(err);
                break;
            }
        }

        assert_matches!(result, Err(TokenError { position: Position { line: 3, .. }, .. }));
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#""a\"b\\c\n""#),
            vec![TokenKind::String("a\"b\\c\n".to_string()), TokenKind::Newline]
        );
    }

    #[test]
    fn unterminated_string() {
        let mut tokenizer = Tokenizer::from_string("\"abc\n");
        assert_matches!(tokenizer.next_token(), Err(TokenError { kind: TokenErrorKind::Error(ref message), .. }) if message == "Unterminated string literal");
    }

    #[test]
    fn integer_overflow() {
        let mut tokenizer = Tokenizer::from_string("2147483648");
        assert_matches!(tokenizer.next_token(), Err(_));

        let mut tokenizer = Tokenizer::from_string("2147483647");
        assert_matches!(tokenizer.next_token().unwrap().kind, TokenKind::Integer(MAX_INTEGER));
    }

    #[test]
    fn reserved_words() {
        assert_matches!(&kinds("lambda")[0], TokenKind::Reserved(word) if word == "lambda");
        assert_matches!(&kinds("assert")[0], TokenKind::Assert);
    }
}
