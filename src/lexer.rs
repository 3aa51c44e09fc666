use thiserror::Error;

pub use crate::ast::Position;
use crate::ast::{Token, TokenKind};

/// Errors produced while tokenizing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LexError {
    #[error("unexpected character {ch:?} at {pos}")]
    UnexpectedChar { ch: char, pos: Position },

    #[error("unterminated string starting at {0}")]
    UnterminatedString(Position),

    #[error("invalid escape sequence \\{ch} at {pos}")]
    InvalidEscape { ch: char, pos: Position },

    #[error("invalid number {text:?} at {pos}")]
    InvalidNumber { text: String, pos: Position },

    #[error("unbalanced parentheses in sub-expression starting at {0}")]
    Unbalanced(Position),
}

impl LexError {
    pub fn position(&self) -> Position {
        match self {
            LexError::UnexpectedChar { pos, .. }
            | LexError::InvalidEscape { pos, .. }
            | LexError::InvalidNumber { pos, .. } => *pos,
            LexError::UnterminatedString(pos) | LexError::Unbalanced(pos) => *pos,
        }
    }
}

pub struct Lexer {
    input: Vec<char>,
    position: usize,
    /// Offset of `input[0]` within the outermost text
    base: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self::with_start(input, Position::default())
    }

    /// Lexer whose reported positions continue from `start`, used for
    /// sub-expressions cut out of a larger text.
    pub fn with_start(input: &str, start: Position) -> Self {
        Lexer {
            input: input.chars().collect(),
            position: 0,
            base: start.offset,
            line: start.line,
            column: start.column,
        }
    }

    fn pos(&self) -> Position {
        Position {
            offset: self.base + self.position,
            line: self.line,
            column: self.column,
        }
    }

    fn current_char(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_char(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) {
        if let Some(ch) = self.current_char() {
            if ch == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
            self.position += 1;
        }
    }

    fn skip_whitespace(&mut self) {
        while let Some(ch) = self.current_char() {
            if ch.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn starts_with(&self, s: &str) -> bool {
        s.chars()
            .enumerate()
            .all(|(i, c)| self.peek_char(i) == Some(c))
    }

    fn read_identifier(&mut self) -> String {
        let mut result = String::new();
        while let Some(ch) = self.current_char() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                result.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        result
    }

    fn read_string(&mut self) -> Result<String, LexError> {
        let start = self.pos();
        let mut result = String::new();
        self.advance(); // Consume opening quote

        while let Some(ch) = self.current_char() {
            match ch {
                '"' => {
                    self.advance();
                    return Ok(result);
                }
                '\\' => {
                    let escape_pos = self.pos();
                    self.advance(); // Consume backslash
                    match self.current_char() {
                        Some('n') => result.push('\n'),
                        Some('t') => result.push('\t'),
                        Some('r') => result.push('\r'),
                        Some('"') => result.push('"'),
                        Some('\\') => result.push('\\'),
                        Some(ch) => {
                            return Err(LexError::InvalidEscape {
                                ch,
                                pos: escape_pos,
                            });
                        }
                        None => return Err(LexError::UnterminatedString(start)),
                    }
                    self.advance();
                }
                _ => {
                    result.push(ch);
                    self.advance();
                }
            }
        }

        Err(LexError::UnterminatedString(start))
    }

    /// `"""raw text"""`: no escapes, may contain single quotes and newlines.
    fn read_raw_string(&mut self) -> Result<String, LexError> {
        let start = self.pos();
        for _ in 0..3 {
            self.advance();
        }
        let mut result = String::new();
        while self.current_char().is_some() {
            if self.starts_with("\"\"\"") {
                for _ in 0..3 {
                    self.advance();
                }
                return Ok(result);
            }
            if let Some(ch) = self.current_char() {
                result.push(ch);
            }
            self.advance();
        }
        Err(LexError::UnterminatedString(start))
    }

    fn read_number(&mut self) -> Result<String, LexError> {
        let start = self.pos();
        let mut number = String::new();
        let mut seen_dot = false;
        let mut seen_exp = false;

        while let Some(ch) = self.current_char() {
            if ch.is_ascii_digit() {
                number.push(ch);
                self.advance();
            } else if ch == '.' && !seen_dot && !seen_exp {
                seen_dot = true;
                number.push(ch);
                self.advance();
            } else if (ch == 'e' || ch == 'E') && !seen_exp && !number.is_empty() {
                seen_exp = true;
                number.push(ch);
                self.advance();
                if let Some(sign @ ('+' | '-')) = self.current_char() {
                    number.push(sign);
                    self.advance();
                }
            } else {
                break;
            }
        }

        match number.parse::<f64>() {
            Ok(_) => Ok(number),
            Err(_) => Err(LexError::InvalidNumber {
                text: number,
                pos: start,
            }),
        }
    }

    fn single(&mut self, kind: TokenKind, text: &str, pos: Position) -> Token {
        for _ in text.chars() {
            self.advance();
        }
        Token::new(kind, text, pos)
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace();
        let pos = self.pos();

        let token = match self.current_char() {
            None => Token::new(TokenKind::Eof, "", pos),
            Some('|') if self.peek_char(1) == Some('|') => self.single(TokenKind::OrOr, "||", pos),
            Some('&') if self.peek_char(1) == Some('&') => {
                self.single(TokenKind::AndAnd, "&&", pos)
            }
            Some('=') if self.peek_char(1) == Some('=') => self.single(TokenKind::EqEq, "==", pos),
            Some('!') if self.peek_char(1) == Some('=') => {
                self.single(TokenKind::NotEq, "!=", pos)
            }
            Some('!') => self.single(TokenKind::Not, "!", pos),
            Some('>') if self.peek_char(1) == Some('=') => self.single(TokenKind::GtEq, ">=", pos),
            Some('>') => self.single(TokenKind::Gt, ">", pos),
            Some('<') if self.peek_char(1) == Some('=') => self.single(TokenKind::LtEq, "<=", pos),
            Some('<') => self.single(TokenKind::Lt, "<", pos),
            Some('*') if self.peek_char(1) == Some('*') => {
                self.single(TokenKind::StarStar, "**", pos)
            }
            Some('*') => self.single(TokenKind::Star, "*", pos),
            Some('+') => self.single(TokenKind::Plus, "+", pos),
            Some('-') => self.single(TokenKind::Minus, "-", pos),
            Some('/') => self.single(TokenKind::Slash, "/", pos),
            Some('%') => self.single(TokenKind::Percent, "%", pos),
            Some('(') => self.single(TokenKind::LParen, "(", pos),
            Some(')') => self.single(TokenKind::RParen, ")", pos),
            Some(',') => self.single(TokenKind::Comma, ",", pos),
            Some('"') if self.starts_with("\"\"\"") => {
                Token::new(TokenKind::String, self.read_raw_string()?, pos)
            }
            Some('"') => Token::new(TokenKind::String, self.read_string()?, pos),
            Some(ch) if ch.is_ascii_digit() => Token::new(TokenKind::Number, self.read_number()?, pos),
            Some('.') if self.peek_char(1).is_some_and(|c| c.is_ascii_digit()) => {
                Token::new(TokenKind::Number, self.read_number()?, pos)
            }
            Some(ch) if ch.is_ascii_alphabetic() || ch == '_' => {
                Token::new(TokenKind::Identifier, self.read_identifier(), pos)
            }
            Some(ch) => return Err(LexError::UnexpectedChar { ch, pos }),
        };
        Ok(token)
    }

    /// Returns the raw text up to the `)` matching an already consumed `(`,
    /// and moves past that `)`. Parentheses inside string literals are
    /// ignored. The returned position is where the text starts.
    pub fn capture_balanced(&mut self) -> Result<(String, Position), LexError> {
        let start = self.pos();
        let mut depth = 1usize;
        let mut text = String::new();

        while let Some(ch) = self.current_char() {
            match ch {
                '"' => {
                    // Copy string literals verbatim so their parens don't count.
                    let from = self.position;
                    if self.starts_with("\"\"\"") {
                        self.read_raw_string()?;
                    } else {
                        self.read_string()?;
                    }
                    text.extend(&self.input[from..self.position]);
                    continue;
                }
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        self.advance();
                        return Ok((text, start));
                    }
                }
                _ => {}
            }
            text.push(ch);
            self.advance();
        }

        Err(LexError::Unbalanced(start))
    }
}

#[test]
fn test_operators() {
    let mut lexer = Lexer::new("|| && ! == != ** * -");
    let kinds: Vec<TokenKind> = std::iter::from_fn(|| {
        let t = lexer.next_token().unwrap();
        (t.kind != TokenKind::Eof).then_some(t.kind)
    })
    .collect();
    assert_eq!(
        kinds,
        vec![
            TokenKind::OrOr,
            TokenKind::AndAnd,
            TokenKind::Not,
            TokenKind::EqEq,
            TokenKind::NotEq,
            TokenKind::StarStar,
            TokenKind::Star,
            TokenKind::Minus,
        ]
    );
}

#[test]
fn test_capture_balanced() {
    let mut lexer = Lexer::new("v() + f(\")\") ) + 1");
    let (text, pos) = lexer.capture_balanced().unwrap();
    assert_eq!(text, "v() + f(\")\") ");
    assert_eq!(pos.offset, 0);
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Plus);
}
