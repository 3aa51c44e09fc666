use std::fmt;

/// Location of a token in the expression text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Character offset from the start of the text
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl Default for Position {
    fn default() -> Self {
        Position {
            offset: 0,
            line: 1,
            column: 1,
        }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Literals
    /// Number literal
    ///
    /// # Examples
    /// ```text
    /// 42
    /// 3.14
    /// 1e6
    /// ```
    Number,

    /// String literal, either double quoted with escapes or raw triple quoted
    ///
    /// # Examples
    /// ```text
    /// "host=*"
    /// """raw "text" here"""
    /// ```
    String,

    /// Function name
    ///
    /// Must start with letter or underscore, followed by letters, digits, or underscores.
    Identifier,

    // Logical
    /// `||`
    OrOr,
    /// `&&`
    AndAnd,
    /// `!`
    Not,

    // Comparison
    /// `==`
    EqEq,
    /// `!=`
    NotEq,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `<=`
    LtEq,
    /// `>=`
    GtEq,

    // Arithmetic
    /// `+`
    Plus,
    /// `-`
    Minus,
    /// `*`
    Star,
    /// `**`
    StarStar,
    /// `/`
    Slash,
    /// `%`
    Percent,

    // Delimiters
    /// Left parenthesis for grouping or function calls
    LParen,
    /// Right parenthesis
    RParen,
    /// Comma separating function arguments
    Comma,

    /// End of input
    Eof,
}

/// A lexed token. `text` holds the decoded value for strings and the source
/// text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub pos: Position,
}

impl Token {
    pub fn new(kind: TokenKind, text: impl Into<String>, pos: Position) -> Self {
        Token {
            kind,
            text: text.into(),
            pos,
        }
    }
}
