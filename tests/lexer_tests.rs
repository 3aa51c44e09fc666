// tests/lexer_tests.rs

use tsexpr::ast::{Position, TokenKind};
use tsexpr::lexer::{LexError, Lexer};

fn kinds(input: &str) -> Vec<TokenKind> {
    let mut lexer = Lexer::new(input);
    let mut out = Vec::new();
    loop {
        let token = lexer.next_token().unwrap();
        if token.kind == TokenKind::Eof {
            return out;
        }
        out.push(token.kind);
    }
}

fn first_text(input: &str) -> String {
    Lexer::new(input).next_token().unwrap().text
}

// ============================================================================
// Operators and Delimiters
// ============================================================================

#[test]
fn test_single_char_tokens() {
    let test_cases = vec![
        ("!", TokenKind::Not),
        ("<", TokenKind::Lt),
        (">", TokenKind::Gt),
        ("+", TokenKind::Plus),
        ("-", TokenKind::Minus),
        ("*", TokenKind::Star),
        ("/", TokenKind::Slash),
        ("%", TokenKind::Percent),
        ("(", TokenKind::LParen),
        (")", TokenKind::RParen),
        (",", TokenKind::Comma),
    ];

    for (input, expected) in test_cases {
        let mut lexer = Lexer::new(input);
        let token = lexer.next_token().unwrap();
        assert_eq!(token.kind, expected, "input {:?}", input);
        assert_eq!(token.text, input);
    }
}

#[test]
fn test_two_char_tokens() {
    assert_eq!(
        kinds("|| && == != <= >= **"),
        vec![
            TokenKind::OrOr,
            TokenKind::AndAnd,
            TokenKind::EqEq,
            TokenKind::NotEq,
            TokenKind::LtEq,
            TokenKind::GtEq,
            TokenKind::StarStar,
        ]
    );
}

#[test]
fn test_adjacent_operators_without_spaces() {
    assert_eq!(
        kinds("a>=-1"),
        vec![
            TokenKind::Identifier,
            TokenKind::GtEq,
            TokenKind::Minus,
            TokenKind::Number
        ]
    );
    assert_eq!(
        kinds("2**-3"),
        vec![
            TokenKind::Number,
            TokenKind::StarStar,
            TokenKind::Minus,
            TokenKind::Number
        ]
    );
}

#[test]
fn test_single_pipe_is_rejected() {
    let err = Lexer::new("|").next_token().unwrap_err();
    assert!(matches!(err, LexError::UnexpectedChar { ch: '|', .. }));
}

// ============================================================================
// Literals
// ============================================================================

#[test]
fn test_numbers() {
    assert_eq!(first_text("42"), "42");
    assert_eq!(first_text("3.25"), "3.25");
    assert_eq!(first_text(".5"), ".5");
    assert_eq!(first_text("1e3"), "1e3");
    assert_eq!(first_text("1.5e-3"), "1.5e-3");
}

#[test]
fn test_number_followed_by_identifier() {
    assert_eq!(kinds("10m"), vec![TokenKind::Number, TokenKind::Identifier]);
}

#[test]
fn test_string_escapes() {
    assert_eq!(first_text(r#""cpu{host=*}""#), "cpu{host=*}");
    assert_eq!(first_text(r#""a\"b\\c\n""#), "a\"b\\c\n");
}

#[test]
fn test_raw_string() {
    assert_eq!(
        first_text(r#""""a "quoted" \n word""""#),
        r#"a "quoted" \n word"#
    );
}

#[test]
fn test_unterminated_string() {
    let err = Lexer::new("  \"abc").next_token().unwrap_err();
    assert_eq!(
        err,
        LexError::UnterminatedString(Position {
            offset: 2,
            line: 1,
            column: 3
        })
    );
}

#[test]
fn test_invalid_escape() {
    let err = Lexer::new(r#""a\qb""#).next_token().unwrap_err();
    assert!(matches!(err, LexError::InvalidEscape { ch: 'q', .. }));
}

#[test]
fn test_identifiers() {
    let mut lexer = Lexer::new("cCount _x1");
    assert_eq!(lexer.next_token().unwrap().text, "cCount");
    assert_eq!(lexer.next_token().unwrap().text, "_x1");
}

#[test]
fn test_unexpected_character() {
    let mut lexer = Lexer::new("1 + $");
    lexer.next_token().unwrap();
    lexer.next_token().unwrap();
    let err = lexer.next_token();
    assert_eq!(
        err.unwrap_err(),
        LexError::UnexpectedChar {
            ch: '$',
            pos: Position {
                offset: 4,
                line: 1,
                column: 5
            }
        }
    );
}

// ============================================================================
// Positions
// ============================================================================

#[test]
fn test_positions_track_lines() {
    let mut lexer = Lexer::new("1 +\n  avg");
    let one = lexer.next_token().unwrap();
    let plus = lexer.next_token().unwrap();
    let name = lexer.next_token().unwrap();
    assert_eq!((one.pos.line, one.pos.column), (1, 1));
    assert_eq!((plus.pos.line, plus.pos.column), (1, 3));
    assert_eq!((name.pos.line, name.pos.column), (2, 3));
    assert_eq!(name.pos.offset, 6);
}

#[test]
fn test_position_display() {
    let pos = Position {
        offset: 9,
        line: 2,
        column: 4,
    };
    assert_eq!(pos.to_string(), "2:4");
}

// ============================================================================
// Balanced capture for sub-expressions
// ============================================================================

#[test]
fn test_capture_balanced() {
    let mut lexer = Lexer::new("expr(v() * (2 + 1)) + 1");
    lexer.next_token().unwrap(); // expr
    lexer.next_token().unwrap(); // (
    let (text, start) = lexer.capture_balanced().unwrap();
    assert_eq!(text, "v() * (2 + 1)");
    assert_eq!(start.column, 6);
    assert_eq!(lexer.next_token().unwrap().kind, TokenKind::Plus);
}

#[test]
fn test_capture_ignores_parens_in_strings() {
    let mut lexer = Lexer::new(r#"(d(")") + 1)"#);
    lexer.next_token().unwrap();
    let (text, _) = lexer.capture_balanced().unwrap();
    assert_eq!(text, r#"d(")") + 1"#);
}

#[test]
fn test_capture_unbalanced() {
    let mut lexer = Lexer::new("(v() * 2");
    lexer.next_token().unwrap();
    assert!(matches!(
        lexer.capture_balanced(),
        Err(LexError::Unbalanced(_))
    ));
}

#[test]
fn test_sub_lexer_continues_positions() {
    let start = Position {
        offset: 5,
        line: 1,
        column: 6,
    };
    let mut lexer = Lexer::with_start("v() $", start);
    lexer.next_token().unwrap();
    lexer.next_token().unwrap();
    lexer.next_token().unwrap();
    let err = lexer.next_token().unwrap_err();
    assert_eq!(
        err.position(),
        Position {
            offset: 9,
            line: 1,
            column: 10
        }
    );
}
