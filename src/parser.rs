use std::sync::Arc;

use thiserror::Error;

use crate::{
    ast::{BinOp, FuncCall, Node, Position, Token, TokenKind, Tree, UnaryOp},
    lexer::{LexError, Lexer},
    registry::{FuncType, Registry},
};

/// A single, terminal parse failure.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("parse error at {pos}: {message}")]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl ParseError {
    fn new(message: impl Into<String>, pos: Position) -> Self {
        ParseError {
            message: message.into(),
            pos,
        }
    }
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError::new(e.to_string(), e.position())
    }
}

/// Parses `text` against `registries`, resolving names in registry order.
pub fn parse(text: &str, registries: &[&Registry]) -> Result<Tree, ParseError> {
    Parser::new(Lexer::new(text), text, registries)?.parse()
}

pub struct Parser<'r> {
    lexer: Lexer,
    current_token: Token,
    text: String,
    registries: &'r [&'r Registry],
    /// Inside an `expr(...)` sub-expression, where map-only functions are valid
    in_sub_expr: bool,
}

impl<'r> Parser<'r> {
    pub fn new(
        mut lexer: Lexer,
        text: &str,
        registries: &'r [&'r Registry],
    ) -> Result<Self, ParseError> {
        let current_token = lexer.next_token()?;
        Ok(Parser {
            lexer,
            current_token,
            text: text.to_string(),
            registries,
            in_sub_expr: false,
        })
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current_token = self.lexer.next_token()?;
        Ok(())
    }

    fn expect(&mut self, expected: TokenKind) -> Result<(), ParseError> {
        if self.current_token.kind != expected {
            return Err(self.unexpected(&format!("{:?}", expected)));
        }
        self.advance()
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current_token.kind == kind
    }

    fn unexpected(&self, wanted: &str) -> ParseError {
        let found = match self.current_token.kind {
            TokenKind::Eof => "end of input".to_string(),
            _ => format!("{:?}", self.current_token.text),
        };
        ParseError::new(
            format!("expected {}, found {}", wanted, found),
            self.current_token.pos,
        )
    }

    /// Parses the whole input, then runs the semantic checks of every call.
    pub fn parse(&mut self) -> Result<Tree, ParseError> {
        let root = self.parse_expression()?;
        if !self.check(TokenKind::Eof) {
            return Err(self.unexpected("operator or end of input"));
        }
        check_semantics(&root)?;
        Ok(Tree {
            text: self.text.clone(),
            root,
        })
    }

    pub fn parse_expression(&mut self) -> Result<Node, ParseError> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_and()?;

        while self.check(TokenKind::OrOr) {
            let pos = self.current_token.pos;
            self.advance()?;
            let right = self.parse_and()?;
            left = binary(BinOp::Or, left, right, pos)?;
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_comparison()?;

        while self.check(TokenKind::AndAnd) {
            let pos = self.current_token.pos;
            self.advance()?;
            let right = self.parse_comparison()?;
            left = binary(BinOp::And, left, right, pos)?;
        }
        Ok(left)
    }

    fn parse_comparison(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_additive()?;

        loop {
            let op = match self.current_token.kind {
                TokenKind::EqEq => BinOp::Equal,
                TokenKind::NotEq => BinOp::NotEqual,
                TokenKind::Lt => BinOp::LessThan,
                TokenKind::Gt => BinOp::GreaterThan,
                TokenKind::LtEq => BinOp::LessEqual,
                TokenKind::GtEq => BinOp::GreaterEqual,
                _ => break,
            };
            let pos = self.current_token.pos;
            self.advance()?;
            let right = self.parse_additive()?;
            left = binary(op, left, right, pos)?;
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_multiplicative()?;

        loop {
            let op = match self.current_token.kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Subtract,
                _ => break,
            };
            let pos = self.current_token.pos;
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = binary(op, left, right, pos)?;
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_power()?;

        loop {
            let op = match self.current_token.kind {
                TokenKind::Star => BinOp::Multiply,
                TokenKind::Slash => BinOp::Divide,
                TokenKind::Percent => BinOp::Modulo,
                _ => break,
            };
            let pos = self.current_token.pos;
            self.advance()?;
            let right = self.parse_power()?;
            left = binary(op, left, right, pos)?;
        }
        Ok(left)
    }

    fn parse_power(&mut self) -> Result<Node, ParseError> {
        let mut left = self.parse_unary()?;

        while self.check(TokenKind::StarStar) {
            let pos = self.current_token.pos;
            self.advance()?;
            let right = self.parse_unary()?;
            left = binary(BinOp::Power, left, right, pos)?;
        }
        Ok(left)
    }

    /// Unary operators bind tighter than `**`: `-2**2` is `(-2)**2`.
    fn parse_unary(&mut self) -> Result<Node, ParseError> {
        let op = match self.current_token.kind {
            TokenKind::Not => UnaryOp::Not,
            TokenKind::Minus => UnaryOp::Negate,
            _ => return self.parse_primary(),
        };
        let pos = self.current_token.pos;
        self.advance()?;
        let arg = self.parse_unary()?;
        if !arg.return_type().is_numeric() {
            return Err(ParseError::new(
                format!("operator {} requires a number, got {}", op, arg.return_type()),
                pos,
            ));
        }
        Ok(Node::Unary {
            op,
            arg: Box::new(arg),
        })
    }

    /// Literals, parenthesized expressions and function calls.
    fn parse_primary(&mut self) -> Result<Node, ParseError> {
        match self.current_token.kind {
            TokenKind::Number => {
                let pos = self.current_token.pos;
                let n = self
                    .current_token
                    .text
                    .parse::<f64>()
                    .map_err(|_| ParseError::new("invalid number", pos))?;
                self.advance()?;
                Ok(Node::Number(n))
            }
            TokenKind::String => {
                let s = std::mem::take(&mut self.current_token.text);
                self.advance()?;
                Ok(Node::String(s))
            }
            TokenKind::LParen => {
                self.advance()?;
                let node = self.parse_expression()?;
                self.expect(TokenKind::RParen)?;
                Ok(node)
            }
            TokenKind::Identifier => self.parse_call(),
            _ => Err(self.unexpected("expression")),
        }
    }

    fn parse_call(&mut self) -> Result<Node, ParseError> {
        let name = self.current_token.text.clone();
        let pos = self.current_token.pos;
        let func = self
            .registries
            .iter()
            .find_map(|r| r.get(&name))
            .ok_or_else(|| ParseError::new(format!("unknown function {}", name), pos))?;
        if func.map_only && !self.in_sub_expr {
            return Err(ParseError::new(
                format!("{}() is only valid inside expr()", name),
                pos,
            ));
        }
        self.advance()?;
        if !self.check(TokenKind::LParen) {
            return Err(self.unexpected("'(' after function name"));
        }

        if func.ret == FuncType::NumberExpr {
            return self.parse_sub_expr(&name);
        }
        self.advance()?;

        let mut args = Vec::new();
        if !self.check(TokenKind::RParen) {
            loop {
                args.push(self.parse_expression()?);
                if self.check(TokenKind::Comma) {
                    self.advance()?;
                } else {
                    break;
                }
            }
        }
        self.expect(TokenKind::RParen)?;

        let call = FuncCall {
            name,
            pos,
            func,
            args,
        };
        check_call(&call)?;
        Ok(Node::Func(call))
    }

    /// Captures the raw text of `name(...)` and parses it as its own tree.
    fn parse_sub_expr(&mut self, name: &str) -> Result<Node, ParseError> {
        // The current token is '(' and the lexer sits right after it.
        let (text, start) = self.lexer.capture_balanced()?;
        let mut sub = Parser::new(Lexer::with_start(&text, start), &text, self.registries)?;
        sub.in_sub_expr = true;
        let tree = sub.parse()?;

        let ret = tree.root.return_type();
        if !matches!(ret, FuncType::Scalar | FuncType::NumberSet) {
            return Err(ParseError::new(
                format!("{}() must yield a scalar or number, got {}", name, ret),
                start,
            ));
        }
        self.advance()?;
        Ok(Node::SubExpr(Arc::new(tree)))
    }
}

fn binary(op: BinOp, left: Node, right: Node, pos: Position) -> Result<Node, ParseError> {
    let (lt, rt) = (left.return_type(), right.return_type());
    if !lt.is_numeric() || !rt.is_numeric() {
        return Err(ParseError::new(
            format!("operator {} cannot be applied to {} and {}", op, lt, rt),
            pos,
        ));
    }
    if lt == FuncType::SeriesSet && rt == FuncType::SeriesSet {
        return Err(ParseError::new(
            format!(
                "operator {} cannot combine two series sets, reduce one side first",
                op
            ),
            pos,
        ));
    }
    if let (Some(lk), Some(rk)) = (left.tags(), right.tags())
        && !lk.is_subset(&rk)
        && !rk.is_subset(&lk)
    {
        return Err(ParseError::new(
            format!("incompatible tags {:?} and {:?} for operator {}", lk, rk, op),
            pos,
        ));
    }
    Ok(Node::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    })
}

/// Arity and argument types of a call.
fn check_call(call: &FuncCall) -> Result<(), ParseError> {
    let func = &call.func;
    let fixed = func.args.len();
    let given = call.args.len();

    match func.variadic {
        None if given != fixed => {
            return Err(ParseError::new(
                format!("{} expects {} arguments, got {}", call.name, fixed, given),
                call.pos,
            ));
        }
        Some(v) => {
            let min = if v.allow_empty { v.position } else { v.position + 1 };
            if given < min {
                return Err(ParseError::new(
                    format!(
                        "{} expects at least {} arguments, got {}",
                        call.name, min, given
                    ),
                    call.pos,
                ));
            }
        }
        None => {}
    }

    for (i, arg) in call.args.iter().enumerate() {
        let param = func.args[i.min(fixed - 1)];
        let actual = arg.return_type();
        if !actual.fits(param) {
            return Err(ParseError::new(
                format!(
                    "{}: argument {} must be {}, got {}",
                    call.name,
                    i + 1,
                    param,
                    actual
                ),
                call.pos,
            ));
        }
    }
    Ok(())
}

/// Runs the optional check hook of every call in the tree.
fn check_semantics(node: &Node) -> Result<(), ParseError> {
    match node {
        Node::Number(_) | Node::String(_) | Node::SubExpr(_) => Ok(()),
        Node::Binary { left, right, .. } => {
            check_semantics(left)?;
            check_semantics(right)
        }
        Node::Unary { arg, .. } => check_semantics(arg),
        Node::Func(call) => {
            for arg in &call.args {
                check_semantics(arg)?;
            }
            match call.func.check {
                Some(check) => check(call)
                    .map_err(|msg| ParseError::new(format!("{}: {}", call.name, msg), call.pos)),
                None => Ok(()),
            }
        }
    }
}
