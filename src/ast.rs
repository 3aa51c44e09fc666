//! # Expression language - Abstract Syntax Tree
//!
//! Expressions combine numbers, strings, operators and function calls. Function
//! calls query backends and transform the tagged result sets they return:
//!
//! ```text
//! avg(q("cpu{host=*}", "1h", "")) > 80 && max(q("mem{host=*}", "1h", "")) > 1e9
//! ```
//!
//! - **[tokens]** - Lexical tokens and source positions
//! - **[expressions]** - [`Node`] and [`Tree`]
//! - **[operators]** - Binary and unary operators
//!
//! ## Precedence
//!
//! From lowest to highest: `||`, `&&`, comparisons, `+ -`, `* / %`, `**`,
//! then unary `!`/`-`, literals, parentheses and calls. Unary operators bind
//! tighter than `**`, so `-2**2` is `4`.
//!
//! ## Sub-expressions
//!
//! `expr(...)` captures its argument as a separate tree that `map()` evaluates
//! once per point, with `v()` standing for the point's value:
//!
//! ```text
//! map(series("host=a", 0, 1, 60, 2), expr(v() * 10))
//! ```
pub mod expressions;
pub mod operators;
pub mod tokens;

pub use expressions::{FuncCall, Node, Tree};
pub use operators::{BinOp, UnaryOp};
pub use tokens::{Position, Token, TokenKind};
