use std::fmt;
use std::sync::Arc;

use crate::ast::{BinOp, Position, UnaryOp};
use crate::registry::{Func, FuncType};
use crate::tags::TagKeys;

/// Abstract Syntax Tree node of a parsed expression.
///
/// Function calls carry their resolved descriptor, so a tree is fully typed
/// once parsing succeeds.
#[derive(Debug, Clone)]
pub enum Node {
    /// Literal number
    ///
    /// # Example
    /// ```text
    /// 42
    /// ```
    Number(f64),

    /// String literal
    ///
    /// # Example
    /// ```text
    /// "host=*"
    /// ```
    String(String),

    /// Binary operation (arithmetic, comparison, logical)
    Binary {
        op: BinOp,
        left: Box<Node>,
        right: Box<Node>,
    },

    /// Unary operation (`!`, `-`)
    Unary { op: UnaryOp, arg: Box<Node> },

    /// Function call
    ///
    /// # Example
    /// ```text
    /// avg(q("cpu{host=*}", "1h", ""))
    /// ```
    Func(FuncCall),

    /// Independently parsed sub-expression captured by `expr(...)`
    SubExpr(Arc<Tree>),
}

/// A call with its descriptor and ordered arguments.
#[derive(Debug, Clone)]
pub struct FuncCall {
    pub name: String,
    /// Position of the function name
    pub pos: Position,
    pub func: Arc<Func>,
    pub args: Vec<Node>,
}

impl Node {
    /// Static type of the value this node evaluates to.
    pub fn return_type(&self) -> FuncType {
        match self {
            Node::Number(_) => FuncType::Scalar,
            Node::String(_) => FuncType::String,
            Node::Binary { left, right, .. } => {
                let (l, r) = (left.return_type(), right.return_type());
                if l == FuncType::SeriesSet || r == FuncType::SeriesSet {
                    FuncType::SeriesSet
                } else if l == FuncType::NumberSet || r == FuncType::NumberSet {
                    FuncType::NumberSet
                } else {
                    FuncType::Scalar
                }
            }
            Node::Unary { arg, .. } => arg.return_type(),
            Node::Func(call) => call.return_type(),
            Node::SubExpr(_) => FuncType::NumberExpr,
        }
    }

    /// Tag keys known before evaluation, `None` when the node is untagged or
    /// the keys depend on runtime data.
    pub fn tags(&self) -> Option<TagKeys> {
        match self {
            Node::Number(_) | Node::String(_) | Node::SubExpr(_) => None,
            Node::Binary { left, right, .. } => left.tags().or_else(|| right.tags()),
            Node::Unary { arg, .. } => arg.tags(),
            Node::Func(call) => call.func.tags.and_then(|f| f(&call.args)),
        }
    }
}

impl FuncCall {
    pub fn return_type(&self) -> FuncType {
        match self.func.ret {
            FuncType::VariantSet => match self.args.first().map(Node::return_type) {
                Some(FuncType::SeriesSet) => FuncType::SeriesSet,
                _ => FuncType::NumberSet,
            },
            t => t,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Number(n) => write!(f, "{}", n),
            Node::String(s) => write!(f, "{:?}", s),
            Node::Binary { op, left, right } => write!(f, "{} {} {}", left, op, right),
            Node::Unary { op, arg } => write!(f, "{}{}", op, arg),
            Node::Func(call) => {
                write!(f, "{}(", call.name)?;
                for (i, arg) in call.args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                f.write_str(")")
            }
            Node::SubExpr(tree) => write!(f, "expr({})", tree.text),
        }
    }
}

/// A parsed and checked expression.
#[derive(Debug, Clone)]
pub struct Tree {
    /// Source text the tree was parsed from
    pub text: String,
    pub root: Node,
}

impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        self.text == other.text
    }
}
