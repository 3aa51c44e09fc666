//! Expression engine for alerting over tagged time series.
//!
//! An expression such as `avg(q("cpu{host=*}", "1h", "")) > 80` is parsed
//! against one or more function [`Registry`]s into a typed [`ast::Tree`],
//! then evaluated into a [`value::ResultSet`]: one value per group, where a
//! group is the [`TagSet`] identifying a series.

pub mod ast;
pub mod backend;
pub mod cli;
pub mod config;
pub mod duration;
pub mod evaluator;
pub mod functions;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod registry;
pub mod tags;
pub mod value;

pub use ast::{BinOp, Node, Position, Token, Tree, UnaryOp};
pub use backend::{BackendContexts, BackendError, Cache, MemoryBackend, Squelch, TimeSeriesBackend};
pub use config::EngineConfig;
pub use evaluator::{EvalContext, EvalError, Evaluation, Evaluator, execute};
pub use lexer::{LexError, Lexer};
pub use output::{to_json, to_json_pretty};
pub use parser::{ParseError, Parser, parse};
pub use registry::{Func, FuncType, Registry};
pub use tags::{TagError, TagSet};
pub use value::{ResultSet, Value};
