//! Function descriptors, the static type system and function registries.
//!
//! A [`Registry`] is a plain value built at startup and handed to the parser.
//! Several registries can be combined (builtins first, then backend
//! integrations); the parser resolves a name against them in order.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::{FuncCall, Node, Tree};
use crate::backend::QueryRequest;
use crate::evaluator::{EvalError, Evaluator};
use crate::tags::{TagKeys, TagSet};
use crate::value::ResultSet;

/// Static type of a node or function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FuncType {
    Scalar,
    NumberSet,
    SeriesSet,
    String,
    Table,
    Info,
    NumberExpr,
    /// Resolved backend query
    Query,
    /// Backend resource list
    Resources,
    /// Backend options
    Config,
    /// Parameter accepting a NumberSet or a SeriesSet. As a return type it
    /// means "the type of the first argument".
    VariantSet,
}

impl FuncType {
    /// Types that carry groups and therefore need tag inference.
    pub fn is_tagged_set(self) -> bool {
        matches!(
            self,
            FuncType::NumberSet | FuncType::SeriesSet | FuncType::VariantSet
        )
    }

    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FuncType::Scalar | FuncType::NumberSet | FuncType::SeriesSet
        )
    }

    /// Whether a node of type `self` may be passed to a parameter of type `param`.
    pub fn fits(self, param: FuncType) -> bool {
        self == param
            || (self == FuncType::Scalar && param == FuncType::NumberSet)
            || (param == FuncType::VariantSet
                && matches!(self, FuncType::NumberSet | FuncType::SeriesSet))
    }
}

impl fmt::Display for FuncType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FuncType::Scalar => "scalar",
            FuncType::NumberSet => "numberSet",
            FuncType::SeriesSet => "seriesSet",
            FuncType::String => "string",
            FuncType::Table => "table",
            FuncType::Info => "info",
            FuncType::NumberExpr => "numberExpr",
            FuncType::Query => "query",
            FuncType::Resources => "resources",
            FuncType::Config => "config",
            FuncType::VariantSet => "variantSet",
        };
        f.write_str(name)
    }
}

/// Evaluated function argument.
///
/// Arguments that evaluate to exactly one ungrouped scalar arrive as
/// [`Arg::Number`], so plain arithmetic composes with grouped results.
#[derive(Debug, Clone)]
pub enum Arg {
    Number(f64),
    Str(String),
    Set(ResultSet),
    Expr(Arc<Tree>),
    Query(QueryRequest),
    Resources(Vec<String>),
    Config(TagSet),
}

impl Arg {
    fn kind(&self) -> &'static str {
        match self {
            Arg::Number(_) => "number",
            Arg::Str(_) => "string",
            Arg::Set(_) => "set",
            Arg::Expr(_) => "expression",
            Arg::Query(_) => "query",
            Arg::Resources(_) => "resources",
            Arg::Config(_) => "config",
        }
    }

    fn mismatch(&self, expected: &str) -> EvalError {
        EvalError::TypeError(format!("expected {} argument, got {}", expected, self.kind()))
    }

    pub fn into_set(self) -> Result<ResultSet, EvalError> {
        match self {
            Arg::Set(rs) => Ok(rs),
            Arg::Number(n) => Ok(ResultSet::scalar(n)),
            other => Err(other.mismatch("set")),
        }
    }

    pub fn into_string(self) -> Result<String, EvalError> {
        match self {
            Arg::Str(s) => Ok(s),
            other => Err(other.mismatch("string")),
        }
    }

    /// A plain number. Grouped sets are rejected.
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Arg::Number(n) => Ok(*n),
            other => Err(other.mismatch("scalar")),
        }
    }
}

/// Implementation of a function. Arguments arrive evaluated, in order.
pub type FuncImpl = fn(&mut Evaluator, Vec<Arg>) -> Result<ResultSet, EvalError>;

/// Infers the tag keys of a call from its (unevaluated) arguments.
pub type TagFn = fn(&[Node]) -> Option<TagKeys>;

/// Extra semantic check run after the whole tree is parsed.
pub type CheckFn = fn(&FuncCall) -> Result<(), String>;

/// Trailing repeated parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Variadic {
    /// Index of the repeated parameter, always the last one
    pub position: usize,
    /// Whether zero repeated arguments are accepted
    pub allow_empty: bool,
}

/// Function descriptor.
#[derive(Clone)]
pub struct Func {
    pub args: Vec<FuncType>,
    pub ret: FuncType,
    pub variadic: Option<Variadic>,
    pub tags: Option<TagFn>,
    pub map_only: bool,
    pub check: Option<CheckFn>,
    pub imp: FuncImpl,
    pub doc: &'static str,
}

impl Func {
    pub fn new(args: Vec<FuncType>, ret: FuncType, imp: FuncImpl) -> Self {
        Func {
            args,
            ret,
            variadic: None,
            tags: None,
            map_only: false,
            check: None,
            imp,
            doc: "",
        }
    }

    pub fn tags(mut self, f: TagFn) -> Self {
        self.tags = Some(f);
        self
    }

    pub fn variadic(mut self, position: usize, allow_empty: bool) -> Self {
        self.variadic = Some(Variadic {
            position,
            allow_empty,
        });
        self
    }

    pub fn map_only(mut self) -> Self {
        self.map_only = true;
        self
    }

    pub fn check(mut self, f: CheckFn) -> Self {
        self.check = Some(f);
        self
    }

    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    /// Human readable signature, e.g. `(seriesSet, numberSet) numberSet`.
    pub fn signature(&self) -> String {
        let mut parts: Vec<String> = self.args.iter().map(ToString::to_string).collect();
        if let Some(v) = self.variadic
            && let Some(last) = parts.get_mut(v.position)
        {
            last.push_str("...");
        }
        format!("({}) {}", parts.join(", "), self.ret)
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Func")
            .field("args", &self.args)
            .field("ret", &self.ret)
            .field("variadic", &self.variadic)
            .field("map_only", &self.map_only)
            .finish_non_exhaustive()
    }
}

/// Name to descriptor map.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    funcs: HashMap<String, Arc<Func>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The builtin function library.
    pub fn builtin() -> Self {
        crate::functions::builtin()
    }

    /// Adds a function.
    ///
    /// # Panics
    ///
    /// Panics on a malformed descriptor: a tagged-set return type without a
    /// tag callback, a tag callback on any other return type, a variadic
    /// parameter that is not the last one, or a name registered twice.
    pub fn register(&mut self, name: &str, func: Func) {
        if func.ret.is_tagged_set() && func.tags.is_none() {
            panic!("function {} returns {} but has no tag inference", name, func.ret);
        }
        if !func.ret.is_tagged_set() && func.tags.is_some() {
            panic!("function {} returns {} and must not infer tags", name, func.ret);
        }
        if let Some(v) = func.variadic
            && v.position + 1 != func.args.len()
        {
            panic!(
                "function {} has variadic position {} that is not its last parameter",
                name, v.position
            );
        }
        if self.funcs.insert(name.to_string(), Arc::new(func)).is_some() {
            panic!("function {} registered twice", name);
        }
    }

    pub fn with(mut self, name: &str, func: Func) -> Self {
        self.register(name, func);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<Func>> {
        self.funcs.get(name).cloned()
    }

    /// Sorted function names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.funcs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.funcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }
}
