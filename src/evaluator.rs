use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    ast::{BinOp, FuncCall, Node, Tree, UnaryOp},
    backend::{BackendContexts, BackendError, Cache, IssuedQuery, Squelch},
    config::EngineConfig,
    duration::DurationError,
    registry::{Arg, FuncType},
    tags::{TagError, TagSet},
    value::{Computation, Entry, ResultSet, ResultSetError, Series, Value},
};

/// Everything one top-level evaluation needs. Created per evaluation and
/// dropped when it returns.
pub struct EvalContext {
    /// Fixed evaluation time; relative query times resolve against it
    pub now: DateTime<Utc>,
    pub backends: BackendContexts,
    pub cache: Arc<Cache>,
    pub squelch: Squelch,
    /// Drop unmatched union elements instead of NaN-filling them
    pub unjoined_ok: bool,
    /// Extra attempts for the primary series query path
    pub retries: usize,
    /// Worker limit for federated fan-out
    pub concurrency: usize,
    /// The point value `v()` refers to, bound by `map()`
    pub lambda: Option<f64>,
    queries: Mutex<Vec<IssuedQuery>>,
}

impl EvalContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        let config = EngineConfig::default();
        EvalContext {
            now,
            backends: BackendContexts::new(),
            cache: Arc::new(Cache::new()),
            squelch: Squelch::new(),
            unjoined_ok: config.unjoined_ok,
            retries: config.retries,
            concurrency: config.concurrency,
            lambda: None,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.unjoined_ok = config.unjoined_ok;
        self.retries = config.retries;
        self.concurrency = config.concurrency;
        self
    }

    pub fn with_backends(mut self, backends: BackendContexts) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_squelch(mut self, squelch: Squelch) -> Self {
        self.squelch = squelch;
        self
    }

    pub fn unjoined_ok(mut self, ok: bool) -> Self {
        self.unjoined_ok = ok;
        self
    }

    /// Records a backend query. Safe to call from fan-out workers.
    pub fn log_query(&self, query: IssuedQuery) {
        self.queries.lock().push(query);
    }
}

/// Errors that abort an evaluation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    /// Invalid argument or value for the operation
    #[error("type error: {0}")]
    TypeError(String),

    #[error("operator {op} is not supported between {left} and {right}")]
    UnsupportedOperands {
        op: String,
        left: FuncType,
        right: FuncType,
    },

    /// A series found no matching threshold
    #[error("unjoined groups for {0}")]
    Unjoined(TagSet),

    #[error("duplicate group {0}")]
    DuplicateGroup(TagSet),

    /// Filtering removed every point of a series
    #[error("series {0} is empty")]
    EmptySeries(TagSet),

    #[error("{name}: {message}")]
    Function { name: String, message: String },

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Duration(#[from] DurationError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl EvalError {
    pub fn function(name: &str, message: impl Into<String>) -> Self {
        EvalError::Function {
            name: name.to_string(),
            message: message.into(),
        }
    }
}

impl From<ResultSetError> for EvalError {
    fn from(e: ResultSetError) -> Self {
        match e {
            ResultSetError::DuplicateGroup(group) => EvalError::DuplicateGroup(group),
            other => EvalError::TypeError(other.to_string()),
        }
    }
}

/// Outcome of a successful evaluation.
#[derive(Debug, Clone)]
pub struct Evaluation {
    pub results: ResultSet,
    /// Backend queries issued, for introspection only
    pub queries: Vec<IssuedQuery>,
}

/// Pair of operands joined by group.
#[derive(Debug, Clone)]
pub struct Union {
    pub a: Value,
    pub b: Value,
    pub group: TagSet,
    pub computations: Vec<Computation>,
}

/// Above this many entries on both sides, exact-match joins go through an index.
const INDEX_THRESHOLD: usize = 64;

/// Tree-walking evaluator.
pub struct Evaluator {
    ctx: EvalContext,
}

impl Evaluator {
    pub fn new(ctx: EvalContext) -> Self {
        Evaluator { ctx }
    }

    pub fn context(&self) -> &EvalContext {
        &self.ctx
    }

    /// Evaluates a tree, consuming the evaluation state.
    ///
    /// # Examples
    ///
    /// ```
    /// use chrono::Utc;
    /// use tsexpr::{EvalContext, Evaluator, Registry, parser, value::Value};
    ///
    /// let registry = Registry::builtin();
    /// let tree = parser::parse("1 + 2 * 3", &[&registry]).unwrap();
    /// let out = Evaluator::new(EvalContext::new(Utc::now())).execute(&tree).unwrap();
    /// assert_eq!(out.results.results[0].value, Value::Scalar(7.0));
    /// ```
    pub fn execute(mut self, tree: &Tree) -> Result<Evaluation, EvalError> {
        debug!(expression = %tree.text, "evaluating");
        let results = self.eval_node(&tree.root)?;
        let queries = std::mem::take(&mut *self.ctx.queries.lock());
        debug!(results = results.len(), queries = queries.len(), "evaluated");
        Ok(Evaluation { results, queries })
    }

    /// Evaluates a `map()` sub-expression with `v()` bound to `value`.
    pub fn eval_bound(&mut self, tree: &Tree, value: f64) -> Result<f64, EvalError> {
        let saved = self.ctx.lambda.replace(value);
        let outcome = self.eval_node(&tree.root);
        self.ctx.lambda = saved;

        let rs = outcome?;
        match rs.results.as_slice() {
            [entry] if entry.group.is_empty() => entry.value.as_float().ok_or_else(|| {
                EvalError::TypeError(format!(
                    "expression {} must yield a number",
                    tree.text
                ))
            }),
            _ => Err(EvalError::TypeError(format!(
                "expression {} must yield a single ungrouped number, got {} results",
                tree.text,
                rs.len()
            ))),
        }
    }

    pub fn eval_node(&mut self, node: &Node) -> Result<ResultSet, EvalError> {
        match node {
            Node::Number(n) => Ok(ResultSet::scalar(*n)),
            Node::String(s) => Ok(ResultSet::single(Value::String(s.clone()))),
            Node::SubExpr(tree) => Ok(ResultSet::single(Value::NumberExpr(tree.clone()))),
            Node::Binary { op, left, right } => {
                // Both sides always run: logical operators do not short-circuit.
                let a = self.eval_node(left)?;
                let b = self.eval_node(right)?;
                self.eval_binary(*op, &a, &b, &node.to_string())
            }
            Node::Unary { op, arg } => {
                let a = self.eval_node(arg)?;
                eval_unary(*op, a)
            }
            Node::Func(call) => self.eval_call(call),
        }
    }

    fn eval_call(&mut self, call: &FuncCall) -> Result<ResultSet, EvalError> {
        let mut args = Vec::with_capacity(call.args.len());
        for node in &call.args {
            let rs = self.eval_node(node)?;
            args.push(to_arg(rs));
        }
        trace!(function = %call.name, args = args.len(), "calling");
        let results = (call.func.imp)(self, args)?;
        results.check()?;
        Ok(results)
    }

    fn eval_binary(
        &self,
        op: BinOp,
        a: &ResultSet,
        b: &ResultSet,
        label: &str,
    ) -> Result<ResultSet, EvalError> {
        let mut out = ResultSet::new();
        for u in self.union(a, b, label) {
            let value = apply_binop(op, &u.a, &u.b)?;
            let mut computations = u.computations;
            if let Some(n) = value.as_float() {
                computations.push(Computation {
                    text: label.to_string(),
                    value: Value::Number(n),
                });
            }
            out.results.push(Entry {
                value,
                group: u.group,
                computations,
            });
        }
        out.check()?;
        Ok(out)
    }

    /// Pairs the entries of `a` and `b` by group.
    ///
    /// Entries join when their groups are equal, when either group is empty,
    /// or when one group is a strict subset of the other; the joined group is
    /// the larger one. Entries that join nothing are paired with the other
    /// set's NaN-fill unless the ignore flags say otherwise, or dropped when
    /// the evaluation permits unjoined groups. A number left unmatched against
    /// a series set gets an empty series as its partner.
    pub fn union(&self, a: &ResultSet, b: &ResultSet, label: &str) -> Vec<Union> {
        let mut unions = Vec::new();
        if a.is_empty() || b.is_empty() {
            return unions;
        }
        let mut a_joined = vec![false; a.len()];
        let mut b_joined = vec![false; b.len()];

        if let Some(index) = exact_index(a, b) {
            for (i, ra) in a.results.iter().enumerate() {
                if let Some(&j) = index.get(ra.group.canonical().as_str()) {
                    let rb = &b.results[j];
                    unions.push(join(ra, rb, ra.group.clone()));
                    a_joined[i] = true;
                    b_joined[j] = true;
                }
            }
        } else {
            for (i, ra) in a.results.iter().enumerate() {
                for (j, rb) in b.results.iter().enumerate() {
                    let group = if ra.group.equal(&rb.group) || rb.group.subset(&ra.group) {
                        ra.group.clone()
                    } else if ra.group.subset(&rb.group) {
                        rb.group.clone()
                    } else {
                        continue;
                    };
                    unions.push(join(ra, rb, group));
                    a_joined[i] = true;
                    b_joined[j] = true;
                }
            }
        }

        if self.ctx.unjoined_ok {
            return unions;
        }
        if !a.ignore_unjoined && !b.ignore_other_unjoined {
            for (ra, _) in a.results.iter().zip(&a_joined).filter(|(_, j)| !**j) {
                unions.push(fill(ra, partner_fill(b, a), label, false));
            }
        }
        if !b.ignore_unjoined && !a.ignore_other_unjoined {
            for (rb, _) in b.results.iter().zip(&b_joined).filter(|(_, j)| !**j) {
                unions.push(fill(rb, partner_fill(a, b), label, true));
            }
        }
        unions
    }
}

/// Index of `b` by canonical group when both sides are large and every group
/// has the same non-empty key set, so only exact matches can join.
fn exact_index(a: &ResultSet, b: &ResultSet) -> Option<HashMap<String, usize>> {
    if a.len() < INDEX_THRESHOLD || b.len() < INDEX_THRESHOLD {
        return None;
    }
    let keys = a.results[0].group.keys();
    if keys.is_empty() {
        return None;
    }
    let same_shape = a
        .results
        .iter()
        .chain(b.results.iter())
        .all(|e| e.group.keys() == keys);
    if !same_shape {
        return None;
    }
    Some(
        b.results
            .iter()
            .enumerate()
            .map(|(i, e)| (e.group.canonical(), i))
            .collect(),
    )
}

fn join(ra: &Entry, rb: &Entry, group: TagSet) -> Union {
    let mut computations = ra.computations.clone();
    computations.extend(rb.computations.iter().cloned());
    Union {
        a: ra.value.clone(),
        b: rb.value.clone(),
        group,
        computations,
    }
}

/// Fill value `other` offers an unmatched entry of `own`. A number facing a
/// series set is paired with an empty series so the result stays a series set.
fn partner_fill(other: &ResultSet, own: &ResultSet) -> Value {
    let holds_series = |rs: &ResultSet| rs.func_type() == Some(FuncType::SeriesSet);
    if holds_series(other) && !holds_series(own) {
        Value::Series(Series::new())
    } else {
        other.nan()
    }
}

/// Pairs an unmatched entry with the other operand's fill value, keeping
/// operand order.
fn fill(entry: &Entry, nan: Value, label: &str, entry_on_right: bool) -> Union {
    let mut computations = entry.computations.clone();
    computations.push(Computation {
        text: format!("{}: no match for {}", label, entry.group),
        value: nan.clone(),
    });
    let (a, b) = if entry_on_right {
        (nan, entry.value.clone())
    } else {
        (entry.value.clone(), nan)
    };
    Union {
        a,
        b,
        group: entry.group.clone(),
        computations,
    }
}

/// Converts an evaluated argument, unwrapping lone ungrouped values.
fn to_arg(rs: ResultSet) -> Arg {
    if let Some(n) = rs.as_scalar() {
        return Arg::Number(n);
    }
    if rs.len() == 1 && rs.results[0].group.is_empty() {
        match &rs.results[0].value {
            Value::String(s) => return Arg::Str(s.clone()),
            Value::NumberExpr(tree) => return Arg::Expr(tree.clone()),
            Value::Query(q) => return Arg::Query(q.clone()),
            Value::Resources(r) => return Arg::Resources(r.clone()),
            Value::Config(c) => return Arg::Config(c.clone()),
            _ => {}
        }
    }
    Arg::Set(rs)
}

fn apply_binop(op: BinOp, a: &Value, b: &Value) -> Result<Value, EvalError> {
    match (a, b) {
        (Value::Scalar(x), Value::Scalar(y)) => Ok(Value::Scalar(operate(op, *x, *y))),
        (Value::Scalar(x) | Value::Number(x), Value::Scalar(y) | Value::Number(y)) => {
            Ok(Value::Number(operate(op, *x, *y)))
        }
        (Value::Series(s), Value::Scalar(y) | Value::Number(y)) => Ok(Value::Series(
            s.iter().map(|(t, x)| (*t, operate(op, *x, *y))).collect(),
        )),
        (Value::Scalar(x) | Value::Number(x), Value::Series(s)) => Ok(Value::Series(
            s.iter().map(|(t, y)| (*t, operate(op, *x, *y))).collect(),
        )),
        (a, b) => Err(EvalError::UnsupportedOperands {
            op: op.to_string(),
            left: a.func_type(),
            right: b.func_type(),
        }),
    }
}

/// Applies a binary operator to two floats.
///
/// `||` is 1 when the left side is nonzero and `&&` is 0 when it is zero,
/// before NaN checks; otherwise any NaN operand yields NaN.
pub fn operate(op: BinOp, a: f64, b: f64) -> f64 {
    match op {
        BinOp::Or if a != 0.0 => return 1.0,
        BinOp::And if a == 0.0 => return 0.0,
        _ => {}
    }
    if a.is_nan() || b.is_nan() {
        return f64::NAN;
    }
    let truth = |t: bool| if t { 1.0 } else { 0.0 };
    match op {
        BinOp::Add => a + b,
        BinOp::Subtract => a - b,
        BinOp::Multiply => a * b,
        BinOp::Divide => a / b,
        BinOp::Modulo => a % b,
        BinOp::Power => a.powf(b),
        BinOp::Equal => truth(a == b),
        BinOp::NotEqual => truth(a != b),
        BinOp::LessThan => truth(a < b),
        BinOp::GreaterThan => truth(a > b),
        BinOp::LessEqual => truth(a <= b),
        BinOp::GreaterEqual => truth(a >= b),
        BinOp::Or => truth(a != 0.0 || b != 0.0),
        BinOp::And => truth(a != 0.0 && b != 0.0),
    }
}

pub fn uoperate(op: UnaryOp, a: f64) -> f64 {
    if a.is_nan() {
        return f64::NAN;
    }
    match op {
        UnaryOp::Negate => -a,
        UnaryOp::Not => {
            if a == 0.0 {
                1.0
            } else {
                0.0
            }
        }
    }
}

fn eval_unary(op: UnaryOp, mut rs: ResultSet) -> Result<ResultSet, EvalError> {
    for entry in &mut rs.results {
        entry.value = match &entry.value {
            Value::Scalar(n) => Value::Scalar(uoperate(op, *n)),
            Value::Number(n) => Value::Number(uoperate(op, *n)),
            Value::Series(s) => Value::Series(s.iter().map(|(t, v)| (*t, uoperate(op, *v))).collect()),
            other => {
                return Err(EvalError::TypeError(format!(
                    "operator {} cannot be applied to {}",
                    op,
                    other.func_type()
                )));
            }
        };
    }
    Ok(rs)
}

/// Evaluates `tree` once with a fresh state.
pub fn execute(
    tree: &Tree,
    now: DateTime<Utc>,
    backends: BackendContexts,
    cache: Arc<Cache>,
    squelch: Squelch,
    unjoined_ok: bool,
) -> Result<Evaluation, EvalError> {
    let ctx = EvalContext::new(now)
        .with_backends(backends)
        .with_cache(cache)
        .with_squelch(squelch)
        .unjoined_ok(unjoined_ok);
    Evaluator::new(ctx).execute(tree)
}
