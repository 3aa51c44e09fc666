use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::ast::Tree;
use crate::backend::QueryRequest;
use crate::registry::FuncType;
use crate::tags::TagSet;

/// Points of one series ordered by time.
pub type Series = BTreeMap<DateTime<Utc>, f64>;

/// Column/row table produced by joins such as `leftjoin`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

/// A value produced by evaluating a node.
///
/// Each variant corresponds to one [`FuncType`]; a [`ResultSet`] never mixes
/// variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Untagged float, e.g. a literal
    Scalar(f64),

    /// Float belonging to a group
    Number(f64),

    /// Time series belonging to a group
    Series(Series),

    String(String),

    Table(Table),

    /// Opaque descriptive payload
    Info(serde_json::Value),

    /// Sub-expression captured by `expr(...)`, evaluated later by `map()`
    NumberExpr(Arc<Tree>),

    /// Resolved backend query
    Query(QueryRequest),

    /// Named backend resources for federated queries
    Resources(Vec<String>),

    /// Backend options
    Config(TagSet),
}

impl Value {
    pub fn func_type(&self) -> FuncType {
        match self {
            Value::Scalar(_) => FuncType::Scalar,
            Value::Number(_) => FuncType::NumberSet,
            Value::Series(_) => FuncType::SeriesSet,
            Value::String(_) => FuncType::String,
            Value::Table(_) => FuncType::Table,
            Value::Info(_) => FuncType::Info,
            Value::NumberExpr(_) => FuncType::NumberExpr,
            Value::Query(_) => FuncType::Query,
            Value::Resources(_) => FuncType::Resources,
            Value::Config(_) => FuncType::Config,
        }
    }

    /// The float carried by a `Scalar` or `Number`.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Scalar(n) | Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_series(&self) -> Option<&Series> {
        match self {
            Value::Series(s) => Some(s),
            _ => None,
        }
    }
}

/// One labelled intermediate value recorded for audit.
#[derive(Debug, Clone, PartialEq)]
pub struct Computation {
    pub text: String,
    pub value: Value,
}

/// A single grouped value within a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub value: Value,
    pub group: TagSet,
    pub computations: Vec<Computation>,
}

impl Entry {
    pub fn new(value: Value, group: TagSet) -> Self {
        Entry {
            value,
            group,
            computations: Vec::new(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ResultSetError {
    #[error("duplicate group {0}")]
    DuplicateGroup(TagSet),

    #[error("result set mixes {0:?} and {1:?} values")]
    MixedKinds(FuncType, FuncType),
}

/// Ordered results of evaluating a node, plus the unjoined-handling policy
/// they carry into binary operators.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub results: Vec<Entry>,
    /// Unmatched elements of this set are dropped instead of NaN-filled.
    pub ignore_unjoined: bool,
    /// Unmatched elements of the other operand are dropped.
    pub ignore_other_unjoined: bool,
    /// Value used in place of NaN for a missing partner.
    pub nan_value: Option<f64>,
}

impl ResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set holding one ungrouped value.
    pub fn single(value: Value) -> Self {
        ResultSet {
            results: vec![Entry::new(value, TagSet::new())],
            ..Default::default()
        }
    }

    pub fn scalar(n: f64) -> Self {
        Self::single(Value::Scalar(n))
    }

    /// Empty set carrying over the flags of `self`.
    pub fn empty_like(&self) -> Self {
        ResultSet {
            results: Vec::new(),
            ignore_unjoined: self.ignore_unjoined,
            ignore_other_unjoined: self.ignore_other_unjoined,
            nan_value: self.nan_value,
        }
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Stand-in partner for an unjoined element of the other operand.
    pub fn nan(&self) -> Value {
        Value::Number(self.nan_value.unwrap_or(f64::NAN))
    }

    /// Returns the float when the set is exactly one ungrouped scalar.
    pub fn as_scalar(&self) -> Option<f64> {
        match self.results.as_slice() {
            [Entry {
                value: Value::Scalar(n),
                group,
                ..
            }] if group.is_empty() => Some(*n),
            _ => None,
        }
    }

    /// Value kind shared by every entry, if any.
    pub fn func_type(&self) -> Option<FuncType> {
        self.results.first().map(|e| e.value.func_type())
    }

    /// Verifies the set invariants: one value kind, distinct groups.
    pub fn check(&self) -> Result<(), ResultSetError> {
        let mut seen = HashSet::with_capacity(self.results.len());
        let kind = self.func_type();
        for entry in &self.results {
            let k = entry.value.func_type();
            if let Some(first) = kind
                && k != first
            {
                return Err(ResultSetError::MixedKinds(first, k));
            }
            if !seen.insert(entry.group.canonical()) {
                return Err(ResultSetError::DuplicateGroup(entry.group.clone()));
            }
        }
        Ok(())
    }
}

#[test]
fn test_check_rejects_duplicates() {
    let mut rs = ResultSet::new();
    let group = TagSet::parse("host=a").unwrap();
    rs.results.push(Entry::new(Value::Number(1.0), group.clone()));
    rs.results.push(Entry::new(Value::Number(2.0), group.clone()));
    assert_eq!(rs.check(), Err(ResultSetError::DuplicateGroup(group)));
}

#[test]
fn test_as_scalar_requires_ungrouped() {
    assert_eq!(ResultSet::scalar(3.0).as_scalar(), Some(3.0));
    let mut rs = ResultSet::new();
    rs.results.push(Entry::new(
        Value::Scalar(3.0),
        TagSet::parse("host=a").unwrap(),
    ));
    assert_eq!(rs.as_scalar(), None);
}
