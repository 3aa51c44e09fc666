//! The builtin function library.
//!
//! Each submodule registers its functions into a [`Registry`]. Implementations
//! receive already evaluated [`Arg`]s in parameter order; the parser has
//! checked arity and static types, so argument conversion failures here only
//! signal runtime type mismatches.

pub mod filter;
pub mod group;
pub mod misc;
pub mod reduce;

use crate::ast::Node;
use crate::evaluator::EvalError;
use crate::registry::{Arg, Registry};
use crate::tags::{TagKeys, TagSet, parse_keys};
use crate::value::{Series, Value};

/// Registry holding every builtin function.
pub fn builtin() -> Registry {
    let mut registry = Registry::new();
    reduce::register(&mut registry);
    group::register(&mut registry);
    filter::register(&mut registry);
    misc::register(&mut registry);
    registry
}

/// Splits the argument list into exactly `N` arguments.
pub(crate) fn take<const N: usize>(args: Vec<Arg>) -> Result<[Arg; N], EvalError> {
    args.try_into().map_err(|args: Vec<Arg>| {
        EvalError::TypeError(format!("expected {} arguments, got {}", N, args.len()))
    })
}

/// The series carried by an entry, or a type error naming the function.
pub(crate) fn series_of<'a>(name: &str, value: &'a Value) -> Result<&'a Series, EvalError> {
    value.as_series().ok_or_else(|| {
        EvalError::function(name, format!("expected a series, got {}", value.func_type()))
    })
}

/// Text of a string literal argument.
pub(crate) fn literal(node: Option<&Node>) -> Option<&str> {
    match node {
        Some(Node::String(s)) => Some(s.as_str()),
        _ => None,
    }
}

/// Tag keys of the first argument.
pub(crate) fn first_tags(args: &[Node]) -> Option<TagKeys> {
    args.first().and_then(Node::tags)
}

/// Tag keys listed by the string literal in argument `i`.
pub(crate) fn keys_at(args: &[Node], i: usize) -> Option<TagKeys> {
    literal(args.get(i)).map(parse_keys)
}

/// The keys of a `k=v,...` literal in argument `i`.
pub(crate) fn pair_keys_at(args: &[Node], i: usize) -> Option<TagKeys> {
    literal(args.get(i))
        .and_then(|s| TagSet::parse(s).ok())
        .map(|t| t.keys())
}
