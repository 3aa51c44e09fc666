//! Query functions backed by [`TimeSeriesBackend`]s.
//!
//! Registered separately from the builtins so that callers without backends
//! can parse and evaluate pure expressions.

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, warn};

use super::{
    BackendError, CacheKey, Capabilities, IssuedQuery, QueryRequest, RawSeries, TimeSeriesBackend,
    fan_out, federate, selector_keys,
};
use crate::ast::Node;
use crate::evaluator::{EvalContext, EvalError, Evaluator};
use crate::functions::{literal, take};
use crate::registry::{Arg, Func, FuncType, Registry};
use crate::tags::{TagKeys, TagSet};
use crate::value::{Entry, ResultSet, Value};

/// Tag added by `fq` to tell federated sources apart.
pub const SOURCE_TAG: &str = "source";

/// Registry of the backend query functions.
pub fn registry() -> Registry {
    Registry::new()
        .with(
            "q",
            Func::new(
                vec![FuncType::String, FuncType::String, FuncType::String],
                FuncType::SeriesSet,
                q,
            )
            .tags(q_tags)
            .doc("Series of the default backend matching the query between start and end ago."),
        )
        .with(
            "query",
            Func::new(
                vec![
                    FuncType::String,
                    FuncType::String,
                    FuncType::String,
                    FuncType::Config,
                ],
                FuncType::Query,
                query,
            )
            .variadic(3, true)
            .doc("Resolved query for fq()."),
        )
        .with(
            "opts",
            Func::new(vec![FuncType::String], FuncType::Config, opts)
                .doc("Backend options as k=v pairs."),
        )
        .with(
            "resources",
            Func::new(vec![FuncType::String], FuncType::Resources, resources)
                .doc("Comma separated backend names."),
        )
        .with(
            "fq",
            Func::new(
                vec![FuncType::Query, FuncType::Resources],
                FuncType::SeriesSet,
                fq,
            )
            .tags(fq_tags)
            .doc("Runs a query against several backends concurrently and tags each series with its source."),
        )
        .with(
            "backends",
            Func::new(vec![], FuncType::Info, backends).doc("Configured backends."),
        )
}

fn q_tags(args: &[Node]) -> Option<TagKeys> {
    literal(args.first()).and_then(selector_keys)
}

fn fq_tags(args: &[Node]) -> Option<TagKeys> {
    let Some(Node::Func(call)) = args.first() else {
        return None;
    };
    let mut keys = literal(call.args.first()).and_then(selector_keys)?;
    keys.insert(SOURCE_TAG.to_string());
    Some(keys)
}

/// Fetches through the evaluation cache, retrying up to `retries` extra times
/// on a miss, and records the query.
fn fetch(
    ctx: &EvalContext,
    backend: &Arc<dyn TimeSeriesBackend>,
    request: &QueryRequest,
    retries: usize,
) -> Result<Vec<RawSeries>, BackendError> {
    let key = CacheKey::new(backend.name(), request).encode()?;
    let (result, cached) = ctx.cache.get(&key, || {
        let mut attempt = 0;
        loop {
            match backend.query(request) {
                Ok(series) => return Ok(series),
                Err(e) if attempt < retries => {
                    attempt += 1;
                    warn!(backend = backend.name(), attempt, error = %e, "query failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    });
    debug!(backend = backend.name(), request = %request, cached, "query");
    ctx.log_query(IssuedQuery {
        backend: backend.name().to_string(),
        request: request.to_string(),
        cached,
    });
    result
}

/// Turns raw series into a set grouped by the query's tag keys.
///
/// Backends without server-side filtering return everything for the metric,
/// so filters are applied here. Squelched series are dropped.
fn to_result_set(
    ctx: &EvalContext,
    capabilities: Capabilities,
    request: &QueryRequest,
    raw: Vec<RawSeries>,
) -> Result<ResultSet, EvalError> {
    let keys = request.group_keys();
    let matcher = request.matcher()?;
    let mut rs = ResultSet::new();
    for series in raw {
        if !capabilities.server_tag_filter && !matcher.matches(&series.tags) {
            continue;
        }
        if ctx.squelch.matches(&series.tags) {
            continue;
        }
        let group = series.tags.project(&keys);
        rs.results.push(Entry::new(Value::Series(series.points), group));
    }
    rs.check()?;
    Ok(rs)
}

fn q(ev: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [text, start, end] = take(args)?;
    let ctx = ev.context();
    let request = QueryRequest::parse(
        &text.into_string()?,
        &start.into_string()?,
        &end.into_string()?,
        ctx.now,
    )?;
    let backend = ctx.backends.default_backend()?;
    let raw = fetch(ctx, backend, &request, ctx.retries)?;
    to_result_set(ctx, backend.capabilities(), &request, raw)
}

fn query(ev: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let mut args = args.into_iter();
    let mut next_string = || -> Result<String, EvalError> {
        args.next()
            .ok_or_else(|| EvalError::function("query", "missing argument"))?
            .into_string()
    };
    let (text, start, end) = (next_string()?, next_string()?, next_string()?);
    let mut request = QueryRequest::parse(&text, &start, &end, ev.context().now)?;
    for arg in args {
        let Arg::Config(options) = arg else {
            return Err(EvalError::function("query", "options must come from opts()"));
        };
        request.options = request.options.merge(&options);
    }
    Ok(ResultSet::single(Value::Query(request)))
}

fn opts(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [text] = take(args)?;
    let options = TagSet::parse(&text.into_string()?)?;
    Ok(ResultSet::single(Value::Config(options)))
}

fn resources(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [text] = take(args)?;
    let names: Vec<String> = text
        .into_string()?
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect();
    if names.is_empty() {
        return Err(EvalError::function("resources", "no backend names given"));
    }
    Ok(ResultSet::single(Value::Resources(names)))
}

fn fq(ev: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [request, names] = take(args)?;
    let (Arg::Query(request), Arg::Resources(names)) = (request, names) else {
        return Err(EvalError::function("fq", "expected query() and resources() arguments"));
    };
    let ctx = ev.context();
    let targets = names
        .iter()
        .map(|name| ctx.backends.get(name).cloned())
        .collect::<Result<Vec<_>, _>>()?;

    let fetched = fan_out(targets, ctx.concurrency, |backend| {
        let raw = fetch(ctx, &backend, &request, 0)?;
        Ok((backend, raw))
    })?;

    let mut parts = Vec::with_capacity(fetched.len());
    for (backend, raw) in fetched {
        let rs = to_result_set(ctx, backend.capabilities(), &request, raw)?;
        parts.push((backend.name().to_string(), rs));
    }
    federate(parts, SOURCE_TAG)
}

fn backends(ev: &mut Evaluator, _: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let list: Vec<serde_json::Value> = ev
        .context()
        .backends
        .iter()
        .enumerate()
        .map(|(i, b)| {
            json!({
                "name": b.name(),
                "default": i == 0,
                "capabilities": b.capabilities(),
            })
        })
        .collect();
    Ok(ResultSet::single(Value::Info(serde_json::Value::Array(list))))
}
