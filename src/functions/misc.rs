use chrono::{TimeZone, Utc};

use super::{first_tags, literal, pair_keys_at, series_of, take};
use crate::ast::{FuncCall, Node};
use crate::duration::{as_seconds, parse_duration};
use crate::evaluator::{EvalError, Evaluator};
use crate::registry::{Arg, Func, FuncType, Registry};
use crate::tags::{TagKeys, TagSet};
use crate::value::{Entry, ResultSet, Series, Value};

pub(crate) fn register(r: &mut Registry) {
    r.register(
        "abs",
        Func::new(vec![FuncType::VariantSet], FuncType::VariantSet, abs)
            .tags(first_tags)
            .doc("Absolute value of every number or point."),
    );
    r.register(
        "nv",
        Func::new(
            vec![FuncType::VariantSet, FuncType::Scalar],
            FuncType::VariantSet,
            nv,
        )
        .tags(first_tags)
        .doc("Value used instead of NaN when a group of this set finds no partner."),
    );
    r.register(
        "dropunjoined",
        Func::new(vec![FuncType::VariantSet], FuncType::VariantSet, drop_unjoined)
            .tags(first_tags)
            .doc("Drops groups of this set that find no partner in an operator."),
    );
    r.register(
        "dropotherunjoined",
        Func::new(
            vec![FuncType::VariantSet],
            FuncType::VariantSet,
            drop_other_unjoined,
        )
        .tags(first_tags)
        .doc("Drops groups of the other operand that find no partner in this set."),
    );
    r.register(
        "sort",
        Func::new(
            vec![FuncType::NumberSet, FuncType::String],
            FuncType::NumberSet,
            sort,
        )
        .tags(first_tags)
        .check(check_sort)
        .doc("Orders numbers \"asc\" or \"desc\"."),
    );
    r.register(
        "limit",
        Func::new(
            vec![FuncType::NumberSet, FuncType::Scalar],
            FuncType::NumberSet,
            limit,
        )
        .tags(first_tags)
        .doc("Keeps the first n numbers."),
    );
    r.register(
        "d",
        Func::new(vec![FuncType::String], FuncType::Scalar, duration)
            .doc("Duration string to seconds."),
    );
    r.register(
        "epoch",
        Func::new(vec![], FuncType::Scalar, epoch).doc("Evaluation time in epoch seconds."),
    );
    r.register(
        "series",
        Func::new(
            vec![FuncType::String, FuncType::Scalar],
            FuncType::SeriesSet,
            series,
        )
        .variadic(1, true)
        .tags(series_tags)
        .check(check_series)
        .doc("Series literal: a k=v group followed by time, value pairs."),
    );
    r.register(
        "map",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::NumberExpr],
            FuncType::SeriesSet,
            map,
        )
        .tags(first_tags)
        .doc("Evaluates the expression once per point with v() bound to the point value."),
    );
    r.register(
        "expr",
        Func::new(vec![], FuncType::NumberExpr, expr)
            .doc("Captures a numeric expression for map()."),
    );
    r.register(
        "v",
        Func::new(vec![], FuncType::Scalar, v)
            .map_only()
            .doc("The current point value inside map()."),
    );
}

fn series_tags(args: &[Node]) -> Option<TagKeys> {
    pair_keys_at(args, 0)
}

fn check_sort(call: &FuncCall) -> Result<(), String> {
    match literal(call.args.get(1)) {
        Some("asc" | "desc") | None => Ok(()),
        Some(other) => Err(format!("sort order must be \"asc\" or \"desc\", got {:?}", other)),
    }
}

fn check_series(call: &FuncCall) -> Result<(), String> {
    if call.args.len() % 2 == 0 {
        return Err("series() needs time, value pairs after the group".to_string());
    }
    Ok(())
}

fn map_values(value: &Value, f: impl Fn(f64) -> f64) -> Value {
    match value {
        Value::Scalar(n) => Value::Scalar(f(*n)),
        Value::Number(n) => Value::Number(f(*n)),
        Value::Series(s) => Value::Series(s.iter().map(|(t, v)| (*t, f(*v))).collect()),
        other => other.clone(),
    }
}

fn abs(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set] = take(args)?;
    let mut set = set.into_set()?;
    for entry in &mut set.results {
        entry.value = map_values(&entry.value, f64::abs);
    }
    Ok(set)
}

fn nv(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, fill] = take(args)?;
    let mut set = set.into_set()?;
    set.nan_value = Some(fill.as_number()?);
    Ok(set)
}

fn drop_unjoined(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set] = take(args)?;
    let mut set = set.into_set()?;
    set.ignore_unjoined = true;
    Ok(set)
}

fn drop_other_unjoined(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set] = take(args)?;
    let mut set = set.into_set()?;
    set.ignore_other_unjoined = true;
    Ok(set)
}

fn sort(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, order] = take(args)?;
    let mut set = set.into_set()?;
    let desc = match order.into_string()?.as_str() {
        "asc" => false,
        "desc" => true,
        other => {
            return Err(EvalError::function(
                "sort",
                format!("unknown order {:?}", other),
            ));
        }
    };
    let key = |e: &Entry| e.value.as_float().unwrap_or(f64::NAN);
    set.results.sort_by(|a, b| {
        let ord = key(a).total_cmp(&key(b));
        if desc { ord.reverse() } else { ord }
    });
    Ok(set)
}

fn limit(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, n] = take(args)?;
    let mut set = set.into_set()?;
    let n = n.as_number()?;
    if n.is_nan() || n < 0.0 {
        return Err(EvalError::function("limit", format!("invalid limit {}", n)));
    }
    set.results.truncate(n as usize);
    Ok(set)
}

fn duration(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [text] = take(args)?;
    let d = parse_duration(&text.into_string()?)?;
    Ok(ResultSet::scalar(as_seconds(d)))
}

fn epoch(ev: &mut Evaluator, _: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let now = ev.context().now;
    Ok(ResultSet::scalar(now.timestamp_millis() as f64 / 1000.0))
}

fn series(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let mut args = args.into_iter();
    let group = match args.next() {
        Some(arg) => TagSet::parse(&arg.into_string()?)?,
        None => return Err(EvalError::function("series", "missing group")),
    };
    let rest: Vec<f64> = args.map(|a| a.as_number()).collect::<Result<_, _>>()?;
    if rest.len() % 2 != 0 {
        return Err(EvalError::function(
            "series",
            "expected time, value pairs after the group",
        ));
    }
    let mut points = Series::new();
    for pair in rest.chunks(2) {
        let t = Utc
            .timestamp_opt(pair[0] as i64, 0)
            .single()
            .ok_or_else(|| EvalError::function("series", format!("invalid time {}", pair[0])))?;
        points.insert(t, pair[1]);
    }
    let mut rs = ResultSet::new();
    rs.results.push(Entry::new(Value::Series(points), group));
    Ok(rs)
}

fn map(ev: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, expr] = take(args)?;
    let mut set = set.into_set()?;
    let Arg::Expr(tree) = expr else {
        return Err(EvalError::function("map", "expected expr() as second argument"));
    };
    for entry in &mut set.results {
        let series = series_of("map", &entry.value)?;
        let mut mapped = Series::new();
        for (t, v) in series {
            mapped.insert(*t, ev.eval_bound(&tree, *v)?);
        }
        entry.value = Value::Series(mapped);
    }
    Ok(set)
}

fn expr(_: &mut Evaluator, _: Vec<Arg>) -> Result<ResultSet, EvalError> {
    // The parser turns expr(...) into a captured sub-tree; the call never runs.
    Err(EvalError::function("expr", "only valid as an argument to map()"))
}

fn v(ev: &mut Evaluator, _: Vec<Arg>) -> Result<ResultSet, EvalError> {
    ev.context()
        .lambda
        .map(ResultSet::scalar)
        .ok_or_else(|| EvalError::function("v", "only valid inside map()"))
}
