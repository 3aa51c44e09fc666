//! Per-point filters, series reshaping and set combination.

use chrono::{DateTime, TimeZone, Utc};

use super::reduce::match_params;
use super::{first_tags, series_of, take};
use crate::ast::Node;
use crate::duration::parse_duration;
use crate::evaluator::{EvalError, Evaluator};
use crate::registry::{Arg, Func, FuncType, Registry};
use crate::tags::{TagKeys, parse_keys};
use crate::value::{Entry, ResultSet, Series, Table, Value};

pub(crate) fn register(r: &mut Registry) {
    let thresholds: [(&str, fn(&mut Evaluator, Vec<Arg>) -> Result<ResultSet, EvalError>, &str); 4] = [
        ("dropg", dropg, "Drops points greater than the threshold."),
        ("dropge", dropge, "Drops points greater than or equal to the threshold."),
        ("dropl", dropl, "Drops points less than the threshold."),
        ("drople", drople, "Drops points less than or equal to the threshold."),
    ];
    for (name, imp, doc) in thresholds {
        r.register(
            name,
            Func::new(
                vec![FuncType::SeriesSet, FuncType::NumberSet],
                FuncType::SeriesSet,
                imp,
            )
            .tags(first_tags)
            .doc(doc),
        );
    }
    r.register(
        "dropna",
        Func::new(vec![FuncType::SeriesSet], FuncType::SeriesSet, dropna)
            .tags(first_tags)
            .doc("Drops NaN and infinite points."),
    );
    r.register(
        "crop",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::NumberSet, FuncType::NumberSet],
            FuncType::SeriesSet,
            crop,
        )
        .tags(first_tags)
        .doc("Keeps points between start and end, given in epoch seconds."),
    );
    r.register(
        "tail",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::NumberSet],
            FuncType::SeriesSet,
            tail,
        )
        .tags(first_tags)
        .doc("Keeps the last n points of each series."),
    );
    r.register(
        "shift",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::String],
            FuncType::SeriesSet,
            shift,
        )
        .tags(shift_tags)
        .doc("Moves points forward by a duration and tags the result shift=<duration>."),
    );
    r.register(
        "timedelta",
        Func::new(vec![FuncType::SeriesSet], FuncType::SeriesSet, timedelta)
            .tags(first_tags)
            .doc("Seconds between consecutive points."),
    );
    r.register(
        "merge",
        Func::new(vec![FuncType::VariantSet], FuncType::VariantSet, merge)
            .variadic(0, false)
            .tags(first_tags)
            .doc("Concatenates sets of the same kind. Duplicate groups are an error."),
    );
    r.register(
        "leftjoin",
        Func::new(
            vec![FuncType::String, FuncType::String, FuncType::NumberSet],
            FuncType::Table,
            leftjoin,
        )
        .variadic(2, false)
        .doc("Table of the listed keys and one named column per number set."),
    );
    r.register(
        "filter",
        Func::new(
            vec![FuncType::VariantSet, FuncType::NumberSet],
            FuncType::VariantSet,
            filter,
        )
        .tags(first_tags)
        .doc("Keeps the groups whose matching number is nonzero."),
    );
    r.register(
        "dropbool",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::SeriesSet],
            FuncType::SeriesSet,
            dropbool,
        )
        .tags(first_tags)
        .doc("Keeps the points whose matching condition point is nonzero."),
    );
}

fn shift_tags(args: &[Node]) -> Option<TagKeys> {
    let mut keys = first_tags(args).unwrap_or_default();
    keys.insert("shift".to_string());
    Some(keys)
}

/// Rebuilds every series of the first argument with `f`, matching any extra
/// arguments per group. A series left without points is an error.
fn filter_points<F>(name: &str, args: Vec<Arg>, f: F) -> Result<ResultSet, EvalError>
where
    F: Fn(&Series, &[f64]) -> Result<Series, EvalError>,
{
    let mut args = args.into_iter();
    let set = args
        .next()
        .ok_or_else(|| EvalError::function(name, "missing series argument"))?
        .into_set()?;
    let params: Vec<Arg> = args.collect();

    let mut out = set.empty_like();
    let ignore = set.ignore_unjoined;
    for entry in set.results {
        let Some(values) = match_params(&params, &entry.group, ignore)? else {
            continue;
        };
        let series = f(series_of(name, &entry.value)?, &values)?;
        if series.is_empty() {
            return Err(EvalError::EmptySeries(entry.group));
        }
        out.results.push(Entry {
            value: Value::Series(series),
            group: entry.group,
            computations: entry.computations,
        });
    }
    Ok(out)
}

fn keep(s: &Series, pred: impl Fn(f64) -> bool) -> Series {
    s.iter()
        .filter(|(_, v)| pred(**v))
        .map(|(t, v)| (*t, *v))
        .collect()
}

fn dropg(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("dropg", args, |s, p| Ok(keep(s, |v| !(v > p[0]))))
}

fn dropge(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("dropge", args, |s, p| Ok(keep(s, |v| !(v >= p[0]))))
}

fn dropl(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("dropl", args, |s, p| Ok(keep(s, |v| !(v < p[0]))))
}

fn drople(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("drople", args, |s, p| Ok(keep(s, |v| !(v <= p[0]))))
}

fn dropna(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("dropna", args, |s, _| Ok(keep(s, f64::is_finite)))
}

fn from_epoch(name: &str, seconds: f64) -> Result<DateTime<Utc>, EvalError> {
    if !seconds.is_finite() {
        return Err(EvalError::function(name, format!("invalid time {}", seconds)));
    }
    Utc.timestamp_millis_opt((seconds * 1000.0).round() as i64)
        .single()
        .ok_or_else(|| EvalError::function(name, format!("invalid time {}", seconds)))
}

fn crop(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("crop", args, |s, p| {
        let (start, end) = (from_epoch("crop", p[0])?, from_epoch("crop", p[1])?);
        if start > end {
            return Ok(Series::new());
        }
        Ok(s.range(start..=end).map(|(t, v)| (*t, *v)).collect())
    })
}

fn tail(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("tail", args, |s, p| {
        let n = if p[0].is_nan() || p[0] < 0.0 { 0 } else { p[0] as usize };
        let skip = s.len().saturating_sub(n);
        Ok(s.iter().skip(skip).map(|(t, v)| (*t, *v)).collect())
    })
}

fn shift(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, dur] = take(args)?;
    let mut set = set.into_set()?;
    let text = dur.into_string()?;
    let by = parse_duration(&text)?;
    let out_of_range = || EvalError::function("shift", format!("{} is out of range", text.trim()));
    for entry in &mut set.results {
        let series = series_of("shift", &entry.value)?;
        let shifted = series
            .iter()
            .map(|(t, v)| t.checked_add_signed(by).map(|t| (t, *v)).ok_or_else(out_of_range))
            .collect::<Result<Series, EvalError>>()?;
        entry.value = Value::Series(shifted);
        entry.group = entry.group.with("shift", text.trim())?;
    }
    Ok(set)
}

fn timedelta(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    filter_points("timedelta", args, |s, _| {
        let times: Vec<&DateTime<Utc>> = s.keys().collect();
        Ok(times
            .windows(2)
            .map(|w| (*w[1], (*w[1] - *w[0]).num_milliseconds() as f64 / 1000.0))
            .collect())
    })
}

fn merge(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let mut out = ResultSet::new();
    for arg in args {
        out.results.extend(arg.into_set()?.results);
    }
    out.check()?;
    Ok(out)
}

fn cell(n: f64) -> serde_json::Value {
    serde_json::Number::from_f64(n)
        .map(serde_json::Value::Number)
        .unwrap_or(serde_json::Value::Null)
}

fn leftjoin(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let mut args = args.into_iter();
    let (Some(keys), Some(names)) = (args.next(), args.next()) else {
        return Err(EvalError::function("leftjoin", "missing keys or column names"));
    };
    let keys = parse_keys(&keys.into_string()?);
    let names: Vec<String> = names
        .into_string()?
        .split(',')
        .map(|s| s.trim().to_string())
        .collect();
    let sets = args.map(Arg::into_set).collect::<Result<Vec<_>, _>>()?;
    if names.len() != sets.len() {
        return Err(EvalError::function(
            "leftjoin",
            format!("{} column names for {} sets", names.len(), sets.len()),
        ));
    }

    let mut table = Table {
        columns: keys.iter().cloned().chain(names).collect(),
        rows: Vec::new(),
    };
    let Some(left) = sets.first() else {
        return Ok(ResultSet::single(Value::Table(table)));
    };
    for entry in &left.results {
        let group = entry.group.project(&keys);
        let mut row: Vec<serde_json::Value> = keys
            .iter()
            .map(|k| {
                group
                    .get(k)
                    .map(|v| serde_json::Value::String(v.to_string()))
                    .unwrap_or(serde_json::Value::Null)
            })
            .collect();
        for set in &sets {
            let value = set
                .results
                .iter()
                .find(|e| e.group.project(&keys).equal(&group))
                .and_then(|e| e.value.as_float());
            row.push(value.map(cell).unwrap_or(serde_json::Value::Null));
        }
        table.rows.push(row);
    }
    Ok(ResultSet::single(Value::Table(table)))
}

fn filter(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, cond] = take(args)?;
    let set = set.into_set()?;
    let params = [cond];
    let mut out = set.empty_like();
    let ignore = set.ignore_unjoined;
    for entry in set.results {
        match match_params(&params, &entry.group, ignore)? {
            Some(v) if v[0] != 0.0 => out.results.push(entry),
            _ => {}
        }
    }
    Ok(out)
}

fn dropbool(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, cond] = take(args)?;
    let (set, cond) = (set.into_set()?, cond.into_set()?);
    let mut out = set.empty_like();
    for entry in set.results {
        let matched = cond
            .results
            .iter()
            .find(|c| c.group.is_empty() || c.group.overlaps(&entry.group));
        let Some(matched) = matched else {
            if set.ignore_unjoined || cond.ignore_other_unjoined {
                continue;
            }
            return Err(EvalError::Unjoined(entry.group));
        };
        let bools = series_of("dropbool", &matched.value)?;
        let series: Series = series_of("dropbool", &entry.value)?
            .iter()
            .filter(|(t, _)| bools.get(t).is_some_and(|b| *b != 0.0))
            .map(|(t, v)| (*t, *v))
            .collect();
        // Unlike the other filters an emptied series is silently omitted.
        if series.is_empty() {
            continue;
        }
        out.results.push(Entry {
            value: Value::Series(series),
            group: entry.group,
            computations: entry.computations,
        });
    }
    Ok(out)
}
