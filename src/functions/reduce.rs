//! Reductions from series to numbers, and cross-series aggregation.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::{first_tags, keys_at, literal, series_of, take};
use crate::ast::{FuncCall, Node};
use crate::evaluator::{EvalError, Evaluator};
use crate::registry::{Arg, Func, FuncType, Registry};
use crate::tags::{TagKeys, TagSet, parse_keys};
use crate::value::{Entry, ResultSet, Series, Value};

pub(crate) fn register(r: &mut Registry) {
    let simple: [(&str, fn(&mut Evaluator, Vec<Arg>) -> Result<ResultSet, EvalError>, &str); 12] = [
        ("avg", avg, "Arithmetic mean of each series."),
        ("sum", sum, "Sum of each series."),
        ("dev", dev, "Sample standard deviation of each series."),
        ("diff", diff, "Last value minus first value."),
        ("first", first, "First value of each series."),
        ("last", last, "Last value of each series."),
        ("len", len, "Number of points in each series."),
        ("streak", streak, "Longest run of consecutive nonzero points."),
        ("cCount", change_count, "Number of times consecutive values differ."),
        ("since", since, "Seconds from the last point of each series to now."),
        ("min", min, "Smallest value of each series."),
        ("max", max, "Largest value of each series."),
    ];
    for (name, imp, doc) in simple {
        r.register(
            name,
            Func::new(vec![FuncType::SeriesSet], FuncType::NumberSet, imp)
                .tags(first_tags)
                .doc(doc),
        );
    }
    r.register(
        "median",
        Func::new(vec![FuncType::SeriesSet], FuncType::NumberSet, median)
            .tags(first_tags)
            .doc("Median value of each series."),
    );
    r.register(
        "percentile",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::NumberSet],
            FuncType::NumberSet,
            percentile_fn,
        )
        .tags(first_tags)
        .doc("Value at percentile p (0 to 1) of each series."),
    );
    r.register(
        "forecastlr",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::NumberSet],
            FuncType::NumberSet,
            forecast_lr,
        )
        .tags(first_tags)
        .doc("Seconds from now until the linear fit of each series reaches y."),
    );
    r.register(
        "aggr",
        Func::new(
            vec![FuncType::SeriesSet, FuncType::String, FuncType::String],
            FuncType::SeriesSet,
            aggr,
        )
        .tags(aggr_tags)
        .check(check_aggr)
        .doc("Point-wise aggregation across series grouped by the listed keys."),
    );
}

/// Resolves per-group parameters from the extra arguments of a match.
///
/// A plain number applies to every group. A set supplies the value of the
/// first entry whose group overlaps `group`, or that is ungrouped. `None`
/// means the group is unmatched and should be dropped, which happens when
/// the series set ignores its unjoined groups or the parameter set ignores
/// the other side's.
pub(crate) fn match_params(
    params: &[Arg],
    group: &TagSet,
    ignore_unjoined: bool,
) -> Result<Option<Vec<f64>>, EvalError> {
    let mut values = Vec::with_capacity(params.len());
    for param in params {
        match param {
            Arg::Number(n) => values.push(*n),
            Arg::Set(rs) => {
                let found = rs
                    .results
                    .iter()
                    .find(|e| e.group.is_empty() || e.group.overlaps(group))
                    .and_then(|e| e.value.as_float());
                match found {
                    Some(n) => values.push(n),
                    None if ignore_unjoined || rs.ignore_other_unjoined => return Ok(None),
                    None => return Err(EvalError::Unjoined(group.clone())),
                }
            }
            other => {
                return Err(EvalError::TypeError(format!(
                    "expected a number parameter, got {:?}",
                    other
                )));
            }
        }
    }
    Ok(Some(values))
}

/// Applies `f` to every series of the first argument, producing one number
/// per group.
pub(crate) fn reduce<F>(name: &str, args: Vec<Arg>, f: F) -> Result<ResultSet, EvalError>
where
    F: Fn(&Series, &[f64]) -> f64,
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
        let n = f(series_of(name, &entry.value)?, &values);
        out.results.push(Entry {
            value: Value::Number(n),
            group: entry.group,
            computations: entry.computations,
        });
    }
    Ok(out)
}

fn values(s: &Series) -> Vec<f64> {
    s.values().copied().collect()
}

fn avg(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("avg", args, |s, _| mean(&values(s)))
}

fn sum(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("sum", args, |s, _| {
        if s.is_empty() {
            f64::NAN
        } else {
            s.values().sum()
        }
    })
}

fn dev(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("dev", args, |s, _| std_dev(&values(s)))
}

fn diff(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("diff", args, |s, _| match (s.values().next(), s.values().next_back()) {
        (Some(a), Some(b)) => b - a,
        _ => f64::NAN,
    })
}

fn first(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("first", args, |s, _| s.values().next().copied().unwrap_or(f64::NAN))
}

fn last(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("last", args, |s, _| {
        s.values().next_back().copied().unwrap_or(f64::NAN)
    })
}

fn len(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("len", args, |s, _| s.len() as f64)
}

fn streak(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("streak", args, |s, _| {
        let (mut best, mut run) = (0usize, 0usize);
        for v in s.values() {
            if *v != 0.0 {
                run += 1;
                best = best.max(run);
            } else {
                run = 0;
            }
        }
        best as f64
    })
}

fn change_count(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("cCount", args, |s, _| {
        let v = values(s);
        v.windows(2).filter(|w| w[0] != w[1]).count() as f64
    })
}

fn since(ev: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let now = ev.context().now;
    reduce("since", args, |s, _| match s.keys().next_back() {
        Some(t) => seconds_between(*t, now),
        None => f64::NAN,
    })
}

fn min(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("min", args, |s, _| percentile(values(s), 0.0))
}

fn max(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("max", args, |s, _| percentile(values(s), 1.0))
}

fn median(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("median", args, |s, _| percentile(values(s), 0.5))
}

fn percentile_fn(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    reduce("percentile", args, |s, p| percentile(values(s), p[0]))
}

fn forecast_lr(ev: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let now = ev.context().now;
    reduce("forecastlr", args, |s, y| {
        let points: Vec<(f64, f64)> = s
            .iter()
            .map(|(t, v)| (seconds_between(now, *t), *v))
            .collect();
        let Some((slope, intercept)) = linear_fit(&points) else {
            return f64::NAN;
        };
        if slope == 0.0 {
            return f64::INFINITY;
        }
        (y[0] - intercept) / slope
    })
}

fn seconds_between(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_milliseconds() as f64 / 1000.0
}

pub(crate) fn mean(v: &[f64]) -> f64 {
    if v.is_empty() {
        return f64::NAN;
    }
    v.iter().sum::<f64>() / v.len() as f64
}

fn std_dev(v: &[f64]) -> f64 {
    match v.len() {
        0 => f64::NAN,
        1 => 0.0,
        n => {
            let m = mean(v);
            let ss: f64 = v.iter().map(|x| (x - m).powi(2)).sum();
            (ss / (n - 1) as f64).sqrt()
        }
    }
}

/// Least squares fit of `(x, y)` points, returning `(slope, intercept)`.
fn linear_fit(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    if sxx == 0.0 {
        return None;
    }
    let slope = sxy / sxx;
    Some((slope, my - slope * mx))
}

/// Value at rank `ceil(p * (n - 1))` of the ascending values; `p <= 0` is
/// the minimum and `p >= 1` the maximum.
pub(crate) fn percentile(mut v: Vec<f64>, p: f64) -> f64 {
    if v.is_empty() || p.is_nan() {
        return f64::NAN;
    }
    v.sort_by(f64::total_cmp);
    if p <= 0.0 {
        return v[0];
    }
    if p >= 1.0 {
        return v[v.len() - 1];
    }
    let i = (p * (v.len() - 1) as f64).ceil() as usize;
    v[i.min(v.len() - 1)]
}

/// Cross-series aggregator accepted by `aggr`.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Aggregator {
    Avg,
    Sum,
    Min,
    Max,
    Median,
    /// Fraction in `0..=1`, written as `p95` or `p99.9`
    Percentile(f64),
}

impl Aggregator {
    fn parse(s: &str) -> Result<Self, String> {
        match s {
            "avg" => Ok(Aggregator::Avg),
            "sum" => Ok(Aggregator::Sum),
            "min" => Ok(Aggregator::Min),
            "max" => Ok(Aggregator::Max),
            "median" => Ok(Aggregator::Median),
            _ => {
                let p = s
                    .strip_prefix('p')
                    .and_then(|n| n.parse::<f64>().ok())
                    .filter(|n| (0.0..=100.0).contains(n))
                    .ok_or_else(|| {
                        format!(
                            "unknown aggregator {:?}, expected avg, sum, min, max, median or pNN",
                            s
                        )
                    })?;
                Ok(Aggregator::Percentile(p / 100.0))
            }
        }
    }

    fn apply(self, v: Vec<f64>) -> f64 {
        match self {
            Aggregator::Avg => mean(&v),
            Aggregator::Sum => v.iter().sum(),
            Aggregator::Min => percentile(v, 0.0),
            Aggregator::Max => percentile(v, 1.0),
            Aggregator::Median => percentile(v, 0.5),
            Aggregator::Percentile(p) => percentile(v, p),
        }
    }
}

fn check_aggr(call: &FuncCall) -> Result<(), String> {
    match literal(call.args.get(2)) {
        Some(s) => Aggregator::parse(s).map(|_| ()),
        None => Err("aggr() aggregator must be a string literal".to_string()),
    }
}

fn aggr_tags(args: &[Node]) -> Option<TagKeys> {
    keys_at(args, 1)
}

fn aggr(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, keys, agg] = take(args)?;
    let set = set.into_set()?;
    let keys = parse_keys(&keys.into_string()?);
    let agg = Aggregator::parse(&agg.into_string()?).map_err(|e| EvalError::function("aggr", e))?;

    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<(TagSet, BTreeMap<DateTime<Utc>, Vec<f64>>)> = Vec::new();
    for entry in &set.results {
        let series = series_of("aggr", &entry.value)?;
        let group = entry.group.project(&keys);
        let i = *index.entry(group.canonical()).or_insert_with(|| {
            groups.push((group, BTreeMap::new()));
            groups.len() - 1
        });
        for (t, v) in series {
            groups[i].1.entry(*t).or_default().push(*v);
        }
    }

    let mut out = ResultSet::new();
    for (group, points) in groups {
        let series: Series = points.into_iter().map(|(t, v)| (t, agg.apply(v))).collect();
        out.results.push(Entry::new(Value::Series(series), group));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_bounds_and_rank() {
        let v = vec![5.0, 1.0, 4.0, 2.0, 3.0];
        assert_eq!(percentile(v.clone(), -1.0), 1.0);
        assert_eq!(percentile(v.clone(), 2.0), 5.0);
        assert_eq!(percentile(v.clone(), 0.5), 3.0);
        assert_eq!(percentile(v, 0.3), 3.0);
        assert!(percentile(vec![], 0.5).is_nan());
    }

    #[test]
    fn dev_of_single_point_is_zero() {
        assert_eq!(std_dev(&[4.0]), 0.0);
        assert!(std_dev(&[]).is_nan());
        assert_eq!(std_dev(&[2.0, 4.0]), 2f64.sqrt());
    }

    #[test]
    fn aggregator_names() {
        assert_eq!(Aggregator::parse("p95"), Ok(Aggregator::Percentile(0.95)));
        assert_eq!(Aggregator::parse("sum"), Ok(Aggregator::Sum));
        assert!(Aggregator::parse("p101").is_err());
        assert!(Aggregator::parse("mode").is_err());
    }

    #[test]
    fn linear_fit_of_a_line() {
        let (slope, intercept) = linear_fit(&[(0.0, 1.0), (1.0, 3.0), (2.0, 5.0)]).unwrap();
        assert!((slope - 2.0).abs() < 1e-12);
        assert!((intercept - 1.0).abs() < 1e-12);
        assert!(linear_fit(&[(0.0, 1.0)]).is_none());
    }
}
