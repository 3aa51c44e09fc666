//! Functions that rewrite the groups of a result set.
//!
//! Every rewrite can make two groups canonically equal; the evaluator's
//! post-call check turns that into a duplicate group error.

use chrono::{TimeZone, Utc};

use super::{first_tags, keys_at, literal, pair_keys_at, take};
use crate::ast::Node;
use crate::evaluator::{EvalError, Evaluator};
use crate::registry::{Arg, Func, FuncType, Registry};
use crate::tags::{TagKeys, TagSet, parse_keys};
use crate::value::{Entry, ResultSet, Series, Value};

pub(crate) fn register(r: &mut Registry) {
    r.register(
        "addtags",
        Func::new(
            vec![FuncType::VariantSet, FuncType::String],
            FuncType::VariantSet,
            addtags,
        )
        .tags(addtags_tags)
        .doc("Adds k=v pairs to every group. Existing keys are an error."),
    );
    r.register(
        "rename",
        Func::new(
            vec![FuncType::VariantSet, FuncType::String],
            FuncType::VariantSet,
            rename,
        )
        .tags(rename_tags)
        .doc("Renames tag keys given as old=new pairs."),
    );
    r.register(
        "remove",
        Func::new(
            vec![FuncType::VariantSet, FuncType::String],
            FuncType::VariantSet,
            remove,
        )
        .tags(remove_tags)
        .doc("Removes a tag key from every group."),
    );
    r.register(
        "t",
        Func::new(
            vec![FuncType::NumberSet, FuncType::String],
            FuncType::SeriesSet,
            transpose,
        )
        .tags(transpose_tags)
        .doc("Collects numbers into one series per group of the listed keys."),
    );
    r.register(
        "ungroup",
        Func::new(vec![FuncType::NumberSet], FuncType::Scalar, ungroup)
            .doc("Turns a single grouped number into a scalar."),
    );
}

fn addtags_tags(args: &[Node]) -> Option<TagKeys> {
    let mut keys = first_tags(args).unwrap_or_default();
    keys.extend(pair_keys_at(args, 1)?);
    Some(keys)
}

fn rename_tags(args: &[Node]) -> Option<TagKeys> {
    let keys = first_tags(args)?;
    let pairs = TagSet::parse(literal(args.get(1))?).ok()?;
    Some(
        keys.into_iter()
            .map(|k| pairs.get(&k).map(String::from).unwrap_or(k))
            .collect(),
    )
}

fn remove_tags(args: &[Node]) -> Option<TagKeys> {
    let mut keys = first_tags(args)?;
    keys.remove(literal(args.get(1))?);
    Some(keys)
}

fn transpose_tags(args: &[Node]) -> Option<TagKeys> {
    keys_at(args, 1)
}

fn map_groups<F>(args: Vec<Arg>, f: F) -> Result<ResultSet, EvalError>
where
    F: Fn(&TagSet, &str) -> Result<TagSet, EvalError>,
{
    let [set, text] = take(args)?;
    let mut set = set.into_set()?;
    let text = text.into_string()?;
    for entry in &mut set.results {
        entry.group = f(&entry.group, &text)?;
    }
    Ok(set)
}

fn addtags(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    map_groups(args, |group, text| {
        let mut out = group.clone();
        for (k, v) in TagSet::parse(text)?.iter() {
            out = out.with(k, v)?;
        }
        Ok(out)
    })
}

fn rename(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    map_groups(args, |group, text| {
        let mut out = group.clone();
        for (old, new) in TagSet::parse(text)?.iter() {
            if let Some(value) = group.get(old) {
                out = out.remove(old).with(new, value)?;
            }
        }
        Ok(out)
    })
}

fn remove(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    map_groups(args, |group, key| {
        let key = key.trim();
        if !group.contains_key(key) {
            return Err(EvalError::function(
                "remove",
                format!("tag key {} not in group {}", key, group),
            ));
        }
        Ok(group.remove(key))
    })
}

fn transpose(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set, keys] = take(args)?;
    let set = set.into_set()?;
    let keys = parse_keys(&keys.into_string()?);

    let mut out: Vec<(TagSet, Series)> = Vec::new();
    for entry in &set.results {
        let n = entry.value.as_float().ok_or_else(|| {
            EvalError::function("t", format!("expected numbers, got {}", entry.value.func_type()))
        })?;
        let group = entry.group.project(&keys);
        let i = match out.iter().position(|(g, _)| g.equal(&group)) {
            Some(i) => i,
            None => {
                out.push((group, Series::new()));
                out.len() - 1
            }
        };
        // Points are numbered from the epoch in insertion order.
        let series = &mut out[i].1;
        let t = Utc
            .timestamp_opt(series.len() as i64, 0)
            .single()
            .ok_or_else(|| EvalError::function("t", "too many points"))?;
        series.insert(t, n);
    }

    let mut rs = ResultSet::new();
    rs.results = out
        .into_iter()
        .map(|(group, series)| Entry::new(Value::Series(series), group))
        .collect();
    Ok(rs)
}

fn ungroup(_: &mut Evaluator, args: Vec<Arg>) -> Result<ResultSet, EvalError> {
    let [set] = take(args)?;
    let set = set.into_set()?;
    match set.results.as_slice() {
        [entry] => {
            let n = entry.value.as_float().ok_or_else(|| {
                EvalError::function("ungroup", "expected a number")
            })?;
            Ok(ResultSet::scalar(n))
        }
        other => Err(EvalError::function(
            "ungroup",
            format!("expected exactly one result, got {}", other.len()),
        )),
    }
}
