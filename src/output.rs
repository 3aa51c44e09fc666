//! JSON rendering of evaluation results.
//!
//! Numbers that JSON cannot represent (NaN, infinities) render as `null`.
//! Series render as objects keyed by epoch seconds. Output is deterministic
//! because groups, series and `serde_json` maps are all ordered.
//!
//! # Examples
//!
//! ```
//! use tsexpr::output::value_to_json;
//! use tsexpr::value::Value;
//!
//! assert_eq!(value_to_json(&Value::Number(1.5)).to_string(), "1.5");
//! assert_eq!(value_to_json(&Value::Number(f64::NAN)).to_string(), "null");
//! ```

use serde_json::{Map, Value as Json, json};

use crate::evaluator::Evaluation;
use crate::value::{Entry, ResultSet, Value};

fn number(n: f64) -> Json {
    serde_json::Number::from_f64(n)
        .map(Json::Number)
        .unwrap_or(Json::Null)
}

pub fn value_to_json(value: &Value) -> Json {
    match value {
        Value::Scalar(n) | Value::Number(n) => number(*n),
        Value::Series(s) => Json::Object(
            s.iter()
                .map(|(t, v)| (t.timestamp().to_string(), number(*v)))
                .collect(),
        ),
        Value::String(s) => Json::String(s.clone()),
        Value::Table(t) => json!({ "columns": t.columns, "rows": t.rows }),
        Value::Info(info) => info.clone(),
        Value::NumberExpr(tree) => Json::String(tree.text.clone()),
        Value::Query(q) => serde_json::to_value(q).unwrap_or(Json::Null),
        Value::Resources(r) => json!(r),
        Value::Config(c) => serde_json::to_value(c).unwrap_or(Json::Null),
    }
}

fn entry_to_json(entry: &Entry) -> Json {
    let group: Map<String, Json> = entry
        .group
        .iter()
        .map(|(k, v)| (k.to_string(), Json::String(v.to_string())))
        .collect();
    let mut out = json!({
        "group": group,
        "value": value_to_json(&entry.value),
    });
    if !entry.computations.is_empty() {
        out["computations"] = entry
            .computations
            .iter()
            .map(|c| json!({ "text": c.text, "value": value_to_json(&c.value) }))
            .collect();
    }
    out
}

pub fn results_to_json(rs: &ResultSet) -> Json {
    json!({
        "type": rs.func_type().map(|t| t.to_string()),
        "results": rs.results.iter().map(entry_to_json).collect::<Vec<_>>(),
    })
}

/// The full evaluation: results plus the backend queries they needed.
pub fn evaluation_to_json(eval: &Evaluation) -> Json {
    let mut out = results_to_json(&eval.results);
    if !eval.queries.is_empty() {
        out["queries"] = serde_json::to_value(&eval.queries).unwrap_or(Json::Null);
    }
    out
}

pub fn to_json(eval: &Evaluation) -> String {
    evaluation_to_json(eval).to_string()
}

pub fn to_json_pretty(eval: &Evaluation) -> String {
    let json = evaluation_to_json(eval);
    serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
}
