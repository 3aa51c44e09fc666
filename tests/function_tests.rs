use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tsexpr::evaluator::{EvalContext, Evaluator};
use tsexpr::tags::TagSet;
use tsexpr::value::{ResultSet, Table, Value};
use tsexpr::{Registry, parse};

const SAMPLE: &str = r#"series("host=a", 0, 1, 60, 3, 120, 2)"#;

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

fn eval(text: &str) -> Result<ResultSet, String> {
    let registry = Registry::builtin();
    let tree = parse(text, &[&registry]).map_err(|e| e.to_string())?;
    Evaluator::new(EvalContext::new(now()))
        .execute(&tree)
        .map(|e| e.results)
        .map_err(|e| e.to_string())
}

fn tags(s: &str) -> TagSet {
    TagSet::parse(s).unwrap()
}

/// The single number an expression reduces to.
fn number(text: &str) -> f64 {
    let rs = eval(text).unwrap();
    assert_eq!(rs.len(), 1, "expression {}", text);
    rs.results[0].value.as_float().unwrap()
}

/// `(epoch seconds, value)` points of the single series an expression yields.
fn points(text: &str) -> Vec<(i64, f64)> {
    let rs = eval(text).unwrap();
    assert_eq!(rs.len(), 1, "expression {}", text);
    points_of(&rs.results[0].value)
}

fn points_of(value: &Value) -> Vec<(i64, f64)> {
    value
        .as_series()
        .unwrap()
        .iter()
        .map(|(t, v)| (t.timestamp(), *v))
        .collect()
}

fn reduce(name: &str) -> f64 {
    number(&format!("{}({})", name, SAMPLE))
}

// ============================================================================
// Reductions
// ============================================================================

#[test]
fn test_simple_reductions() {
    assert_eq!(reduce("avg"), 2.0);
    assert_eq!(reduce("sum"), 6.0);
    assert_eq!(reduce("min"), 1.0);
    assert_eq!(reduce("max"), 3.0);
    assert_eq!(reduce("median"), 2.0);
    assert_eq!(reduce("first"), 1.0);
    assert_eq!(reduce("last"), 2.0);
    assert_eq!(reduce("diff"), 1.0);
    assert_eq!(reduce("len"), 3.0);
    assert_eq!(reduce("dev"), 1.0);
    assert_eq!(reduce("cCount"), 2.0);
    assert_eq!(reduce("streak"), 3.0);
}

#[test]
fn test_reductions_keep_groups() {
    let rs = eval(&format!("avg({})", SAMPLE)).unwrap();
    assert_eq!(rs.results[0].group, tags("host=a"));
    assert!(matches!(rs.results[0].value, Value::Number(_)));
}

#[test]
fn test_streak_resets_on_zero() {
    assert_eq!(
        number(r#"streak(series("host=a", 0, 1, 1, 1, 2, 0, 3, 1, 4, 1, 5, 1))"#),
        3.0
    );
}

#[test]
fn test_since_counts_from_last_point() {
    assert_eq!(reduce("since"), 1_700_000_000.0 - 120.0);
}

#[test]
fn test_reductions_of_empty_series() {
    assert!(number(r#"avg(series("host=a"))"#).is_nan());
    assert!(number(r#"max(series("host=a"))"#).is_nan());
    assert!(number(r#"last(series("host=a"))"#).is_nan());
    assert_eq!(number(r#"len(series("host=a"))"#), 0.0);
    assert_eq!(number(r#"streak(series("host=a"))"#), 0.0);
}

#[test]
fn test_dev_of_one_point() {
    assert_eq!(number(r#"dev(series("host=a", 0, 7))"#), 0.0);
}

#[test]
fn test_percentile() {
    let p = |arg: &str| number(&format!("percentile({}, {})", SAMPLE, arg));
    assert_eq!(p("0"), 1.0);
    assert_eq!(p("-5"), 1.0);
    assert_eq!(p("1"), 3.0);
    assert_eq!(p("7"), 3.0);
    assert_eq!(p("0.5"), 2.0);
    assert_eq!(p("0.9"), 3.0);
}

#[test]
fn test_percentile_of_singleton() {
    assert_eq!(number(r#"percentile(series("host=a", 0, 4), 0.25)"#), 4.0);
}

#[test]
fn test_percentile_parameter_matched_by_group() {
    let rs = eval(
        r#"percentile(merge(series("host=a", 0, 1, 60, 9), series("host=b", 0, 5, 60, 6)), merge(max(series("host=a", 0, 0)), max(series("host=b", 0, 1))))"#,
    )
    .unwrap();
    let got: Vec<f64> = rs.results.iter().map(|e| e.value.as_float().unwrap()).collect();
    assert_eq!(got, vec![1.0, 6.0]);
}

#[test]
fn test_forecastlr() {
    // y = 2 + x/60 with x in seconds from now; reaches 3 one minute ahead.
    let secs = number(
        r#"forecastlr(series("host=a", 1699999880, 0, 1699999940, 1, 1700000000, 2), 3)"#,
    );
    assert!((secs - 60.0).abs() < 1e-6, "got {}", secs);
}

#[test]
fn test_forecastlr_flat_and_short_series() {
    assert_eq!(
        number(r#"forecastlr(series("host=a", 0, 5, 60, 5), 10)"#),
        f64::INFINITY
    );
    assert!(number(r#"forecastlr(series("host=a", 0, 5), 10)"#).is_nan());
}

// ============================================================================
// Point filters
// ============================================================================

#[test]
fn test_threshold_filters() {
    let s = r#"series("host=a", 0, 1, 60, 5, 120, 3)"#;
    assert_eq!(points(&format!("dropg({}, 3)", s)), vec![(0, 1.0), (120, 3.0)]);
    assert_eq!(points(&format!("dropge({}, 3)", s)), vec![(0, 1.0)]);
    assert_eq!(points(&format!("dropl({}, 3)", s)), vec![(60, 5.0), (120, 3.0)]);
    assert_eq!(points(&format!("drople({}, 3)", s)), vec![(60, 5.0)]);
}

#[test]
fn test_threshold_from_number_set() {
    let got = points(
        r#"dropg(series("host=a", 0, 1, 60, 5), max(series("host=a", 0, 2)))"#,
    );
    assert_eq!(got, vec![(0, 1.0)]);
}

#[test]
fn test_unmatched_threshold_is_an_error() {
    let err = eval(r#"dropg(series("host=a", 0, 1), max(series("host=b", 0, 2)))"#).unwrap_err();
    assert_eq!(err, "unjoined groups for {host=a}");
}

#[test]
fn test_unmatched_threshold_can_be_ignored() {
    let rs = eval(
        r#"dropg(series("host=a", 0, 1), dropotherunjoined(max(series("host=b", 0, 2))))"#,
    )
    .unwrap();
    assert!(rs.is_empty());

    let rs = eval(
        r#"dropg(dropunjoined(series("host=a", 0, 1)), max(series("host=b", 0, 2)))"#,
    )
    .unwrap();
    assert!(rs.is_empty());
}

#[test]
fn test_filter_emptying_series_is_an_error() {
    let err = eval(&format!("dropg({}, 0)", SAMPLE)).unwrap_err();
    assert_eq!(err, "series {host=a} is empty");
}

#[test]
fn test_dropna() {
    assert_eq!(
        points(r#"dropna(series("host=a", 0, 0/0, 60, 1, 120, 1/0))"#),
        vec![(60, 1.0)]
    );
}

#[test]
fn test_crop() {
    assert_eq!(points(&format!("crop({}, 30, 120)", SAMPLE)), vec![(60, 3.0), (120, 2.0)]);
    let err = eval(&format!("crop({}, 100, 50)", SAMPLE)).unwrap_err();
    assert_eq!(err, "series {host=a} is empty");
}

#[test]
fn test_tail() {
    assert_eq!(points(&format!("tail({}, 2)", SAMPLE)), vec![(60, 3.0), (120, 2.0)]);
    assert_eq!(points(&format!("tail({}, 10)", SAMPLE)).len(), 3);
}

#[test]
fn test_shift() {
    let rs = eval(r#"shift(series("host=a", 0, 1), "1m")"#).unwrap();
    assert_eq!(rs.results[0].group, tags("host=a,shift=1m"));
    assert_eq!(points_of(&rs.results[0].value), vec![(60, 1.0)]);
}

#[test]
fn test_shift_out_of_range() {
    let err = eval(r#"shift(series("host=a", 0, 1), "200000000d")"#).unwrap_err();
    assert_eq!(err, "shift: 200000000d is out of range");
}

#[test]
fn test_timedelta() {
    assert_eq!(
        points(r#"timedelta(series("host=a", 0, 1, 60, 1, 180, 1))"#),
        vec![(60, 60.0), (180, 120.0)]
    );
    assert!(eval(r#"timedelta(series("host=a", 0, 1))"#).is_err());
}

#[test]
fn test_dropbool() {
    assert_eq!(
        points(&format!(
            r#"dropbool({}, series("host=a", 0, 1, 60, 0, 120, 1))"#,
            SAMPLE
        )),
        vec![(0, 1.0), (120, 2.0)]
    );
}

#[test]
fn test_dropbool_unmatched_condition() {
    let err = eval(r#"dropbool(series("host=a", 0, 1), series("host=b", 0, 1))"#).unwrap_err();
    assert_eq!(err, "unjoined groups for {host=a}");
}

// ============================================================================
// Set combination
// ============================================================================

#[test]
fn test_filter_keeps_nonzero_groups() {
    let rs = eval(
        r#"filter(merge(max(series("host=a", 0, 1)), max(series("host=b", 0, 2))), merge(max(series("host=a", 0, 1)), max(series("host=b", 0, 0))))"#,
    )
    .unwrap();
    assert_eq!(rs.len(), 1);
    assert_eq!(rs.results[0].group, tags("host=a"));
}

#[test]
fn test_leftjoin() {
    let rs = eval(&format!(
        r#"leftjoin("host", "max,min", max({s}), min({s}))"#,
        s = SAMPLE
    ))
    .unwrap();
    assert_eq!(
        rs.results[0].value,
        Value::Table(Table {
            columns: vec!["host".into(), "max".into(), "min".into()],
            rows: vec![vec![json!("a"), json!(3.0), json!(1.0)]],
        })
    );
}

#[test]
fn test_leftjoin_missing_cells_are_null() {
    let rs = eval(
        r#"leftjoin("host", "a,b", merge(max(series("host=x", 0, 1)), max(series("host=y", 0, 2))), max(series("host=x", 0, 0/0)))"#,
    )
    .unwrap();
    let Value::Table(table) = &rs.results[0].value else {
        panic!("expected a table");
    };
    assert_eq!(table.rows[0], vec![json!("x"), json!(1.0), json!(null)]);
    assert_eq!(table.rows[1], vec![json!("y"), json!(2.0), json!(null)]);
}

#[test]
fn test_leftjoin_name_count() {
    let err = eval(&format!(r#"leftjoin("host", "a,b", max({}))"#, SAMPLE)).unwrap_err();
    assert_eq!(err, "leftjoin: 2 column names for 1 sets");
}

#[test]
fn test_aggr() {
    let sets = r#"merge(series("host=a,dc=x", 0, 1, 60, 3), series("host=b,dc=x", 0, 3, 60, 5), series("host=c,dc=y", 0, 7))"#;
    let rs = eval(&format!(r#"aggr({}, "dc", "sum")"#, sets)).unwrap();
    assert_eq!(rs.len(), 2);
    assert_eq!(rs.results[0].group, tags("dc=x"));
    assert_eq!(points_of(&rs.results[0].value), vec![(0, 4.0), (60, 8.0)]);
    assert_eq!(rs.results[1].group, tags("dc=y"));

    let rs = eval(&format!(r#"aggr({}, "dc", "avg")"#, sets)).unwrap();
    assert_eq!(points_of(&rs.results[0].value), vec![(0, 2.0), (60, 4.0)]);

    let rs = eval(&format!(r#"aggr({}, "", "p100")"#, sets)).unwrap();
    assert!(rs.results[0].group.is_empty());
    assert_eq!(points_of(&rs.results[0].value), vec![(0, 7.0), (60, 5.0)]);
}

// ============================================================================
// Group functions
// ============================================================================

#[test]
fn test_addtags_rename_remove() {
    let rs = eval(r#"addtags(series("host=a", 0, 1), "dc=x,rack=r1")"#).unwrap();
    assert_eq!(rs.results[0].group, tags("dc=x,host=a,rack=r1"));

    let rs = eval(r#"rename(series("host=a,dc=x", 0, 1), "host=server")"#).unwrap();
    assert_eq!(rs.results[0].group, tags("dc=x,server=a"));

    let rs = eval(r#"remove(series("host=a,dc=x", 0, 1), "dc")"#).unwrap();
    assert_eq!(rs.results[0].group, tags("host=a"));
}

#[test]
fn test_remove_missing_key() {
    let err = eval(r#"remove(series("host=a", 0, 1), "dc")"#).unwrap_err();
    assert_eq!(err, "remove: tag key dc not in group {host=a}");
}

#[test]
fn test_transpose() {
    let rs = eval(
        r#"t(merge(max(series("host=a,dc=x", 0, 1)), max(series("host=b,dc=x", 0, 2)), max(series("host=c,dc=y", 0, 3))), "dc")"#,
    )
    .unwrap();
    assert_eq!(rs.len(), 2);
    assert_eq!(rs.results[0].group, tags("dc=x"));
    assert_eq!(points_of(&rs.results[0].value), vec![(0, 1.0), (1, 2.0)]);
    assert_eq!(points_of(&rs.results[1].value), vec![(0, 3.0)]);
}

#[test]
fn test_ungroup() {
    let rs = eval(r#"ungroup(max(series("host=a", 0, 4)))"#).unwrap();
    assert_eq!(rs.as_scalar(), Some(4.0));
}

// ============================================================================
// Ordering and misc
// ============================================================================

const THREE: &str = r#"merge(max(series("host=a", 0, 2)), max(series("host=b", 0, 3)), max(series("host=c", 0, 1)))"#;

fn hosts(rs: &ResultSet) -> Vec<String> {
    rs.results
        .iter()
        .map(|e| e.group.get("host").unwrap_or_default().to_string())
        .collect()
}

#[test]
fn test_sort_and_limit() {
    let rs = eval(&format!(r#"sort({}, "desc")"#, THREE)).unwrap();
    assert_eq!(hosts(&rs), vec!["b", "a", "c"]);

    let rs = eval(&format!(r#"sort({}, "asc")"#, THREE)).unwrap();
    assert_eq!(hosts(&rs), vec!["c", "a", "b"]);

    let rs = eval(&format!(r#"limit(sort({}, "desc"), 2)"#, THREE)).unwrap();
    assert_eq!(hosts(&rs), vec!["b", "a"]);
}

#[test]
fn test_limit_rejects_negative() {
    assert!(eval(&format!("limit({}, -1)", THREE)).is_err());
}

#[test]
fn test_abs() {
    assert_eq!(
        points(r#"abs(series("host=a", 0, -1, 60, 2))"#),
        vec![(0, 1.0), (60, 2.0)]
    );
    assert_eq!(number(r#"abs(max(series("host=a", 0, -3)))"#), 3.0);
}

#[test]
fn test_duration_and_epoch() {
    assert_eq!(eval(r#"d("1h30m")"#).unwrap().as_scalar(), Some(5400.0));
    assert_eq!(eval("epoch()").unwrap().as_scalar(), Some(1_700_000_000.0));
    assert_eq!(
        eval(r#"d("soon")"#).unwrap_err(),
        r#"invalid duration "soon""#
    );
    assert_eq!(
        eval(r#"d("9999999999999999d")"#).unwrap_err(),
        r#"invalid duration "9999999999999999d""#
    );
}

#[test]
fn test_nv_sets_fill_value() {
    let rs = eval(r#"nv(max(series("host=a", 0, 1)), 5)"#).unwrap();
    assert_eq!(rs.nan_value, Some(5.0));
    assert_eq!(rs.nan(), Value::Number(5.0));
}
