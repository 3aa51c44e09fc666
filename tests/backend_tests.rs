use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use tsexpr::backend::{self, BackendContexts, Cache, Capabilities, MemoryBackend, Squelch};
use tsexpr::evaluator::{EvalContext, Evaluation, Evaluator};
use tsexpr::tags::TagSet;
use tsexpr::value::{ResultSet, Value};
use tsexpr::{Registry, parse};

const NOW: i64 = 1_700_000_000;

fn now() -> DateTime<Utc> {
    Utc.timestamp_opt(NOW, 0).unwrap()
}

fn tags(s: &str) -> TagSet {
    TagSet::parse(s).unwrap()
}

fn cpu_backend(name: &str) -> MemoryBackend {
    MemoryBackend::new(name)
        .with_series("cpu", tags("host=a,dc=x"), &[(NOW - 120, 1.0), (NOW - 60, 2.0)])
        .with_series("cpu", tags("host=b,dc=x"), &[(NOW - 60, 5.0)])
        .with_series("cpu", tags("host=c,dc=y"), &[(NOW - 60, 9.0)])
        .with_series("mem", tags("host=a"), &[(NOW - 60, 3.0)])
}

fn run_with(text: &str, ctx: EvalContext) -> Result<Evaluation, String> {
    let builtin = Registry::builtin();
    let queries = backend::functions::registry();
    let tree = parse(text, &[&builtin, &queries]).map_err(|e| e.to_string())?;
    Evaluator::new(ctx).execute(&tree).map_err(|e| e.to_string())
}

fn run(text: &str, backends: BackendContexts) -> Result<Evaluation, String> {
    run_with(text, EvalContext::new(now()).with_backends(backends))
}

fn single(backend: MemoryBackend) -> BackendContexts {
    BackendContexts::new().with(Arc::new(backend))
}

fn numbers(rs: &ResultSet) -> Vec<(String, f64)> {
    rs.results
        .iter()
        .map(|e| (e.group.canonical(), e.value.as_float().unwrap()))
        .collect()
}

// ============================================================================
// q()
// ============================================================================

#[test]
fn test_query_groups_by_query_keys() {
    let out = run(r#"avg(q("cpu{host=*}", "1h", ""))"#, single(cpu_backend("east"))).unwrap();
    assert_eq!(
        numbers(&out.results),
        vec![
            ("host=a".to_string(), 1.5),
            ("host=b".to_string(), 5.0),
            ("host=c".to_string(), 9.0),
        ]
    );
}

#[test]
fn test_client_side_filtering() {
    let out = run(
        r#"max(q("cpu{host=a|b,dc=x}", "1h", ""))"#,
        single(cpu_backend("east")),
    )
    .unwrap();
    assert_eq!(
        numbers(&out.results),
        vec![("dc=x,host=a".to_string(), 2.0), ("dc=x,host=b".to_string(), 5.0)]
    );
}

#[test]
fn test_server_side_filtering_gives_same_result() {
    let text = r#"max(q("cpu{host=a|b,dc=x}", "1h", ""))"#;
    let client = run(text, single(cpu_backend("east"))).unwrap();
    let server = run(
        text,
        single(cpu_backend("east").with_capabilities(Capabilities {
            server_tag_filter: true,
        })),
    )
    .unwrap();
    assert_eq!(client.results, server.results);
}

#[test]
fn test_query_without_tags_is_one_ungrouped_series() {
    let out = run(r#"last(q("mem", "1h", ""))"#, single(cpu_backend("east"))).unwrap();
    assert_eq!(numbers(&out.results), vec![(String::new(), 3.0)]);
}

#[test]
fn test_time_window() {
    let out = run(r#"len(q("cpu{host=a}", "90s", ""))"#, single(cpu_backend("east"))).unwrap();
    assert_eq!(out.results.results[0].value, Value::Number(1.0));
}

#[test]
fn test_groups_colliding_after_projection() {
    let err = run(r#"q("cpu{dc=x}", "1h", "")"#, single(cpu_backend("east"))).unwrap_err();
    assert_eq!(err, "duplicate group {dc=x}");
}

#[test]
fn test_invalid_query_text() {
    let err = run(r#"q("{host=a}", "1h", "")"#, single(cpu_backend("east"))).unwrap_err();
    assert!(err.contains("missing metric name"), "got {}", err);
}

#[test]
fn test_query_window_out_of_range() {
    let east = Arc::new(cpu_backend("east"));
    let err = run(r#"q("cpu", "200000000d", "")"#, BackendContexts::new().with(east.clone()))
        .unwrap_err();
    assert!(err.contains("out of range"), "got {}", err);
    let err = run(r#"q("cpu", "9999999999999999d", "")"#, BackendContexts::new().with(east.clone()))
        .unwrap_err();
    assert!(err.contains("invalid duration"), "got {}", err);
    assert_eq!(east.calls(), 0);
}

#[test]
fn test_no_backend() {
    let err = run(r#"q("cpu", "1h", "")"#, BackendContexts::new()).unwrap_err();
    assert_eq!(err, "no backend configured");
}

#[test]
fn test_squelch() {
    let ctx = EvalContext::new(now())
        .with_backends(single(cpu_backend("east")))
        .with_squelch(Squelch::new().with_rule("host=b|c").unwrap());
    let out = run_with(r#"max(q("cpu{host=*}", "1h", ""))"#, ctx).unwrap();
    assert_eq!(numbers(&out.results), vec![("host=a".to_string(), 2.0)]);
}

// ============================================================================
// Caching and retries
// ============================================================================

#[test]
fn test_identical_queries_hit_backend_once() {
    let east = Arc::new(cpu_backend("east"));
    let out = run(
        r#"max(q("cpu{host=a}", "1h", "")) - min(q("cpu{host=a}", "1h", ""))"#,
        BackendContexts::new().with(east.clone()),
    )
    .unwrap();
    assert_eq!(numbers(&out.results), vec![("host=a".to_string(), 1.0)]);
    assert_eq!(east.calls(), 1);
    assert_eq!(out.queries.len(), 2);
    assert!(!out.queries[0].cached);
    assert!(out.queries[1].cached);
    assert_eq!(
        out.queries[0].request,
        format!("cpu{{host=a}}[{}, {}]", NOW - 3600, NOW)
    );
}

#[test]
fn test_equivalent_queries_share_a_cache_entry() {
    let east = Arc::new(cpu_backend("east"));
    let out = run(
        r#"max(q("cpu{host=a,dc=x}", "1h", "")) - min(q("cpu{ dc=x , host=a }", "60m", "0s"))"#,
        BackendContexts::new().with(east.clone()),
    )
    .unwrap();
    assert_eq!(numbers(&out.results), vec![("dc=x,host=a".to_string(), 1.0)]);
    assert_eq!(east.calls(), 1);
    assert!(out.queries[1].cached);

    let east = Arc::new(cpu_backend("east"));
    let out = run(
        r#"max(q("cpu{host=a|b}", "1h", "")) + max(q("cpu{host=b|a}", "1h", ""))"#,
        BackendContexts::new().with(east.clone()),
    )
    .unwrap();
    assert_eq!(out.results.len(), 2);
    assert_eq!(east.calls(), 1);
}

#[test]
fn test_different_windows_are_separate_queries() {
    let east = Arc::new(cpu_backend("east"));
    run(
        r#"max(q("cpu{host=a}", "1h", "")) - min(q("cpu{host=a}", "2h", ""))"#,
        BackendContexts::new().with(east.clone()),
    )
    .unwrap();
    assert_eq!(east.calls(), 2);
}

#[test]
fn test_cache_shared_across_evaluations() {
    let east = Arc::new(cpu_backend("east"));
    let cache = Arc::new(Cache::new());
    for _ in 0..2 {
        let ctx = EvalContext::new(now())
            .with_backends(BackendContexts::new().with(east.clone()))
            .with_cache(cache.clone());
        run_with(r#"max(q("cpu{host=a}", "1h", ""))"#, ctx).unwrap();
    }
    assert_eq!(east.calls(), 1);
    assert_eq!(cache.len(), 1);
}

#[test]
fn test_transient_failures_are_retried() {
    let east = Arc::new(cpu_backend("east").failing(2));
    let out = run(
        r#"max(q("cpu{host=a}", "1h", ""))"#,
        BackendContexts::new().with(east.clone()),
    )
    .unwrap();
    assert_eq!(out.results.len(), 1);
    assert_eq!(east.calls(), 3);
}

#[test]
fn test_retries_give_up() {
    let east = Arc::new(cpu_backend("east").failing(5));
    let err = run(
        r#"max(q("cpu{host=a}", "1h", ""))"#,
        BackendContexts::new().with(east.clone()),
    )
    .unwrap_err();
    assert_eq!(err, "backend east: temporarily unavailable");
    assert_eq!(east.calls(), 4);
}

#[test]
fn test_failures_are_cached() {
    let east = Arc::new(cpu_backend("east").failing(1));
    let cache = Arc::new(Cache::new());
    for _ in 0..2 {
        let mut ctx = EvalContext::new(now())
            .with_backends(BackendContexts::new().with(east.clone()))
            .with_cache(cache.clone());
        ctx.retries = 0;
        let err = run_with(r#"max(q("cpu{host=a}", "1h", ""))"#, ctx).unwrap_err();
        assert_eq!(err, "backend east: temporarily unavailable");
    }
    // The backend would have answered the second time.
    assert_eq!(east.calls(), 1);
}

// ============================================================================
// Federation
// ============================================================================

fn east_and_west() -> (Arc<MemoryBackend>, Arc<MemoryBackend>, BackendContexts) {
    let east = Arc::new(cpu_backend("east"));
    let west = Arc::new(
        MemoryBackend::new("west").with_series("cpu", tags("host=a,dc=z"), &[(NOW - 60, 7.0)]),
    );
    let contexts = BackendContexts::new().with(east.clone()).with(west.clone());
    (east, west, contexts)
}

#[test]
fn test_federated_query_tags_sources() {
    let (east, west, contexts) = east_and_west();
    let out = run(
        r#"max(fq(query("cpu{host=a}", "1h", ""), resources("east,west")))"#,
        contexts,
    )
    .unwrap();
    assert_eq!(
        numbers(&out.results),
        vec![
            ("host=a,source=east".to_string(), 2.0),
            ("host=a,source=west".to_string(), 7.0),
        ]
    );
    assert_eq!((east.calls(), west.calls()), (1, 1));
    assert_eq!(out.queries.len(), 2);
}

#[test]
fn test_federated_query_unknown_backend() {
    let (_, _, contexts) = east_and_west();
    let err = run(
        r#"fq(query("cpu{host=a}", "1h", ""), resources("east,north"))"#,
        contexts,
    )
    .unwrap_err();
    assert_eq!(err, "unknown backend north");
}

#[test]
fn test_federated_failures_are_aggregated() {
    let east = Arc::new(cpu_backend("east").failing(1));
    let west = Arc::new(MemoryBackend::new("west").failing(1));
    let err = run(
        r#"fq(query("cpu{host=a}", "1h", ""), resources("east,west"))"#,
        BackendContexts::new().with(east).with(west),
    )
    .unwrap_err();
    assert_eq!(
        err,
        "backend east: temporarily unavailable; backend west: temporarily unavailable"
    );
}

#[test]
fn test_federation_with_many_backends() {
    let mut contexts = BackendContexts::new();
    let mut names = Vec::new();
    for i in 0..6 {
        let name = format!("b{}", i);
        contexts = contexts.with(Arc::new(
            MemoryBackend::new(&name).with_series("up", tags("host=a"), &[(NOW, i as f64)]),
        ));
        names.push(name);
    }
    let mut ctx = EvalContext::new(now()).with_backends(contexts);
    ctx.concurrency = 2;
    let text = format!(
        r#"last(fq(query("up{{host=*}}", "1m", ""), resources("{}")))"#,
        names.join(",")
    );
    let out = run_with(&text, ctx).unwrap();
    let got: Vec<f64> = out
        .results
        .results
        .iter()
        .map(|e| e.value.as_float().unwrap())
        .collect();
    assert_eq!(got, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
}

#[test]
fn test_query_options_are_part_of_the_cache_key() {
    let (east, _, contexts) = east_and_west();
    run(
        r#"max(fq(query("cpu{host=a}", "1h", ""), resources("east"))) + max(fq(query("cpu{host=a}", "1h", "", opts("step=60")), resources("east")))"#,
        contexts,
    )
    .unwrap();
    assert_eq!(east.calls(), 2);
}

#[test]
fn test_query_value_carries_options() {
    let out = run(
        r#"query("cpu{host=a}", "1h", "", opts("step=60"), opts("agg=avg"))"#,
        BackendContexts::new(),
    )
    .unwrap();
    let Value::Query(request) = &out.results.results[0].value else {
        panic!("expected a query");
    };
    assert_eq!(request.options, tags("agg=avg,step=60"));
    assert_eq!(request.start.timestamp(), NOW - 3600);
}

#[test]
fn test_empty_resources() {
    let err = run(r#"resources(" , ")"#, BackendContexts::new()).unwrap_err();
    assert_eq!(err, "resources: no backend names given");
}

// ============================================================================
// Introspection
// ============================================================================

#[test]
fn test_backends_info() {
    let (_, _, contexts) = east_and_west();
    let out = run("backends()", contexts).unwrap();
    assert_eq!(
        out.results.results[0].value,
        Value::Info(json!([
            {"name": "east", "default": true, "capabilities": {"server_tag_filter": false}},
            {"name": "west", "default": false, "capabilities": {"server_tag_filter": false}},
        ]))
    );
}

#[test]
fn test_json_output_lists_queries() {
    let out = run(r#"max(q("cpu{host=a}", "1h", ""))"#, single(cpu_backend("east"))).unwrap();
    let json: serde_json::Value = serde_json::from_str(&tsexpr::to_json(&out)).unwrap();
    assert_eq!(json["queries"][0]["backend"], "east");
    assert_eq!(json["queries"][0]["cached"], false);
    assert_eq!(json["results"][0]["group"], json!({"host": "a"}));
}
