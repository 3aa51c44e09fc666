//! In-process backend serving series from memory or from a JSON fixture.
//!
//! Fixture format:
//!
//! ```json
//! {"backends": [{"name": "east", "server_tag_filter": false, "series": [
//!     {"metric": "cpu", "tags": {"host": "a"}, "points": [[1700000000, 1.5]]}
//! ]}]}
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use super::{BackendError, Capabilities, QueryRequest, RawSeries, TimeSeriesBackend};
use crate::tags::TagSet;
use crate::value::Series;

#[derive(Debug)]
pub struct MemoryBackend {
    name: String,
    capabilities: Capabilities,
    series: Vec<(String, RawSeries)>,
    calls: AtomicUsize,
    /// Number of upcoming queries that fail before the backend answers
    failures: AtomicUsize,
}

impl MemoryBackend {
    pub fn new(name: &str) -> Self {
        MemoryBackend {
            name: name.to_string(),
            capabilities: Capabilities::default(),
            series: Vec::new(),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Adds a series of `(epoch seconds, value)` points.
    pub fn with_series(mut self, metric: &str, tags: TagSet, points: &[(i64, f64)]) -> Self {
        let points: Series = points
            .iter()
            .filter_map(|&(t, v)| epoch(t).map(|t| (t, v)))
            .collect();
        self.series
            .push((metric.to_string(), RawSeries { tags, points }));
        self
    }

    /// Makes the next `n` queries fail.
    pub fn failing(self, n: usize) -> Self {
        self.failures.store(n, Ordering::SeqCst);
        self
    }

    /// Number of queries received so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TimeSeriesBackend for MemoryBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn query(&self, request: &QueryRequest) -> Result<Vec<RawSeries>, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(BackendError::Query {
                backend: self.name.clone(),
                message: "temporarily unavailable".to_string(),
            });
        }

        let matcher = request.matcher()?;
        let mut out = Vec::new();
        for (metric, raw) in &self.series {
            if *metric != request.metric {
                continue;
            }
            if self.capabilities.server_tag_filter && !matcher.matches(&raw.tags) {
                continue;
            }
            let points: Series = raw
                .points
                .range(request.start..=request.end)
                .map(|(t, v)| (*t, *v))
                .collect();
            out.push(RawSeries {
                tags: raw.tags.clone(),
                points,
            });
        }
        Ok(out)
    }
}

#[derive(Debug, Deserialize)]
struct FixtureFile {
    backends: Vec<FixtureBackend>,
}

#[derive(Debug, Deserialize)]
struct FixtureBackend {
    name: String,
    #[serde(default)]
    server_tag_filter: bool,
    #[serde(default)]
    series: Vec<FixtureSeries>,
}

#[derive(Debug, Deserialize)]
struct FixtureSeries {
    metric: String,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    points: Vec<(i64, f64)>,
}

/// Builds backends from a JSON fixture.
pub fn load_fixture(json: &str) -> Result<Vec<MemoryBackend>, BackendError> {
    let file: FixtureFile =
        serde_json::from_str(json).map_err(|e| BackendError::Fixture(e.to_string()))?;
    let mut backends = Vec::with_capacity(file.backends.len());
    for fb in file.backends {
        let mut backend = MemoryBackend::new(&fb.name).with_capabilities(Capabilities {
            server_tag_filter: fb.server_tag_filter,
        });
        for s in fb.series {
            let tags = TagSet::from_pairs(s.tags)?;
            backend = backend.with_series(&s.metric, tags, &s.points);
        }
        backends.push(backend);
    }
    Ok(backends)
}

/// Epoch seconds to a UTC timestamp.
pub fn epoch(t: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(t, 0).single()
}

#[test]
fn test_load_fixture() {
    let backends = load_fixture(
        r#"{"backends": [{"name": "east", "series": [
            {"metric": "cpu", "tags": {"host": "a"}, "points": [[100, 1.0], [160, 2.0]]}
        ]}]}"#,
    )
    .unwrap();
    assert_eq!(backends.len(), 1);
    assert_eq!(backends[0].name(), "east");
    assert!(!backends[0].capabilities().server_tag_filter);

    let req = QueryRequest::parse("cpu", "1m", "", epoch(160).unwrap()).unwrap();
    let series = backends[0].query(&req).unwrap();
    assert_eq!(series.len(), 1);
    assert_eq!(series[0].points.len(), 2);
}

#[test]
fn test_fixture_rejects_bad_tags() {
    let err = load_fixture(
        r#"{"backends": [{"name": "x", "series": [
            {"metric": "cpu", "tags": {"host": ""}, "points": []}
        ]}]}"#,
    )
    .unwrap_err();
    assert!(matches!(err, BackendError::Fixture(_)));
}
