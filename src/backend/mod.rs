//! Backend query federation and caching.
//!
//! The engine knows backends only through [`TimeSeriesBackend`]. Query
//! functions resolve their arguments into a [`QueryRequest`] against the
//! evaluation's fixed `now`, fetch through the per-evaluation [`Cache`], and
//! turn raw series into result sets.

pub mod cache;
pub mod fanout;
pub mod federate;
pub mod functions;
pub mod memory;
pub mod squelch;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::duration::{DurationError, parse_duration};
use crate::tags::{TagError, TagSet};
use crate::value::Series;

pub use cache::{Cache, CacheKey};
pub use fanout::fan_out;
pub use federate::federate;
pub use memory::MemoryBackend;
pub use squelch::Squelch;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend {backend}: {message}")]
    Query { backend: String, message: String },

    #[error("unknown backend {0}")]
    UnknownBackend(String),

    #[error("no backend configured")]
    NoBackend,

    #[error("invalid query {query:?}: {message}")]
    InvalidQuery { query: String, message: String },

    /// Every failure of a fan-out, joined
    #[error("{0}")]
    Aggregate(String),

    #[error("worker pool: {0}")]
    Pool(String),

    #[error("invalid fixture: {0}")]
    Fixture(String),

    #[error("invalid squelch rule {0:?}")]
    Squelch(String),
}

/// What a backend can do on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// The backend applies tag filters itself; otherwise the engine filters
    /// returned series client-side.
    pub server_tag_filter: bool,
}

/// Series as returned by a backend.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSeries {
    pub tags: TagSet,
    pub points: Series,
}

/// A backend collaborator.
pub trait TimeSeriesBackend: Send + Sync {
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Resolves a request into series. Must be safe to call concurrently.
    fn query(&self, request: &QueryRequest) -> Result<Vec<RawSeries>, BackendError>;
}

/// Tag value pattern: exact value, `*` wildcards, `a|b` alternatives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct TagFilter(String);

impl TagFilter {
    /// Alternatives are sorted and deduplicated, so `a|b` and `b|a` are the
    /// same filter.
    pub fn new(pattern: &str) -> Self {
        let mut alternatives: Vec<&str> = pattern.split('|').map(str::trim).collect();
        alternatives.sort_unstable();
        alternatives.dedup();
        TagFilter(alternatives.join("|"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn to_regex(&self) -> Result<Regex, regex::Error> {
        let alternatives: Vec<String> = self
            .0
            .split('|')
            .map(|alt| regex::escape(alt).replace(r"\*", ".*"))
            .collect();
        Regex::new(&format!("^(?:{})$", alternatives.join("|")))
    }
}

/// A fully resolved series query: absolute times, canonical tag order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub metric: String,
    pub tags: BTreeMap<String, TagFilter>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub options: TagSet,
}

impl QueryRequest {
    /// Parses `metric{key=pattern,...}` and resolves `start`/`end` relative to
    /// `now`. Times are durations back from `now` (`"1h"`), or empty for `now`.
    pub fn parse(
        text: &str,
        start: &str,
        end: &str,
        now: DateTime<Utc>,
    ) -> Result<Self, BackendError> {
        let invalid = |message: String| BackendError::InvalidQuery {
            query: text.to_string(),
            message,
        };
        let (metric, tags) = parse_selector(text).map_err(invalid)?;
        let resolve = |s: &str| -> Result<DateTime<Utc>, String> {
            if s.trim().is_empty() {
                return Ok(now);
            }
            let back = parse_duration(s).map_err(|e: DurationError| e.to_string())?;
            now.checked_sub_signed(back)
                .ok_or_else(|| format!("duration {:?} is out of range", s.trim()))
        };
        let start = resolve(start).map_err(invalid)?;
        let end = resolve(end).map_err(invalid)?;
        if start > end {
            return Err(invalid("start is after end".to_string()));
        }
        Ok(QueryRequest {
            metric,
            tags,
            start,
            end,
            options: TagSet::new(),
        })
    }

    /// Tag keys the query groups by.
    pub fn group_keys(&self) -> crate::tags::TagKeys {
        self.tags.keys().cloned().collect()
    }

    /// Compiles the tag filters for matching returned series.
    pub fn matcher(&self) -> Result<TagMatcher, BackendError> {
        let filters = self
            .tags
            .iter()
            .map(|(key, filter)| {
                let re = filter.to_regex().map_err(|e| BackendError::InvalidQuery {
                    query: self.to_string(),
                    message: e.to_string(),
                })?;
                Ok((key.clone(), re))
            })
            .collect::<Result<Vec<_>, BackendError>>()?;
        Ok(TagMatcher { filters })
    }
}

/// Compiled tag filters of one request.
#[derive(Debug, Clone)]
pub struct TagMatcher {
    filters: Vec<(String, Regex)>,
}

impl TagMatcher {
    /// Whether `tags` satisfies every filter.
    pub fn matches(&self, tags: &TagSet) -> bool {
        self.filters
            .iter()
            .all(|(key, re)| tags.get(key).is_some_and(|v| re.is_match(v)))
    }
}

impl fmt::Display for QueryRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.metric)?;
        if !self.tags.is_empty() {
            let pairs: Vec<String> = self
                .tags
                .iter()
                .map(|(k, v)| format!("{}={}", k, v.as_str()))
                .collect();
            write!(f, "{{{}}}", pairs.join(","))?;
        }
        write!(f, "[{}, {}]", self.start.timestamp(), self.end.timestamp())
    }
}

/// Tag keys a query text groups by, if it parses.
pub(crate) fn selector_keys(text: &str) -> Option<crate::tags::TagKeys> {
    parse_selector(text)
        .ok()
        .map(|(_, tags)| tags.into_keys().collect())
}

fn parse_selector(text: &str) -> Result<(String, BTreeMap<String, TagFilter>), String> {
    let text = text.trim();
    let (metric, rest) = match text.find('{') {
        Some(i) => (&text[..i], Some(&text[i + 1..])),
        None => (text, None),
    };
    let metric = metric.trim();
    if metric.is_empty() {
        return Err("missing metric name".to_string());
    }
    let mut tags = BTreeMap::new();
    if let Some(rest) = rest {
        let inner = rest
            .strip_suffix('}')
            .ok_or_else(|| "missing closing brace".to_string())?;
        for pair in inner.split(',').filter(|p| !p.trim().is_empty()) {
            let (k, v) = pair
                .split_once('=')
                .ok_or_else(|| format!("malformed tag filter {:?}", pair))?;
            let (k, v) = (k.trim(), v.trim());
            if k.is_empty() || v.is_empty() {
                return Err(format!("malformed tag filter {:?}", pair));
            }
            if tags.insert(k.to_string(), TagFilter::new(v)).is_some() {
                return Err(format!("duplicate tag key {}", k));
            }
        }
    }
    Ok((metric.to_string(), tags))
}

/// Backends available to one evaluation. The first one added is the default.
#[derive(Clone, Default)]
pub struct BackendContexts {
    backends: Vec<Arc<dyn TimeSeriesBackend>>,
}

impl BackendContexts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, backend: Arc<dyn TimeSeriesBackend>) -> Self {
        self.backends.push(backend);
        self
    }

    pub fn default_backend(&self) -> Result<&Arc<dyn TimeSeriesBackend>, BackendError> {
        self.backends.first().ok_or(BackendError::NoBackend)
    }

    pub fn get(&self, name: &str) -> Result<&Arc<dyn TimeSeriesBackend>, BackendError> {
        self.backends
            .iter()
            .find(|b| b.name() == name)
            .ok_or_else(|| BackendError::UnknownBackend(name.to_string()))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn TimeSeriesBackend>> {
        self.backends.iter()
    }
}

impl fmt::Debug for BackendContexts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

/// A backend query issued during evaluation, kept for introspection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IssuedQuery {
    pub backend: String,
    pub request: String,
    pub cached: bool,
}

impl From<TagError> for BackendError {
    fn from(e: TagError) -> Self {
        BackendError::Fixture(e.to_string())
    }
}
