use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::BackendError;

/// Runs `f` over every request on a pool of at most `limit` threads.
///
/// Waits for all requests. Results keep request order. Any failure fails the
/// whole call with every error message joined by `"; "`.
pub fn fan_out<R, T, F>(requests: Vec<R>, limit: usize, f: F) -> Result<Vec<T>, BackendError>
where
    R: Send,
    T: Send,
    F: Fn(R) -> Result<T, BackendError> + Sync,
{
    if requests.is_empty() {
        return Ok(Vec::new());
    }
    let threads = limit.clamp(1, requests.len());
    debug!(requests = requests.len(), threads, "fanning out");

    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|idx| format!("tsexpr-fanout-{idx}"))
        .build()
        .map_err(|e| BackendError::Pool(e.to_string()))?;

    let outcomes: Vec<Result<T, BackendError>> =
        pool.install(|| requests.into_par_iter().map(&f).collect());

    let mut results = Vec::with_capacity(outcomes.len());
    let mut errors = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(v) => results.push(v),
            Err(e) => errors.push(e.to_string()),
        }
    }
    if !errors.is_empty() {
        warn!(failed = errors.len(), "fan-out requests failed");
        return Err(BackendError::Aggregate(errors.join("; ")));
    }
    Ok(results)
}
