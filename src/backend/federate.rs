use crate::evaluator::EvalError;
use crate::value::ResultSet;

/// Merges per-source result sets into one.
///
/// Each entry first gets `key=<source>` added to its group so that equal
/// groups from different sources stay distinct; duplicates left after that
/// are an error.
pub fn federate(parts: Vec<(String, ResultSet)>, key: &str) -> Result<ResultSet, EvalError> {
    let mut merged = ResultSet::new();
    for (source, part) in parts {
        for mut entry in part.results {
            entry.group = entry.group.with(key, &source)?;
            merged.results.push(entry);
        }
    }
    merged.check()?;
    Ok(merged)
}
