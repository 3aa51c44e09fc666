//! Parse and evaluate expressions against fixture data

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use super::CliError;
use crate::backend::memory::load_fixture;
use crate::backend::{self, BackendContexts, Cache, Squelch};
use crate::config::EngineConfig;
use crate::output::evaluation_to_json;
use crate::{EvalContext, Evaluator, Registry, parse};

/// Options for the check command
#[derive(Debug, Clone, Default)]
pub struct CheckOptions {
    /// The expression to evaluate
    pub expression: String,
    /// JSON fixture describing backends and their series
    pub data: Option<String>,
    /// Evaluation time, RFC 3339. Defaults to the current time.
    pub now: Option<String>,
    /// Only validate syntax, don't evaluate
    pub syntax_only: bool,
    /// Squelch rules, each `key=regex,...`
    pub squelch: Vec<String>,
    pub config: EngineConfig,
}

/// Result of a check operation
#[derive(Debug)]
pub enum CheckResult {
    /// Parsing and type checking passed
    SyntaxValid,
    /// Expression evaluated successfully with JSON output
    Success(serde_json::Value),
}

fn parse_now(now: Option<&str>) -> Result<DateTime<Utc>, CliError> {
    match now {
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| t.with_timezone(&Utc))
            .map_err(|_| CliError::Time(s.to_string())),
        None => Ok(Utc::now()),
    }
}

/// Execute a check operation
pub fn execute_check(options: &CheckOptions) -> Result<CheckResult, CliError> {
    let builtin = Registry::builtin();
    let queries = backend::functions::registry();
    let tree = parse(&options.expression, &[&builtin, &queries])?;

    if options.syntax_only {
        return Ok(CheckResult::SyntaxValid);
    }

    let mut backends = BackendContexts::new();
    if let Some(data) = &options.data {
        for b in load_fixture(data)? {
            backends = backends.with(Arc::new(b));
        }
    }
    let mut squelch = Squelch::new();
    for rule in &options.squelch {
        squelch.add_rule(rule)?;
    }

    let ctx = EvalContext::new(parse_now(options.now.as_deref())?)
        .with_config(&options.config)
        .with_backends(backends)
        .with_cache(Arc::new(Cache::new()))
        .with_squelch(squelch);
    let evaluation = Evaluator::new(ctx).execute(&tree)?;
    info!(
        results = evaluation.results.len(),
        queries = evaluation.queries.len(),
        "check complete"
    );
    Ok(CheckResult::Success(evaluation_to_json(&evaluation)))
}
