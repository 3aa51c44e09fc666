//! CLI support for tsexpr
//!
//! Provides programmatic access to the `check` and `docs` commands so other
//! tools can embed them.

mod check;
mod docs;

pub use check::{CheckOptions, CheckResult, execute_check};
pub use docs::{DocCategory, get_doc_category, get_docs_overview};

use std::io;

use thiserror::Error;

use crate::backend::BackendError;
use crate::config::ConfigError;

/// Errors that can occur during CLI operations
#[derive(Error, Debug)]
pub enum CliError {
    #[error("Parse error: {0}")]
    Parse(#[from] crate::ParseError),

    #[error("Evaluation error: {0}")]
    Eval(#[from] crate::EvalError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Invalid time {0:?}, expected RFC 3339")]
    Time(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Unknown category: '{0}'\nRun 'tsexpr docs' to see available categories.")]
    UnknownCategory(String),
}
