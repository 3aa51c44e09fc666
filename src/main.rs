use clap::{Parser as ClapParser, Subcommand};
use std::fs;
use std::io::{self, Read};
use tracing_subscriber::EnvFilter;
use tsexpr::EngineConfig;
use tsexpr::cli::{self, CheckOptions, CheckResult, CliError};

#[derive(ClapParser)]
#[command(name = "tsexpr")]
#[command(about = "tsexpr - An expression language for alerting on tagged time series")]
#[command(version)]
struct Cli {
    /// Log evaluation details to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate and evaluate an expression
    Check {
        /// The expression to evaluate
        expression: String,

        /// JSON fixture file with backends and series (reads stdin if piped)
        #[arg(short, long)]
        data: Option<String>,

        /// Evaluation time as RFC 3339
        #[arg(long)]
        now: Option<String>,

        /// Pretty-print the output
        #[arg(short, long)]
        pretty: bool,

        /// Only validate syntax, don't evaluate
        #[arg(long)]
        syntax_only: bool,

        /// Drop unmatched groups in operators instead of filling with NaN
        #[arg(long)]
        unjoined_ok: bool,

        /// Suppress series matching key=regex,... (repeatable)
        #[arg(long)]
        squelch: Vec<String>,

        /// Extra attempts for failed queries
        #[arg(long)]
        retries: Option<usize>,

        /// Maximum concurrent backend queries
        #[arg(long)]
        concurrency: Option<usize>,
    },

    /// List documentation categories
    Docs,

    /// Show documentation for a specific category
    Doc {
        /// Category name (use 'tsexpr docs' to list categories)
        category: String,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "tsexpr=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Check {
            expression,
            data,
            now,
            pretty,
            syntax_only,
            unjoined_ok,
            squelch,
            retries,
            concurrency,
        } => EngineConfig::from_env()
            .map_err(CliError::from)
            .and_then(|mut config| {
                config.unjoined_ok |= unjoined_ok;
                if let Some(r) = retries {
                    config.retries = r;
                }
                if let Some(c) = concurrency {
                    config.concurrency = c.max(1);
                }
                let options = CheckOptions {
                    expression,
                    data: read_data(data)?,
                    now,
                    syntax_only,
                    squelch,
                    config,
                };
                run_check(&options, pretty)
            }),
        Commands::Docs => {
            print!("{}", cli::get_docs_overview());
            Ok(())
        }
        Commands::Doc { category } => cli::get_doc_category(&category).map(|content| {
            print!("{}", content);
        }),
    };

    if let Err(e) = result {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

fn read_data(path: Option<String>) -> Result<Option<String>, CliError> {
    match path {
        Some(p) => Ok(Some(fs::read_to_string(p)?)),
        None if !atty::is(atty::Stream::Stdin) => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            Ok(Some(buffer).filter(|b| !b.trim().is_empty()))
        }
        None => Ok(None),
    }
}

fn run_check(options: &CheckOptions, pretty: bool) -> Result<(), CliError> {
    match cli::execute_check(options)? {
        CheckResult::SyntaxValid => println!("Syntax is valid"),
        CheckResult::Success(output) => {
            let json = if pretty {
                serde_json::to_string_pretty(&output)
            } else {
                serde_json::to_string(&output)
            }
            .map_err(io::Error::from)?;
            println!("{}", json);
        }
    }
    Ok(())
}
