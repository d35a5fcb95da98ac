//! Command-line front end for the runbox snippet engine.
//!
//! # Examples
//!
//! ```bash
//! # Run a snippet, language inferred from the extension
//! runbox run scratch.py --pretty
//!
//! # Force a language and a timeout, without auto-log
//! runbox run snippet.txt --language ruby --timeout-ms 2000 --no-auto-log
//!
//! # Show which interpreter and package manager would be used
//! runbox locate php
//! ```

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use runbox::{Engine, ExecutionOutcome, ExecutionRequest, Language, ResourceLimits};
use tracing_subscriber::EnvFilter;

/// Exit code used when the run was interrupted with Ctrl-C.
const EXIT_INTERRUPTED: u8 = 130;

/// Run scratchpad snippets in real interpreters and print structured results.
#[derive(Parser, Debug)]
#[command(name = "runbox")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a snippet file and print the result as JSON
    Run {
        /// Snippet file
        file: PathBuf,

        /// Language of the snippet (default: inferred from the file extension)
        #[arg(short, long)]
        language: Option<Language>,

        /// Do not wrap bare expressions in output calls
        #[arg(long)]
        no_auto_log: bool,

        /// Kill the interpreter after this many milliseconds
        #[arg(long, env = "RUNBOX_TIMEOUT_MS")]
        timeout_ms: Option<u64>,

        /// Package directory added to the interpreter's search path
        #[arg(long, env = "RUNBOX_PACKAGES_DIR")]
        packages_dir: Option<PathBuf>,

        /// Interpreter to use instead of searching for one
        #[arg(long)]
        interpreter: Option<PathBuf>,

        /// Directory for temporary script files
        #[arg(long, env = "RUNBOX_TEMP_DIR")]
        temp_dir: Option<PathBuf>,

        /// Pretty-print the JSON result
        #[arg(long)]
        pretty: bool,
    },

    /// Show the interpreter and package manager found for a language
    Locate {
        /// Language to look up
        language: Language,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let filter = if args.verbose {
        "runbox=debug,runbox_cli=debug"
    } else {
        "runbox=warn,runbox_cli=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match args.command {
        Command::Run {
            file,
            language,
            no_auto_log,
            timeout_ms,
            packages_dir,
            interpreter,
            temp_dir,
            pretty,
        } => {
            let language = match language {
                Some(language) => language,
                None => Language::from_path(&file).with_context(|| {
                    format!(
                        "Cannot infer the language of {}, pass --language",
                        file.display()
                    )
                })?,
            };
            let code = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read snippet: {}", file.display()))?;

            let mut builder = Engine::builder()
                .with_auto_log(!no_auto_log)
                .with_resource_limits(ResourceLimits {
                    execution_timeout: timeout_ms.map(Duration::from_millis),
                });
            if let Some(dir) = packages_dir {
                builder = builder.with_packages_dir(language, dir);
            }
            if let Some(path) = interpreter {
                builder = builder.with_interpreter(language, path);
            }
            if let Some(dir) = temp_dir {
                builder = builder.with_temp_dir(dir);
            }
            let engine = builder.build();

            run(&engine, ExecutionRequest::new(language, code), pretty).await
        }
        Command::Locate { language } => {
            let engine = Engine::builder().build();
            let interpreter = engine.locate_interpreter(language).await;
            let package_manager = engine.locate_package_manager(language).await;
            println!("language:        {language}");
            println!(
                "interpreter:     {} ({})",
                interpreter.path.display(),
                interpreter.by
            );
            println!(
                "package manager: {} ({})",
                package_manager.path.display(),
                package_manager.by
            );
            println!(
                "packages dir:    {}",
                engine.config().packages_dir(language).display()
            );
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run(engine: &Engine, request: ExecutionRequest, pretty: bool) -> Result<ExitCode> {
    let id = request.id();
    tracing::info!(
        execution_id = %id,
        language = %request.language(),
        probes = request.magic_comments().len(),
        "Running snippet"
    );

    let interrupt = {
        let engine = engine.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                engine.cancel(&id);
            }
        })
    };
    let outcome = engine
        .submit(request)
        .await
        .context("Failed to run snippet")?;
    interrupt.abort();

    let result = match outcome {
        ExecutionOutcome::Finished(result) => result,
        ExecutionOutcome::Cancelled => {
            tracing::info!("Cancelled");
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    let json = if pretty {
        serde_json::to_string_pretty(&result)
    } else {
        serde_json::to_string(&result)
    }
    .context("Failed to serialize result")?;
    println!("{json}");

    Ok(if result.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
