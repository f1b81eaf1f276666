//! CLI entrypoint for subflow-fanout
//!
//! This is the main binary that wires together all layers using
//! dependency injection.

mod args;
mod progress;

use anyhow::{Result, bail};
use args::Cli;
use clap::Parser;
use fanout_application::{RunFanoutInput, RunFanoutUseCase};
use fanout_domain::FailurePolicy;
use fanout_infrastructure::{ConfigLoader, PredictionGateway};
use progress::ConsoleProgress;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity level
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"), // -vvv or more
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let config = if cli.no_config {
        ConfigLoader::load_defaults()
    } else {
        ConfigLoader::load(cli.config.as_ref()).map_err(|e| anyhow::anyhow!(e))?
    };

    let question = match cli.question {
        Some(q) => q,
        None => bail!("Question is required."),
    };
    let branch_set = match &cli.branches {
        Some(raw) => args::load_branch_set(raw)?,
        None => bail!("--branches is required (inline JSON or @path)."),
    };

    // The question may arrive as a JSON tool payload carrying vars;
    // a --vars-file overrides payload vars, --var pairs override both.
    let (input_text, mut vars) = RunFanoutInput::parse_tool_input(&question);
    if let Some(path) = &cli.vars_file {
        vars.extend(args::load_vars_file(path)?);
    }
    for pair in &cli.vars {
        let (key, value) = args::parse_var(pair)?;
        vars.insert(key, value);
    }

    info!("Starting subflow fan-out");

    // === Dependency Injection ===
    let base_url = cli.base_url.unwrap_or_else(|| config.gateway.base_url.clone());
    let gateway = Arc::new(PredictionGateway::new(base_url));

    // Build input: flags win over config file values
    let mut input = RunFanoutInput::new(branch_set, input_text)
        .with_vars(vars)
        .with_question_template(
            cli.template
                .unwrap_or_else(|| config.run.question_template.clone()),
        )
        .with_concurrency_cap(cli.max_parallel.unwrap_or(config.run.max_parallel))
        .with_failure_policy(if cli.fail_fast {
            FailurePolicy::FailFast
        } else {
            config.run.parse_failure_policy()
        })
        .with_return_selection(
            cli.select
                .map(Into::into)
                .unwrap_or_else(|| config.run.parse_selection()),
        );

    let overall_timeout_ms = cli
        .overall_timeout_ms
        .unwrap_or(config.run.overall_timeout_ms);
    if overall_timeout_ms > 0 {
        input = input.with_overall_timeout_ms(overall_timeout_ms);
    }
    if let Some(key) = cli.api_key.or_else(|| config.gateway.api_key.clone()) {
        input = input.with_default_credential(key);
    }
    if cli.no_timing || !config.run.emit_timing {
        input = input.without_timing();
    }

    // Create use case with injected gateway
    let use_case = RunFanoutUseCase::new(gateway);

    let result = if cli.quiet {
        use_case.execute(input).await
    } else {
        use_case.execute_with_progress(input, &ConsoleProgress).await
    };

    // Exactly one of: the merged report on stdout, or a single error
    // line on stderr with a non-zero exit.
    match result {
        Ok(report) => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
