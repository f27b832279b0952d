mod config;
mod observability;

use clap::{Parser, Subcommand};
use config::{Config, ConfigError};
use http_purger::dispatcher::batch_time_ceiling;
use http_purger::{Invalidation, Purgers, RequestOutcome};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "purger", about = "Sends cache invalidation requests to HTTP caches")]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true, default_value = "purger.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Load and validate the configuration, then print every purger
    Validate,
    /// Run a single batch of invalidations
    Invalidate {
        /// Purger to use; defaults to the first configured one
        #[arg(long)]
        purger: Option<String>,
        /// Invalidation type of every target, e.g. `url` or `tag`
        #[arg(long = "type")]
        invalidation_type: String,
        /// Targets to invalidate; none for types like `everything`
        targets: Vec<String>,
    },
    /// Serve the REST API
    Serve,
}

#[derive(thiserror::Error, Debug)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("unknown purger: {0}")]
    UnknownPurger(String),
    #[error("could not start runtime: {0}")]
    Runtime(std::io::Error),
    #[error("REST service failed: {0}")]
    Api(#[from] http_purger::errors::ApiError),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match Config::from_file(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {e}", cli.config.display());
            return ExitCode::FAILURE;
        }
    };

    let _sentry = observability::init_logging(config.common.logging.as_ref());
    if let Some(metrics) = &config.common.metrics {
        if let Err(e) = observability::init_metrics(metrics) {
            tracing::error!("Metrics disabled: {e}");
        }
    }

    match run(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(command: CliCommand, config: Config) -> Result<ExitCode, CliError> {
    let purgers = config.build_purgers()?;

    match command {
        CliCommand::Validate => {
            print_summary(&purgers);
            Ok(ExitCode::SUCCESS)
        }
        CliCommand::Invalidate {
            purger,
            invalidation_type,
            targets,
        } => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(CliError::Runtime)?;
            runtime.block_on(invalidate(
                &purgers,
                purger.as_deref(),
                &invalidation_type,
                targets,
            ))
        }
        CliCommand::Serve => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(CliError::Runtime)?;
            let host = config.listener.host.clone();
            let port = config.listener.port;
            tracing::info!(purgers = purgers.len(), "Starting purge API on {host}:{port}");
            runtime.block_on(http_purger::api::run(&host, port, Arc::new(purgers)))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn print_summary(purgers: &Purgers) {
    for purger in purgers.iter() {
        let settings = purger.settings();
        let ceiling = batch_time_ceiling(settings, settings.max_requests as usize);
        println!(
            "{} ({}): type={} method={} url={}{} time_hint={:.2}s limit={} cooldown={:.2}s worst_case_total={:.1}s",
            purger.id(),
            purger.label(),
            settings.invalidation_type,
            settings.request_method,
            settings.base_url(),
            settings.path,
            purger.time_hint(),
            purger.ideal_conditions_limit(),
            purger.cooldown_time(),
            ceiling.as_secs_f64(),
        );
    }
}

async fn invalidate(
    purgers: &Purgers,
    id: Option<&str>,
    invalidation_type: &str,
    targets: Vec<String>,
) -> Result<ExitCode, CliError> {
    let dispatcher = match id {
        Some(id) => purgers.get(id),
        None => purgers.first(),
    }
    .ok_or_else(|| CliError::UnknownPurger(id.unwrap_or_default().to_string()))?;

    let jobs: Vec<Invalidation> = if targets.is_empty() {
        vec![Invalidation::new(invalidation_type, "")]
    } else {
        targets
            .into_iter()
            .map(|target| Invalidation::new(invalidation_type, target))
            .collect()
    };

    let outcomes = dispatcher.run_batch(&jobs).await;

    let mut failed = false;
    for (job, outcome) in jobs.iter().zip(&outcomes) {
        match outcome {
            RequestOutcome::Succeeded => println!("{} {}: succeeded", job.r#type, job.target),
            RequestOutcome::Failed(reason) => {
                failed = true;
                println!("{} {}: failed ({reason})", job.r#type, job.target);
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
