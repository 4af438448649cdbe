//! taskcast CLI entry point

use anyhow::{Context, Result};
use std::sync::Arc;
use taskcast::config::cli::{Cli, ExecutionMode};
use taskcast::config::{cli_convert, toml, validator, Config};
use taskcast::distributed::coordinator::DispatchReport;
use taskcast::distributed::worker_service::{get_node_id, WorkerService};
use taskcast::distributed::{DispatchCoordinator, WorkerPool};
use taskcast::output;
use taskcast::task::builtins::builtin_registry;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();
    init_logging(cli.debug);
    cli.validate()?;

    // File values first, then CLI overrides
    let config = toml::load_config(&cli)?;
    let config = toml::merge_cli_with_config(&cli, config)?;
    validator::validate_config(&config, cli.mode)
        .context("Configuration validation failed")?;

    let runtime = tokio::runtime::Runtime::new()
        .context("Failed to create tokio runtime")?;

    // Handle different execution modes
    match cli.mode {
        ExecutionMode::Worker => runtime.block_on(run_worker(config)),
        ExecutionMode::Dispatch => runtime.block_on(run_dispatch(&cli, config)),
        ExecutionMode::Local => runtime.block_on(run_local(&cli, config)),
    }
}

/// Install the tracing subscriber on stderr
///
/// `RUST_LOG` wins when set; otherwise `info`, or `debug` with `--debug`.
fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
}

/// Run in worker mode (serve until Ctrl-C)
async fn run_worker(config: Config) -> Result<()> {
    let node_id = config.worker.node_id.clone().unwrap_or_else(get_node_id);
    let registry = builtin_registry(&node_id)?;

    let service = WorkerService::bind(&config.worker, Arc::new(registry)).await?;
    service
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("interrupt received, shutting down");
        })
        .await
}

/// Run in dispatch mode (broadcast one task to the configured roster)
async fn run_dispatch(cli: &Cli, config: Config) -> Result<()> {
    let task = cli_convert::build_task(cli)?;
    let coordinator = DispatchCoordinator::new(&config.coordinator)
        .context("Failed to create coordinator")?;

    let report = coordinator.dispatch_report(&task).await?;
    finish(&report, &config)
}

/// Run in local mode (in-process worker pool, then dispatch to it)
async fn run_local(cli: &Cli, mut config: Config) -> Result<()> {
    let task = cli_convert::build_task(cli)?;

    // Without an explicit port every local worker takes an ephemeral one
    if cli.listen_port.is_none() {
        config.worker.port = 0;
    }

    let pool = WorkerPool::start(&config.worker, cli.workers, builtin_registry).await?;
    config.coordinator.roster = pool.roster();

    let result = async {
        let coordinator = DispatchCoordinator::new(&config.coordinator)
            .context("Failed to create coordinator")?;
        coordinator.dispatch_report(&task).await
    }
    .await;

    if let Err(e) = pool.shutdown().await {
        warn!(error = %e, "worker pool did not shut down cleanly");
    }

    finish(&result?, &config)
}

/// Print the report; in strict mode, fail unless every worker returned Ok
fn finish(report: &DispatchReport, config: &Config) -> Result<()> {
    output::print_report(report, &config.output)?;

    if config.output.strict && !report.all_ok() {
        anyhow::bail!(
            "{} of {} workers did not return Ok",
            report.entries.len() - report.count(taskcast::distributed::OutcomeStatus::Ok),
            report.entries.len()
        );
    }

    Ok(())
}
