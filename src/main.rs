//! chartd binary entry point.
//!
//! Loads the config directory, discovers jobs, runs the scheduler and
//! streams charts to stdout until a signal (or the `--dump` timer) stops it.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use chartd::{
    bootstrap,
    collector::Registry,
    config::AppConfig,
    discovery::{DefaultDiscovery, Discovery, FileDiscovery},
    job::JobSpec,
    scheduler::{Scheduler, SchedulerHandle, summary_table},
    sink::wire::WireSink,
};

/// chartd - modular metrics collector
#[derive(Parser, Debug)]
#[command(name = "chartd", version, about, long_about = None)]
struct Cli {
    /// Directory holding chartd.yaml and the module config files
    #[arg(long, default_value = "/etc/chartd", env = "CHARTD_CONFIG_DIR")]
    config_dir: PathBuf,

    /// Debug logging
    #[arg(long)]
    debug: bool,

    /// Module to run (repeatable, `all` for every registered module)
    #[arg(short, long = "module")]
    modules: Vec<String>,

    /// Job name to run (repeatable)
    #[arg(short, long = "job")]
    jobs: Vec<String>,

    /// Minimum data collection interval, in seconds
    #[arg(long)]
    update_every: Option<i32>,

    /// Run for the given duration (e.g. "30s"), then shut down
    #[arg(long, value_parser = humantime::parse_duration)]
    dump: Option<Duration>,

    /// Print a per-job summary on shutdown
    #[arg(long)]
    dump_summary: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::unset_colon_tz();
    let cli = Cli::parse();
    bootstrap::init_tracing(cli.debug);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(cli))
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(config_dir = %cli.config_dir.display(), "chartd starting");

    let app = AppConfig::load_from_dir(&cli.config_dir)?;
    if !app.enabled {
        tracing::info!("plugin disabled in config, exiting");
        return Ok(());
    }

    let registry = Registry::global().clone();
    let modules = select_modules(&cli.modules, &app, &registry)?;
    tracing::info!(modules = ?modules, "modules selected");

    let (sink, writer) = WireSink::spawn(std::io::stdout(), app.sink_capacity)?;
    let scheduler = Scheduler::new(app.scheduler_config(), Arc::new(sink.clone()))
        .with_registry(registry.clone())
        .start();

    let discoveries: [Box<dyn Discovery>; 2] = [
        Box::new(FileDiscovery::new(&cli.config_dir, registry.clone())),
        Box::new(DefaultDiscovery::new(&cli.config_dir, registry)),
    ];
    let min_update_every = cli
        .update_every
        .filter(|s| *s > 0)
        .map(|s| Duration::from_secs(s.unsigned_abs().into()));

    for discovery in &discoveries {
        let specs = discovery.discover(&modules);
        tracing::debug!(discovery = discovery.name(), jobs = specs.len(), "discovery finished");
        for spec in specs {
            if !cli.jobs.is_empty() && !cli.jobs.contains(&spec.name) {
                continue;
            }
            submit(&scheduler, apply_min_update_every(spec, min_update_every)).await;
        }
    }
    scheduler.startup_complete();

    wait_for_stop(cli.dump).await;

    scheduler.shutdown().await;
    let jobs = scheduler.jobs().await;
    if let Err(e) = sink.shutdown().await {
        tracing::warn!(error = %e, "sink already closed");
    }
    match tokio::task::spawn_blocking(move || writer.join()).await {
        Ok(Ok(())) => {}
        _ => tracing::error!("wire writer thread panicked"),
    }

    if cli.dump_summary {
        eprint!("{}", summary_table(&jobs));
    }
    tracing::info!(dropped_ticks = scheduler.dropped_ticks(), "shutdown complete");
    Ok(())
}

/// Modules from `--module`, or the enabled set from the plugin config.
fn select_modules(
    requested: &[String],
    app: &AppConfig,
    registry: &Registry,
) -> Result<Vec<String>, Box<dyn std::error::Error>> {
    if requested.is_empty() {
        return Ok(app.enabled_modules(registry));
    }
    if requested.iter().any(|m| m == "all") {
        return Ok(registry.names().map(str::to_string).collect());
    }
    for module in requested {
        if !registry.contains(module) {
            return Err(format!("unknown module '{module}'").into());
        }
    }
    Ok(requested.to_vec())
}

fn apply_min_update_every(spec: JobSpec, min: Option<Duration>) -> JobSpec {
    match min {
        Some(min) if spec.update_every < min => spec.with_update_every(min),
        _ => spec,
    }
}

async fn submit(scheduler: &SchedulerHandle, spec: JobSpec) {
    let name = spec.full_name();
    if let Err(e) = spec.validate() {
        tracing::error!(job = %name, source = %spec.source, error = %e, "invalid job");
        return;
    }
    if let Err(e) = scheduler.submit(spec).await {
        tracing::error!(job = %name, error = %e, "failed to submit job");
    }
}

/// Resolve on Ctrl+C, SIGTERM or when the dump timer expires.
async fn wait_for_stop(dump: Option<Duration>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let dump_timer = async {
        match dump {
            Some(d) => tokio::time::sleep(d).await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C signal"),
        _ = terminate => tracing::info!("received terminate signal"),
        _ = dump_timer => tracing::info!("dump time elapsed"),
    }
}
