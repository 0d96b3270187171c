//! The `sidekick` binary: resolves settings, sizes the topology, builds the
//! runtime, and hands control to the service supervisor for the rest of the
//! process lifetime.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use sidekick_core::{CrashMarker, EnvSettingsProvider, Settings, SettingsProvider, Topology};
use sidekick_server::config::ServiceConfig;
use sidekick_server::crash_guard::CrashGuard;
use sidekick_server::dispatch::AckDispatcher;
use sidekick_server::limits::{self, RuntimeLimits};
use sidekick_server::plugins::{DirectoryPluginRuntime, PluginRuntime};
use sidekick_server::supervisor::{HookEffects, ServiceSupervisor, TickerEntry};
use sidekick_server::telemetry::{self, LogSink, MetricAggregator};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const MEMORY_TICKER_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(
    name = "sidekick",
    version,
    about = "Supervised sidecar daemon for a query-assist service"
)]
struct Cli {
    /// Path to the JSON settings file.
    #[arg(long, env = "SIDEKICK_SETTINGS")]
    settings: Option<PathBuf>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        // Fatal failures end up here: report to the error stream, exit
        // non-zero, no retry.
        Err(err) => {
            error!(error = %err, "sidekick failed");
            eprintln!("sidekick: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let provider = EnvSettingsProvider {
        settings_file: cli.settings,
    };
    let settings = provider.load()?;

    // Attached plugin workers inherit the resolved plugin directory.
    if let Some(plugin_dir) = &settings.plugin_dir {
        std::env::set_var("PLUGIN_DIR", plugin_dir);
    }

    let topology = Topology::detect(settings.thread_count_override);
    info!(
        reactors = topology.reactor_threads,
        workers = topology.worker_processes,
        "topology sized"
    );

    let config = ServiceConfig::from_settings(&settings, topology);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(topology.reactor_threads)
        .max_blocking_threads(topology.worker_processes)
        .thread_name("sidekick-reactor")
        .enable_all()
        .build()?;

    runtime.block_on(serve(settings, config))
}

async fn serve(settings: Settings, config: ServiceConfig) -> anyhow::Result<()> {
    let mut supervisor = ServiceSupervisor::new(config.clone())?;
    let (metrics, metrics_process) = MetricAggregator::spawn(LogSink);
    let marker = CrashMarker::new(&settings.data_dir);

    // Pre-start hooks, in dependency order: the crash check first, the
    // limits before anything allocation-sensitive, plugin and metric
    // workers last.
    let guard = CrashGuard::new(marker.clone(), metrics.clone());
    supervisor.register_hook("crash-guard", move || {
        guard.check_and_arm();
        Ok(HookEffects::default())
    });

    let runtime_limits = RuntimeLimits::new(settings.memory_ceiling_bytes, config.max_request_size);
    supervisor.register_hook("runtime-limits", move || {
        limits::apply(runtime_limits);
        Ok(HookEffects::default())
    });

    let plugin_dir = settings.plugin_dir.clone();
    supervisor.register_hook("plugin-workers", move || {
        let Some(dir) = plugin_dir else {
            return Ok(HookEffects::default());
        };
        let runtime = DirectoryPluginRuntime::new(dir);
        let mut processes = Vec::new();
        let tickers = runtime.discover_and_start(&mut |process| processes.push(process))?;
        Ok(HookEffects { processes, tickers })
    });

    supervisor.register_hook("metric-worker", move || {
        Ok(HookEffects {
            processes: vec![metrics_process],
            ..HookEffects::default()
        })
    });

    supervisor.bind_request_handler(Arc::new(AckDispatcher));

    supervisor.register_ticker(TickerEntry::from_sync(
        "memory-usage",
        MEMORY_TICKER_PERIOD,
        telemetry::log_memory_usage,
    ));

    // Startup-time decision: with telemetry disabled, no snapshot ticker
    // exists at all.
    if settings.telemetry_enabled {
        let snapshot_metrics = metrics.clone();
        supervisor.register_ticker(TickerEntry::from_sync(
            "telemetry-snapshot",
            Duration::from_secs(settings.telemetry_period_secs),
            move || snapshot_metrics.request_snapshot(),
        ));
    }

    supervisor.start(shutdown_signal()).await?;

    if let Err(err) = marker.disarm() {
        warn!(error = %err, "failed to disarm crash marker");
    }
    info!("clean shutdown");
    Ok(())
}

/// Resolves on Ctrl-C or, on Unix, SIGTERM.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        Err(err) => {
            warn!(error = %err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
    info!("shutdown signal received");
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }
}
