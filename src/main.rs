use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use tokio::io::AsyncReadExt;
use tokio::signal;
use tracing::{info, warn};

use pacer::config::{IntervalAnchor, LogFormat, PacerConfig};
use pacer::runner::{parse_commands, run_batch, BatchResult, ShellRunner};
use pacer::telemetry;
use pacer::ThrottleRegistry;

/// Run shell commands from stdin one at a time, at most one per interval.
#[derive(Parser, Debug)]
#[command(name = "pacer", version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file
    #[arg(short, long, env = "PACER_CONFIG")]
    config: Option<PathBuf>,

    /// Lane to run on (defaults to the configured default lane)
    #[arg(short, long)]
    lane: Option<String>,

    /// Override the lane's minimum interval between command starts
    #[arg(long)]
    min_interval_ms: Option<u64>,

    /// Override which instant the interval is measured from
    #[arg(long, value_enum)]
    anchor: Option<AnchorArg>,

    /// Override the log format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,

    /// Print each result as a JSON line
    #[arg(long)]
    json: bool,

    /// Print lane statistics as JSON when done
    #[arg(long)]
    stats: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum AnchorArg {
    Completion,
    Start,
}

impl From<AnchorArg> for IntervalAnchor {
    fn from(arg: AnchorArg) -> Self {
        match arg {
            AnchorArg::Completion => IntervalAnchor::Completion,
            AnchorArg::Start => IntervalAnchor::Start,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogFormatArg {
    Pretty,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Pretty => LogFormat::Pretty,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    let mut config =
        PacerConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(format) = cli.log_format {
        config.logging.format = format.into();
    }
    telemetry::init_tracing(&config.logging)?;

    info!("Starting pacer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let registry = ThrottleRegistry::from_config(&config)?;
    let lane = cli
        .lane
        .clone()
        .unwrap_or_else(|| registry.default_lane_name().to_string());
    let mut throttle = registry.lane(&lane)?;

    if cli.min_interval_ms.is_some() || cli.anchor.is_some() {
        let mut lane_config = throttle.config();
        if let Some(ms) = cli.min_interval_ms {
            lane_config.min_interval_ms = ms;
        }
        if let Some(anchor) = cli.anchor {
            lane_config.anchor = anchor.into();
        }
        throttle = registry.insert(&lane, lane_config)?;
    }

    let mut input = String::new();
    tokio::io::stdin()
        .read_to_string(&mut input)
        .await
        .context("failed to read commands from stdin")?;

    let commands = parse_commands(&input);
    if commands.is_empty() {
        info!("No commands to run");
        return Ok(ExitCode::SUCCESS);
    }

    info!(
        lane = %lane,
        commands = commands.len(),
        min_interval_ms = throttle.config().min_interval_ms,
        anchor = ?throttle.config().anchor,
        "Running commands"
    );

    let json = cli.json;
    let mut failures = 0usize;
    let batch = run_batch(
        &throttle,
        Arc::new(ShellRunner::default()),
        commands,
        |result| {
            if !result.success {
                failures += 1;
            }
            print_result(result, json);
        },
    );

    let finished = tokio::select! {
        _ = batch => true,
        _ = shutdown_signal() => false,
    };

    if cli.stats {
        println!("{}", serde_json::to_string_pretty(&registry.stats())?);
    }

    if !finished {
        warn!("Interrupted before all commands ran");
        return Ok(ExitCode::from(130));
    }

    info!(failures = failures, "pacer finished");
    Ok(if failures == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn print_result(result: &BatchResult, json: bool) {
    if !json {
        println!("{}", result.render());
        return;
    }

    match serde_json::to_string(result) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, index = result.index, "Failed to serialize result"),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping");
        }
        _ = terminate => {
            info!("Received SIGTERM, stopping");
        }
    }
}
