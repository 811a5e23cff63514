use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use logsift::conf::RunConfig;
use logsift::error::{ConfigError, ExitStatus, RunError};
use logsift::logging::init_logging;
use logsift::run::Pipeline;

#[derive(Parser, Debug)]
#[command(
    name = "logsift",
    version,
    about = "Ingest a log set, run the analysis plugins and record the run"
)]
struct Cli {
    /// Root directory of the log set
    #[arg(required_unless_present = "print_config")]
    log_set: Option<PathBuf>,

    /// Configuration file (toml, yaml or json)
    #[arg(long, short, env = "LOGSIFT_CONFIG")]
    config: Option<PathBuf>,

    /// Plugins to run, comma separated (default: all built-ins)
    #[arg(long, value_delimiter = ',')]
    plugins: Vec<String>,

    /// Also write plugin events as JSON lines into this directory
    #[arg(long)]
    output: Option<PathBuf>,

    /// SQLite database holding the run summary table
    #[arg(long)]
    summary_db: Option<PathBuf>,

    #[arg(long)]
    file_concurrency: Option<usize>,

    #[arg(long)]
    plugin_concurrency: Option<usize>,

    /// Write the run report as JSON to this file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

impl Cli {
    /// Command line flags override every configuration layer.
    fn apply(&self, config: &mut RunConfig) {
        if !self.plugins.is_empty() {
            config.plugins.enabled = self.plugins.clone();
        }
        if let Some(dir) = &self.output {
            config.writer.output_dir = Some(dir.clone());
        }
        if let Some(db) = &self.summary_db {
            config.summary.database = db.clone();
        }
        if let Some(n) = self.file_concurrency {
            config.ingest.file_concurrency = n;
        }
        if let Some(n) = self.plugin_concurrency {
            config.plugins.plugin_concurrency = n;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(status) => ExitCode::from(status.code()),
        Err(e) => {
            let status = e
                .downcast_ref::<RunError>()
                .map(RunError::exit_status)
                .or_else(|| e.downcast_ref::<ConfigError>().map(|_| ExitStatus::ConfigError))
                .unwrap_or(ExitStatus::PermanentFailure);
            error!(exit_status = status.as_str(), "{e:#}");
            eprintln!("logsift: {e:#}");
            ExitCode::from(status.code())
        }
    }
}

async fn run(cli: Cli) -> Result<ExitStatus> {
    let mut config = RunConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply(&mut config);
    config
        .validate()
        .context("Configuration validation failed")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(ExitStatus::Success);
    }

    init_logging(&config.logging);
    info!("Starting logsift v{}", env!("CARGO_PKG_VERSION"));

    let log_set = cli.log_set.context("LOG_SET is required")?;
    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let report = Pipeline::new(config).run(&log_set, &cancel).await?;

    if let Some(path) = &cli.report {
        let json = serde_json::to_vec_pretty(&report).context("Failed to serialize run report")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
    }

    Ok(report.exit_status())
}

/// Cancel the run on Ctrl+C or SIGTERM.
async fn cancel_on_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => warn!("Received Ctrl+C, cancelling run"),
        _ = terminate => warn!("Received SIGTERM, cancelling run"),
    }
    cancel.cancel();
}
