use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use medtrack_e2e::cli::Cli;
use medtrack_e2e::config::{E2eConfig, LogFormat, LoggingConfig};

/// Text subscriber for what gets logged while argv and the config file are read.
fn bootstrap_subscriber() -> impl tracing::Subscriber + Send + Sync {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).finish()
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let (cli, mut config) =
        tracing::subscriber::with_default(bootstrap_subscriber(), || -> Result<(Cli, E2eConfig)> {
            let cli = Cli::parse_lenient();
            let config = E2eConfig::resolve(cli.config.as_deref())?;
            Ok((cli, config))
        })?;
    config.apply_overrides(&cli.overrides());
    init_tracing(&config.logging);

    tracing::info!(
        services = config.services.len(),
        interval_minutes = config.schedule.interval_minutes,
        max_runs = ?config.schedule.max_runs,
        "starting medtrack-e2e"
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown requested");
            on_signal.cancel();
        }
    });

    let report = medtrack_e2e::run(config, cancel).await?;
    if report.gate_failed {
        tracing::warn!("services never became healthy, no tests were run");
    }
    Ok(())
}
