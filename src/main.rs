use anyhow::{Context, Result};
use clap::Parser;
use media_resolver::{
    install_prometheus_exporter, setup_logging, validate_config_file, Cli, CliRunner, Commands,
    Config,
};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    setup_logging(args.verbose)?;

    info!("Starting media-resolver v{}", env!("CARGO_PKG_VERSION"));

    if let Commands::Validate { config } = &args.command {
        return validate_config_file(config).await;
    }

    let config = load_config(&args).await?;
    if let Some(port) = config.metrics_port {
        install_prometheus_exporter(port)?;
    }
    let runner = CliRunner::start(config).await?;

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel(1);
    let _shutdown_handler = setup_shutdown_handler(shutdown_tx.clone());

    let result = tokio::select! {
        result = runner.run(args.command) => {
            info!("Application completed");
            result
        }
        _ = shutdown_rx.recv() => {
            info!("Received shutdown signal");
            Ok(())
        }
    };

    info!("Shutting down...");
    runner.shutdown().await;

    if let Err(e) = result {
        error!("Application error: {:#}", e);
        std::process::exit(1);
    }

    info!("media-resolver stopped");
    Ok(())
}

async fn load_config(args: &Cli) -> Result<Config> {
    let mut config = if let Some(config_path) = &args.config {
        let config_content = tokio::fs::read_to_string(config_path)
            .await
            .with_context(|| format!("Failed to read {}", config_path.display()))?;
        serde_json::from_str(&config_content)
            .with_context(|| format!("Invalid configuration in {}", config_path.display()))?
    } else {
        Config::default()
    };

    args.apply_overrides(&mut config);
    let config = config.with_env_credentials();
    config.validate()?;

    info!("Configuration loaded successfully");
    info!("Concurrency: {}", config.concurrency);
    info!("Link timeout: {:?}", config.link_timeout);
    info!("Site: {}", config.site.domain);

    Ok(config)
}

fn setup_shutdown_handler(
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let (mut sigint, mut sigterm) = match (
            signal::unix::signal(signal::unix::SignalKind::interrupt()),
            signal::unix::signal(signal::unix::SignalKind::terminate()),
        ) {
            (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
        }

        let _ = shutdown_tx.send(());
    })
}
