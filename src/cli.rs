use crate::{
    code_source_for, ensure_logged_in, format_duration, BatchProcessor, BrowserSession, Config,
    ContentResolver, OutcomeRecord, ProgressTracker,
};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "media-resolver")]
#[command(about = "Resolve social media links into direct media URLs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(long, help = "Maximum links resolved at the same time")]
    pub concurrency: Option<usize>,

    #[arg(long, help = "Per-link timeout in seconds")]
    pub timeout: Option<u64>,

    #[arg(long, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, help = "Chrome executable path")]
    pub chrome_path: Option<String>,

    #[arg(long, help = "Show the browser window")]
    pub headful: bool,

    #[arg(long, help = "Browser profile directory, reused between runs")]
    pub user_data_dir: Option<PathBuf>,

    #[arg(long, help = "Serve Prometheus metrics on this port")]
    pub metrics_port: Option<u16>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve links from a file and/or the command line
    Resolve {
        #[arg(short, long, help = "Input file containing links (one per line)")]
        input: Option<PathBuf>,

        #[arg(short, long, help = "Write JSON lines here instead of stdout")]
        output: Option<PathBuf>,

        #[arg(long, help = "Progress reporting interval in seconds")]
        progress_interval: Option<u64>,

        #[arg(help = "Links to resolve")]
        links: Vec<String>,
    },

    /// Validate configuration
    Validate {
        #[arg(short, long, help = "Configuration file to validate")]
        config: PathBuf,
    },
}

impl Cli {
    /// Applies command-line overrides on top of a loaded configuration.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(timeout) = self.timeout {
            config.link_timeout = std::time::Duration::from_secs(timeout);
        }
        if let Some(chrome_path) = &self.chrome_path {
            config.browser.chrome_path = Some(chrome_path.clone());
        }
        if self.headful {
            config.browser.headless = false;
        }
        if let Some(dir) = &self.user_data_dir {
            config.browser.user_data_dir = Some(dir.clone());
        }
        if let Some(port) = self.metrics_port {
            config.metrics_port = Some(port);
        }
    }
}

pub struct CliRunner {
    pub config: Config,
    pub session: Arc<BrowserSession>,
}

impl CliRunner {
    /// Launches the browser and logs in. Failures here abort the run.
    pub async fn start(config: Config) -> Result<Self> {
        let session = Arc::new(
            BrowserSession::launch(&config)
                .await
                .context("Failed to launch browser")?,
        );

        let codes = code_source_for(config.credentials.as_ref());
        if let Err(e) = ensure_logged_in(&session, &config, codes.as_ref()).await {
            session.shutdown().await;
            return Err(e).context("Login failed");
        }

        Ok(Self { config, session })
    }

    pub async fn run(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Resolve {
                input,
                output,
                progress_interval,
                links,
            } => {
                let links = collect_links(input.as_deref(), links).await?;
                self.run_resolve(links, output, progress_interval).await
            }
            Commands::Validate { config } => validate_config_file(&config).await,
        }
    }

    pub async fn run_resolve(
        &self,
        links: Vec<String>,
        output: Option<PathBuf>,
        progress_interval: Option<u64>,
    ) -> Result<()> {
        let resolver = ContentResolver::new(self.session.clone(), &self.config);
        let processor = BatchProcessor::new(resolver, self.config.concurrency);

        let mut writer: Box<dyn AsyncWrite + Unpin + Send> = match &output {
            Some(path) => Box::new(
                fs::File::create(path)
                    .await
                    .with_context(|| format!("Failed to create {}", path.display()))?,
            ),
            None => Box::new(tokio::io::stdout()),
        };

        let tracker = Arc::new(ProgressTracker::new(links.len()));

        if let Some(interval) = progress_interval {
            let tracker = tracker.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval.max(1)));

                while !tracker.is_complete() {
                    interval.tick().await;
                    let progress = tracker.get_progress();

                    info!(
                        "Progress: {}/{} - Resolved: {}, Errors: {}, Rate: {:.1}/s, ETA: {}",
                        progress.completed,
                        progress.total,
                        progress.success,
                        progress.errors,
                        progress.rate,
                        progress.eta.map(format_duration).unwrap_or_else(|| "-".to_string())
                    );
                }
            });
        }

        let mut outcomes = std::pin::pin!(processor.process_links(links, &tracker));
        while let Some(outcome) = outcomes.next().await {
            let record = OutcomeRecord::new(processor.batch_id(), outcome);
            let mut line = serde_json::to_string(&record)?;
            line.push('\n');
            writer.write_all(line.as_bytes()).await?;
        }
        writer.flush().await?;

        let progress = tracker.get_progress();
        info!(
            "Batch completed in {}. Resolved: {}, Errors: {}",
            format_duration(progress.elapsed),
            progress.success,
            progress.errors
        );
        if let Some(path) = output {
            info!("Results written to {}", path.display());
        }

        Ok(())
    }

    pub async fn shutdown(&self) {
        self.session.shutdown().await;
    }
}

/// Input file links first, then command-line links.
pub async fn collect_links(input: Option<&Path>, extra: Vec<String>) -> Result<Vec<String>> {
    let mut links = match input {
        Some(path) => read_links_from_file(path).await?,
        None => Vec::new(),
    };
    links.extend(extra.into_iter().filter(|link| !link.trim().is_empty()));

    if links.is_empty() {
        bail!("No links given; pass --input or links on the command line");
    }

    Ok(links)
}

pub async fn read_links_from_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(parse_links(&content))
}

/// One link per line; blank lines and `#` comments are skipped.
pub fn parse_links(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| line.to_string())
        .collect()
}

pub async fn validate_config_file(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());

    let config_content = fs::read_to_string(config_path).await?;
    let config: Config = serde_json::from_str(&config_content)?;
    config.validate()?;

    println!("Configuration is valid:");
    println!("  Concurrency: {}", config.concurrency);
    println!("  Link timeout: {:?}", config.link_timeout);
    println!("  Site: {}", config.site.domain);
    println!("  Headless: {}", config.browser.headless);
    if config.credentials.is_none() {
        warn!("No credentials in file; they will be read from the environment");
    }

    Ok(())
}

pub fn setup_logging(verbose: bool) -> Result<()> {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // Logs go to stderr so stdout carries only results.
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}
