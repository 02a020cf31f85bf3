use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use feedwarden::admin::AdminServer;
use feedwarden::config::Config;
use feedwarden::fetcher::{
    Fetcher, JsonFeedSource, LogNotifier, Notifier, WebhookNotifier,
};
use feedwarden::script::{ConfigCompiler, ScriptCompiler};
use feedwarden::storage::{LocalStore, RemoteStore, StateDir, StatsAggregator, Store};

#[derive(Parser)]
#[command(
    name = "feedwarden",
    version,
    about = "Scheduled feed fetcher with a script-based config and an HTTP admin API",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults to FEEDWARDEN_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// State directory
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Read and write documents through another instance's admin API
    #[arg(long, global = true)]
    remote: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the admin API
    Serve {
        /// Bind address, overrides the configured one
        #[arg(short, long)]
        addr: Option<String>,
    },

    /// Fetch every declared feed once
    Run,

    /// List declared feeds and their state
    Feeds,

    /// Reenable a feed disabled after repeated failures
    Reenable {
        /// Feed URL
        url: String,
    },

    /// Print run statistics as CSV
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    if let Some(dir) = cli.state_dir {
        config.storage.state_dir = dir;
    }
    if let Some(remote) = cli.remote {
        config.storage.remote_url = Some(remote);
    }
    if let Commands::Serve { addr: Some(addr) } = &cli.command {
        config.admin.bind_address.clone_from(addr);
    }
    config.validate()?;

    // Initialize tracing/logging
    let format = cli.log_format.as_deref().unwrap_or(&config.logging.format);
    setup_tracing(format, &config.logging.level, cli.verbose)?;

    let compiler: Arc<dyn ConfigCompiler> = Arc::new(ScriptCompiler::new());

    match cli.command {
        Commands::Serve { .. } => {
            tracing::info!(addr = %config.admin.bind_address, "Starting serve command");
            serve(&config, compiler).await?;
        }

        Commands::Run => {
            tracing::info!(state_dir = %config.storage.state_dir.display(), "Starting run command");
            run(&config, compiler).await?;
        }

        Commands::Feeds => feeds(&config, compiler).await?,

        Commands::Reenable { url } => {
            tracing::info!(url = %url, "Starting reenable command");
            fetcher(&config, compiler)?.reenable(&url).await?;
            println!("Reenabled {url}");
        }

        Commands::Stats => {
            let dir = StateDir::new(&config.storage.state_dir);
            print!("{}", StatsAggregator::new(dir).export().await?);
        }
    }

    Ok(())
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("feedwarden=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("feedwarden={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
    }

    Ok(())
}

async fn serve(config: &Config, compiler: Arc<dyn ConfigCompiler>) -> Result<()> {
    let server = AdminServer::new(config.admin_config()?, compiler)?;
    println!("{}", server.info().display());

    server
        .start_with_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
        })
        .await?;
    Ok(())
}

/// Fetcher over the configured store. The lock and stats stay local.
fn fetcher(config: &Config, compiler: Arc<dyn ConfigCompiler>) -> Result<Fetcher> {
    let dir = StateDir::new(&config.storage.state_dir);
    dir.init()
        .with_context(|| format!("cannot initialize {}", dir.root().display()))?;

    let store: Arc<dyn Store> = match config.remote_config() {
        Some(remote) => {
            tracing::info!(remote = %remote.base_url, "Using remote store");
            Arc::new(RemoteStore::new(remote)?)
        }
        None => Arc::new(LocalStore::new(dir.clone(), compiler.clone())),
    };

    let notifier: Arc<dyn Notifier> = match config.webhook_config() {
        Some(webhook) => Arc::new(WebhookNotifier::new(webhook)?),
        None => Arc::new(LogNotifier),
    };

    let source = Arc::new(JsonFeedSource::new(
        config.request_timeout(),
        &config.fetcher.user_agent,
    )?);

    Ok(Fetcher::new(&dir, store, compiler, source, notifier).with_settings(config.fetcher_settings()))
}

async fn run(config: &Config, compiler: Arc<dyn ConfigCompiler>) -> Result<()> {
    let stats = fetcher(config, compiler)?.run().await?;

    println!("Run finished in {}", feedwarden::storage::stats::format_duration(stats.duration));
    println!("  Feeds: {}", stats.total_feeds);
    println!("  Success: {}", stats.success_feeds);
    println!("  Not modified: {}", stats.not_modified_feeds);
    println!("  Failed: {}", stats.failed_feeds);
    println!("  Disabled: {}", stats.disabled_feeds);
    println!("  Messages sent: {}/{}", stats.messages_sent, stats.messages_attempted);
    Ok(())
}

async fn feeds(config: &Config, compiler: Arc<dyn ConfigCompiler>) -> Result<()> {
    for feed in fetcher(config, compiler)?.list_feeds().await? {
        let status = match &feed.state {
            None => "new".to_string(),
            Some(state) if state.disabled => format!("disabled ({})", state.last_error),
            Some(state) if state.error_count > 0 => {
                format!("failing x{} ({})", state.error_count, state.last_error)
            }
            Some(state) => format!("ok, updated {}", state.last_updated.to_rfc3339()),
        };
        let title = if feed.title.is_empty() { "-" } else { feed.title.as_str() };
        println!("{}\t{}\t{}", feed.url, title, status);
    }
    Ok(())
}
