//! Sumi-Swarm main entry point
//!
//! This is the command-line interface for the Sumi-Swarm master, its workers
//! and the tools that feed and inspect a crawl.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use sumi_swarm::config::{load_config_with_hash, Config};
use sumi_swarm::crawler::run_worker;
use sumi_swarm::master::{
    load_latest, print_checkpoint_summary, submit_seeds, submit_whitelist, Checkpoint,
    MasterCoordinator,
};
use sumi_swarm::transport::{SqliteTransport, Transport};
use tracing_subscriber::EnvFilter;

/// Sumi-Swarm: a distributed polite web crawler
///
/// One master partitions the crawl frontier across any number of workers.
/// Workers respect robots.txt and crawl delays, deduplicate stored content
/// and report discoveries back to the master.
#[derive(Parser, Debug)]
#[command(name = "sumi-swarm")]
#[command(version = "1.0.0")]
#[command(about = "A distributed polite web crawler", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose", global = true)]
    quiet: bool,

    /// Validate the configuration and show what would run, then exit
    #[arg(long, global = true)]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the master coordinator
    Master {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Resume the crawl started at this time (milliseconds since epoch)
        #[arg(long, value_name = "CRAWL_MILLIS")]
        resume: Option<i64>,
    },

    /// Run a worker
    Worker {
        /// Path to TOML configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// Submit seed URLs to a running crawl
    Submit {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[arg(value_name = "URL", required = true)]
        urls: Vec<String>,
    },

    /// Admit domains to a running crawl
    Whitelist {
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        #[arg(value_name = "DOMAIN", required = true)]
        domains: Vec<String>,
    },

    /// Show a summary of a checkpoint file and exit
    Stats {
        #[arg(value_name = "CHECKPOINT")]
        checkpoint: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    match cli.command {
        Command::Stats { checkpoint } => handle_stats(&checkpoint).await,
        Command::Master { config, resume } => {
            let config = load(&config)?;
            if cli.dry_run {
                return handle_dry_run(&config, "master");
            }
            handle_master(config, resume).await
        }
        Command::Worker { config } => {
            let config = load(&config)?;
            if cli.dry_run {
                return handle_dry_run(&config, "worker");
            }
            handle_worker(config).await
        }
        Command::Submit { config, urls } => {
            let config = load(&config)?;
            if cli.dry_run {
                return handle_dry_run(&config, "submit");
            }
            let transport = open_transport(&config)?;
            let batches =
                submit_seeds(transport.as_ref(), &urls, config.crawler.link_batch_size).await?;
            println!("✓ Submitted {} URLs in {} messages", urls.len(), batches);
            Ok(())
        }
        Command::Whitelist { config, domains } => {
            let config = load(&config)?;
            if cli.dry_run {
                return handle_dry_run(&config, "whitelist");
            }
            let transport = open_transport(&config)?;
            submit_whitelist(transport.as_ref(), &domains).await?;
            println!("✓ Submitted {} domains", domains.len());
            Ok(())
        }
    }
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        // Only show errors
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_swarm=info,warn"),
            1 => EnvFilter::new("sumi_swarm=debug,info"),
            2 => EnvFilter::new("sumi_swarm=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Loads and validates configuration, logging its hash
fn load(path: &Path) -> Result<Config, Box<dyn std::error::Error>> {
    tracing::info!("Loading configuration from: {}", path.display());
    match load_config_with_hash(path) {
        Ok((config, hash)) => {
            tracing::info!("Configuration loaded successfully (hash: {})", hash);
            Ok(config)
        }
        Err(e) => {
            tracing::error!("Failed to load configuration: {}", e);
            Err(e.into())
        }
    }
}

fn open_transport(config: &Config) -> Result<Arc<dyn Transport>, Box<dyn std::error::Error>> {
    let transport = SqliteTransport::new(
        Path::new(&config.transport.database_path),
        Duration::from_secs(config.transport.visibility_timeout_secs),
        config.transport.receive_batch_size,
    )?;
    Ok(Arc::new(transport))
}

/// Handles --dry-run: validates config and shows what the command would use
fn handle_dry_run(config: &Config, role: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Sumi-Swarm Dry Run ({}) ===\n", role);

    println!("Crawler Configuration:");
    println!("  Fetch tasks: {}", config.crawler.fetch_threads);
    println!("  Extraction tasks: {}", config.crawler.extract_threads);
    println!("  Idle backoff: {}ms", config.crawler.idle_backoff_ms);
    println!("  Max content size: {} bytes", config.crawler.max_content_bytes);
    println!("  Max redirects: {}", config.crawler.max_redirects);
    println!("  Request timeout: {}s", config.crawler.request_timeout_secs);

    println!("\nUser Agent:");
    println!("  {}", config.user_agent.header_value());

    println!("\nTransport:");
    println!("  Database: {}", config.transport.database_path);
    println!(
        "  Visibility timeout: {}s",
        config.transport.visibility_timeout_secs
    );
    println!("  Receive batch: {}", config.transport.receive_batch_size);

    println!("\nStore:");
    println!("  Database: {}", config.store.database_path);

    println!("\nMaster:");
    println!("  Mountpath: {}", config.master.mountpath);
    println!(
        "  Checkpoint every {}s, progress every {}s",
        config.master.checkpoint_interval_secs, config.master.progress_interval_secs
    );

    println!("\nWhitelisted Domains ({}):", config.whitelist.len());
    for entry in &config.whitelist {
        println!("  - {}", entry.domain);
    }

    println!("\n✓ Configuration is valid");
    Ok(())
}

/// Handles the stats command: summarizes a checkpoint file
async fn handle_stats(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("Checkpoint: {}\n", path.display());
    let checkpoint = Checkpoint::load(path).await?;
    print_checkpoint_summary(&checkpoint);
    Ok(())
}

/// Runs the master until Ctrl-C or a fatal transport failure
async fn handle_master(
    config: Config,
    resume: Option<i64>,
) -> Result<(), Box<dyn std::error::Error>> {
    let resume = match resume {
        Some(crawl_millis) => {
            let checkpoint = load_latest(Path::new(&config.master.mountpath), crawl_millis).await?;
            tracing::info!(
                generation = checkpoint.generation,
                saved_at = %checkpoint.saved_at,
                "Resuming crawl {}",
                crawl_millis
            );
            Some(checkpoint)
        }
        None => None,
    };

    let transport = open_transport(&config)?;
    let master = Arc::new(MasterCoordinator::bootstrap(config, transport, resume).await?);
    tracing::info!(
        "Crawl {} running with {} workers",
        master.crawl_time().timestamp_millis(),
        master.workers().len()
    );

    let shutdown = master.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupt received, shutting the crawl down");
            shutdown.cancel();
        }
    });

    match master.run().await {
        Ok(()) => {
            tracing::info!("Master stopped");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Master failed: {}", e);
            Err(e.into())
        }
    }
}

/// Runs a worker until the master shuts it down
async fn handle_worker(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let transport = open_transport(&config)?;
    match run_worker(config, transport).await {
        Ok(()) => {
            tracing::info!("Worker exited");
            Ok(())
        }
        Err(e) => {
            tracing::error!("Worker failed: {}", e);
            Err(e.into())
        }
    }
}
