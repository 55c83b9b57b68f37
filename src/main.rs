mod config;
mod logging;

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use logbridge_k8s::{ForwarderSync, KubeConfigStore, load_worker_template};
use logbridge_logs::TailSession;
use logbridge_query::{build_matcher, build_query_request, parse_filter};
use logbridge_types::Position;

use crate::config::AppConfig;

/// Logbridge - filter query translation and log tailing for cluster log storage
#[derive(Parser, Debug)]
#[command(name = "logbridge")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML)
    #[arg(long, short, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the log store request for a filter query
    Compile {
        /// Filter query, e.g. `pod:web AND NOT container:sidecar`
        query: String,

        /// Maximum number of records (defaults to the configured limit)
        #[arg(long)]
        limit: Option<i64>,

        /// Record offset relative to the position
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        offset: i64,

        /// Read position: tail or head
        #[arg(long, default_value = "tail")]
        position: Position,
    },

    /// Print the regular expression used to tail a filter query
    Matcher {
        /// Filter query
        query: String,
    },

    /// Stream matching log lines as JSON envelopes until interrupted
    Tail {
        /// Filter query (empty shows recent history)
        query: Option<String>,

        /// Live log file (overrides the configured source)
        #[arg(long, value_name = "PATH")]
        source: Option<PathBuf>,
    },

    /// Sync cluster log forwarders into the log store forwarder config
    Sync {
        /// Run a single sync cycle and exit
        #[arg(long)]
        once: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AppConfig::load(args.config.as_deref())?;
    logging::init_tracing(&config.logging)?;

    let result = run(args.command, config).await;
    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }
    result
}

async fn run(command: Commands, config: AppConfig) -> Result<()> {
    match command {
        Commands::Compile {
            query,
            limit,
            offset,
            position,
        } => {
            let limit = limit.unwrap_or(config.query.default_limit);
            let request =
                build_query_request(query.trim(), &config.query.source, position, limit, offset);
            print_line(&serde_json::to_string_pretty(&request)?)
        }
        Commands::Matcher { query } => print_line(&build_matcher(&parse_filter(&query))),
        Commands::Tail { query, source } => {
            let mut tail_config = config.tail.to_tail_config();
            if let Some(source) = source {
                tail_config.source = source;
            }
            tail(tail_config, query.unwrap_or_default()).await
        }
        Commands::Sync { once } => sync(&config, once).await,
    }
}

async fn tail(tail_config: logbridge_logs::TailConfig, query: String) -> Result<()> {
    let filter = parse_filter(&query);
    let cancel = cancel_on_ctrl_c();
    let (tx, mut rx) = mpsc::channel(64);

    let session = TailSession::new(tail_config);
    let session_cancel = cancel.clone();
    let handle = tokio::spawn(async move { session.run(&filter, tx, session_cancel).await });

    while let Some(envelope) = rx.recv().await {
        let line = serde_json::to_string(&envelope)?;
        if print_line(&line).is_err() {
            // stdout is gone
            cancel.cancel();
            break;
        }
    }
    drop(rx);

    let exit = handle.await.context("Tail session panicked")??;
    info!(?exit, "Tail session finished");
    Ok(())
}

async fn sync(config: &AppConfig, once: bool) -> Result<()> {
    let settings = &config.sync;
    let store = KubeConfigStore::connect(settings.context()).await?;
    let template = load_worker_template(&settings.template_file).await?;
    let sync = ForwarderSync::new(
        store,
        settings.gravity.to_ref(),
        settings.logrange.to_ref(),
        template,
    )
    .with_key(settings.forwarder_key());

    if once {
        let workers = sync.sync_once().await?;
        info!(workers, "Forwarder sync complete");
        return Ok(());
    }

    info!(interval_secs = settings.interval_secs, "Starting forwarder sync");
    sync.run(settings.interval(), cancel_on_ctrl_c()).await;
    Ok(())
}

/// Token cancelled on the first Ctrl-C
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            token.cancel();
        }
    });
    cancel
}

fn print_line(line: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", line)?;
    stdout.flush()?;
    Ok(())
}
