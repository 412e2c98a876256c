mod commands;

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use drover_config::{ConfigLoader, MigrateConfig};
use drover_db::RunContext;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::commands::Command;

/// drover - versioned SQL schema migrations for SQLite
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file (.yml, .yaml or .toml)
    #[arg(short, long, env = "DROVER_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file
    #[arg(long)]
    database: Option<PathBuf>,

    /// Directory with migration files
    #[arg(long)]
    dir: Option<PathBuf>,

    /// Version history table name
    #[arg(long)]
    table: Option<String>,

    /// Apply migrations older than the current version instead of failing
    #[arg(long)]
    allow_missing: bool,

    /// Run migrations without reading or writing the version table
    #[arg(long)]
    no_versioning: bool,

    /// Abort the run after this many seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Log every statement and transaction boundary
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

impl Cli {
    /// Flags win over the config file and environment.
    fn apply_to(&self, mut config: MigrateConfig) -> MigrateConfig {
        if let Some(database) = &self.database {
            config.database = database.clone();
        }
        if let Some(dir) = &self.dir {
            config.dir = dir.clone();
        }
        if let Some(table) = &self.table {
            config.table = table.clone();
        }
        config.allow_missing |= self.allow_missing;
        config.no_versioning |= self.no_versioning;
        config
    }

    fn run_context(&self) -> RunContext {
        match self.timeout {
            Some(secs) => RunContext::with_timeout(Duration::from_secs(secs)),
            None => RunContext::background(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("drover: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "info,drover_db=debug"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = ConfigLoader::load_or_default(cli.config.as_deref())
        .context("failed to load configuration")?;
    let config = cli.apply_to(config);
    let ctx = cli.run_context();

    // Cancel at the next database round trip; an open migration
    // transaction is rolled back rather than left behind.
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling migration run");
            signal_ctx.cancel();
        }
    });

    let command = cli.command;
    tokio::task::spawn_blocking(move || commands::execute(&config, &ctx, &command))
        .await
        .context("migration task panicked")?
}
