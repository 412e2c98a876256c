use anyhow::{Context, Result};
use clap::Subcommand;
use drover_config::MigrateConfig;
use drover_db::{
    MigrateOptions, MigrationReport, MigrationState, MigrationStatus, Migrator, RunContext,
    collect_migrations, open_database,
};

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Apply all pending migrations
    Up,
    /// Apply pending migrations up to and including VERSION
    UpTo { version: i64 },
    /// Apply the next pending migration
    UpByOne,
    /// Roll back the migration at the current version
    Down,
    /// Roll back migrations until the current version is at or below VERSION
    DownTo { version: i64 },
    /// Roll back the current migration and apply it again
    Redo,
    /// Roll back every applied migration
    Reset,
    /// Show applied and pending migrations
    Status {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the current database version
    Version,
}

pub fn execute(config: &MigrateConfig, ctx: &RunContext, command: &Command) -> Result<()> {
    let migrations = collect_migrations(&config.dir, config.min_version, config.max_version)
        .context("failed to collect migrations")?;
    let migrator = Migrator::new(migrations)
        .with_table(config.table.clone())?
        .with_options(MigrateOptions {
            allow_missing: config.allow_missing,
            no_versioning: config.no_versioning,
        });
    let mut conn = open_database(&config.database)?;

    let report = match command {
        Command::Up => migrator.up(ctx, &mut conn)?,
        Command::UpTo { version } => migrator.up_to(ctx, &mut conn, *version)?,
        Command::UpByOne => migrator.up_by_one(ctx, &mut conn)?,
        Command::Down => migrator.down(ctx, &mut conn)?,
        Command::DownTo { version } => migrator.down_to(ctx, &mut conn, *version)?,
        Command::Redo => migrator.redo(ctx, &mut conn)?,
        Command::Reset => migrator.reset(ctx, &mut conn)?,
        Command::Status { json } => {
            let status = migrator.status(ctx, &mut conn)?;
            if *json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{}", format_status(&status));
            }
            return Ok(());
        }
        Command::Version => {
            println!("version {}", migrator.version(ctx, &mut conn)?);
            return Ok(());
        }
    };
    print_report(&report);
    Ok(())
}

fn print_report(report: &MigrationReport) {
    for version in &report.rolled_back {
        println!("rolled back {version}");
    }
    for version in &report.applied {
        println!("applied {version}");
    }
    println!("version {}", report.final_version);
}

fn format_status(status: &[MigrationStatus]) -> String {
    let mut out = String::new();
    out.push_str(&format!("    {:<24} Migration\n", "Applied At"));
    out.push_str(&format!("    {}\n", "=".repeat(48)));
    for entry in status {
        let applied = match entry.state {
            MigrationState::Applied { at: Some(at) } => {
                at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
            }
            MigrationState::Applied { at: None } => "applied".to_string(),
            MigrationState::Pending => "Pending".to_string(),
        };
        out.push_str(&format!("    {applied:<24} -- {}\n", entry.name));
    }
    out
}
