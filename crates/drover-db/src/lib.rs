pub mod collect;
pub mod compile;
pub mod context;
pub mod database;
pub mod history;
pub mod migration;
pub mod migrator;
pub mod planner;
mod runner;
pub mod store;

pub use collect::collect_migrations;
pub use compile::{CompiledMigration, MigrationCompiler, SqlCompiler, parse_sql_migration};
pub use context::RunContext;
pub use database::open_database;
pub use history::{HistoryLog, HistoryRecord};
pub use migration::{Direction, Migration, MigrationSource, Migrations, MigrationsBuilder};
pub use migrator::{MigrateOptions, MigrationReport, MigrationState, MigrationStatus, Migrator};
pub use planner::{Plan, plan};
pub use store::VersionStore;
