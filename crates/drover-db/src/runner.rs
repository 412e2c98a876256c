use std::time::{Duration, Instant};

use drover_common::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::compile::{MigrationCompiler, one_line};
use crate::context::RunContext;
use crate::migration::{Direction, Migration};
use crate::store::VersionStore;

/// Executes a single migration in one direction and records the outcome in
/// the history table.
pub(crate) struct Runner<'a> {
    pub store: &'a VersionStore,
    pub compiler: &'a dyn MigrationCompiler,
}

impl Runner<'_> {
    pub fn run(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        migration: &Migration,
        direction: Direction,
    ) -> Result<()> {
        let compiled = self
            .compiler
            .compile(migration, direction)
            .map_err(|e| {
                migration_error(migration, format!("failed to parse SQL migration: {e}"))
            })?;

        let start = Instant::now();
        if compiled.use_tx {
            self.run_in_transaction(ctx, conn, migration, direction, &compiled.statements)?;
        } else {
            self.run_without_transaction(ctx, conn, migration, direction, &compiled.statements)?;
        }
        let elapsed = truncate_duration(start.elapsed());

        if compiled.statements.is_empty() {
            info!("EMPTY {} ({elapsed:?})", migration.name());
        } else {
            info!("OK   {} ({elapsed:?})", migration.name());
        }
        Ok(())
    }

    fn run_in_transaction(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        migration: &Migration,
        direction: Direction,
        statements: &[String],
    ) -> Result<()> {
        ctx.check()?;
        debug!("begin transaction");
        let tx = conn.transaction().map_err(|e| {
            migration_error(migration, format!("failed to begin transaction: {e}"))
        })?;

        let outcome = execute(ctx, &tx, migration, statements)
            .and_then(|()| ctx.check())
            .and_then(|()| self.record(&tx, migration, direction))
            .and_then(|()| ctx.check());
        if let Err(e) = outcome {
            debug!("rollback transaction");
            if let Err(rollback) = tx.rollback() {
                warn!("rollback of {} failed: {rollback}", migration.name());
            }
            return Err(e);
        }

        debug!("commit transaction");
        tx.commit().map_err(|e| {
            migration_error(migration, format!("failed to commit transaction: {e}"))
        })
    }

    fn run_without_transaction(
        &self,
        ctx: &RunContext,
        conn: &Connection,
        migration: &Migration,
        direction: Direction,
        statements: &[String],
    ) -> Result<()> {
        execute(ctx, conn, migration, statements)?;
        // The statements are committed; the history write must follow them.
        self.record(conn, migration, direction)
    }

    /// Insert (up) or delete (down) the version's history record. Skipped
    /// for unversioned runs.
    fn record(&self, conn: &Connection, migration: &Migration, direction: Direction) -> Result<()> {
        if migration.no_versioning() {
            return Ok(());
        }
        let written = match direction {
            Direction::Up => self.store.insert_version(conn, migration.version),
            Direction::Down => self.store.delete_version(conn, migration.version),
        };
        written.map_err(|e| {
            migration_error(migration, format!("failed to record {direction} version: {e}"))
        })
    }
}

fn execute(
    ctx: &RunContext,
    conn: &Connection,
    migration: &Migration,
    statements: &[String],
) -> Result<()> {
    for statement in statements {
        ctx.check()?;
        debug!("executing statement: {}", one_line(statement));
        conn.execute_batch(statement).map_err(|e| {
            migration_error(
                migration,
                format!("failed to execute SQL query {:?}: {e}", one_line(statement)),
            )
        })?;
    }
    Ok(())
}

fn migration_error(migration: &Migration, message: String) -> Error {
    Error::Migration {
        version: migration.version,
        name: migration.name(),
        message,
    }
}

/// Drop precision that only adds noise to log output.
fn truncate_duration(d: Duration) -> Duration {
    let unit = if d >= Duration::from_secs(1) {
        Duration::from_millis(10)
    } else if d >= Duration::from_millis(1) {
        Duration::from_micros(10)
    } else {
        Duration::from_micros(1)
    };
    let unit_nanos = unit.as_nanos();
    Duration::from_nanos(((d.as_nanos() / unit_nanos) * unit_nanos) as u64)
}
