use chrono::{DateTime, Utc};
use drover_common::{Error, Result};
use rusqlite::Connection;
use serde::Serialize;
use tracing::{info, warn};

use crate::compile::{MigrationCompiler, SqlCompiler};
use crate::context::RunContext;
use crate::migration::{Direction, Migration, Migrations};
use crate::planner::plan;
use crate::runner::Runner;
use crate::store::VersionStore;

/// Toggles shared by every entry point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrateOptions {
    /// Apply migrations below the highest applied version instead of
    /// refusing to run.
    pub allow_missing: bool,
    /// Run against the discovered set only, never touching the history table.
    pub no_versioning: bool,
}

/// What a successful run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationReport {
    /// Versions applied, in execution order.
    pub applied: Vec<i64>,
    /// Versions rolled back, in execution order.
    pub rolled_back: Vec<i64>,
    /// Database version after the run. For unversioned runs this is the
    /// last version executed against the discovered set.
    pub final_version: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum MigrationState {
    Applied { at: Option<DateTime<Utc>> },
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationStatus {
    pub version: i64,
    pub name: String,
    #[serde(flatten)]
    pub state: MigrationState,
}

/// Drives a database between versions of a discovered migration set.
///
/// Every call recomputes its plan from the history table; nothing is cached
/// between calls. The engine does not guard against two processes migrating
/// the same database at once; callers serialize runs themselves.
pub struct Migrator {
    migrations: Migrations,
    store: VersionStore,
    compiler: Box<dyn MigrationCompiler>,
    options: MigrateOptions,
}

impl Migrator {
    pub fn new(migrations: Migrations) -> Self {
        Self {
            migrations,
            store: VersionStore::default(),
            compiler: Box::new(SqlCompiler),
            options: MigrateOptions::default(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Result<Self> {
        self.store = VersionStore::new(table)?;
        Ok(self)
    }

    pub fn with_compiler(mut self, compiler: impl MigrationCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn with_options(mut self, options: MigrateOptions) -> Self {
        self.options = options;
        self
    }

    pub fn allow_missing(mut self, allow: bool) -> Self {
        self.options.allow_missing = allow;
        self
    }

    pub fn no_versioning(mut self, enabled: bool) -> Self {
        self.options.no_versioning = enabled;
        self
    }

    fn runner(&self) -> Runner<'_> {
        Runner {
            store: &self.store,
            compiler: &*self.compiler,
        }
    }

    /// Current database version. A history with no applied record reads as 0.
    pub fn version(&self, ctx: &RunContext, conn: &mut Connection) -> Result<i64> {
        match self.store.ensure_version(ctx, conn) {
            Err(Error::NoNextVersion) => Ok(0),
            other => other,
        }
    }

    /// Apply every pending migration.
    pub fn up(&self, ctx: &RunContext, conn: &mut Connection) -> Result<MigrationReport> {
        self.up_to(ctx, conn, i64::MAX)
    }

    /// Apply pending migrations up to and including `version`.
    pub fn up_to(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        version: i64,
    ) -> Result<MigrationReport> {
        self.run_up(ctx, conn, version, false)
    }

    /// Apply the next pending migration. Returns [`Error::NoNextVersion`]
    /// once nothing is left, so callers can loop until it appears.
    pub fn up_by_one(&self, ctx: &RunContext, conn: &mut Connection) -> Result<MigrationReport> {
        self.run_up(ctx, conn, i64::MAX, true)
    }

    fn run_up(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        bound: i64,
        by_one: bool,
    ) -> Result<MigrationReport> {
        if self.options.no_versioning {
            let Some(first) = self.migrations.first() else {
                return Ok(MigrationReport::default());
            };
            // unversioned up-by-one has no cursor, so it replays the first migration
            let bound = if by_one { first.version } else { bound };
            return self.up_unversioned(ctx, conn, bound);
        }

        let history = self.store.history(ctx, conn)?;
        let work = plan(&self.migrations, &history.applied_set(), bound)
            .into_work(self.options.allow_missing)?;

        let mut report = MigrationReport::default();
        for migration in &work {
            self.runner().run(ctx, conn, migration, Direction::Up)?;
            report.applied.push(migration.version);
            if by_one {
                break;
            }
        }

        report.final_version = self.version(ctx, conn)?;
        if report.applied.is_empty() {
            info!(
                "no migrations to run. current version: {}",
                report.final_version
            );
            if by_one {
                return Err(Error::NoNextVersion);
            }
        } else {
            info!(
                "successfully migrated database to version: {}",
                report.final_version
            );
        }
        Ok(report)
    }

    fn up_unversioned(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        bound: i64,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for migration in self.migrations.iter().take_while(|m| m.version <= bound) {
            self.runner()
                .run(ctx, conn, &migration.unversioned(), Direction::Up)?;
            report.applied.push(migration.version);
            report.final_version = migration.version;
        }
        info!("up to current file version: {}", report.final_version);
        Ok(report)
    }

    /// Roll back the migration at the current version.
    pub fn down(&self, ctx: &RunContext, conn: &mut Connection) -> Result<MigrationReport> {
        if self.options.no_versioning {
            let Some(last) = self.migrations.last() else {
                return Ok(MigrationReport::default());
            };
            return self.down_unversioned(ctx, conn, last.version - 1);
        }

        let current = self.version(ctx, conn)?;
        if current == 0 {
            info!("no migrations to run. current version: {current}");
            return Ok(MigrationReport::default());
        }
        let migration = self.current_migration(current)?;
        self.runner().run(ctx, conn, migration, Direction::Down)?;

        Ok(MigrationReport {
            applied: Vec::new(),
            rolled_back: vec![current],
            final_version: self.version(ctx, conn)?,
        })
    }

    /// Roll back migrations until the current version is at or below
    /// `version`. The current version is re-read before every step.
    pub fn down_to(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        version: i64,
    ) -> Result<MigrationReport> {
        if self.options.no_versioning {
            return self.down_unversioned(ctx, conn, version);
        }

        let mut report = MigrationReport::default();
        loop {
            let current = self.version(ctx, conn)?;
            if current == 0 || current <= version {
                info!("no migrations to run. current version: {current}");
                report.final_version = current;
                return Ok(report);
            }
            let migration = self.current_migration(current)?;
            self.runner().run(ctx, conn, migration, Direction::Down)?;
            report.rolled_back.push(current);
        }
    }

    fn down_unversioned(
        &self,
        ctx: &RunContext,
        conn: &mut Connection,
        version: i64,
    ) -> Result<MigrationReport> {
        let mut report = MigrationReport::default();
        for migration in self.migrations.iter().rev() {
            if migration.version <= version {
                report.final_version = migration.version;
                break;
            }
            self.runner()
                .run(ctx, conn, &migration.unversioned(), Direction::Down)?;
            report.rolled_back.push(migration.version);
        }
        info!("down to current file version: {}", report.final_version);
        Ok(report)
    }

    /// Roll back the current migration and apply it again.
    pub fn redo(&self, ctx: &RunContext, conn: &mut Connection) -> Result<MigrationReport> {
        let migration = if self.options.no_versioning {
            match self.migrations.last() {
                Some(last) => last.unversioned(),
                None => return Ok(MigrationReport::default()),
            }
        } else {
            let current = self.version(ctx, conn)?;
            if current == 0 {
                info!("no migrations to redo. current version: {current}");
                return Ok(MigrationReport::default());
            }
            self.current_migration(current)?.clone()
        };

        self.runner().run(ctx, conn, &migration, Direction::Down)?;
        self.runner().run(ctx, conn, &migration, Direction::Up)?;

        let final_version = if self.options.no_versioning {
            migration.version
        } else {
            self.version(ctx, conn)?
        };
        Ok(MigrationReport {
            applied: vec![migration.version],
            rolled_back: vec![migration.version],
            final_version,
        })
    }

    /// Roll back every applied migration.
    pub fn reset(&self, ctx: &RunContext, conn: &mut Connection) -> Result<MigrationReport> {
        self.down_to(ctx, conn, 0)
    }

    /// Applied/pending state of every discovered migration.
    pub fn status(&self, ctx: &RunContext, conn: &mut Connection) -> Result<Vec<MigrationStatus>> {
        if self.options.no_versioning {
            return Err(Error::Config(
                "status needs the version table and cannot run without versioning".into(),
            ));
        }
        let applied = self.store.history(ctx, conn)?.applied_versions();
        Ok(self
            .migrations
            .iter()
            .map(|m| MigrationStatus {
                version: m.version,
                name: m.name(),
                state: match applied.get(&m.version) {
                    Some(at) => MigrationState::Applied { at: *at },
                    None => MigrationState::Pending,
                },
            })
            .collect())
    }

    fn current_migration(&self, current: i64) -> Result<&Migration> {
        self.migrations.current(current).inspect_err(|e| {
            warn!("migration file not found for current version ({current}), error: {e}");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create(table: &str) -> String {
        format!("-- +drover Up\nCREATE TABLE {table} (id INTEGER);\n-- +drover Down\nDROP TABLE {table};\n")
    }

    fn abc() -> Migrations {
        Migrations::builder()
            .embedded(1, "create_a", create("a"))
            .embedded(2, "create_b", create("b"))
            .embedded(3, "create_c", create("c"))
            .build()
            .unwrap()
    }

    fn tables(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='table' AND name IN ('a','b','c') ORDER BY name",
            )
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<std::result::Result<Vec<String>, _>>()
            .unwrap()
    }

    fn history_len(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM drover_db_version", [], |row| row.get(0))
            .unwrap()
    }

    fn has_version_table(conn: &Connection) -> bool {
        conn.query_row(
            "SELECT count(*) FROM sqlite_master WHERE name = 'drover_db_version'",
            [],
            |row| row.get::<_, i64>(0),
        )
        .unwrap()
            > 0
    }

    fn count_rows(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |row| row.get(0))
            .unwrap()
    }

    /// Rolling back version 3 also drops the history record of version 2,
    /// the way a hand-written cleanup migration might.
    struct DropsHistoryOfTwo;

    impl MigrationCompiler for DropsHistoryOfTwo {
        fn compile(
            &self,
            migration: &Migration,
            direction: Direction,
        ) -> Result<crate::compile::CompiledMigration> {
            let mut compiled = SqlCompiler.compile(migration, direction)?;
            if migration.version == 3 && direction == Direction::Down {
                compiled
                    .statements
                    .push("DELETE FROM drover_db_version WHERE version_id = 2;".into());
            }
            Ok(compiled)
        }
    }

    #[test]
    fn up_to_then_down_to_zero() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc());

        let report = migrator.up_to(&ctx, &mut conn, 2).unwrap();
        assert_eq!(report.applied, vec![1, 2]);
        assert_eq!(report.final_version, 2);
        assert_eq!(tables(&conn), vec!["a", "b"]);

        let report = migrator.down_to(&ctx, &mut conn, 0).unwrap();
        assert_eq!(report.rolled_back, vec![2, 1]);
        assert_eq!(report.final_version, 0);
        assert!(tables(&conn).is_empty());
        assert_eq!(migrator.version(&ctx, &mut conn).unwrap(), 0);
    }

    #[test]
    fn second_up_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc());

        migrator.up(&ctx, &mut conn).unwrap();
        let rows = history_len(&conn);

        let report = migrator.up(&ctx, &mut conn).unwrap();
        assert!(report.applied.is_empty());
        assert_eq!(report.final_version, 3);
        assert_eq!(history_len(&conn), rows);
    }

    #[test]
    fn up_by_one_until_sentinel() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc());

        for expected in 1..=3 {
            let report = migrator.up_by_one(&ctx, &mut conn).unwrap();
            assert_eq!(report.applied, vec![expected]);
            assert_eq!(report.final_version, expected);
        }
        assert!(matches!(
            migrator.up_by_one(&ctx, &mut conn),
            Err(Error::NoNextVersion)
        ));
    }

    #[test]
    fn down_steps_back_one_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc());
        migrator.up(&ctx, &mut conn).unwrap();

        let report = migrator.down(&ctx, &mut conn).unwrap();
        assert_eq!(report.rolled_back, vec![3]);
        assert_eq!(report.final_version, 2);
        assert_eq!(tables(&conn), vec!["a", "b"]);
    }

    #[test]
    fn down_to_rereads_version_after_each_step() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc()).with_compiler(DropsHistoryOfTwo);
        migrator.up(&ctx, &mut conn).unwrap();

        let report = migrator.down_to(&ctx, &mut conn, 0).unwrap();
        assert_eq!(report.rolled_back, vec![3, 1]);
        assert_eq!(report.final_version, 0);
        // version 2 was never rolled back, only forgotten
        assert_eq!(tables(&conn), vec!["b"]);
    }

    #[test]
    fn down_at_version_zero_is_a_no_op() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let report = Migrator::new(abc()).down(&ctx, &mut conn).unwrap();
        assert_eq!(report, MigrationReport::default());
    }

    #[test]
    fn down_fails_when_current_version_is_not_on_disk() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        Migrator::new(abc()).up(&ctx, &mut conn).unwrap();

        let shorter = Migrations::builder()
            .embedded(1, "create_a", create("a"))
            .build()
            .unwrap();
        let migrator = Migrator::new(shorter);
        assert!(matches!(
            migrator.down(&ctx, &mut conn),
            Err(Error::MigrationNotFound(3))
        ));
        assert!(matches!(
            migrator.down_to(&ctx, &mut conn, 0),
            Err(Error::MigrationNotFound(3))
        ));
    }

    #[test]
    fn missing_migration_needs_opt_in() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let without_b = Migrations::builder()
            .embedded(1, "create_a", create("a"))
            .embedded(3, "create_c", create("c"))
            .build()
            .unwrap();
        Migrator::new(without_b).up(&ctx, &mut conn).unwrap();

        let err = Migrator::new(abc()).up(&ctx, &mut conn).unwrap_err();
        match err {
            Error::MissingMigrations { max_version, missing } => {
                assert_eq!(max_version, 3);
                assert_eq!(missing.len(), 1);
                assert_eq!(missing[0].version, 2);
                assert_eq!(missing[0].name, "create_b");
            }
            other => panic!("expected MissingMigrations, got {other:?}"),
        }

        let report = Migrator::new(abc())
            .allow_missing(true)
            .up(&ctx, &mut conn)
            .unwrap();
        assert_eq!(report.applied, vec![2]);
        assert_eq!(report.final_version, 3);
        assert_eq!(tables(&conn), vec!["a", "b", "c"]);
    }

    #[test]
    fn down_after_missing_apply_rolls_back_highest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let without_b = Migrations::builder()
            .embedded(1, "create_a", create("a"))
            .embedded(3, "create_c", create("c"))
            .build()
            .unwrap();
        Migrator::new(without_b).up(&ctx, &mut conn).unwrap();

        let migrator = Migrator::new(abc()).allow_missing(true);
        migrator.up(&ctx, &mut conn).unwrap();

        // version 2 was recorded last, but 3 is still the current version
        let report = migrator.down(&ctx, &mut conn).unwrap();
        assert_eq!(report.rolled_back, vec![3]);
        assert_eq!(report.final_version, 2);
        assert_eq!(tables(&conn), vec!["a", "b"]);

        let report = migrator.down(&ctx, &mut conn).unwrap();
        assert_eq!(report.rolled_back, vec![2]);
        assert_eq!(report.final_version, 1);
    }

    #[test]
    fn unversioned_runs_never_touch_history() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc()).no_versioning(true);

        let report = migrator.up(&ctx, &mut conn).unwrap();
        assert_eq!(report.applied, vec![1, 2, 3]);
        assert_eq!(report.final_version, 3);

        let report = migrator.down_to(&ctx, &mut conn, 0).unwrap();
        assert_eq!(report.rolled_back, vec![3, 2, 1]);
        assert_eq!(report.final_version, 0);

        // replay executes every forward body again
        let report = migrator.up(&ctx, &mut conn).unwrap();
        assert_eq!(report.applied, vec![1, 2, 3]);
        assert_eq!(tables(&conn), vec!["a", "b", "c"]);

        assert!(!has_version_table(&conn));
    }

    #[test]
    fn unversioned_up_by_one_replays_first_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrations = Migrations::builder()
            .embedded(
                1,
                "seed_a",
                "-- +drover Up\nCREATE TABLE IF NOT EXISTS a (id INTEGER);\nINSERT INTO a (id) VALUES (1);\n",
            )
            .embedded(2, "create_b", create("b"))
            .build()
            .unwrap();
        let migrator = Migrator::new(migrations).no_versioning(true);

        for _ in 0..2 {
            let report = migrator.up_by_one(&ctx, &mut conn).unwrap();
            assert_eq!(report.applied, vec![1]);
            assert_eq!(report.final_version, 1);
        }
        assert_eq!(count_rows(&conn, "a"), 2);
        assert_eq!(tables(&conn), vec!["a"]);
        assert!(!has_version_table(&conn));
    }

    #[test]
    fn unversioned_down_rolls_back_only_the_last_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc()).no_versioning(true);
        migrator.up(&ctx, &mut conn).unwrap();

        let report = migrator.down(&ctx, &mut conn).unwrap();
        assert_eq!(report.rolled_back, vec![3]);
        assert_eq!(report.final_version, 2);
        assert_eq!(tables(&conn), vec!["a", "b"]);
    }

    #[test]
    fn redo_reapplies_current_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc());
        migrator.up_to(&ctx, &mut conn, 2).unwrap();
        conn.execute("INSERT INTO b (id) VALUES (1)", []).unwrap();

        let report = migrator.redo(&ctx, &mut conn).unwrap();
        assert_eq!(report.rolled_back, vec![2]);
        assert_eq!(report.applied, vec![2]);
        assert_eq!(report.final_version, 2);
        assert_eq!(count_rows(&conn, "b"), 0);
    }

    #[test]
    fn unversioned_redo_reapplies_last_migration() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc()).no_versioning(true);
        migrator.up(&ctx, &mut conn).unwrap();
        conn.execute("INSERT INTO c (id) VALUES (1)", []).unwrap();

        let report = migrator.redo(&ctx, &mut conn).unwrap();
        assert_eq!(report.rolled_back, vec![3]);
        assert_eq!(report.applied, vec![3]);
        assert_eq!(report.final_version, 3);
        assert_eq!(count_rows(&conn, "c"), 0);
        assert_eq!(tables(&conn), vec!["a", "b", "c"]);
        assert!(!has_version_table(&conn));
    }

    #[test]
    fn status_marks_applied_and_pending() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        let migrator = Migrator::new(abc());
        migrator.up_to(&ctx, &mut conn, 1).unwrap();

        let status = migrator.status(&ctx, &mut conn).unwrap();
        assert_eq!(status.len(), 3);
        assert!(matches!(status[0].state, MigrationState::Applied { at: Some(_) }));
        assert_eq!(status[1].state, MigrationState::Pending);
        assert_eq!(status[2].name, "create_c");
    }

    #[test]
    fn cancelled_run_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        let ctx = RunContext::background();
        ctx.cancel();
        assert!(matches!(
            Migrator::new(abc()).up(&ctx, &mut conn),
            Err(Error::Cancelled)
        ));
        assert!(tables(&conn).is_empty());
    }
}
