use drover_common::{DEFAULT_VERSION_TABLE, Error, Result};
use rusqlite::{Connection, params};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::history::{HistoryLog, HistoryRecord};

/// Reads and writes the version history table.
///
/// Every write takes a `&Connection`, so callers pass either the bare
/// connection or an open `rusqlite::Transaction` (which derefs to one).
#[derive(Debug, Clone)]
pub struct VersionStore {
    table: String,
}

impl Default for VersionStore {
    fn default() -> Self {
        Self {
            table: DEFAULT_VERSION_TABLE.to_string(),
        }
    }
}

impl VersionStore {
    pub fn new(table: impl Into<String>) -> Result<Self> {
        let table = table.into();
        validate_table_name(&table)?;
        Ok(Self { table })
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn create_table(&self, conn: &Connection) -> Result<()> {
        conn.execute_batch(&format!(
            "CREATE TABLE {} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version_id INTEGER NOT NULL,
                is_applied INTEGER NOT NULL,
                tstamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );",
            self.table
        ))
        .map_err(|e| Error::Database(format!("failed to create version table: {e}")))
    }

    pub fn insert_version(&self, conn: &Connection, version: i64) -> Result<()> {
        conn.execute(
            &format!(
                "INSERT INTO {} (version_id, is_applied) VALUES (?1, ?2)",
                self.table
            ),
            params![version, true],
        )
        .map_err(|e| Error::Database(format!("failed to insert version {version}: {e}")))?;
        Ok(())
    }

    pub fn delete_version(&self, conn: &Connection, version: i64) -> Result<()> {
        conn.execute(
            &format!("DELETE FROM {} WHERE version_id = ?1", self.table),
            params![version],
        )
        .map_err(|e| Error::Database(format!("failed to delete version {version}: {e}")))?;
        Ok(())
    }

    /// All history rows, newest first.
    pub fn list_records(&self, conn: &Connection) -> Result<Vec<HistoryRecord>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT id, version_id, is_applied, tstamp FROM {} ORDER BY id DESC",
                self.table
            ))
            .map_err(|e| Error::Database(format!("failed to prepare history query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok(HistoryRecord {
                    id: row.get(0)?,
                    version_id: row.get(1)?,
                    is_applied: row.get(2)?,
                    tstamp: row.get::<_, Option<String>>(3)?.and_then(parse_tstamp),
                })
            })
            .map_err(|e| Error::Database(format!("failed to query history: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read history row: {e}")))
    }

    /// Resolve the current version, creating and seeding the table when it
    /// cannot be read.
    ///
    /// A freshly created table reports version 0. An existing table whose
    /// every version is rolled back yields [`Error::NoNextVersion`].
    pub fn ensure_version(&self, ctx: &RunContext, conn: &mut Connection) -> Result<i64> {
        ctx.check()?;
        match self.list_records(conn) {
            Ok(records) => HistoryLog::new(records).current_version(),
            Err(read) => {
                debug!("version table {} unreadable: {read}", self.table);
                match self.initialize(ctx, conn) {
                    Ok(()) => Ok(0),
                    Err(e @ (Error::Cancelled | Error::DeadlineExceeded)) => Err(e),
                    Err(create) => Err(Error::Bootstrap {
                        read: read.to_string(),
                        create: create.to_string(),
                    }),
                }
            }
        }
    }

    /// Load the history log, bootstrapping the table first if needed.
    pub fn history(&self, ctx: &RunContext, conn: &mut Connection) -> Result<HistoryLog> {
        match self.ensure_version(ctx, conn) {
            Ok(_) | Err(Error::NoNextVersion) => {}
            Err(e) => return Err(e),
        }
        ctx.check()?;
        Ok(HistoryLog::new(self.list_records(conn)?))
    }

    /// Create the table and its version-0 record in one transaction.
    fn initialize(&self, ctx: &RunContext, conn: &mut Connection) -> Result<()> {
        ctx.check()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to begin transaction: {e}")))?;
        self.create_table(&tx)?;
        self.insert_version(&tx, 0)?;
        ctx.check()?;
        tx.commit()
            .map_err(|e| Error::Database(format!("failed to commit version table: {e}")))?;
        info!("created version table {}", self.table);
        Ok(())
    }
}

/// Table names are interpolated into SQL, so only plain identifiers pass.
pub fn validate_table_name(table: &str) -> Result<()> {
    let mut chars = table.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!("invalid version table name: {table:?}")))
    }
}

fn parse_tstamp(s: String) -> Option<chrono::DateTime<chrono::Utc>> {
    // CURRENT_TIMESTAMP produces "YYYY-MM-DD HH:MM:SS"
    chrono::NaiveDateTime::parse_from_str(&s, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .or_else(|_| chrono::DateTime::parse_from_rfc3339(&s).map(|dt| dt.to_utc()))
        .ok()
}
