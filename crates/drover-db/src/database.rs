use std::path::Path;

use drover_common::{Error, Result};
use rusqlite::Connection;
use tracing::info;

/// Open (or create) the SQLite database a migration run targets.
pub fn open_database(db_path: &Path) -> Result<Connection> {
    info!("opening database at {}", db_path.display());
    let conn = Connection::open(db_path)
        .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
        .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;
    Ok(conn)
}
