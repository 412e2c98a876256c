use std::path::PathBuf;

use drover_common::DEFAULT_VERSION_TABLE;
use serde::{Deserialize, Serialize};

/// Settings for a migration run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrateConfig {
    /// SQLite database file.
    pub database: PathBuf,
    /// Directory holding `NNNNN_name.sql` migration files.
    pub dir: PathBuf,
    /// Name of the version history table.
    pub table: String,
    /// Apply migrations that sit below the highest applied version instead
    /// of refusing to run.
    pub allow_missing: bool,
    /// Run migrations without reading or writing the history table.
    pub no_versioning: bool,
    pub min_version: i64,
    pub max_version: i64,
}

impl Default for MigrateConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("drover.db"),
            dir: PathBuf::from("migrations"),
            table: DEFAULT_VERSION_TABLE.to_string(),
            allow_missing: false,
            no_versioning: false,
            min_version: 0,
            max_version: i64::MAX,
        }
    }
}
