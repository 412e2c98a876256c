pub mod error;

pub use error::{Error, MissingMigration, Result};

/// History table used when no name is configured.
pub const DEFAULT_VERSION_TABLE: &str = "drover_db_version";
