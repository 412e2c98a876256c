use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// A discovered migration whose version sits below the highest applied
/// version but has never been applied itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingMigration {
    pub version: i64,
    pub name: String,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no next version found")]
    NoNextVersion,

    #[error("migration not found for current version {0}")]
    MigrationNotFound(i64),

    #[error("duplicate migration version {version}: {first} and {second}")]
    DuplicateVersion {
        version: i64,
        first: String,
        second: String,
    },

    #[error(
        "found {} missing migrations before current version {max_version}:\n\t{}",
        .missing.len(),
        join_missing(.missing)
    )]
    MissingMigrations {
        max_version: i64,
        missing: Vec<MissingMigration>,
    },

    #[error("migration {version} ({name}): {message}")]
    Migration {
        version: i64,
        name: String,
        message: String,
    },

    #[error("failed to read version table ({read}) and failed to create it ({create})")]
    Bootstrap { read: String, create: String },

    #[error("migration run cancelled")]
    Cancelled,

    #[error("migration run deadline exceeded")]
    DeadlineExceeded,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for the "nothing left to apply" sentinel.
    pub fn is_no_next_version(&self) -> bool {
        matches!(self, Error::NoNextVersion)
    }
}

fn join_missing(missing: &[MissingMigration]) -> String {
    missing
        .iter()
        .map(|m| format!("version {}: {}", m.version, m.name))
        .collect::<Vec<_>>()
        .join("\n\t")
}
