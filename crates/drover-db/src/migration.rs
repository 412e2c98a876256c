use std::fmt;
use std::path::{Path, PathBuf};

use drover_common::{Error, Result};
use serde::Serialize;

/// Which way a migration runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn is_up(self) -> bool {
        matches!(self, Direction::Up)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("up"),
            Direction::Down => f.write_str("down"),
        }
    }
}

/// Where a migration's SQL body comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationSource {
    File(PathBuf),
    /// SQL compiled into the binary and registered through the builder.
    Embedded { name: String, body: String },
}

/// A discovered unit of schema change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    pub version: i64,
    pub source: MigrationSource,
    no_versioning: bool,
}

impl Migration {
    pub fn file(version: i64, path: impl Into<PathBuf>) -> Self {
        Self {
            version,
            source: MigrationSource::File(path.into()),
            no_versioning: false,
        }
    }

    pub fn embedded(version: i64, name: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            version,
            source: MigrationSource::Embedded {
                name: name.into(),
                body: body.into(),
            },
            no_versioning: false,
        }
    }

    /// Identifier used in logs and error messages.
    pub fn name(&self) -> String {
        match &self.source {
            MigrationSource::File(path) => path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
            MigrationSource::Embedded { name, .. } => name.clone(),
        }
    }

    /// Whether this run should skip the history table.
    pub fn no_versioning(&self) -> bool {
        self.no_versioning
    }

    pub(crate) fn unversioned(&self) -> Self {
        Self {
            no_versioning: true,
            ..self.clone()
        }
    }
}

/// An immutable set of migrations, ascending by version with no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Migrations {
    items: Vec<Migration>,
}

impl Migrations {
    pub fn builder() -> MigrationsBuilder {
        MigrationsBuilder::default()
    }

    pub fn from_vec(mut items: Vec<Migration>) -> Result<Self> {
        if let Some(bad) = items.iter().find(|m| m.version < 1) {
            return Err(Error::Config(format!(
                "migration versions must be greater than zero: {} has version {}",
                bad.name(),
                bad.version
            )));
        }
        items.sort_by_key(|m| m.version);
        if let Some(pair) = items.windows(2).find(|w| w[0].version == w[1].version) {
            return Err(Error::DuplicateVersion {
                version: pair[0].version,
                first: pair[0].name(),
                second: pair[1].name(),
            });
        }
        Ok(Self { items })
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Migration> {
        self.items.iter()
    }

    pub fn versions(&self) -> Vec<i64> {
        self.items.iter().map(|m| m.version).collect()
    }

    pub fn first(&self) -> Option<&Migration> {
        self.items.first()
    }

    pub fn last(&self) -> Option<&Migration> {
        self.items.last()
    }

    /// The migration with exactly `version`.
    pub fn current(&self, version: i64) -> Result<&Migration> {
        self.items
            .binary_search_by_key(&version, |m| m.version)
            .map(|idx| &self.items[idx])
            .map_err(|_| Error::MigrationNotFound(version))
    }
}

impl<'a> IntoIterator for &'a Migrations {
    type Item = &'a Migration;
    type IntoIter = std::slice::Iter<'a, Migration>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

/// Collects migrations before validating them as a set.
#[derive(Debug, Default)]
pub struct MigrationsBuilder {
    items: Vec<Migration>,
}

impl MigrationsBuilder {
    pub fn add(mut self, migration: Migration) -> Self {
        self.items.push(migration);
        self
    }

    pub fn file(self, version: i64, path: impl AsRef<Path>) -> Self {
        self.add(Migration::file(version, path.as_ref()))
    }

    pub fn embedded(self, version: i64, name: impl Into<String>, body: impl Into<String>) -> Self {
        self.add(Migration::embedded(version, name, body))
    }

    pub fn build(self) -> Result<Migrations> {
        Migrations::from_vec(self.items)
    }
}
