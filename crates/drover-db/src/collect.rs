use std::path::Path;
use std::sync::LazyLock;

use drover_common::{Error, Result};
use regex::Regex;
use tracing::debug;

use crate::migration::{Migration, Migrations};

static VERSION_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)_").expect("static regex"));

/// Parse the version out of a migration file name such as
/// `00042_add_users.sql`.
pub fn version_from_file_name(file_name: &str) -> Result<i64> {
    if !file_name.contains('_') {
        return Err(Error::Config(format!(
            "{file_name}: no filename separator '_' found"
        )));
    }
    let caps = VERSION_PREFIX.captures(file_name).ok_or_else(|| {
        Error::Config(format!("{file_name}: failed to parse version from file name"))
    })?;
    let version: i64 = caps[1]
        .parse()
        .map_err(|e| Error::Config(format!("{file_name}: invalid version: {e}")))?;
    if version < 1 {
        return Err(Error::Config(format!(
            "{file_name}: migration versions must be greater than zero"
        )));
    }
    Ok(version)
}

/// Discover `*.sql` migrations directly under `dir` whose version lies in
/// `[min_version, max_version]`, ascending by version.
pub fn collect_migrations(dir: &Path, min_version: i64, max_version: i64) -> Result<Migrations> {
    if !dir.is_dir() {
        return Err(Error::Config(format!(
            "migration directory {} does not exist",
            dir.display()
        )));
    }

    let entries = std::fs::read_dir(dir).map_err(|e| {
        Error::Config(format!(
            "failed to read migration directory {}: {e}",
            dir.display()
        ))
    })?;

    let mut found = Vec::new();
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() || path.extension().is_none_or(|ext| ext != "sql") {
            continue;
        }
        let file_name = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        let version = version_from_file_name(&file_name)?;
        if version < min_version || version > max_version {
            continue;
        }
        found.push(Migration::file(version, path));
    }

    let migrations = Migrations::from_vec(found)?;
    debug!(
        "collected {} migrations from {}",
        migrations.len(),
        dir.display()
    );
    Ok(migrations)
}
