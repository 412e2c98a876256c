use std::path::Path;

use drover_common::{Error, Result};
use tracing::{debug, info};

use crate::model::MigrateConfig;

/// Environment variables that override values read from a config file.
const ENV_DATABASE: &str = "DROVER_DATABASE";
const ENV_DIR: &str = "DROVER_DIR";
const ENV_TABLE: &str = "DROVER_TABLE";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load a config file. The format follows the extension: `.yml`/`.yaml`
    /// or `.toml`.
    pub fn load(path: &Path) -> Result<MigrateConfig> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = Self::parse(path, &contents)?;
        Self::validate(&config)?;
        info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Load `path` when given, otherwise start from defaults. Environment
    /// overrides are applied in both cases.
    pub fn load_or_default(path: Option<&Path>) -> Result<MigrateConfig> {
        let config = match path {
            Some(path) => Self::load(path)?,
            None => MigrateConfig::default(),
        };
        let config = Self::apply_overrides(config, |key| std::env::var(key).ok());
        Self::validate(&config)?;
        Ok(config)
    }

    fn parse(path: &Path, contents: &str) -> Result<MigrateConfig> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        match ext {
            "yml" | "yaml" => serde_yaml::from_str(contents)
                .map_err(|e| Error::Config(format!("YAML parse error: {e}"))),
            "toml" => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("TOML parse error: {e}"))),
            other => Err(Error::Config(format!(
                "unsupported config extension: {other}"
            ))),
        }
    }

    /// Apply `DROVER_*` overrides looked up through `lookup`.
    pub fn apply_overrides(
        mut config: MigrateConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> MigrateConfig {
        if let Some(database) = lookup(ENV_DATABASE).filter(|v| !v.is_empty()) {
            debug!("{ENV_DATABASE} overrides database path");
            config.database = database.into();
        }
        if let Some(dir) = lookup(ENV_DIR).filter(|v| !v.is_empty()) {
            debug!("{ENV_DIR} overrides migration directory");
            config.dir = dir.into();
        }
        if let Some(table) = lookup(ENV_TABLE).filter(|v| !v.is_empty()) {
            debug!("{ENV_TABLE} overrides version table");
            config.table = table;
        }
        config
    }

    pub fn validate(config: &MigrateConfig) -> Result<()> {
        if config.min_version > config.max_version {
            return Err(Error::Config(format!(
                "min_version {} is greater than max_version {}",
                config.min_version, config.max_version
            )));
        }
        if config.table.trim().is_empty() {
            return Err(Error::Config("version table name cannot be empty".into()));
        }
        Ok(())
    }
}
