use std::collections::BTreeSet;

use drover_common::{Error, MissingMigration, Result};

use crate::migration::{Migration, Migrations};

/// What an upward run would do, computed from discovered migrations and
/// the applied versions in the history table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    /// Unapplied migrations at or below `db_max_version`, ascending.
    pub missing: Vec<Migration>,
    /// Unapplied migrations in `(db_max_version, bound]`, ascending.
    pub to_apply: Vec<Migration>,
    /// Highest applied version, or 0.
    pub db_max_version: i64,
}

/// Compute the plan for an upward run bounded by `bound` (inclusive).
pub fn plan(discovered: &Migrations, applied: &BTreeSet<i64>, bound: i64) -> Plan {
    let db_max_version = applied.iter().next_back().copied().unwrap_or(0);

    let (missing, to_apply): (Vec<Migration>, Vec<Migration>) = discovered
        .iter()
        .filter(|m| m.version <= bound && !applied.contains(&m.version))
        .cloned()
        .partition(|m| m.version <= db_max_version);

    Plan {
        missing,
        to_apply,
        db_max_version,
    }
}

impl Plan {
    /// The ordered work list. Missing migrations are an error unless
    /// `allow_missing` is set, in which case they run first.
    pub fn into_work(self, allow_missing: bool) -> Result<Vec<Migration>> {
        if self.missing.is_empty() {
            return Ok(self.to_apply);
        }
        if !allow_missing {
            return Err(Error::MissingMigrations {
                max_version: self.db_max_version,
                missing: self
                    .missing
                    .iter()
                    .map(|m| MissingMigration {
                        version: m.version,
                        name: m.name(),
                    })
                    .collect(),
            });
        }
        let mut work = self.missing;
        work.extend(self.to_apply);
        Ok(work)
    }
}
