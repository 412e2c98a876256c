use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use drover_common::{Error, Result};

/// One logged apply or rollback of a version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryRecord {
    pub id: i64,
    pub version_id: i64,
    pub is_applied: bool,
    pub tstamp: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    pub fn applied(id: i64, version_id: i64) -> Self {
        Self {
            id,
            version_id,
            is_applied: true,
            tstamp: None,
        }
    }

    pub fn rolled_back(id: i64, version_id: i64) -> Self {
        Self {
            is_applied: false,
            ..Self::applied(id, version_id)
        }
    }
}

/// The version history table as an append-only log, newest record first.
///
/// A version may appear several times. Only its most recent record counts.
#[derive(Debug, Clone, Default)]
pub struct HistoryLog {
    records: Vec<HistoryRecord>,
}

impl HistoryLog {
    /// Build from records in any order; they are sorted newest-first by id.
    pub fn new(mut records: Vec<HistoryRecord>) -> Self {
        records.sort_by(|a, b| b.id.cmp(&a.id));
        Self { records }
    }

    pub fn records(&self) -> &[HistoryRecord] {
        &self.records
    }

    /// The highest version whose latest record is an apply. Fails with
    /// [`Error::NoNextVersion`] when no version qualifies.
    pub fn current_version(&self) -> Result<i64> {
        self.applied_versions()
            .keys()
            .next_back()
            .copied()
            .ok_or(Error::NoNextVersion)
    }

    /// Every version whose latest record is an apply, with that record's
    /// timestamp. Records are scanned newest-first and a version is decided
    /// by the first record seen for it.
    pub fn applied_versions(&self) -> BTreeMap<i64, Option<DateTime<Utc>>> {
        let mut decided = HashSet::new();
        let mut applied = BTreeMap::new();
        for record in &self.records {
            if !decided.insert(record.version_id) {
                continue;
            }
            if record.is_applied {
                applied.insert(record.version_id, record.tstamp);
            }
        }
        applied
    }

    pub fn applied_set(&self) -> BTreeSet<i64> {
        self.applied_versions().into_keys().collect()
    }
}
