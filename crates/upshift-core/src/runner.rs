use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::info;
use upshift_common::{Error, Result};

use crate::store::{AppliedMigration, SchemaStore};
use crate::unit::MigrationSet;

/// Applies and reverts migration units against an injected schema store.
///
/// Every pass acquires the store's advisory lock before reading the
/// ledger and holds it until the pass completes, so two runners can
/// never interleave. Units run strictly in id order; a failure aborts
/// the pass and leaves previously committed units in place.
pub struct Runner<'a> {
    store: &'a SchemaStore,
    set: &'a MigrationSet,
}

/// Summary of an apply pass.
#[derive(Debug)]
pub struct ApplyReport {
    /// Ids applied by this pass, in execution order.
    pub applied: Vec<u64>,
    /// Units that were already ledgered and skipped.
    pub skipped: usize,
}

/// Summary of a revert pass.
#[derive(Debug)]
pub struct RevertReport {
    /// Ids reverted by this pass, most recent first.
    pub reverted: Vec<u64>,
}

/// Applied/pending state of one known unit.
#[derive(Debug, Clone)]
pub struct UnitStatus {
    pub id: u64,
    pub name: String,
    pub applied_at: Option<DateTime<Utc>>,
}

impl UnitStatus {
    pub fn is_applied(&self) -> bool {
        self.applied_at.is_some()
    }
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a SchemaStore, set: &'a MigrationSet) -> Self {
        Self { store, set }
    }

    /// Apply every pending unit in ascending id order.
    pub fn apply_all(&self) -> Result<ApplyReport> {
        self.apply_up_to(None)
    }

    /// Apply pending units up to and including `target_id`. The target
    /// must be a known unit.
    pub fn apply_to(&self, target_id: u64) -> Result<ApplyReport> {
        if !self.set.contains(target_id) {
            return Err(Error::NotFound(format!(
                "unknown migration id: {target_id}"
            )));
        }
        self.apply_up_to(Some(target_id))
    }

    fn apply_up_to(&self, target_id: Option<u64>) -> Result<ApplyReport> {
        let _lock = self.store.lock()?;

        let applied = self.store.applied()?;
        self.check_integrity(&applied)?;

        let applied_ids: HashSet<u64> = applied.iter().map(|a| a.id).collect();
        let pending = self
            .set
            .units()
            .iter()
            .filter(|u| !applied_ids.contains(&u.id))
            .filter(|u| target_id.is_none_or(|t| u.id <= t));

        let mut report = ApplyReport {
            applied: Vec::new(),
            skipped: applied_ids.len(),
        };

        for unit in pending {
            self.store.apply(unit)?;
            report.applied.push(unit.id);
        }

        if report.applied.is_empty() {
            info!("nothing to apply, ledger is current");
        } else {
            info!("applied {} migration(s)", report.applied.len());
        }
        Ok(report)
    }

    /// Revert the `count` most recently applied units, newest first.
    /// Fails with `NotFound` before anything runs if the ledger is
    /// shallower than `count`.
    pub fn revert(&self, count: usize) -> Result<RevertReport> {
        let _lock = self.store.lock()?;

        let applied = self.store.applied()?;
        self.check_integrity(&applied)?;

        if applied.len() < count {
            return Err(Error::NotFound(format!(
                "cannot revert {count} migration(s), only {} applied",
                applied.len()
            )));
        }

        let mut report = RevertReport {
            reverted: Vec::new(),
        };

        for record in applied.iter().rev().take(count) {
            // check_integrity guarantees every ledgered id is known.
            let unit = self.set.get(record.id).ok_or_else(|| {
                Error::Integrity(format!("ledger references unknown migration {}", record.id))
            })?;
            self.store.revert(unit)?;
            report.reverted.push(unit.id);
        }

        info!("reverted {} migration(s)", report.reverted.len());
        Ok(report)
    }

    /// Applied/pending state of every known unit, ascending by id.
    /// Reads the raw ledger without the integrity check so a mismatched
    /// store can still be inspected.
    pub fn status(&self) -> Result<Vec<UnitStatus>> {
        let applied = self.store.applied()?;

        let statuses = self
            .set
            .units()
            .iter()
            .map(|u| UnitStatus {
                id: u.id,
                name: u.name.clone(),
                applied_at: applied
                    .iter()
                    .find(|a| a.id == u.id)
                    .map(|a| a.applied_at),
            })
            .collect();

        Ok(statuses)
    }

    /// The ledger must be a prefix, under id ordering, of the known set:
    /// no record for an unknown unit, no gap between applied units.
    fn check_integrity(&self, applied: &[AppliedMigration]) -> Result<()> {
        for record in applied {
            if !self.set.contains(record.id) {
                return Err(Error::Integrity(format!(
                    "ledger references unknown migration {}",
                    record.id
                )));
            }
        }

        for (record, unit) in applied.iter().zip(self.set.units()) {
            if record.id != unit.id {
                return Err(Error::Integrity(format!(
                    "migration {} is applied but earlier migration {} is not",
                    record.id, unit.id
                )));
            }
        }

        Ok(())
    }
}
