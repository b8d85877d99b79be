use upshift_common::{Error, Result};

/// One reversible schema-change step.
///
/// The identifier is timestamp-derived (`YYYYMMDDHHMMSS`), unique and
/// sortable. `up` and `down` are raw SQL batches authored together;
/// a unit is immutable once authored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub id: u64,
    pub name: String,
    pub up: String,
    pub down: String,
}

impl MigrationUnit {
    pub fn new(id: u64, name: impl Into<String>, up: impl Into<String>, down: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            up: up.into(),
            down: down.into(),
        }
    }
}

/// The full ordered set of known migration units.
///
/// Construction sorts ascending by id and rejects duplicate identifiers
/// before any statement can execute.
#[derive(Debug, Clone, Default)]
pub struct MigrationSet {
    units: Vec<MigrationUnit>,
}

impl MigrationSet {
    pub fn new(mut units: Vec<MigrationUnit>) -> Result<Self> {
        units.sort_by_key(|u| u.id);

        for pair in units.windows(2) {
            if pair[0].id == pair[1].id {
                return Err(Error::Conflict {
                    id: pair[1].id,
                    name: pair[1].name.clone(),
                });
            }
        }

        Ok(Self { units })
    }

    pub fn units(&self) -> &[MigrationUnit] {
        &self.units
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn get(&self, id: u64) -> Option<&MigrationUnit> {
        self.units
            .binary_search_by_key(&id, |u| u.id)
            .ok()
            .map(|i| &self.units[i])
    }

    pub fn contains(&self, id: u64) -> bool {
        self.get(id).is_some()
    }
}
