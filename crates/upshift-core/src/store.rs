use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use tracing::info;
use upshift_common::{Error, Result};

use crate::lock::MigrationLock;
use crate::unit::MigrationUnit;

/// The relational store migrations run against.
///
/// Wraps a single SQLite connection and owns the `_migrations` ledger:
/// a row's presence means that unit's `up` has been executed and not yet
/// reversed. Schema effects and their ledger entries commit together.
pub struct SchemaStore {
    conn: Mutex<Connection>,
}

/// One row of the applied-migration ledger.
#[derive(Debug, Clone)]
pub struct AppliedMigration {
    pub id: u64,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

impl SchemaStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        info!("opening schema store at {}", db_path.display());
        let conn = Connection::open(db_path)
            .map_err(|e| Error::Database(format!("failed to open database: {e}")))?;

        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::Database(format!("failed to open in-memory database: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| Error::Database(format!("failed to set pragmas: {e}")))?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.bootstrap()?;
        Ok(store)
    }

    pub(crate) fn connection(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Database("schema store lock poisoned".into()))
    }

    fn bootstrap(&self) -> Result<()> {
        let conn = self.connection()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS _migration_lock (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                owner TEXT NOT NULL,
                acquired_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .map_err(|e| Error::Database(format!("ledger bootstrap failed: {e}")))?;

        Ok(())
    }

    /// Read the ledger, ascending by migration id.
    pub fn applied(&self) -> Result<Vec<AppliedMigration>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, name, applied_at FROM _migrations ORDER BY id ASC")
            .map_err(|e| Error::Database(format!("failed to prepare ledger query: {e}")))?;

        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)? as u64,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .map_err(|e| Error::Database(format!("failed to query ledger: {e}")))?;

        let mut applied = Vec::new();
        for row in rows {
            let (id, name, raw_applied_at) =
                row.map_err(|e| Error::Database(format!("failed to read ledger row: {e}")))?;
            let applied_at = parse_datetime(&raw_applied_at).ok_or_else(|| {
                Error::Integrity(format!(
                    "migration {id} has an unreadable applied_at: {raw_applied_at:?}"
                ))
            })?;
            applied.push(AppliedMigration {
                id,
                name,
                applied_at,
            });
        }
        Ok(applied)
    }

    /// Execute a unit's `up` batch and append its ledger row in one
    /// transaction. A unit whose statements fail is never ledgered.
    pub fn apply(&self, unit: &MigrationUnit) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))?;

        tx.execute_batch(&unit.up).map_err(|e| Error::Execution {
            id: unit.id,
            message: e.to_string(),
        })?;

        tx.execute(
            "INSERT INTO _migrations (id, name) VALUES (?1, ?2)",
            params![unit.id as i64, unit.name],
        )
        .map_err(|e| Error::Execution {
            id: unit.id,
            message: format!("failed to record ledger entry: {e}"),
        })?;

        tx.commit().map_err(|e| Error::Execution {
            id: unit.id,
            message: format!("failed to commit: {e}"),
        })?;

        info!("applied migration {} ({})", unit.id, unit.name);
        Ok(())
    }

    /// Execute a unit's `down` batch and remove its ledger row in one
    /// transaction.
    pub fn revert(&self, unit: &MigrationUnit) -> Result<()> {
        let mut conn = self.connection()?;
        let tx = conn
            .transaction()
            .map_err(|e| Error::Database(format!("failed to start transaction: {e}")))?;

        tx.execute_batch(&unit.down).map_err(|e| Error::Execution {
            id: unit.id,
            message: e.to_string(),
        })?;

        tx.execute(
            "DELETE FROM _migrations WHERE id = ?1",
            params![unit.id as i64],
        )
        .map_err(|e| Error::Execution {
            id: unit.id,
            message: format!("failed to remove ledger entry: {e}"),
        })?;

        tx.commit().map_err(|e| Error::Execution {
            id: unit.id,
            message: format!("failed to commit: {e}"),
        })?;

        info!("reverted migration {} ({})", unit.id, unit.name);
        Ok(())
    }

    /// Acquire the exclusive advisory lock. Fails fast with `Locked`
    /// naming the holder if another runner owns it.
    pub fn lock(&self) -> Result<MigrationLock<'_>> {
        MigrationLock::acquire(self)
    }

    /// Names of user tables currently in the store, sorted. The ledger
    /// and lock tables are excluded; used for status output and tests.
    pub fn user_tables(&self) -> Result<Vec<String>> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master
                 WHERE type = 'table'
                   AND name NOT LIKE '\\_%' ESCAPE '\\'
                   AND name NOT LIKE 'sqlite_%'
                 ORDER BY name",
            )
            .map_err(|e| Error::Database(format!("failed to prepare table query: {e}")))?;

        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::Database(format!("failed to query tables: {e}")))?;

        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| Error::Database(format!("failed to read table names: {e}")))
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            // SQLite datetime('now') produces "YYYY-MM-DD HH:MM:SS"
            chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|naive| naive.and_utc())
                .ok()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::MigrationUnit;

    fn create_widgets() -> MigrationUnit {
        MigrationUnit::new(
            20240101000000,
            "create_widgets",
            "CREATE TABLE widgets (id INTEGER PRIMARY KEY, label TEXT);",
            "DROP TABLE widgets;",
        )
    }

    #[test]
    fn fresh_store_has_empty_ledger() {
        let store = SchemaStore::in_memory().unwrap();
        assert!(store.applied().unwrap().is_empty());
        assert!(store.user_tables().unwrap().is_empty());
    }

    #[test]
    fn apply_creates_schema_and_ledger_row_together() {
        let store = SchemaStore::in_memory().unwrap();
        store.apply(&create_widgets()).unwrap();

        let applied = store.applied().unwrap();
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].id, 20240101000000);
        assert_eq!(applied[0].name, "create_widgets");
        assert_eq!(store.user_tables().unwrap(), vec!["widgets".to_string()]);
    }

    #[test]
    fn failed_up_leaves_no_ledger_row() {
        let store = SchemaStore::in_memory().unwrap();
        let broken = MigrationUnit::new(
            20240102000000,
            "broken",
            "CREATE TABLE ok (id INTEGER); THIS IS NOT SQL;",
            "DROP TABLE ok;",
        );

        let err = store.apply(&broken).unwrap_err();
        match err {
            Error::Execution { id, .. } => assert_eq!(id, 20240102000000),
            other => panic!("expected Execution, got: {other}"),
        }
        assert!(store.applied().unwrap().is_empty());
        // The transaction rolled the partial CREATE back too.
        assert!(store.user_tables().unwrap().is_empty());
    }

    #[test]
    fn revert_drops_schema_and_ledger_row_together() {
        let store = SchemaStore::in_memory().unwrap();
        let unit = create_widgets();
        store.apply(&unit).unwrap();
        store.revert(&unit).unwrap();

        assert!(store.applied().unwrap().is_empty());
        assert!(store.user_tables().unwrap().is_empty());
    }

    #[test]
    fn failed_down_keeps_the_unit_ledgered() {
        let store = SchemaStore::in_memory().unwrap();
        let unit = MigrationUnit::new(
            20240103000000,
            "bad_down",
            "CREATE TABLE keepers (id INTEGER);",
            "DROP TABLE no_such_table;",
        );
        store.apply(&unit).unwrap();

        let err = store.revert(&unit).unwrap_err();
        assert!(matches!(err, Error::Execution { id: 20240103000000, .. }));
        assert_eq!(store.applied().unwrap().len(), 1);
        assert_eq!(store.user_tables().unwrap(), vec!["keepers".to_string()]);
    }

    #[test]
    fn corrupt_applied_at_surfaces_an_integrity_error() {
        let store = SchemaStore::in_memory().unwrap();
        store.apply(&create_widgets()).unwrap();

        {
            let conn = store.connection().unwrap();
            conn.execute("UPDATE _migrations SET applied_at = 'garbage'", [])
                .unwrap();
        }

        let err = store.applied().unwrap_err();
        assert!(matches!(err, Error::Integrity(_)));
        assert!(err.to_string().contains("applied_at"));
    }

    #[test]
    fn user_tables_hides_internal_tables() {
        let store = SchemaStore::in_memory().unwrap();
        store.apply(&create_widgets()).unwrap();

        let tables = store.user_tables().unwrap();
        assert!(!tables.iter().any(|t| t.starts_with('_')));
    }
}
