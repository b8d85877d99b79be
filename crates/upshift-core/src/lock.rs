use std::fmt;

use rusqlite::params;
use tracing::{info, warn};
use upshift_common::{Error, Result};

use crate::store::SchemaStore;

/// Exclusive advisory lock over a schema store.
///
/// Claimed by inserting the single `_migration_lock` row; the primary-key
/// constraint makes the claim atomic. Dropping the guard releases the
/// lock on every exit path, including error unwinds. Schema-altering
/// statements are not commutative, so two runners must never interleave.
pub struct MigrationLock<'a> {
    store: &'a SchemaStore,
}

impl<'a> MigrationLock<'a> {
    pub(crate) fn acquire(store: &'a SchemaStore) -> Result<Self> {
        let owner = format!(
            "{}:{}",
            std::env::var("HOSTNAME").unwrap_or_else(|_| "local".into()),
            std::process::id()
        );

        let conn = store.connection()?;
        let claimed = conn
            .execute(
                "INSERT OR IGNORE INTO _migration_lock (id, owner) VALUES (1, ?1)",
                params![owner],
            )
            .map_err(|e| Error::Database(format!("failed to claim migration lock: {e}")))?;

        if claimed == 0 {
            let holder: String = conn
                .query_row("SELECT owner FROM _migration_lock WHERE id = 1", [], |row| {
                    row.get(0)
                })
                .unwrap_or_else(|_| "unknown".into());
            return Err(Error::Locked(format!(
                "another runner ({holder}) holds the migration lock"
            )));
        }
        drop(conn);

        info!("migration lock acquired by {owner}");
        Ok(Self { store })
    }
}

impl fmt::Debug for MigrationLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MigrationLock").finish_non_exhaustive()
    }
}

impl Drop for MigrationLock<'_> {
    fn drop(&mut self) {
        // Release failures are logged, never raised: a poisoned store or
        // closed connection must not turn an unwind into an abort.
        let released = self
            .store
            .connection()
            .and_then(|conn| {
                conn.execute("DELETE FROM _migration_lock WHERE id = 1", [])
                    .map_err(|e| Error::Database(format!("failed to release lock: {e}")))
            });

        match released {
            Ok(_) => info!("migration lock released"),
            Err(e) => warn!("migration lock not released cleanly: {e}"),
        }
    }
}
