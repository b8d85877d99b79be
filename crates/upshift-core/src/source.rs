use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::info;
use upshift_common::{Error, Result};

use crate::unit::{MigrationSet, MigrationUnit};

/// Loads migration units from a directory of paired SQL files.
///
/// Each unit is two files: `<id>_<name>.up.sql` and `<id>_<name>.down.sql`.
/// The id is a 14-digit timestamp (`YYYYMMDDHHMMSS`). A unit missing either
/// half, or a file that doesn't match the naming scheme, fails the load.
pub struct DirectorySource {
    dir: PathBuf,
}

struct PendingPair {
    name: String,
    up: Option<String>,
    down: Option<String>,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn load(&self) -> Result<MigrationSet> {
        if !self.dir.exists() {
            return Err(Error::Config(format!(
                "migrations directory not found: {}",
                self.dir.display()
            )));
        }

        let pattern = Regex::new(r"^(\d{14})_([A-Za-z0-9][A-Za-z0-9_]*)\.(up|down)\.sql$")
            .map_err(|e| Error::Config(format!("invalid filename pattern: {e}")))?;

        let mut pairs: BTreeMap<u64, PendingPair> = BTreeMap::new();

        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            // Non-SQL files (readme, editor droppings) are ignored.
            if !file_name.ends_with(".sql") {
                continue;
            }

            let captures = pattern.captures(&file_name).ok_or_else(|| {
                Error::Config(format!(
                    "migration filename does not match <id>_<name>.up/down.sql: {file_name}"
                ))
            })?;

            let id: u64 = captures[1]
                .parse()
                .map_err(|_| Error::Config(format!("invalid migration id in {file_name}")))?;
            let name = captures[2].to_string();
            let direction = &captures[3];

            let sql = std::fs::read_to_string(entry.path())?;

            let pair = pairs.entry(id).or_insert_with(|| PendingPair {
                name: name.clone(),
                up: None,
                down: None,
            });

            if pair.name != name {
                return Err(Error::Conflict { id, name });
            }

            let slot = match direction {
                "up" => &mut pair.up,
                _ => &mut pair.down,
            };
            if slot.is_some() {
                return Err(Error::Conflict { id, name });
            }
            *slot = Some(sql);
        }

        let mut units = Vec::with_capacity(pairs.len());
        for (id, pair) in pairs {
            let up = pair.up.ok_or_else(|| {
                Error::Config(format!("migration {id}_{} has no .up.sql file", pair.name))
            })?;
            let down = pair.down.ok_or_else(|| {
                Error::Config(format!("migration {id}_{} has no .down.sql file", pair.name))
            })?;
            units.push(MigrationUnit::new(id, pair.name, up, down));
        }

        info!("loaded {} migration(s) from {}", units.len(), self.dir.display());
        MigrationSet::new(units)
    }

    /// Scaffold an empty up/down pair for a new migration. Returns the
    /// two paths created. The id is the current UTC timestamp.
    pub fn scaffold(&self, name: &str) -> Result<(PathBuf, PathBuf)> {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(Error::Config(format!(
                "migration name must be alphanumeric/underscore: {name:?}"
            )));
        }

        std::fs::create_dir_all(&self.dir)?;

        let id = chrono::Utc::now().format("%Y%m%d%H%M%S");
        let up_path = self.dir.join(format!("{id}_{name}.up.sql"));
        let down_path = self.dir.join(format!("{id}_{name}.down.sql"));

        std::fs::write(&up_path, "-- forward statements\n")?;
        std::fs::write(&down_path, "-- reverse statements\n")?;

        info!("scaffolded migration {id}_{name}");
        Ok((up_path, down_path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, sql: &str) {
        std::fs::write(dir.join(name), sql).unwrap();
    }

    #[test]
    fn loads_paired_files_in_id_order() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "20240102030405_second.up.sql", "CREATE TABLE b (id INTEGER);");
        write(tmp.path(), "20240102030405_second.down.sql", "DROP TABLE b;");
        write(tmp.path(), "20240101000000_first.up.sql", "CREATE TABLE a (id INTEGER);");
        write(tmp.path(), "20240101000000_first.down.sql", "DROP TABLE a;");

        let set = DirectorySource::new(tmp.path()).load().unwrap();
        let names: Vec<&str> = set.units().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(set.units()[0].id, 20240101000000);
    }

    #[test]
    fn missing_down_half_fails_the_load() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "20240101000000_lonely.up.sql", "CREATE TABLE a (id INTEGER);");

        let err = DirectorySource::new(tmp.path()).load().unwrap_err();
        assert!(err.to_string().contains("no .down.sql"));
    }

    #[test]
    fn mismatched_names_for_same_id_conflict() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "20240101000000_alpha.up.sql", "SELECT 1;");
        write(tmp.path(), "20240101000000_beta.down.sql", "SELECT 1;");

        let err = DirectorySource::new(tmp.path()).load().unwrap_err();
        assert!(matches!(err, Error::Conflict { id: 20240101000000, .. }));
    }

    #[test]
    fn malformed_sql_filename_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "not_a_migration.sql", "SELECT 1;");

        let err = DirectorySource::new(tmp.path()).load().unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn non_sql_files_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        write(tmp.path(), "20240101000000_only.up.sql", "SELECT 1;");
        write(tmp.path(), "20240101000000_only.down.sql", "SELECT 1;");
        std::fs::write(tmp.path().join("README.md"), "notes").unwrap();

        let set = DirectorySource::new(tmp.path()).load().unwrap();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn missing_directory_is_a_config_error() {
        let err = DirectorySource::new("/nonexistent/migrations").load().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn scaffold_creates_a_loadable_pair() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(tmp.path());
        let (up, down) = source.scaffold("add_widgets").unwrap();
        assert!(up.exists());
        assert!(down.exists());

        let set = source.load().unwrap();
        assert_eq!(set.len(), 1);
        assert_eq!(set.units()[0].name, "add_widgets");
    }

    #[test]
    fn scaffold_rejects_bad_names() {
        let tmp = tempfile::tempdir().unwrap();
        let source = DirectorySource::new(tmp.path());
        assert!(source.scaffold("has spaces").is_err());
        assert!(source.scaffold("").is_err());
    }
}
