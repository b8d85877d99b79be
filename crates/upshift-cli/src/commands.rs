use anyhow::Result;
use upshift_config::AppConfig;
use upshift_core::{DirectorySource, Runner, SchemaStore};

pub fn up(config: &AppConfig, to: Option<u64>) -> Result<()> {
    let set = DirectorySource::new(&config.migrations.dir).load()?;
    let store = SchemaStore::open(&config.database.path)?;
    let runner = Runner::new(&store, &set);

    let report = match to {
        Some(target) => runner.apply_to(target)?,
        None => runner.apply_all()?,
    };

    if report.applied.is_empty() {
        println!("Nothing to apply ({} already applied).", report.skipped);
    } else {
        for id in &report.applied {
            let name = set.get(*id).map(|u| u.name.as_str()).unwrap_or("?");
            println!("Applied {id} {name}");
        }
        println!("{} migration(s) applied.", report.applied.len());
    }
    Ok(())
}

pub fn down(config: &AppConfig, count: usize) -> Result<()> {
    let set = DirectorySource::new(&config.migrations.dir).load()?;
    let store = SchemaStore::open(&config.database.path)?;
    let runner = Runner::new(&store, &set);

    let report = runner.revert(count)?;
    for id in &report.reverted {
        let name = set.get(*id).map(|u| u.name.as_str()).unwrap_or("?");
        println!("Reverted {id} {name}");
    }
    println!("{} migration(s) reverted.", report.reverted.len());
    Ok(())
}

pub fn status(config: &AppConfig) -> Result<()> {
    let set = DirectorySource::new(&config.migrations.dir).load()?;
    let store = SchemaStore::open(&config.database.path)?;
    let runner = Runner::new(&store, &set);

    let statuses = runner.status()?;
    if statuses.is_empty() {
        println!("No migrations found in {}.", config.migrations.dir.display());
        return Ok(());
    }

    let name_width = statuses.iter().map(|s| s.name.len()).max().unwrap_or(0);
    println!("{:<14}  {:<name_width$}  STATE", "ID", "NAME");
    for s in &statuses {
        let state = match s.applied_at {
            Some(at) => format!("applied {}", at.format("%Y-%m-%d %H:%M:%S")),
            None => "pending".to_string(),
        };
        println!("{:<14}  {:<name_width$}  {state}", s.id, s.name);
    }

    let applied = statuses.iter().filter(|s| s.is_applied()).count();
    println!();
    println!("{applied} applied, {} pending.", statuses.len() - applied);
    Ok(())
}

pub fn new(config: &AppConfig, name: &str) -> Result<()> {
    let source = DirectorySource::new(&config.migrations.dir);
    let (up_path, down_path) = source.scaffold(name)?;
    println!("Created {}", up_path.display());
    println!("Created {}", down_path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use upshift_config::AppConfig;

    fn temp_config(dir: &tempfile::TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.database.path = dir.path().join("test.db");
        config.migrations.dir = dir.path().join("migrations");
        config
    }

    #[test]
    fn new_then_up_then_status_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);

        new(&config, "create_things").unwrap();

        // Fill in real statements so `up` has something to execute.
        let set = DirectorySource::new(&config.migrations.dir).load().unwrap();
        let unit = &set.units()[0];
        let stem = format!("{}_{}", unit.id, unit.name);
        std::fs::write(
            config.migrations.dir.join(format!("{stem}.up.sql")),
            "CREATE TABLE things (id INTEGER PRIMARY KEY);",
        )
        .unwrap();
        std::fs::write(
            config.migrations.dir.join(format!("{stem}.down.sql")),
            "DROP TABLE things;",
        )
        .unwrap();

        up(&config, None).unwrap();
        status(&config).unwrap();
        down(&config, 1).unwrap();

        let store = SchemaStore::open(&config.database.path).unwrap();
        assert!(store.applied().unwrap().is_empty());
    }

    #[test]
    fn down_on_empty_ledger_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = temp_config(&dir);
        std::fs::create_dir_all(&config.migrations.dir).unwrap();

        assert!(down(&config, 1).is_err());
    }
}
