use std::path::{Path, PathBuf};

use tracing::info;
use upshift_common::{Error, Result};

use crate::model::AppConfig;

/// Resolves and parses the runner configuration file.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration. An explicit path must exist; otherwise the
    /// default search locations are tried in order and a missing file
    /// falls back to `AppConfig::default()`.
    pub fn load(explicit: Option<&Path>) -> Result<AppConfig> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Self::load_file(path);
        }

        for candidate in Self::search_paths() {
            if candidate.exists() {
                return Self::load_file(&candidate);
            }
        }

        info!("no config file found, using defaults");
        Ok(AppConfig::default())
    }

    /// Parse a single config file, dispatching on its extension.
    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)?;

        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
        let config = match ext {
            "yml" | "yaml" => serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("YAML parse error in {}: {e}", path.display())))?,
            "toml" => toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("TOML parse error in {}: {e}", path.display())))?,
            other => {
                return Err(Error::Config(format!(
                    "unsupported config extension: {other}"
                )));
            }
        };

        info!("config loaded from {}", path.display());
        Ok(config)
    }

    fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("upshift.yml"),
            PathBuf::from("upshift.yaml"),
            PathBuf::from("upshift.toml"),
        ];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("upshift").join("upshift.yml"));
        }
        paths
    }
}
