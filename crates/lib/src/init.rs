//! Initialize the configuration directory: create `~/.chatrep`, a default
//! config, and a seeded rules file.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

static DEFAULT_RULES: &str = include_str!("../config/rules.json");

/// Create the config directory and default files if they do not exist.
/// - Creates the config directory (parent of the config file path).
/// - Writes `config.json` with `{}` if missing.
/// - Seeds `rules.json` from the bundled template if missing.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        std::fs::write(config_path, b"{}")
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    }

    let rules_path = config_dir.join("rules.json");
    if !rules_path.exists() {
        std::fs::write(&rules_path, DEFAULT_RULES)
            .with_context(|| format!("writing default rules to {}", rules_path.display()))?;
        log::info!("wrote default rules to {}", rules_path.display());
    } else {
        log::debug!("rules file already exists at {}, skipping", rules_path.display());
    }

    Ok(config_dir.to_path_buf())
}
