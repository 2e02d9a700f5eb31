//! Initialize the configuration directory: create ~/.flowlink, the default config, and the
//! bundled workflow template.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::workflow::BUNDLED_TEMPLATE;

/// Create the config directory and default files if they do not exist.
/// - Writes `config.json` with every default spelled out, so it doubles as documentation.
/// - Writes `workflow.json` (the template the provisioner uploads) next to it.
/// Existing files are left untouched. Returns the config directory.
pub fn init_config_dir(config_path: &Path) -> Result<PathBuf> {
    let config_dir = config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(config_dir)
        .with_context(|| format!("creating config directory {}", config_dir.display()))?;

    if !config_path.exists() {
        let default_config = serde_json::to_string_pretty(&Config::default())
            .context("serializing default config")?;
        std::fs::write(config_path, default_config)
            .with_context(|| format!("writing default config to {}", config_path.display()))?;
        log::info!("created default config at {}", config_path.display());
    } else {
        log::debug!("config already exists at {}, skipping", config_path.display());
    }

    let template = config_dir.join("workflow.json");
    if !template.exists() {
        std::fs::write(&template, BUNDLED_TEMPLATE)
            .with_context(|| format!("writing workflow template to {}", template.display()))?;
        log::info!("wrote workflow template to {}", template.display());
    } else {
        log::debug!("workflow template already exists at {}, skipping", template.display());
    }

    Ok(config_dir.to_path_buf())
}
