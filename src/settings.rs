//! Persistent application settings: the last-used form values and how to reach the tool.

use crate::model::JobSettings;
use crate::pipeline::ToolConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub tool: ToolConfig,
    pub job: JobSettings,
    /// Save a report of every finished run.
    pub auto_save: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            tool: ToolConfig::default(),
            job: JobSettings::default(),
            auto_save: true,
        }
    }
}

pub fn default_path() -> Result<PathBuf> {
    let base = dirs::config_dir().context("no config directory for this platform")?;
    Ok(base.join("mov2wav").join("settings.json"))
}

impl AppSettings {
    /// Load from `path`, or defaults if the file does not exist yet.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match fs::read(path) {
            Ok(data) => serde_json::from_slice(&data)
                .with_context(|| format!("parse settings {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no settings file; using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(e).with_context(|| format!("read settings {}", path.display())),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let data = serde_json::to_vec_pretty(self).context("serialize settings")?;
        // Replace atomically: sibling temp file, then rename.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("replace {}", path.display()))
    }
}
