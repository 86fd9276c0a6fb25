//! Session configuration, persisted as JSON.

use crate::debugger::MAX_BREAKPOINTS;
use crate::error::Result;
use crate::savestate::MAX_SAVESTATE_FILE_SIZE;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "hookcore.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Removing an unknown handle fails instead of being ignored
    pub strict_unregister: bool,
    /// Keep per-address CPU access counters
    pub access_counters: bool,
    pub max_breakpoints: usize,
    pub max_savestate_file_size: u64,
    /// `log` filter used by the demo binary when RUST_LOG is unset
    pub log_level: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            strict_unregister: false,
            access_counters: true,
            max_breakpoints: MAX_BREAKPOINTS,
            max_savestate_file_size: MAX_SAVESTATE_FILE_SIZE,
            log_level: "info".to_string(),
        }
    }
}

impl SessionConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Missing or unreadable files fall back to the defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("using default config ({}: {})", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
