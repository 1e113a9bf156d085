use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tunables for the integrity checker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckerConfig {
    /// Directory holding the blob cache and quarantine files.
    /// `None` resolves to the platform cache dir (`~/.cache/granary` on Linux).
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,

    /// Minimum milliseconds between progress notifications during a check.
    #[serde(default = "default_notify_interval_ms")]
    pub notify_interval_ms: u64,
}

fn default_notify_interval_ms() -> u64 {
    500
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            notify_interval_ms: default_notify_interval_ms(),
        }
    }
}
