use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// vibelens configuration from config.toml
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct LensConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub intel: IntelConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ServerConfig {
    /// Tool calls handled at once; further requests wait.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
}

fn default_max_concurrent_requests() -> usize {
    64
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct IntelConfig {
    /// Project contexts kept alive; unset keeps every context until cleanup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_contexts: Option<usize>,
    /// Source files discovered per project root.
    #[serde(default = "default_max_project_files")]
    pub max_project_files: usize,
}

fn default_max_project_files() -> usize {
    5000
}

impl Default for IntelConfig {
    fn default() -> Self {
        Self {
            max_contexts: None,
            max_project_files: default_max_project_files(),
        }
    }
}

/// `~/.vibelens/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".vibelens")
        .join("config.toml")
}

/// Load configuration, falling back to defaults when the file is missing or
/// unreadable.
pub fn load_config(config_path: &Path) -> LensConfig {
    if !config_path.exists() {
        return LensConfig::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => toml::from_str(&content).unwrap_or_else(|e| {
            tracing::warn!("Failed to parse {}: {}", config_path.display(), e);
            LensConfig::default()
        }),
        Err(e) => {
            tracing::warn!("Failed to read {}: {}", config_path.display(), e);
            LensConfig::default()
        }
    }
}

pub const DEFAULT_CONFIG: &str = r#"# vibelens configuration
# See: vibelens config --help

[server]
# Tool calls handled concurrently
max_concurrent_requests = 64

[intel]
# Upper bound on cached project contexts (least recently used are dropped).
# Unset keeps every context until the server exits.
# max_contexts = 32

# Source files discovered per project root
max_project_files = 5000
"#;
