//! Configuration loading (§4.E): a single TOML file, defaults when absent.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::constants::{APP_DIR_NAME, DEFAULT_PLUGIN_TIMEOUT_MS, DEFAULT_PORT, DEFAULT_SEARCH_ENGINE};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// The parsed configuration file. Immutable once loaded; a reload produces a wholly new
/// value rather than mutating this one (§3 "Configuration is immutable per run").
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub default_search: String,
    pub server: ServerSection,
    pub plugin_dirs: Vec<PathBuf>,
    pub plugin_timeout_ms: u64,
    pub aliases: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_search: DEFAULT_SEARCH_ENGINE.to_string(),
            server: ServerSection::default(),
            plugin_dirs: Vec::new(),
            plugin_timeout_ms: DEFAULT_PLUGIN_TIMEOUT_MS,
            aliases: HashMap::new(),
        }
    }
}

impl Config {
    /// The fallback search engine's query URL template. Unrecognized `default_search`
    /// values fall back to `google`, logged by the caller as an unknown-key warning.
    pub fn search_url(&self, encoded_query: &str) -> String {
        match self.default_search.as_str() {
            "ddg" => format!("https://duckduckgo.com/?q={encoded_query}"),
            "bing" => format!("https://www.bing.com/search?q={encoded_query}"),
            _ => format!("https://www.google.com/search?q={encoded_query}"),
        }
    }
}

/// Top-level keys §4.E recognizes; anything else in the file is ignored but logged.
const KNOWN_TOP_LEVEL_KEYS: &[&str] = &[
    "default_search",
    "server",
    "plugin_dirs",
    "plugin_timeout_ms",
    "aliases",
];

/// Keys recognized inside the `[server]` table.
const KNOWN_SERVER_KEYS: &[&str] = &["port"];

/// Loads `path`, returning the default configuration if the file does not exist.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let value: toml::Value = toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    warn_on_unknown_keys(&value, path);

    value.try_into().map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Logs a warning for every top-level or `[server]` key the file declares that §4.E
/// doesn't recognize. `[aliases]` is exempt: its keys are user-chosen binding names, not
/// a fixed schema.
fn warn_on_unknown_keys(value: &toml::Value, path: &Path) {
    let Some(table) = value.as_table() else {
        return;
    };

    for key in table.keys() {
        if !KNOWN_TOP_LEVEL_KEYS.contains(&key.as_str()) {
            tracing::warn!(key = %key, path = %path.display(), "unknown configuration key ignored");
        }
    }

    if let Some(server) = table.get("server").and_then(toml::Value::as_table) {
        for key in server.keys() {
            if !KNOWN_SERVER_KEYS.contains(&key.as_str()) {
                tracing::warn!(
                    key = %format!("server.{key}"),
                    path = %path.display(),
                    "unknown configuration key ignored"
                );
            }
        }
    }
}

/// `$XDG_CONFIG_HOME/bunnylol/config.toml`, falling back to `~/.config/bunnylol/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join("config.toml"))
}

/// `$XDG_DATA_HOME/bunnylol/commands`, falling back to `~/.local/share/bunnylol/commands`.
pub fn default_user_plugin_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR_NAME).join("commands"))
}

/// `<install-prefix>/share/bunnylol/commands`, derived from the running executable's
/// location so the core works when installed under an arbitrary prefix.
pub fn default_system_plugin_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    let prefix = exe.parent()?.parent()?; // `<prefix>/bin/bunnylold` -> `<prefix>`
    Some(prefix.join("share").join(APP_DIR_NAME).join("commands"))
}
