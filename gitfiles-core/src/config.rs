use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Runtime configuration, read from `~/.config/gitfiles/config.json`.
///
/// Every field has a default, so a partial file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Plumber port that delivers open requests.
    pub port: String,
    /// Prints `file`, `directory` or nothing for `root treeish path`.
    pub stat_command: Vec<String>,
    /// Prints file content for `root treeish path`.
    pub get_command: Vec<String>,
    /// Extra argument making `get_command` list a directory.
    pub directory_flag: String,
    /// Filter applied to directory listings; empty to show them raw.
    pub directory_formatter: Vec<String>,
    /// Text written to the tag of every new window.
    pub tag: String,
    pub type_cache_capacity: usize,
    /// Plumb messages with at least this many bytes of data are dropped.
    pub max_message_bytes: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: String::from("gitfileedit"),
            stat_command: vec!["9".into(), "gitfilestat".into()],
            get_command: vec!["9".into(), "gitfileget".into()],
            directory_flag: String::from("-d"),
            directory_formatter: vec!["9".into(), "mc".into()],
            tag: String::from("Get Look "),
            type_cache_capacity: 64,
            max_message_bytes: 1024,
        }
    }
}

impl Config {
    /// Load the user's config, falling back to defaults when there is none.
    pub fn load() -> Self {
        match config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Invalid gitfiles config at {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

fn config_path() -> Option<PathBuf> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Some(PathBuf::from(xdg).join("gitfiles").join("config.json"));
        }
    }
    dirs::config_dir().map(|dir| dir.join("gitfiles").join("config.json"))
}
