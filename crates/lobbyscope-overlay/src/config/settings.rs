//! User settings stored as TOML
//!
//! The file lives at `<config_dir>/lobbyscope/settings.toml` unless a path is
//! given on the command line. A missing file is created with defaults.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use lobbyscope_stats::{RankingConfig, ResolverConfig, TtlPolicy};

/// Value written for the Hypixel key until the user sets one
pub const PLACEHOLDER_API_KEY: &str = "insert-your-key-here";

const MIN_CONCURRENT_FETCHES: usize = 2;
const MAX_CONCURRENT_FETCHES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine the config directory")]
    NoConfigDir,

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize settings: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("failed to write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// A manual denick
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NickEntry {
    pub username: String,
    #[serde(default)]
    pub comment: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub hypixel_api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub antisniper_api_key: Option<String>,
    pub use_antisniper_api: bool,
    pub estimate_winstreaks: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logfile: Option<PathBuf>,

    pub stats_ttl_secs: u64,
    pub network_error_ttl_secs: u64,
    pub not_found_ttl_secs: u64,
    pub rate_limited_ttl_secs: u64,

    pub max_concurrent_fetches: usize,
    pub highlight_threshold: f64,
    pub tier_thresholds: Vec<f64>,
    pub debounce_ms: u64,
    pub hide_dead_players: bool,

    /// Nick (any case) -> real account
    pub known_nicks: BTreeMap<String, NickEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        let cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(MIN_CONCURRENT_FETCHES);

        Self {
            hypixel_api_key: PLACEHOLDER_API_KEY.to_string(),
            antisniper_api_key: None,
            use_antisniper_api: false,
            estimate_winstreaks: false,
            logfile: None,
            stats_ttl_secs: 600,
            network_error_ttl_secs: 15,
            not_found_ttl_secs: 120,
            rate_limited_ttl_secs: 60,
            max_concurrent_fetches: cpus.clamp(MIN_CONCURRENT_FETCHES, MAX_CONCURRENT_FETCHES),
            highlight_threshold: 1000.0,
            tier_thresholds: vec![50.0, 300.0, 1000.0, 3000.0],
            debounce_ms: 100,
            hide_dead_players: false,
            known_nicks: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Default settings file location
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
        Ok(dir.join("lobbyscope").join("settings.toml"))
    }

    /// Read settings, writing defaults first if the file does not exist
    pub fn load_or_create(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "creating default settings");
            let settings = Self::default();
            settings.save(path)?;
            return Ok(settings);
        }

        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, content).map_err(write_err)
    }

    /// Whether a real Hypixel key has been entered
    pub fn has_hypixel_key(&self) -> bool {
        let key = self.hypixel_api_key.trim();
        !key.is_empty() && key != PLACEHOLDER_API_KEY
    }

    /// Antisniper key, if the service is enabled
    pub fn antisniper_key(&self) -> Option<&str> {
        if !self.use_antisniper_api {
            return None;
        }
        self.antisniper_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    /// Add, replace, or with `None` remove a manual denick
    pub fn set_known_nick(&mut self, nick: &str, username: Option<&str>) {
        // Keys are matched without case, so drop any differently-cased twin
        self.known_nicks.retain(|key, _| !key.eq_ignore_ascii_case(nick));

        if let Some(username) = username {
            self.known_nicks.insert(
                nick.to_string(),
                NickEntry {
                    username: username.to_string(),
                    comment: String::new(),
                },
            );
        }
    }

    pub fn ttl_policy(&self) -> TtlPolicy {
        TtlPolicy {
            stats: Duration::from_secs(self.stats_ttl_secs),
            not_found: Duration::from_secs(self.not_found_ttl_secs),
            rate_limited: Duration::from_secs(self.rate_limited_ttl_secs),
            network_error: Duration::from_secs(self.network_error_ttl_secs),
        }
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_concurrent: self.max_concurrent_fetches.max(1),
            estimate_winstreaks: self.estimate_winstreaks,
        }
    }

    pub fn ranking_config(&self) -> RankingConfig {
        let mut tier_thresholds = self.tier_thresholds.clone();
        tier_thresholds.sort_by(f64::total_cmp);

        RankingConfig {
            highlight_threshold: self.highlight_threshold,
            tier_thresholds,
            hide_dead: self.hide_dead_players,
            ..RankingConfig::default()
        }
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

/// Settings shared between the CLI and runtime nick overrides
pub struct SettingsStore {
    path: PathBuf,
    settings: Mutex<Settings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf, settings: Settings) -> Self {
        Self {
            path,
            settings: Mutex::new(settings),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Settings {
        self.settings.lock().clone()
    }

    /// Record a manual denick and write the file
    pub fn set_known_nick(&self, nick: &str, username: Option<&str>) -> Result<(), ConfigError> {
        let mut settings = self.settings.lock();
        settings.set_known_nick(nick, username);
        settings.save(&self.path)
    }
}
