//! Persistent artwork configuration model and defaults.

use std::path::{Path, PathBuf};

use log::{info, warn};

const APP_DIR_NAME: &str = "coverkeeper";

/// Root configuration persisted to `config.toml`.
#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct ArtworkConfig {
    #[serde(default = "default_cache_path")]
    pub cache_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Where local artwork lives.
    #[serde(default)]
    pub locations: LocationsConfig,
    /// How artwork is shown.
    #[serde(default)]
    pub display: DisplayConfig,
    /// Remote provider policy.
    #[serde(default)]
    pub remote: RemoteConfig,
    /// Consumer-side result pump pacing.
    #[serde(default)]
    pub pump: PumpConfig,
}

impl Default for ArtworkConfig {
    fn default() -> Self {
        Self {
            cache_path: default_cache_path(),
            log_level: default_log_level(),
            locations: LocationsConfig::default(),
            display: DisplayConfig::default(),
            remote: RemoteConfig::default(),
            pump: PumpConfig::default(),
        }
    }
}

/// Location rule the user prefers when several local images would match.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PreferredLocation {
    /// `{artist}-{album}.jpg` in the covers directory.
    #[default]
    HomeCovers,
    Cover,
    Album,
    Folder,
    /// `LocationsConfig::custom_filename` in the album directory.
    Custom,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct LocationsConfig {
    #[serde(default = "default_music_dir")]
    pub music_dir: PathBuf,
    #[serde(default = "default_covers_dir")]
    pub covers_dir: PathBuf,
    #[serde(default)]
    pub preferred_location: PreferredLocation,
    #[serde(default)]
    pub custom_filename: String,
}

impl Default for LocationsConfig {
    fn default() -> Self {
        Self {
            music_dir: default_music_dir(),
            covers_dir: default_covers_dir(),
            preferred_location: PreferredLocation::default(),
            custom_filename: String::new(),
        }
    }
}

/// Cosmetic treatment applied to decoded artwork.
#[derive(Debug, Clone, Copy, serde::Deserialize, serde::Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CoverStyle {
    Plain,
    /// Thin border plus padding to a square canvas.
    #[default]
    Bordered,
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct DisplayConfig {
    #[serde(default = "default_true")]
    pub show_covers: bool,
    #[serde(default = "default_library_thumb_size")]
    pub library_thumb_size: u32,
    #[serde(default = "default_now_playing_size")]
    pub now_playing_size: u32,
    #[serde(default)]
    pub cover_style: CoverStyle,
    /// Image cached for identities that fell back to the default icon.
    #[serde(default)]
    pub placeholder_image: Option<PathBuf>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            show_covers: true,
            library_thumb_size: default_library_thumb_size(),
            now_playing_size: default_now_playing_size(),
            cover_style: CoverStyle::default(),
            placeholder_image: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct RemoteConfig {
    /// Query remote providers when no local image exists.
    #[serde(default)]
    pub fallback_enabled: bool,
    #[serde(default)]
    pub theaudiodb_enabled: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            fallback_enabled: false,
            theaudiodb_enabled: false,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct PumpConfig {
    #[serde(default = "default_pump_interval_ms")]
    pub interval_ms: u32,
    /// Maximum results applied per tick.
    #[serde(default = "default_pump_batch_size")]
    pub batch_size: usize,
    /// Maximum library rows submitted per tick.
    #[serde(default = "default_submission_chunk")]
    pub submission_chunk: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_pump_interval_ms(),
            batch_size: default_pump_batch_size(),
            submission_chunk: default_submission_chunk(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_music_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
}

fn default_covers_dir() -> PathBuf {
    dirs::home_dir()
        .map(|home| home.join(".covers"))
        .unwrap_or_else(|| PathBuf::from(".covers"))
}

fn default_cache_path() -> PathBuf {
    config_root().join("art_cache.json")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_library_thumb_size() -> u32 {
    64
}

fn default_now_playing_size() -> u32 {
    75
}

fn default_request_timeout_ms() -> u32 {
    7_000
}

fn default_pump_interval_ms() -> u32 {
    500
}

fn default_pump_batch_size() -> usize {
    20
}

fn default_submission_chunk() -> usize {
    50
}

fn config_root() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR_NAME)
}

/// Default location of `config.toml`.
pub fn default_config_file() -> PathBuf {
    config_root().join("config.toml")
}

impl ArtworkConfig {
    /// Covers fetched for the "choose artwork" dialog land here.
    pub fn covers_temp_dir(&self) -> PathBuf {
        self.locations.covers_dir.join("temp")
    }

    pub fn log_level_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse::<log::LevelFilter>()
            .unwrap_or(log::LevelFilter::Info)
    }
}

/// Clamps values the pipeline divides or iterates by.
pub fn sanitize_config(mut config: ArtworkConfig) -> ArtworkConfig {
    config.display.library_thumb_size = config.display.library_thumb_size.max(1);
    config.display.now_playing_size = config.display.now_playing_size.max(1);
    config.pump.interval_ms = config.pump.interval_ms.max(1);
    config.pump.batch_size = config.pump.batch_size.max(1);
    config.pump.submission_chunk = config.pump.submission_chunk.max(1);
    config.remote.request_timeout_ms = config.remote.request_timeout_ms.max(100);
    config
}

/// Loads `config.toml`, writing a default file first when none exists.
pub fn load_or_create_config(config_file: &Path) -> ArtworkConfig {
    if !config_file.exists() {
        let default_config = ArtworkConfig::default();
        info!(
            "Config file not found. Creating default config. path={}",
            config_file.display()
        );
        if let Some(parent) = config_file.parent() {
            if let Err(err) = std::fs::create_dir_all(parent) {
                warn!(
                    "Failed creating config directory {}: {}",
                    parent.display(),
                    err
                );
            }
        }
        match toml::to_string(&default_config) {
            Ok(serialized) => {
                if let Err(err) = std::fs::write(config_file, serialized) {
                    warn!(
                        "Failed writing default config {}: {}",
                        config_file.display(),
                        err
                    );
                }
            }
            Err(err) => warn!("Failed serializing default config: {}", err),
        }
        return default_config;
    }

    let config = match std::fs::read_to_string(config_file) {
        Ok(content) => toml::from_str::<ArtworkConfig>(&content).unwrap_or_else(|err| {
            warn!(
                "Failed parsing config {}: {}. Using defaults",
                config_file.display(),
                err
            );
            ArtworkConfig::default()
        }),
        Err(err) => {
            warn!(
                "Failed reading config {}: {}. Using defaults",
                config_file.display(),
                err
            );
            ArtworkConfig::default()
        }
    };
    sanitize_config(config)
}
