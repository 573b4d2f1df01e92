//! Configuration sections with defaults and RON persistence.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const CONFIG_FILE: &str = "config.ron";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Level-of-detail and memory settings for the tileset.
    pub tileset: TilesetConfig,
    /// Content source and request concurrency.
    pub streaming: StreamingConfig,
    /// Viewport and scripted camera flight.
    pub view: ViewConfig,
    /// Logging and debug flags.
    pub debug: DebugConfig,
}

/// Tileset traversal options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TilesetConfig {
    /// Target screen-space error in pixels.
    pub maximum_screen_space_error: f64,
    /// Resident content budget in mebibytes.
    pub maximum_memory_usage_mb: u64,
    /// Allow descendants to load before their whole ancestry is ready.
    pub skip_level_of_detail: bool,
    /// Screen-space error that must be reached before skipping levels.
    pub base_screen_space_error: f64,
    /// Error ratio between a tile and its loaded ancestor required to skip.
    pub skip_screen_space_error_factor: f64,
    /// Minimum number of levels to skip.
    pub skip_levels: u32,
    /// Load only the desired tiles, never intermediate ones.
    pub immediately_load_desired_level_of_detail: bool,
    /// Load every sibling of a needed tile.
    pub load_siblings: bool,
    /// Cull a replacement tile when none of its children are visible.
    pub cull_with_children_bounds: bool,
    /// Relax the error target for distant tiles near the horizon.
    pub dynamic_screen_space_error: bool,
    pub dynamic_screen_space_error_density: f64,
    pub dynamic_screen_space_error_factor: f64,
    /// Fraction of the tileset height below which the relaxation applies fully.
    pub dynamic_screen_space_error_height_falloff: f64,
    /// Request deeper tiles before shallower ones.
    pub prefer_leaves: bool,
}

/// Content streaming configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamingConfig {
    /// Path of the root `tileset.json`.
    pub tileset_path: String,
    /// Worker threads for fetch and processing (0 = one per core minus two).
    pub worker_threads: usize,
    /// Fetches allowed in flight at once.
    pub maximum_concurrent_requests: usize,
}

/// Viewport and camera flight configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ViewConfig {
    /// Viewport width in pixels.
    pub width: u32,
    /// Viewport height in pixels.
    pub height: u32,
    /// Vertical field of view in degrees.
    pub fov_y_degrees: f64,
    /// Frames to simulate.
    pub flight_frames: u32,
    /// Camera distance from the tileset centre at the first frame, in metres.
    pub start_distance_m: f64,
    /// Camera distance from the tileset centre at the last frame, in metres.
    pub end_distance_m: f64,
    /// Simulated seconds per frame.
    pub frame_seconds: f64,
}

/// Debug/development configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    /// Log level override (e.g., "debug", "info", "strata_tiles=trace").
    pub log_level: String,
    /// Keep the previous frame's selection instead of traversing.
    pub freeze_frame: bool,
    /// Report bounding volumes of selected tiles to the renderer.
    pub show_bounding_volumes: bool,
    /// Log per-frame statistics every N frames (0 = never).
    pub statistics_interval: u32,
}

impl Default for TilesetConfig {
    fn default() -> Self {
        Self {
            maximum_screen_space_error: 16.0,
            maximum_memory_usage_mb: 512,
            skip_level_of_detail: false,
            base_screen_space_error: 1024.0,
            skip_screen_space_error_factor: 16.0,
            skip_levels: 1,
            immediately_load_desired_level_of_detail: false,
            load_siblings: false,
            cull_with_children_bounds: true,
            dynamic_screen_space_error: false,
            dynamic_screen_space_error_density: 2.0e-4,
            dynamic_screen_space_error_factor: 4.0,
            dynamic_screen_space_error_height_falloff: 0.25,
            prefer_leaves: false,
        }
    }
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            tileset_path: "tileset.json".to_string(),
            worker_threads: 0,
            maximum_concurrent_requests: 50,
        }
    }
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
            fov_y_degrees: 60.0,
            flight_frames: 240,
            start_distance_m: 5000.0,
            end_distance_m: 50.0,
            frame_seconds: 1.0 / 60.0,
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            freeze_frame: false,
            show_bounding_volumes: false,
            statistics_interval: 30,
        }
    }
}

/// Platform config directory for Strata, e.g. `~/.config/strata` on Linux.
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("strata"))
}

impl Config {
    /// Load config from the given directory, or create a default config file.
    pub fn load_or_create(config_dir: &Path) -> Result<Self, ConfigError> {
        let config_path = config_dir.join(CONFIG_FILE);

        if config_path.exists() {
            let config = Self::read(&config_path)?;
            log::info!("Loaded config from {}", config_path.display());
            Ok(config)
        } else {
            let config = Config::default();
            config.save(config_dir)?;
            log::info!("Created default config at {}", config_path.display());
            Ok(config)
        }
    }

    /// Save config to the given directory as `config.ron`.
    pub fn save(&self, config_dir: &Path) -> Result<(), ConfigError> {
        std::fs::create_dir_all(config_dir).map_err(|source| ConfigError::Write {
            path: config_dir.to_path_buf(),
            source,
        })?;

        let config_path = config_dir.join(CONFIG_FILE);
        let pretty = ron::ser::PrettyConfig::new()
            .depth_limit(2)
            .enumerate_arrays(false);
        let serialized = ron::ser::to_string_pretty(self, pretty).map_err(ConfigError::Serialize)?;

        std::fs::write(&config_path, serialized).map_err(|source| ConfigError::Write {
            path: config_path,
            source,
        })
    }

    /// Re-read the file; returns `Some(new_config)` only if it differs from `self`.
    pub fn reload(&self, config_dir: &Path) -> Result<Option<Self>, ConfigError> {
        let new_config = Self::read(&config_dir.join(CONFIG_FILE))?;
        if &new_config != self {
            log::info!("Config reloaded with changes");
            Ok(Some(new_config))
        } else {
            Ok(None)
        }
    }

    fn read(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        ron::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}
