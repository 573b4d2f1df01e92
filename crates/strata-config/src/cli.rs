//! Command-line overrides for the viewer.

use std::path::PathBuf;

use clap::Parser;

use crate::Config;

/// Strata viewer command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "strata-viewer", about = "Stream a 3D Tiles tileset along a scripted camera flight")]
pub struct CliArgs {
    /// Path of the root tileset.json.
    #[arg(long)]
    pub tileset: Option<String>,

    /// Target screen-space error in pixels.
    #[arg(long)]
    pub max_sse: Option<f64>,

    /// Resident content budget in mebibytes.
    #[arg(long)]
    pub memory_mb: Option<u64>,

    /// Enable skipping levels of detail.
    #[arg(long)]
    pub skip_lod: Option<bool>,

    /// Enable dynamic screen-space error.
    #[arg(long)]
    pub dynamic_sse: Option<bool>,

    /// Worker threads for content loading.
    #[arg(long)]
    pub workers: Option<usize>,

    /// Maximum concurrent requests.
    #[arg(long)]
    pub max_requests: Option<usize>,

    /// Viewport width.
    #[arg(long)]
    pub width: Option<u32>,

    /// Viewport height.
    #[arg(long)]
    pub height: Option<u32>,

    /// Number of frames to simulate.
    #[arg(long)]
    pub frames: Option<u32>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref path) = args.tileset {
            self.streaming.tileset_path = path.clone();
        }
        if let Some(sse) = args.max_sse {
            self.tileset.maximum_screen_space_error = sse;
        }
        if let Some(mb) = args.memory_mb {
            self.tileset.maximum_memory_usage_mb = mb;
        }
        if let Some(skip) = args.skip_lod {
            self.tileset.skip_level_of_detail = skip;
        }
        if let Some(dynamic) = args.dynamic_sse {
            self.tileset.dynamic_screen_space_error = dynamic;
        }
        if let Some(workers) = args.workers {
            self.streaming.worker_threads = workers;
        }
        if let Some(requests) = args.max_requests {
            self.streaming.maximum_concurrent_requests = requests;
        }
        if let Some(w) = args.width {
            self.view.width = w;
        }
        if let Some(h) = args.height {
            self.view.height = h;
        }
        if let Some(frames) = args.frames {
            self.view.flight_frames = frames;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}
