//! Headless viewer that streams a 3D Tiles tileset along a scripted camera flight.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run with `cargo run -p strata-viewer -- --tileset path/to/tileset.json`.

mod file_source;
mod flight;
mod renderer;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use strata_config::{CliArgs, Config, default_config_dir};
use strata_tiles::{
    LoadPipeline, PassthroughProcessor, TaskRunner, TilesError, Tileset, TilesetOptions, WorkerPool,
};
use tracing::{error, info, warn};

use crate::file_source::FileSource;
use crate::flight::CameraFlight;
use crate::renderer::DrawCounter;

#[derive(Debug, thiserror::Error)]
enum ViewerError {
    #[error("failed to read tileset {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Tileset(#[from] TilesError),
}

fn build_tileset(config: &Config) -> Result<Tileset, ViewerError> {
    let options = TilesetOptions::try_from(&config.tileset)?;

    let path = &config.streaming.tileset_path;
    let bytes = std::fs::read(path).map_err(|source| ViewerError::Read {
        path: PathBuf::from(path),
        source,
    })?;

    let runner: Box<dyn TaskRunner> = match config.streaming.worker_threads {
        0 => Box::new(WorkerPool::with_defaults()),
        n => Box::new(WorkerPool::new(n)),
    };
    let pipeline = LoadPipeline::new(
        runner,
        Arc::new(FileSource),
        Arc::new(PassthroughProcessor),
        config.streaming.maximum_concurrent_requests,
    );

    let mut tileset = Tileset::from_json(&bytes, path.as_str(), options, pipeline)?;
    tileset.set_debug_freeze_frame(config.debug.freeze_frame);
    tileset.set_debug_show_bounding_volumes(config.debug.show_bounding_volumes);

    let events = tileset.events_mut();
    events.on_tile_failed(|failure| {
        warn!(url = %failure.url, "tile failed: {}", failure.message);
    });
    events.on_initial_tiles_loaded(|| info!("Initial tiles loaded"));
    Ok(tileset)
}

fn log_statistics(frame: u32, tileset: &Tileset, draws: &DrawCounter) {
    let stats = tileset.statistics();
    info!(
        frame,
        visited = stats.visited,
        selected = stats.selected,
        drawn = draws.tiles,
        back_faces = draws.back_face_passes,
        pending = stats.pending_requests,
        processing = stats.tiles_processing,
        ready = stats.tiles_with_content_ready,
        total = stats.tiles_total,
        memory_mb = stats.total_memory_bytes() as f64 / (1024.0 * 1024.0),
        "frame statistics"
    );
}

fn run(config: &Config) -> Result<(), ViewerError> {
    let mut tileset = build_tileset(config)?;
    let root = tileset.root();
    let target = tileset.tiles()[root].bounding_volume().center();
    let flight = CameraFlight::new(target, &config.view);
    let frame_time = Duration::from_secs_f64(config.view.frame_seconds.max(0.0));
    let interval = config.debug.statistics_interval;

    info!(
        "Flying {} frames from {:.0} m to {:.0} m",
        config.view.flight_frames, config.view.start_distance_m, config.view.end_distance_m
    );

    let start = Instant::now();
    let mut draws = DrawCounter::default();
    for frame in 0..config.view.flight_frames {
        let camera = flight.camera_at(frame);
        let time_seconds = f64::from(frame) * config.view.frame_seconds;
        tileset.update_frame(&camera, time_seconds);

        draws.begin_frame();
        tileset.render(&mut draws);

        if interval > 0 && frame % interval == 0 {
            log_statistics(frame, &tileset, &draws);
        }
        std::thread::sleep(frame_time);
    }

    let stats = tileset.statistics();
    info!(
        "Finished in {:.2?}: {} tiles drawn, {} of {} tiles resident, {:.1} MiB",
        start.elapsed(),
        draws.tiles,
        stats.tiles_with_content_ready,
        stats.tiles_total,
        stats.total_memory_bytes() as f64 / (1024.0 * 1024.0)
    );
    Ok(())
}

fn main() -> ExitCode {
    let args = CliArgs::parse();

    // Resolve config directory
    let config_dir = args
        .config
        .clone()
        .or_else(default_config_dir)
        .unwrap_or_else(|| PathBuf::from("."));

    // Load or create config, then apply CLI overrides
    let mut config = Config::load_or_create(&config_dir).unwrap_or_else(|e| {
        eprintln!("Failed to load config: {e}, using defaults");
        Config::default()
    });
    config.apply_cli_overrides(&args);

    let log_dir = config_dir.join("logs");
    strata_log::init_logging(Some(&log_dir), cfg!(debug_assertions), Some(&config));

    match run(&config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
