//! The tileset: hierarchy, resident content and the per-frame update.
//!
//! [`Tileset::update_frame`] runs once per rendered frame on the frame
//! thread. It applies finished content work, traverses the hierarchy,
//! issues prioritised requests, cancels requests for tiles that left the
//! view, reports load progress and finally evicts least recently used
//! content while over the memory budget. [`Tileset::render`] then submits
//! the selection.

use glam::DMat4;

use crate::arena::{Attachment, TileArena};
use crate::cache::ResidentCache;
use crate::camera::FrameCamera;
use crate::content::ContentMemory;
use crate::document::TilesetDocument;
use crate::dynamic_sse;
use crate::error::{ContentError, StructuralError, TilesResult};
use crate::events::{LoadProgress, TileFailure, TilesetEvents};
use crate::frame::FrameContext;
use crate::options::TilesetOptions;
use crate::pipeline::{Completion, LoadPipeline};
use crate::priority::{PreferredSorting, PriorityKey, compute_priority};
use crate::render::{self, TileRenderer};
use crate::statistics::Statistics;
use crate::tile::{ContentState, Refinement, Tile, TileId};
use crate::traversal::{Traversal, TraversalContext};

/// A streamed 3D Tiles tileset.
pub struct Tileset {
    tiles: TileArena,
    root: TileId,
    base_uri: String,
    model_matrix: DMat4,
    options: TilesetOptions,
    pipeline: LoadPipeline,
    cache: ResidentCache,
    statistics: Statistics,
    traversal: Traversal,
    events: TilesetEvents,
    frame_number: u64,
    /// Tiles whose request was issued and may still be outstanding.
    requested_in_flight: Vec<TileId>,
    last_progress: LoadProgress,
    tiles_loaded: bool,
    initial_tiles_loaded: bool,
    all_tiles_additive: bool,
    debug_freeze_frame: bool,
    debug_show_bounding_volumes: bool,
}

impl Tileset {
    /// Parse a root tileset document and build the hierarchy.
    ///
    /// Content locators resolve against `base_uri`, normally the locator
    /// the document itself was read from.
    pub fn from_json(
        bytes: &[u8],
        base_uri: impl Into<String>,
        options: TilesetOptions,
        pipeline: LoadPipeline,
    ) -> TilesResult<Self> {
        let document = TilesetDocument::parse(bytes)?;
        Self::from_document(&document, base_uri, options, pipeline)
    }

    /// Build a tileset from an already parsed document.
    pub fn from_document(
        document: &TilesetDocument,
        base_uri: impl Into<String>,
        options: TilesetOptions,
        pipeline: LoadPipeline,
    ) -> TilesResult<Self> {
        let base_uri = base_uri.into();
        let mut tiles = TileArena::new();
        let root = tiles.insert_document(document, &base_uri, None, &DMat4::IDENTITY)?;

        let statistics = Statistics {
            tiles_total: tiles.len(),
            ..Statistics::default()
        };
        tracing::info!(
            tiles = tiles.len(),
            base_uri = %base_uri,
            geometric_error = ?document.geometric_error,
            "tileset loaded"
        );

        let mut tileset = Self {
            tiles,
            root,
            base_uri,
            model_matrix: DMat4::IDENTITY,
            options,
            pipeline,
            cache: ResidentCache::new(),
            statistics,
            traversal: Traversal::default(),
            events: TilesetEvents::default(),
            frame_number: 0,
            requested_in_flight: Vec::new(),
            last_progress: LoadProgress::default(),
            tiles_loaded: false,
            initial_tiles_loaded: false,
            all_tiles_additive: false,
            debug_freeze_frame: false,
            debug_show_bounding_volumes: false,
        };
        tileset.update_all_tiles_additive();
        Ok(tileset)
    }

    /// Root tile of the outermost document.
    pub fn root(&self) -> TileId {
        self.root
    }

    /// Tile behind `id`, unless it was destroyed.
    pub fn tile(&self, id: TileId) -> Option<&Tile> {
        self.tiles.get(id)
    }

    /// Every live tile, nested tilesets included.
    pub fn tiles(&self) -> &TileArena {
        &self.tiles
    }

    /// Locator the root document was read from.
    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    /// Current options.
    pub fn options(&self) -> &TilesetOptions {
        &self.options
    }

    /// Options take effect on the next [`update_frame`](Self::update_frame).
    pub fn options_mut(&mut self) -> &mut TilesetOptions {
        &mut self.options
    }

    /// Counters from the most recent frame plus persistent totals.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }

    /// Register notification listeners.
    pub fn events_mut(&mut self) -> &mut TilesetEvents {
        &mut self.events
    }

    /// Load pipeline, for request counters.
    pub fn pipeline(&self) -> &LoadPipeline {
        &self.pipeline
    }

    /// Mutable load pipeline, for changing the request cap.
    pub fn pipeline_mut(&mut self) -> &mut LoadPipeline {
        &mut self.pipeline
    }

    /// Tiles currently holding content, least recent first.
    pub fn cache(&self) -> &ResidentCache {
        &self.cache
    }

    /// Frames updated so far.
    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Tiles drawn by the last update, in selection order.
    pub fn selected_tiles(&self) -> &[TileId] {
        &self.traversal.selection.selected
    }

    /// Tiles the last update asked to load, in priority order.
    pub fn requested_tiles(&self) -> &[TileId] {
        &self.traversal.selection.requested
    }

    /// Tiles at different selection depths overlap in the last selection.
    pub fn has_mixed_content(&self) -> bool {
        self.traversal.selection.has_mixed_content
    }

    /// No content work was outstanding at the end of the last update.
    pub fn tiles_loaded(&self) -> bool {
        self.tiles_loaded
    }

    /// Skipping is requested and at least one tile replaces its parent.
    pub fn skip_level_of_detail(&self) -> bool {
        self.options.skip_level_of_detail() && !self.all_tiles_additive
    }

    /// Transform applied on top of the root's own transform.
    pub fn model_matrix(&self) -> &DMat4 {
        &self.model_matrix
    }

    /// Place the whole tileset in the world.
    pub fn set_model_matrix(&mut self, model: DMat4) {
        self.model_matrix = model;
        self.tiles.update_transforms(self.root, &model);
    }

    /// Keep the previous selection instead of traversing.
    pub fn set_debug_freeze_frame(&mut self, freeze: bool) {
        self.debug_freeze_frame = freeze;
    }

    /// Whether selection is frozen.
    pub fn debug_freeze_frame(&self) -> bool {
        self.debug_freeze_frame
    }

    /// Report bounding volumes of visited tiles to the renderer.
    pub fn set_debug_show_bounding_volumes(&mut self, show: bool) {
        self.debug_show_bounding_volumes = show;
    }

    /// Mark all ready content stale so it reloads when next needed.
    pub fn expire_all(&mut self) -> usize {
        let expired = self.tiles.iter_mut().map(Tile::expire).filter(|expired| *expired).count();
        tracing::debug!(expired, "expired tileset content");
        expired
    }

    /// Evict every tile not used in the next frame, regardless of budget.
    pub fn trim_loaded_tiles(&mut self) {
        self.cache.trim();
    }

    /// Advance one frame with the given camera and host clock.
    pub fn update_frame(&mut self, camera: &FrameCamera, time_seconds: f64) {
        self.frame_number += 1;
        let _span = tracing::trace_span!("update_frame", frame = self.frame_number).entered();

        self.cache.begin_frame(self.frame_number);
        self.statistics.clear();

        self.process_content(time_seconds);

        let mut frame = FrameContext::new(self.frame_number, camera.clone(), time_seconds);
        if self.options.dynamic_screen_space_error() {
            let root = &self.tiles[self.root];
            frame.dynamic_sse = Some(dynamic_sse::compute_term(
                root.local_bounding_volume(),
                root.computed_transform(),
                camera,
                self.options.dynamic_screen_space_error_settings(),
            ));
        }

        if self.debug_freeze_frame {
            self.traversal.selection.requested.clear();
        } else {
            let skip_level_of_detail = self.skip_level_of_detail();
            let mut ctx = TraversalContext {
                tiles: &mut self.tiles,
                cache: &mut self.cache,
                statistics: &mut self.statistics,
                options: &self.options,
                frame: &frame,
                root: self.root,
                skip_level_of_detail,
            };
            self.traversal.select_tiles(&mut ctx);
        }

        self.request_tiles();
        self.update_selected_tiles();
        self.cancel_out_of_view_requests();
        self.raise_load_progress();
        self.unload_tiles();

        tracing::trace!(
            selected = self.statistics.selected,
            visited = self.statistics.visited,
            requested = self.traversal.selection.requested.len(),
            resident_bytes = self.cache.resident_bytes(),
            "frame updated"
        );
    }

    /// Submit the last selection, then debug bounds when enabled.
    pub fn render(&self, renderer: &mut dyn TileRenderer) {
        let selection = &self.traversal.selection;
        let resolve_mixed_depths = self.skip_level_of_detail() && selection.has_mixed_content;
        render::submit(&self.tiles, &selection.selected, resolve_mixed_depths, renderer);

        if self.debug_show_bounding_volumes {
            for id in selection.selected.iter().chain(&selection.empty) {
                if let Some(tile) = self.tiles.get(*id) {
                    renderer.draw_bounding_volume(tile);
                }
            }
        }
    }

    fn update_all_tiles_additive(&mut self) {
        self.all_tiles_additive = self.tiles.iter().all(|t| t.refinement() == Refinement::Add);
    }

    fn process_content(&mut self, now: f64) {
        let completions = self
            .pipeline
            .process_completions(&mut self.tiles, &mut self.statistics, now);
        for completion in completions {
            match completion {
                Completion::Ready { tile, stale } => self.handle_tile_ready(tile, stale.map(|c| c.memory())),
                Completion::Failed { tile, error, stale } => {
                    self.handle_tile_failed(tile, &error, stale.map(|c| c.memory()));
                }
                Completion::TilesetJson { tile, bytes } => self.handle_tileset_json(tile, &bytes, now),
            }
        }
        self.pipeline.filter_processing_queue(&self.tiles);
    }

    fn handle_tile_ready(&mut self, id: TileId, stale: Option<ContentMemory>) {
        if let Some(stale) = stale {
            self.statistics.decrement_load_counts(stale);
        }
        let Some(tile) = self.tiles.get(id) else {
            return;
        };
        let memory = tile.content().map(|c| c.memory()).unwrap_or_default();
        self.statistics.increment_load_counts(memory);
        self.cache.add(id, memory.total());
        tracing::debug!(tile = ?id, bytes = memory.total(), "tile content ready");
        self.events.raise_tile_loaded(tile);
    }

    fn handle_tile_failed(&mut self, id: TileId, error: &ContentError, stale: Option<ContentMemory>) {
        if let Some(stale) = stale {
            self.statistics.decrement_load_counts(stale);
            self.cache.remove(id);
        }
        let url = match error {
            ContentError::Fetch { uri, .. } | ContentError::Process { uri, .. } => uri.clone(),
            ContentError::Cancelled => self
                .tiles
                .get(id)
                .and_then(Tile::content_uri)
                .unwrap_or_default()
                .to_string(),
        };
        self.events.raise_tile_failed(&TileFailure {
            tile: id,
            url,
            message: error.message().to_string(),
        });
    }

    fn handle_tileset_json(&mut self, id: TileId, bytes: &[u8], now: f64) {
        let result = self.attach_external_tileset(id, bytes).map_err(|e| ContentError::Process {
            uri: self
                .tiles
                .get(id)
                .and_then(Tile::content_uri)
                .unwrap_or_default()
                .to_string(),
            message: e.to_string(),
        });

        let Some(tile) = self.tiles.get_mut(id) else {
            return;
        };
        match self
            .pipeline
            .finish_tileset_content(tile, &mut self.statistics, result, now)
        {
            Some(Completion::Failed { tile, error, stale }) => {
                self.handle_tile_failed(tile, &error, stale.map(|c| c.memory()));
            }
            Some(_) => {}
            None => {
                if let Some(tile) = self.tiles.get(id)
                    && tile.content_ready()
                {
                    self.events.raise_tile_loaded(tile);
                }
            }
        }
    }

    /// Parse nested tileset bytes and hang the document's root below `id`.
    fn attach_external_tileset(&mut self, id: TileId, bytes: &[u8]) -> Result<(), StructuralError> {
        let document = TilesetDocument::parse(bytes)?;
        let Some(tile) = self.tiles.get(id) else {
            return Ok(());
        };
        let base_uri = tile.content_uri().unwrap_or_default().to_string();
        let attachment = Attachment {
            parent: id,
            depth: tile.depth() + 1,
            refine: tile.refinement(),
            geometric_error: tile.geometric_error(),
            transform: *tile.computed_transform(),
        };

        let before = self.tiles.len();
        self.tiles
            .insert_document(&document, &base_uri, Some(attachment), &DMat4::IDENTITY)?;
        let added = self.tiles.len() - before;
        self.statistics.tiles_total += added;
        self.update_all_tiles_additive();
        tracing::debug!(tile = ?id, uri = %base_uri, tiles = added, "external tileset attached");
        Ok(())
    }

    /// Prioritise this frame's requests and issue them in order.
    fn request_tiles(&mut self) {
        let bounds = self.traversal.selection.priority_bounds;
        let prefer_leaves = self.options.prefer_leaves();
        let skip_level_of_detail = self.skip_level_of_detail();
        let mut requested = std::mem::take(&mut self.traversal.selection.requested);

        for &id in &requested {
            let Some(tile) = self.tiles.get(id) else {
                continue;
            };
            let distance = tile
                .frame
                .priority_holder
                .and_then(|holder| self.tiles.get(holder))
                .map_or(tile.frame.distance_to_camera, |holder| holder.frame.priority_distance);
            let sorting = if !skip_level_of_detail && tile.refinement() == Refinement::Replace {
                PreferredSorting::Distance
            } else {
                PreferredSorting::ReverseScreenSpaceError
            };
            let key = PriorityKey {
                distance,
                depth: f64::from(tile.depth()),
                reverse_screen_space_error: tile.frame.priority_reverse_screen_space_error,
            };
            let priority = compute_priority(&key, &bounds, sorting, prefer_leaves);
            self.tiles[id].frame.priority = priority;
        }

        let tiles = &self.tiles;
        requested.sort_by(|a, b| {
            let priority = |id: &TileId| tiles.get(*id).map_or(f64::MAX, |t| t.frame.priority);
            priority(a).total_cmp(&priority(b))
        });

        for &id in &requested {
            self.request_content(id);
        }
        self.traversal.selection.requested = requested;
    }

    fn request_content(&mut self, id: TileId) {
        // An expired nested tileset earlier in the list may have removed this tile.
        let Some(tile) = self.tiles.get_mut(id) else {
            return;
        };
        if tile.has_empty_content() {
            return;
        }
        let expired = tile.content_expired();
        if !self.pipeline.request_content(tile, &mut self.statistics) {
            self.statistics.attempted_requests += 1;
            return;
        }
        if expired && tile.has_tileset_content() {
            self.destroy_subtree(id);
        }
        self.requested_in_flight.push(id);
    }

    /// Drop the tiles of a nested tileset that is about to be reloaded.
    fn destroy_subtree(&mut self, id: TileId) {
        let removed = self.tiles.remove_descendants(id);
        for mut tile in removed {
            self.pipeline.forget(&mut tile, &mut self.statistics);
            if let Some(content) = tile.content() {
                self.statistics.decrement_load_counts(content.memory());
            }
            self.cache.remove(tile.id());
            self.statistics.tiles_total = self.statistics.tiles_total.saturating_sub(1);
        }
        self.update_all_tiles_additive();
    }

    fn update_selected_tiles(&mut self) {
        for &id in &self.traversal.selection.selected {
            let Some(tile) = self.tiles.get_mut(id) else {
                continue;
            };
            if self.debug_freeze_frame {
                // Frozen tiles are never visited, so keep them resident here.
                self.cache.touch(id);
            }
            self.events.raise_tile_visible(tile);
        }
    }

    /// Cancel fetches for tiles no longer touched by traversal.
    fn cancel_out_of_view_requests(&mut self) {
        let frame_number = self.frame_number;
        let tiles = &mut self.tiles;
        let pipeline = &mut self.pipeline;
        let statistics = &mut self.statistics;
        self.requested_in_flight.retain(|&id| {
            let Some(tile) = tiles.get_mut(id) else {
                return false;
            };
            if tile.content_state() != ContentState::Loading {
                return false;
            }
            if tile.frame.touched_frame < frame_number {
                pipeline.cancel(tile, statistics);
                return false;
            }
            true
        });
    }

    fn raise_load_progress(&mut self) {
        let progress = LoadProgress {
            pending_requests: self.statistics.pending_requests,
            tiles_processing: self.statistics.tiles_processing,
        };
        if progress != self.last_progress {
            self.last_progress = progress;
            self.events.raise_load_progress(progress);
        }

        let loaded = self.statistics.is_idle();
        if loaded && !self.tiles_loaded {
            self.events.raise_all_tiles_loaded();
            if !self.initial_tiles_loaded {
                self.initial_tiles_loaded = true;
                tracing::info!(frame = self.frame_number, "initial tiles loaded");
                self.events.raise_initial_tiles_loaded();
            }
        }
        self.tiles_loaded = loaded;
    }

    fn unload_tiles(&mut self) {
        let Self {
            tiles,
            cache,
            statistics,
            events,
            pipeline,
            options,
            ..
        } = self;
        let evicted = cache.unload(options.maximum_memory_usage(), |id, _bytes| {
            let Some(tile) = tiles.get_mut(id) else {
                return;
            };
            events.raise_tile_unloaded(tile);
            if tile.request.is_some() {
                pipeline.forget(tile, statistics);
            }
            if let Some(content) = tile.unload_content() {
                statistics.decrement_load_counts(content.memory());
            }
        });
        if evicted > 0 {
            tracing::debug!(evicted, resident_bytes = cache.resident_bytes(), "tile content evicted");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::PassthroughProcessor;
    use crate::dynamic_sse::DynamicSseSettings;
    use crate::executor::{ContentTask, InlineRunner, TaskRunner};
    use crate::pipeline::ContentEvent;
    use crate::test_support::{MapSource, quad_tree_json};
    use glam::DVec3;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    const TILE_BYTES: usize = 4;

    fn camera_above(height: f64) -> FrameCamera {
        FrameCamera::look_at(
            DVec3::new(0.0, 0.0, height),
            DVec3::ZERO,
            DVec3::Y,
            std::f64::consts::FRAC_PI_3,
            1000,
            1000,
        )
    }

    fn camera_facing_away() -> FrameCamera {
        FrameCamera::look_at(
            DVec3::new(0.0, 0.0, 1000.0),
            DVec3::new(0.0, 0.0, 2000.0),
            DVec3::Y,
            std::f64::consts::FRAC_PI_3,
            1000,
            1000,
        )
    }

    fn quad_tree_source() -> MapSource {
        ["root.b3dm", "c0.b3dm", "c1.b3dm", "c2.b3dm", "c3.b3dm"]
            .into_iter()
            .fold(MapSource::default(), |source, uri| source.with(uri, vec![7; TILE_BYTES]))
    }

    fn build(json: &str, base_uri: &str, source: MapSource, runner: Box<dyn TaskRunner>, options: TilesetOptions) -> Tileset {
        let pipeline = LoadPipeline::new(runner, Arc::new(source), Arc::new(PassthroughProcessor), 50);
        Tileset::from_json(json.as_bytes(), base_uri, options, pipeline).unwrap()
    }

    fn quad_tree(options: TilesetOptions) -> Tileset {
        build(
            &quad_tree_json(100.0, 10.0),
            "",
            quad_tree_source(),
            Box::new(InlineRunner::new()),
            options,
        )
    }

    fn run(tileset: &mut Tileset, camera: &FrameCamera, frames: usize) {
        for _ in 0..frames {
            tileset.update_frame(camera, 0.0);
        }
    }

    fn counter() -> (Rc<Cell<usize>>, Rc<Cell<usize>>) {
        let count = Rc::new(Cell::new(0));
        (Rc::clone(&count), count)
    }

    /// Runner that holds every task until released.
    #[derive(Clone, Default)]
    struct GatedRunner {
        tasks: Arc<Mutex<Vec<ContentTask>>>,
        open: Arc<AtomicBool>,
    }

    impl TaskRunner for GatedRunner {
        fn spawn(&mut self, task: ContentTask) {
            self.tasks.lock().unwrap().push(task);
        }

        fn drain(&mut self, completed: &mut Vec<ContentEvent>) {
            if !self.open.load(Ordering::Relaxed) {
                return;
            }
            let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
            completed.extend(tasks.into_iter().map(|task| task()));
        }

        fn in_flight(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }
    }

    /// Replacement refinement draws either the parent or every child, never a partial set.
    #[test]
    fn test_replace_refinement_has_no_holes() {
        let mut tileset = quad_tree(TilesetOptions::default());
        let root = tileset.root();
        let children = tileset.tiles()[root].children().to_vec();
        let camera = camera_above(1000.0);

        for _ in 0..8 {
            tileset.update_frame(&camera, 0.0);
            let mut selected = tileset.selected_tiles().to_vec();
            selected.sort();
            let mut all_children = children.clone();
            all_children.sort();
            assert!(
                selected.is_empty() || selected == vec![root] || selected == all_children,
                "partial selection {selected:?}"
            );
        }

        let mut selected = tileset.selected_tiles().to_vec();
        selected.sort();
        let mut expected = children;
        expected.sort();
        assert_eq!(selected, expected);
        assert!(tileset.tiles_loaded());
        assert_eq!(tileset.statistics().tiles_with_content_ready, 5);
        assert_eq!(tileset.statistics().geometry_bytes, 5 * TILE_BYTES as u64);
    }

    /// Requests are issued in ascending priority.
    #[test]
    fn test_requests_sorted_by_priority() {
        let mut tileset = quad_tree(TilesetOptions::default());
        tileset.update_frame(&camera_above(1000.0), 0.0);
        let requested = tileset.requested_tiles();
        assert!(!requested.is_empty());
        let priorities: Vec<f64> = requested.iter().map(|id| tileset.tiles()[*id].frame.priority).collect();
        assert!(priorities.windows(2).all(|w| w[0] <= w[1]), "{priorities:?}");
        assert_eq!(tileset.statistics().pending_requests, requested.len());
    }

    /// The root refines exactly when its projected error crosses the target.
    #[test]
    fn test_refinement_threshold() {
        let mut tileset = quad_tree(TilesetOptions::default());
        let root = tileset.root();
        run(&mut tileset, &camera_above(1000.0), 8);

        // 100 * 1000 / (d * 2 tan 30°) == 16 at this distance to the box top.
        let threshold = 100.0 * 1000.0 / (16.0 * 2.0 * std::f64::consts::FRAC_PI_6.tan());
        let epsilon = 1e-3;

        tileset.update_frame(&camera_above(threshold + 10.0 - epsilon), 0.0);
        assert_eq!(tileset.selected_tiles().len(), 4);
        assert!(!tileset.selected_tiles().contains(&root));

        tileset.update_frame(&camera_above(threshold + 10.0 + epsilon), 0.0);
        assert_eq!(tileset.selected_tiles(), &[root]);
    }

    /// Flying far out after settling close draws the resident root again.
    #[test]
    fn test_far_camera_draws_root() {
        let mut tileset = quad_tree(TilesetOptions::default());
        let root = tileset.root();
        run(&mut tileset, &camera_above(1000.0), 6);
        assert_eq!(tileset.selected_tiles().len(), 4);

        run(&mut tileset, &camera_above(200_000.0), 3);
        assert_eq!(tileset.selected_tiles(), &[root]);
        assert!(tileset.requested_tiles().is_empty());
    }

    /// A low camera looking at the horizon relaxes the error of distant
    /// tiles enough that the root no longer refines.
    #[test]
    fn test_dynamic_screen_space_error_stops_refinement() {
        // 2 km from the box edge the root projects to 43 px.
        let camera = FrameCamera::look_at(
            DVec3::new(-2100.0, 0.0, 5.0),
            DVec3::new(0.0, 0.0, 5.0),
            DVec3::Z,
            std::f64::consts::FRAC_PI_3,
            1000,
            1000,
        );

        let mut fixed = quad_tree(TilesetOptions::default());
        run(&mut fixed, &camera, 8);
        assert_eq!(fixed.selected_tiles().len(), 4);

        let mut options = TilesetOptions::default();
        options.set_dynamic_screen_space_error(true);
        options
            .set_dynamic_screen_space_error_settings(DynamicSseSettings {
                density: 3.0e-3,
                factor: 64.0,
                height_falloff: 0.25,
            })
            .unwrap();
        let mut dynamic = quad_tree(options);
        let root = dynamic.root();
        run(&mut dynamic, &camera, 8);
        assert_eq!(dynamic.selected_tiles(), &[root]);
        assert!(dynamic.tiles().iter().filter(|t| t.id() != root).all(Tile::content_unloaded));
    }

    /// With a zero budget only tiles left untouched by traversal are evicted.
    #[test]
    fn test_zero_budget_keeps_touched_tiles() {
        let mut options = TilesetOptions::default();
        options.set_maximum_memory_usage(0);
        let mut tileset = quad_tree(options);
        let (unloaded, seen) = counter();
        tileset.events_mut().on_tile_unloaded(move |_| seen.set(seen.get() + 1));

        run(&mut tileset, &camera_above(1000.0), 8);
        assert_eq!(tileset.cache().len(), 5);
        assert_eq!(unloaded.get(), 0);

        tileset.update_frame(&camera_facing_away(), 0.0);
        assert!(tileset.selected_tiles().is_empty());
        assert!(tileset.cache().is_empty());
        assert_eq!(unloaded.get(), 5);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 0);
        assert_eq!(tileset.statistics().total_memory_bytes(), 0);
        assert!(tileset.tiles().iter().all(Tile::content_unloaded));
    }

    /// An evicted tile is requested again once it is needed.
    #[test]
    fn test_evicted_tile_reloads() {
        let mut options = TilesetOptions::default();
        options.set_maximum_memory_usage(0);
        let mut tileset = quad_tree(options);
        let close = camera_above(1000.0);
        run(&mut tileset, &close, 8);
        tileset.update_frame(&camera_facing_away(), 0.0);
        assert!(tileset.cache().is_empty());

        tileset.update_frame(&close, 0.0);
        let root = tileset.root();
        assert!(tileset.requested_tiles().contains(&root));
        assert_eq!(tileset.tiles()[root].content_state(), ContentState::Loading);

        run(&mut tileset, &close, 8);
        assert_eq!(tileset.selected_tiles().len(), 4);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 5);
    }

    /// Cancelled requests complete later without touching any counter.
    #[test]
    fn test_cancelled_requests_are_not_counted() {
        let runner = GatedRunner::default();
        let gate = Arc::clone(&runner.open);
        let mut tileset = build(
            &quad_tree_json(100.0, 10.0),
            "",
            quad_tree_source(),
            Box::new(runner),
            TilesetOptions::default(),
        );

        tileset.update_frame(&camera_above(1000.0), 0.0);
        let issued = tileset.statistics().pending_requests;
        assert!(issued > 0);

        tileset.update_frame(&camera_facing_away(), 0.0);
        assert_eq!(tileset.statistics().pending_requests, 0);
        assert_eq!(tileset.statistics().attempted_requests, issued);
        assert_eq!(tileset.pipeline().active_fetches(), 0);
        assert!(tileset.tiles().iter().all(Tile::content_unloaded));

        gate.store(true, Ordering::Relaxed);
        tileset.update_frame(&camera_facing_away(), 0.0);
        assert_eq!(tileset.statistics().tiles_processing, 0);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 0);

        run(&mut tileset, &camera_above(1000.0), 8);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 5);
        assert_eq!(tileset.statistics().geometry_bytes, 5 * TILE_BYTES as u64);
    }

    const NESTING_JSON: &str = r#"{
        "asset": { "version": "1.0" },
        "geometricError": 1000,
        "root": {
            "boundingVolume": { "box": [0, 0, 0, 100, 0, 0, 0, 100, 0, 0, 0, 10] },
            "geometricError": 100,
            "refine": "REPLACE",
            "content": { "uri": "nested.json" }
        }
    }"#;

    const NESTED_JSON: &str = r#"{
        "asset": { "version": "1.0" },
        "geometricError": 100,
        "root": {
            "boundingVolume": { "box": [0, 0, 0, 100, 0, 0, 0, 100, 0, 0, 0, 10] },
            "geometricError": 0,
            "content": { "uri": "leaf.b3dm" }
        }
    }"#;

    /// A nested tileset becomes the single child of the tile that referenced it.
    #[test]
    fn test_nested_tileset_attaches() {
        let source = MapSource::default()
            .with("data/nested.json", NESTED_JSON.as_bytes().to_vec())
            .with("data/leaf.b3dm", vec![1; TILE_BYTES]);
        let mut tileset = build(
            NESTING_JSON,
            "data/tileset.json",
            source,
            Box::new(InlineRunner::new()),
            TilesetOptions::default(),
        );
        let (loaded, seen) = counter();
        tileset.events_mut().on_tile_loaded(move |_| seen.set(seen.get() + 1));

        run(&mut tileset, &camera_above(1000.0), 8);

        let root = tileset.root();
        let root_tile = &tileset.tiles()[root];
        assert!(root_tile.has_tileset_content());
        assert_eq!(root_tile.children().len(), 1);
        let leaf = root_tile.children()[0];
        let leaf_tile = &tileset.tiles()[leaf];
        assert_eq!(leaf_tile.depth(), 1);
        assert_eq!(leaf_tile.content_uri(), Some("data/leaf.b3dm"));
        assert_eq!(leaf_tile.parent_geometric_error(), 100.0);

        assert_eq!(tileset.selected_tiles(), &[leaf]);
        assert_eq!(loaded.get(), 2);
        assert_eq!(tileset.statistics().tiles_total, 2);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 1);
    }

    /// A malformed nested tileset fails only its tile.
    #[test]
    fn test_malformed_nested_tileset_fails_tile() {
        let source = MapSource::default().with("data/nested.json", b"{ not json".to_vec());
        let mut tileset = build(
            NESTING_JSON,
            "data/tileset.json",
            source,
            Box::new(InlineRunner::new()),
            TilesetOptions::default(),
        );
        let failures = Rc::new(std::cell::RefCell::new(Vec::new()));
        let sink = Rc::clone(&failures);
        tileset
            .events_mut()
            .on_tile_failed(move |failure| sink.borrow_mut().push(failure.clone()));

        run(&mut tileset, &camera_above(1000.0), 4);

        let root = tileset.root();
        assert!(tileset.tiles()[root].content_failed());
        assert!(tileset.tiles()[root].children().is_empty());
        let failures = failures.borrow();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].url, "data/nested.json");
        assert_eq!(tileset.statistics().tiles_processing, 0);
    }

    /// Missing content fails with the locator and leaves other tiles alone.
    #[test]
    fn test_missing_content_reports_failure() {
        let source = MapSource::default().with("root.b3dm", vec![1; TILE_BYTES]);
        let mut tileset = build(
            &quad_tree_json(100.0, 10.0),
            "",
            source,
            Box::new(InlineRunner::new()),
            TilesetOptions::default(),
        );
        let (failed, seen) = counter();
        tileset.events_mut().on_tile_failed(move |_| seen.set(seen.get() + 1));

        run(&mut tileset, &camera_above(1000.0), 8);
        assert_eq!(failed.get(), 4);
        let root = tileset.root();
        assert_eq!(tileset.selected_tiles(), &[root]);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 1);
    }

    /// Expired content stays drawable while it reloads and is counted once.
    #[test]
    fn test_expired_content_reloads_in_place() {
        let json = r#"{
            "asset": { "version": "1.0" },
            "geometricError": 1000,
            "root": {
                "boundingVolume": { "sphere": [0, 0, 0, 10] },
                "geometricError": 100,
                "content": { "uri": "tile.b3dm" },
                "expire": { "duration": 5 }
            }
        }"#;
        let source = MapSource::default().with("tile.b3dm", vec![1; TILE_BYTES]);
        let mut tileset = build(json, "", source, Box::new(InlineRunner::new()), TilesetOptions::default());
        let root = tileset.root();
        let camera = camera_above(1000.0);

        for frame in 0..4 {
            tileset.update_frame(&camera, f64::from(frame));
        }
        assert!(tileset.tiles()[root].content_ready());
        let expire_at = tileset.tiles()[root].expire_at().unwrap();

        tileset.update_frame(&camera, expire_at + 1.0);
        assert_eq!(tileset.tiles()[root].content_state(), ContentState::Loading);
        assert_eq!(tileset.selected_tiles(), &[root]);
        assert_eq!(tileset.statistics().tiles_with_content_ready, 1);

        for frame in 0..3 {
            tileset.update_frame(&camera, expire_at + 2.0 + f64::from(frame));
        }
        assert!(tileset.tiles()[root].content_ready());
        assert_eq!(tileset.statistics().tiles_with_content_ready, 1);
        assert_eq!(tileset.statistics().geometry_bytes, TILE_BYTES as u64);
        assert!(tileset.tiles()[root].expire_at().unwrap() > expire_at);
    }

    /// `expire_all` forces ready tiles to reload.
    #[test]
    fn test_expire_all() {
        let mut tileset = quad_tree(TilesetOptions::default());
        let camera = camera_above(1000.0);
        run(&mut tileset, &camera, 8);
        assert_eq!(tileset.expire_all(), 5);

        tileset.update_frame(&camera, 0.0);
        assert!(!tileset.requested_tiles().is_empty());
        assert!(tileset.statistics().pending_requests > 0);
    }

    /// Load progress, all-loaded and initial-loaded notifications.
    #[test]
    fn test_load_notifications() {
        let mut tileset = quad_tree(TilesetOptions::default());
        let (all_loaded, all_seen) = counter();
        let (initial, initial_seen) = counter();
        let (progress, progress_seen) = counter();
        let events = tileset.events_mut();
        events.on_all_tiles_loaded(move || all_seen.set(all_seen.get() + 1));
        events.on_initial_tiles_loaded(move || initial_seen.set(initial_seen.get() + 1));
        events.on_load_progress(move |_| progress_seen.set(progress_seen.get() + 1));

        let camera = camera_above(1000.0);
        run(&mut tileset, &camera, 8);
        assert_eq!(initial.get(), 1);
        assert_eq!(all_loaded.get(), 1);
        assert!(progress.get() > 0);

        tileset.expire_all();
        run(&mut tileset, &camera, 8);
        assert_eq!(initial.get(), 1);
        assert_eq!(all_loaded.get(), 2);
    }

    /// A frozen frame keeps its selection and issues no requests.
    #[test]
    fn test_freeze_frame() {
        let mut tileset = quad_tree(TilesetOptions::default());
        run(&mut tileset, &camera_above(1000.0), 8);
        let selected = tileset.selected_tiles().to_vec();

        tileset.set_debug_freeze_frame(true);
        tileset.update_frame(&camera_facing_away(), 0.0);
        assert_eq!(tileset.selected_tiles(), selected.as_slice());
        assert!(tileset.requested_tiles().is_empty());
    }

    /// Skipping is disabled when every tile adds to its parent.
    #[test]
    fn test_all_additive_disables_skipping() {
        let mut options = TilesetOptions::default();
        options.set_skip_level_of_detail(true);
        let json = quad_tree_json(100.0, 10.0).replacen("\"REPLACE\"", "\"ADD\"", 1);
        let tileset = build(&json, "", quad_tree_source(), Box::new(InlineRunner::new()), options.clone());
        assert!(!tileset.skip_level_of_detail());

        let tileset = quad_tree(options);
        assert!(tileset.skip_level_of_detail());
    }

    /// Moving the model matrix moves the tiles.
    #[test]
    fn test_model_matrix() {
        let mut tileset = quad_tree(TilesetOptions::default());
        let root = tileset.root();
        tileset.set_model_matrix(DMat4::from_translation(DVec3::new(1.0e5, 0.0, 0.0)));
        assert!((tileset.tiles()[root].bounding_volume().center().x - 1.0e5).abs() < 1e-6);

        tileset.update_frame(&camera_above(1000.0), 0.0);
        assert!(tileset.selected_tiles().is_empty());
        assert!(tileset.requested_tiles().is_empty());
    }
}
