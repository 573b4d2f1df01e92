//! Content requests: issue, track, cancel, and apply completions.
//!
//! Each request carries a [`RequestId`]. A completion is applied only if the
//! tile still holds a request with that id and is in the matching state;
//! anything else is stale and ignored. Counters are therefore adjusted
//! exactly once per request, whether it succeeds, fails, is cancelled, or
//! its tile is destroyed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::arena::TileArena;
use crate::content::{ContentProcessor, ContentRequest, ContentSource, RenderContent, is_tileset_json};
use crate::error::ContentError;
use crate::executor::TaskRunner;
use crate::statistics::Statistics;
use crate::tile::{ContentState, Tile, TileId};

/// Identifies one issued request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// Bookkeeping for the request a tile is waiting on.
#[derive(Debug)]
pub(crate) struct ActiveRequest {
    pub id: RequestId,
    /// State to restore if the request is cancelled.
    pub previous_state: ContentState,
    pub uri: String,
    pub depth: u32,
    cancelled: Arc<AtomicBool>,
}

/// Result of an executor task.
#[derive(Debug)]
pub enum ContentEvent {
    /// Raw bytes arrived, or the fetch failed.
    Fetched {
        tile: TileId,
        request: RequestId,
        result: Result<Vec<u8>, ContentError>,
    },
    /// The processor finished.
    Processed {
        tile: TileId,
        request: RequestId,
        result: Result<RenderContent, ContentError>,
    },
}

impl ContentEvent {
    /// Tile the task belongs to.
    pub fn tile(&self) -> TileId {
        match self {
            Self::Fetched { tile, .. } | Self::Processed { tile, .. } => *tile,
        }
    }

    /// Request that spawned the task.
    pub fn request(&self) -> RequestId {
        match self {
            Self::Fetched { request, .. } | Self::Processed { request, .. } => *request,
        }
    }
}

/// What applying a completion means for the rest of the tileset.
#[derive(Debug)]
pub(crate) enum Completion {
    /// Nested tileset bytes; the tile is processing until the caller parses them.
    TilesetJson { tile: TileId, bytes: Vec<u8> },
    /// Content is ready. `stale` is superseded expired content.
    Ready {
        tile: TileId,
        stale: Option<RenderContent>,
    },
    /// The tile failed. `stale` is expired content that can no longer be drawn.
    Failed {
        tile: TileId,
        error: ContentError,
        stale: Option<RenderContent>,
    },
}

/// Issues prioritised content requests and applies their completions.
pub struct LoadPipeline {
    runner: Box<dyn TaskRunner>,
    source: Arc<dyn ContentSource>,
    processor: Arc<dyn ContentProcessor>,
    maximum_concurrent_requests: usize,
    active_fetches: usize,
    next_request: u64,
    /// Tiles between raw-bytes-available and ready.
    processing_queue: Vec<TileId>,
    events: Vec<ContentEvent>,
}

impl LoadPipeline {
    /// Pipeline fetching from `source` and processing with `processor` on `runner`.
    pub fn new(
        runner: Box<dyn TaskRunner>,
        source: Arc<dyn ContentSource>,
        processor: Arc<dyn ContentProcessor>,
        maximum_concurrent_requests: usize,
    ) -> Self {
        Self {
            runner,
            source,
            processor,
            maximum_concurrent_requests,
            active_fetches: 0,
            next_request: 0,
            processing_queue: Vec::new(),
            events: Vec::new(),
        }
    }

    /// Cap on fetches in flight at once.
    pub fn maximum_concurrent_requests(&self) -> usize {
        self.maximum_concurrent_requests
    }

    /// Change the fetch cap; requests already in flight are kept.
    pub fn set_maximum_concurrent_requests(&mut self, maximum: usize) {
        self.maximum_concurrent_requests = maximum;
    }

    /// Fetches issued and not yet completed or cancelled.
    pub fn active_fetches(&self) -> usize {
        self.active_fetches
    }

    /// Tiles awaiting the processor.
    pub fn processing_queue(&self) -> &[TileId] {
        &self.processing_queue
    }

    /// Move an unloaded or expired tile to `Loading` and start its fetch.
    ///
    /// Returns `false` without side effects when the tile has nothing to
    /// load or the concurrent-request cap is reached; the caller retries
    /// on a later frame.
    pub(crate) fn request_content(&mut self, tile: &mut Tile, statistics: &mut Statistics) -> bool {
        if tile.request.is_some() || !matches!(tile.content_state(), ContentState::Unloaded | ContentState::Expired) {
            return false;
        }
        let Some(uri) = tile.content_uri().map(str::to_string) else {
            return false;
        };
        if self.active_fetches >= self.maximum_concurrent_requests {
            return false;
        }

        let id = RequestId(self.next_request);
        self.next_request += 1;
        let cancelled = Arc::new(AtomicBool::new(false));

        let source = Arc::clone(&self.source);
        let flag = Arc::clone(&cancelled);
        let tile_id = tile.id();
        let fetch_uri = uri.clone();
        self.runner.spawn(Box::new(move || {
            let result = if flag.load(Ordering::Relaxed) {
                Err(ContentError::Cancelled)
            } else {
                source.fetch(&fetch_uri).map_err(|message| ContentError::Fetch {
                    uri: fetch_uri.clone(),
                    message,
                })
            };
            ContentEvent::Fetched {
                tile: tile_id,
                request: id,
                result,
            }
        }));

        tracing::trace!(tile = ?tile_id, uri = %uri, "content requested");
        tile.begin_request(ActiveRequest {
            id,
            previous_state: tile.content_state(),
            uri,
            depth: tile.depth(),
            cancelled,
        });
        self.active_fetches += 1;
        statistics.pending_requests += 1;
        true
    }

    /// Cancel a fetch that has not delivered bytes yet.
    ///
    /// Processing cannot be cancelled; returns `false` in that case.
    pub(crate) fn cancel(&mut self, tile: &mut Tile, statistics: &mut Statistics) -> bool {
        if tile.content_state() != ContentState::Loading {
            return false;
        }
        let Some(request) = tile.cancel_request() else {
            return false;
        };
        request.cancelled.store(true, Ordering::Relaxed);
        self.active_fetches = self.active_fetches.saturating_sub(1);
        statistics.pending_requests = statistics.pending_requests.saturating_sub(1);
        statistics.attempted_requests += 1;
        tracing::trace!(tile = ?tile.id(), "content request cancelled");
        true
    }

    /// Drop bookkeeping for a tile that is being destroyed.
    pub(crate) fn forget(&mut self, tile: &mut Tile, statistics: &mut Statistics) {
        let state = tile.content_state();
        let Some(request) = tile.request.take() else {
            return;
        };
        request.cancelled.store(true, Ordering::Relaxed);
        match state {
            ContentState::Loading => {
                self.active_fetches = self.active_fetches.saturating_sub(1);
                statistics.pending_requests = statistics.pending_requests.saturating_sub(1);
            }
            ContentState::Processing => {
                statistics.tiles_processing = statistics.tiles_processing.saturating_sub(1);
            }
            _ => {}
        }
    }

    /// Collect executor results and apply them to the tiles they belong to.
    pub(crate) fn process_completions(
        &mut self,
        tiles: &mut TileArena,
        statistics: &mut Statistics,
        now: f64,
    ) -> Vec<Completion> {
        let mut events = std::mem::take(&mut self.events);
        self.runner.drain(&mut events);

        let mut completions = Vec::new();
        for event in events.drain(..) {
            let request = event.request();
            let Some(tile) = tiles.get_mut(event.tile()) else {
                tracing::trace!(tile = ?event.tile(), "completion for destroyed tile ignored");
                continue;
            };
            if tile.request.as_ref().map(|r| r.id) != Some(request) {
                tracing::trace!(tile = ?tile.id(), ?request, "stale completion ignored");
                continue;
            }

            match event {
                ContentEvent::Fetched { result, .. } => {
                    if tile.content_state() != ContentState::Loading {
                        continue;
                    }
                    self.active_fetches = self.active_fetches.saturating_sub(1);
                    statistics.pending_requests = statistics.pending_requests.saturating_sub(1);
                    match result {
                        Ok(bytes) => {
                            tile.begin_processing();
                            statistics.tiles_processing += 1;
                            self.processing_queue.push(tile.id());
                            if is_tileset_json(&bytes) {
                                completions.push(Completion::TilesetJson { tile: tile.id(), bytes });
                            } else {
                                self.spawn_processing(tile, bytes);
                            }
                        }
                        Err(ContentError::Cancelled) => {
                            tile.cancel_request();
                            statistics.attempted_requests += 1;
                        }
                        Err(error) => {
                            let stale = tile.fail();
                            completions.push(Completion::Failed {
                                tile: tile.id(),
                                error,
                                stale,
                            });
                        }
                    }
                }
                ContentEvent::Processed { result, .. } => {
                    if tile.content_state() != ContentState::Processing {
                        continue;
                    }
                    statistics.tiles_processing = statistics.tiles_processing.saturating_sub(1);
                    match result {
                        Ok(content) => {
                            let stale = tile.finish_ready(Some(content), now);
                            completions.push(Completion::Ready { tile: tile.id(), stale });
                        }
                        Err(error) => {
                            let stale = tile.fail();
                            completions.push(Completion::Failed {
                                tile: tile.id(),
                                error,
                                stale,
                            });
                        }
                    }
                }
            }
        }
        self.events = events;
        completions
    }

    /// Finish a tile whose bytes were a nested tileset document.
    pub(crate) fn finish_tileset_content(
        &mut self,
        tile: &mut Tile,
        statistics: &mut Statistics,
        result: Result<(), ContentError>,
        now: f64,
    ) -> Option<Completion> {
        if tile.content_state() != ContentState::Processing {
            return None;
        }
        statistics.tiles_processing = statistics.tiles_processing.saturating_sub(1);
        match result {
            Ok(()) => {
                tile.has_tileset_content = true;
                tile.finish_ready(None, now);
                None
            }
            Err(error) => {
                let stale = tile.fail();
                Some(Completion::Failed {
                    tile: tile.id(),
                    error,
                    stale,
                })
            }
        }
    }

    /// Drop tiles that left the processing state, compacting in place.
    pub(crate) fn filter_processing_queue(&mut self, tiles: &TileArena) {
        self.processing_queue.retain(|id| {
            tiles
                .get(*id)
                .is_some_and(|t| t.content_state() == ContentState::Processing)
        });
    }

    fn spawn_processing(&mut self, tile: &Tile, bytes: Vec<u8>) {
        let Some(active) = &tile.request else {
            return;
        };
        let processor = Arc::clone(&self.processor);
        let request = ContentRequest {
            tile: tile.id(),
            uri: active.uri.clone(),
            depth: active.depth,
        };
        let id = active.id;
        self.runner.spawn(Box::new(move || {
            let result = processor
                .process(&request, bytes)
                .map_err(|message| ContentError::Process {
                    uri: request.uri.clone(),
                    message,
                });
            ContentEvent::Processed {
                tile: request.tile,
                request: id,
                result,
            }
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentMemory;
    use crate::executor::{ContentTask, InlineRunner};
    use crate::test_support::{MapSource, single_tile_arena};
    use std::sync::Mutex;

    /// Runner that holds tasks until the test runs them explicitly.
    #[derive(Clone, Default)]
    struct ManualRunner {
        tasks: Arc<Mutex<Vec<ContentTask>>>,
        ready: Arc<Mutex<Vec<ContentEvent>>>,
    }

    impl ManualRunner {
        fn run_all(&self) {
            let tasks: Vec<_> = self.tasks.lock().unwrap().drain(..).collect();
            let mut ready = self.ready.lock().unwrap();
            for task in tasks {
                ready.push(task());
            }
        }

        fn inject(&self, event: ContentEvent) {
            self.ready.lock().unwrap().push(event);
        }
    }

    impl TaskRunner for ManualRunner {
        fn spawn(&mut self, task: ContentTask) {
            self.tasks.lock().unwrap().push(task);
        }

        fn drain(&mut self, completed: &mut Vec<ContentEvent>) {
            completed.append(&mut self.ready.lock().unwrap());
        }

        fn in_flight(&self) -> usize {
            self.tasks.lock().unwrap().len()
        }
    }

    fn pipeline(runner: Box<dyn TaskRunner>, cap: usize) -> LoadPipeline {
        let source = MapSource::default().with("tile.b3dm", vec![1, 2, 3, 4]);
        LoadPipeline::new(runner, Arc::new(source), Arc::new(crate::content::PassthroughProcessor), cap)
    }

    /// A request moves through loading and processing to ready.
    #[test]
    fn test_request_reaches_ready() {
        let (mut tiles, id) = single_tile_arena("tile.b3dm");
        let mut stats = Statistics::default();
        let mut pipeline = pipeline(Box::new(InlineRunner::new()), 4);

        assert!(pipeline.request_content(&mut tiles[id], &mut stats));
        assert_eq!(tiles[id].content_state(), ContentState::Loading);
        assert_eq!(stats.pending_requests, 1);

        assert!(pipeline.process_completions(&mut tiles, &mut stats, 0.0).is_empty());
        assert_eq!(tiles[id].content_state(), ContentState::Processing);
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.tiles_processing, 1);
        assert_eq!(pipeline.processing_queue(), &[id]);

        let completions = pipeline.process_completions(&mut tiles, &mut stats, 0.0);
        assert!(matches!(completions.as_slice(), [Completion::Ready { stale: None, .. }]));
        assert_eq!(stats.tiles_processing, 0);
        assert_eq!(
            tiles[id].content().map(|c| c.memory()),
            Some(ContentMemory::new(4, 0, 0))
        );

        pipeline.filter_processing_queue(&tiles);
        assert!(pipeline.processing_queue().is_empty());
    }

    /// A saturated cap refuses the request without touching the tile.
    #[test]
    fn test_request_cap_saturated() {
        let (mut tiles, id) = single_tile_arena("tile.b3dm");
        let mut stats = Statistics::default();
        let mut pipeline = pipeline(Box::new(InlineRunner::new()), 0);
        assert!(!pipeline.request_content(&mut tiles[id], &mut stats));
        assert!(tiles[id].content_unloaded());
        assert_eq!(stats.pending_requests, 0);
    }

    /// A fetch error fails the tile and reports the locator.
    #[test]
    fn test_fetch_failure() {
        let (mut tiles, id) = single_tile_arena("missing.b3dm");
        let mut stats = Statistics::default();
        let mut pipeline = pipeline(Box::new(InlineRunner::new()), 4);
        assert!(pipeline.request_content(&mut tiles[id], &mut stats));
        let completions = pipeline.process_completions(&mut tiles, &mut stats, 0.0);
        match completions.as_slice() {
            [Completion::Failed { error: ContentError::Fetch { uri, .. }, .. }] => {
                assert_eq!(uri, "missing.b3dm");
            }
            other => panic!("unexpected completions {other:?}"),
        }
        assert!(tiles[id].content_failed());
        assert_eq!(stats.pending_requests, 0);
    }

    /// A cancelled request and a duplicate completion decrement pending once.
    #[test]
    fn test_stale_and_duplicate_completions_decrement_once() {
        let (mut tiles, id) = single_tile_arena("tile.b3dm");
        let mut stats = Statistics::default();
        let runner = ManualRunner::default();
        let mut pipeline = pipeline(Box::new(runner.clone()), 4);

        assert!(pipeline.request_content(&mut tiles[id], &mut stats));
        let first = tiles[id].request.as_ref().map(|r| r.id).unwrap();
        assert!(pipeline.cancel(&mut tiles[id], &mut stats));
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.attempted_requests, 1);
        assert!(tiles[id].content_unloaded());

        assert!(pipeline.request_content(&mut tiles[id], &mut stats));
        let second = tiles[id].request.as_ref().map(|r| r.id).unwrap();
        assert_ne!(first, second);
        assert_eq!(stats.pending_requests, 1);

        // Both fetches complete, and the second is delivered twice.
        runner.run_all();
        runner.inject(ContentEvent::Fetched {
            tile: id,
            request: second,
            result: Ok(vec![9]),
        });
        pipeline.process_completions(&mut tiles, &mut stats, 0.0);

        assert_eq!(stats.pending_requests, 0);
        assert_eq!(stats.tiles_processing, 1);
        assert_eq!(pipeline.active_fetches(), 0);
        assert_eq!(tiles[id].content_state(), ContentState::Processing);
    }

    /// Forgetting a loading tile releases its slot and pending count.
    #[test]
    fn test_forget_releases_counters() {
        let (mut tiles, id) = single_tile_arena("tile.b3dm");
        let mut stats = Statistics::default();
        let mut pipeline = pipeline(Box::new(ManualRunner::default()), 1);
        assert!(pipeline.request_content(&mut tiles[id], &mut stats));
        pipeline.forget(&mut tiles[id], &mut stats);
        assert_eq!(stats.pending_requests, 0);
        assert_eq!(pipeline.active_fetches(), 0);
    }

    /// Nested tileset bytes are handed back to the caller.
    #[test]
    fn test_tileset_json_is_returned() {
        let (mut tiles, id) = single_tile_arena("nested.json");
        let mut stats = Statistics::default();
        let source = MapSource::default().with("nested.json", b" {\"asset\":{}}".to_vec());
        let mut pipeline = LoadPipeline::new(
            Box::new(InlineRunner::new()),
            Arc::new(source),
            Arc::new(crate::content::PassthroughProcessor),
            4,
        );
        assert!(pipeline.request_content(&mut tiles[id], &mut stats));
        let completions = pipeline.process_completions(&mut tiles, &mut stats, 0.0);
        assert!(matches!(completions.as_slice(), [Completion::TilesetJson { .. }]));

        assert!(pipeline
            .finish_tileset_content(&mut tiles[id], &mut stats, Ok(()), 0.0)
            .is_none());
        assert!(tiles[id].has_tileset_content() && tiles[id].content_ready());
        assert_eq!(stats.tiles_processing, 0);
    }
}
