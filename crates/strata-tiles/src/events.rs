//! Listener registration for tileset notifications.
//!
//! Each notification kind keeps its own list of listeners. Listeners run
//! synchronously on the frame thread, in registration order, from inside
//! [`Tileset::update_frame`](crate::tileset::Tileset::update_frame).

use crate::tile::{Tile, TileId};

/// A tile's content could not be fetched or processed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TileFailure {
    pub tile: TileId,
    /// Content locator of the failed request.
    pub url: String,
    pub message: String,
}

/// Snapshot of outstanding content work.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoadProgress {
    pub pending_requests: usize,
    pub tiles_processing: usize,
}

type TileListener = Box<dyn FnMut(&Tile)>;
type TileMutListener = Box<dyn FnMut(&mut Tile)>;
type FailureListener = Box<dyn FnMut(&TileFailure)>;
type ProgressListener = Box<dyn FnMut(LoadProgress)>;
type SignalListener = Box<dyn FnMut()>;

#[derive(Default)]
pub struct TilesetEvents {
    tile_loaded: Vec<TileListener>,
    tile_unloaded: Vec<TileListener>,
    tile_failed: Vec<FailureListener>,
    tile_visible: Vec<TileMutListener>,
    load_progress: Vec<ProgressListener>,
    all_tiles_loaded: Vec<SignalListener>,
    initial_tiles_loaded: Vec<SignalListener>,
}

impl TilesetEvents {
    /// Content of a tile became ready and resident.
    pub fn on_tile_loaded(&mut self, listener: impl FnMut(&Tile) + 'static) {
        self.tile_loaded.push(Box::new(listener));
    }

    /// A tile's content is about to be released by eviction.
    pub fn on_tile_unloaded(&mut self, listener: impl FnMut(&Tile) + 'static) {
        self.tile_unloaded.push(Box::new(listener));
    }

    /// A tile failed. Without listeners, failures are logged instead.
    pub fn on_tile_failed(&mut self, listener: impl FnMut(&TileFailure) + 'static) {
        self.tile_failed.push(Box::new(listener));
    }

    /// A selected tile is about to be updated for drawing this frame.
    pub fn on_tile_visible(&mut self, listener: impl FnMut(&mut Tile) + 'static) {
        self.tile_visible.push(Box::new(listener));
    }

    /// Pending or processing counts changed since the previous frame.
    pub fn on_load_progress(&mut self, listener: impl FnMut(LoadProgress) + 'static) {
        self.load_progress.push(Box::new(listener));
    }

    /// Every needed tile for the current view has loaded.
    pub fn on_all_tiles_loaded(&mut self, listener: impl FnMut() + 'static) {
        self.all_tiles_loaded.push(Box::new(listener));
    }

    /// The first view finished loading. Raised at most once.
    pub fn on_initial_tiles_loaded(&mut self, listener: impl FnMut() + 'static) {
        self.initial_tiles_loaded.push(Box::new(listener));
    }

    pub(crate) fn raise_tile_loaded(&mut self, tile: &Tile) {
        for listener in &mut self.tile_loaded {
            listener(tile);
        }
    }

    pub(crate) fn raise_tile_unloaded(&mut self, tile: &Tile) {
        for listener in &mut self.tile_unloaded {
            listener(tile);
        }
    }

    pub(crate) fn raise_tile_failed(&mut self, failure: &TileFailure) {
        if self.tile_failed.is_empty() {
            tracing::warn!(
                tile = ?failure.tile,
                url = %failure.url,
                message = %failure.message,
                "failed to load tile content"
            );
            return;
        }
        for listener in &mut self.tile_failed {
            listener(failure);
        }
    }

    pub(crate) fn raise_tile_visible(&mut self, tile: &mut Tile) {
        for listener in &mut self.tile_visible {
            listener(tile);
        }
    }

    pub(crate) fn raise_load_progress(&mut self, progress: LoadProgress) {
        for listener in &mut self.load_progress {
            listener(progress);
        }
    }

    pub(crate) fn raise_all_tiles_loaded(&mut self) {
        for listener in &mut self.all_tiles_loaded {
            listener();
        }
    }

    pub(crate) fn raise_initial_tiles_loaded(&mut self) {
        for listener in &mut self.initial_tiles_loaded {
            listener();
        }
    }
}

impl std::fmt::Debug for TilesetEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TilesetEvents")
            .field("tile_loaded", &self.tile_loaded.len())
            .field("tile_unloaded", &self.tile_unloaded.len())
            .field("tile_failed", &self.tile_failed.len())
            .field("tile_visible", &self.tile_visible.len())
            .field("load_progress", &self.load_progress.len())
            .field("all_tiles_loaded", &self.all_tiles_loaded.len())
            .field("initial_tiles_loaded", &self.initial_tiles_loaded.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Listeners run in registration order.
    #[test]
    fn test_listeners_run_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut events = TilesetEvents::default();
        for name in ["first", "second"] {
            let log = Rc::clone(&log);
            events.on_all_tiles_loaded(move || log.borrow_mut().push(name));
        }
        events.raise_all_tiles_loaded();
        assert_eq!(*log.borrow(), vec!["first", "second"]);
    }

    /// Failure listeners receive the url and message.
    #[test]
    fn test_failure_listener_receives_details() {
        let seen = Rc::new(RefCell::new(None));
        let mut events = TilesetEvents::default();
        let sink = Rc::clone(&seen);
        events.on_tile_failed(move |f| *sink.borrow_mut() = Some(f.clone()));
        let failure = TileFailure {
            tile: TileId::from_index(3),
            url: "a.b3dm".into(),
            message: "404".into(),
        };
        events.raise_tile_failed(&failure);
        assert_eq!(seen.borrow().as_ref(), Some(&failure));
    }

    /// Raising a failure with no listener falls back to logging.
    #[test]
    fn test_failure_without_listener_does_not_panic() {
        let mut events = TilesetEvents::default();
        events.raise_tile_failed(&TileFailure {
            tile: TileId::from_index(0),
            url: "x".into(),
            message: "y".into(),
        });
    }

    /// Progress listeners see the counts they were raised with.
    #[test]
    fn test_progress_listener() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut events = TilesetEvents::default();
        let sink = Rc::clone(&seen);
        events.on_load_progress(move |p| sink.borrow_mut().push(p));
        events.raise_load_progress(LoadProgress {
            pending_requests: 2,
            tiles_processing: 1,
        });
        assert_eq!(
            *seen.borrow(),
            vec![LoadProgress {
                pending_requests: 2,
                tiles_processing: 1
            }]
        );
    }
}
