//! Counters and byte totals shared by traversal, the load pipeline and the cache.

use crate::content::ContentMemory;

/// Per-frame counters plus persistent load totals.
///
/// [`clear`](Statistics::clear) resets the per-frame counters at the start of
/// each frame; request, processing and memory totals carry over because
/// requests and resident content outlive a single frame.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Statistics {
    /// Tiles visited by traversal this frame.
    pub visited: usize,
    /// Tiles selected for drawing this frame.
    pub selected: usize,
    /// Tiles culled because none of their children were visible.
    pub culled_with_children_union: usize,
    /// Requests that could not be issued or were cancelled this frame.
    pub attempted_requests: usize,
    /// Organisational tiles visited this frame.
    pub empty_tiles: usize,

    /// Fetches in flight.
    pub pending_requests: usize,
    /// Tiles whose bytes arrived and are being processed.
    pub tiles_processing: usize,
    /// Tiles holding drawable content.
    pub tiles_with_content_ready: usize,
    /// Tiles in the hierarchy, including nested tilesets.
    pub tiles_total: usize,
    pub geometry_bytes: u64,
    pub texture_bytes: u64,
    pub batch_table_bytes: u64,
}

impl Statistics {
    /// Reset per-frame counters.
    pub fn clear(&mut self) {
        self.visited = 0;
        self.selected = 0;
        self.culled_with_children_union = 0;
        self.attempted_requests = 0;
        self.empty_tiles = 0;
    }

    /// Account for content that became resident.
    pub fn increment_load_counts(&mut self, memory: ContentMemory) {
        self.tiles_with_content_ready += 1;
        self.geometry_bytes += memory.geometry_bytes;
        self.texture_bytes += memory.texture_bytes;
        self.batch_table_bytes += memory.batch_table_bytes;
    }

    /// Account for content that was released.
    pub fn decrement_load_counts(&mut self, memory: ContentMemory) {
        self.tiles_with_content_ready = self.tiles_with_content_ready.saturating_sub(1);
        self.geometry_bytes = self.geometry_bytes.saturating_sub(memory.geometry_bytes);
        self.texture_bytes = self.texture_bytes.saturating_sub(memory.texture_bytes);
        self.batch_table_bytes = self.batch_table_bytes.saturating_sub(memory.batch_table_bytes);
    }

    /// Bytes counted against the memory budget.
    pub fn total_memory_bytes(&self) -> u64 {
        self.geometry_bytes + self.texture_bytes + self.batch_table_bytes
    }

    /// No request is in flight, processing, or waiting for a free slot.
    pub fn is_idle(&self) -> bool {
        self.pending_requests == 0 && self.tiles_processing == 0 && self.attempted_requests == 0
    }
}
