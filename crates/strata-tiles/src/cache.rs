//! Least-recently-used set of tiles holding resident content.
//!
//! Entries form a doubly-linked list threaded through a hash map, so add,
//! touch, remove and peek-least-recent are all O(1). Resident bytes are
//! adjusted on every insert and removal and never recomputed by scanning.

use rustc_hash::FxHashMap;

use crate::tile::TileId;

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    prev: Option<TileId>,
    next: Option<TileId>,
    bytes: u64,
    /// Monotonic sequence of the last add or touch.
    last_touched: u64,
    touched_frame: u64,
}

/// Resident tiles ordered from least to most recently used.
#[derive(Debug, Default)]
pub struct ResidentCache {
    entries: FxHashMap<TileId, CacheEntry>,
    /// Least recently used.
    head: Option<TileId>,
    /// Most recently used.
    tail: Option<TileId>,
    resident_bytes: u64,
    sequence: u64,
    frame: u64,
    trim: bool,
}

impl ResidentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new frame; entries touched from now on are protected from eviction.
    pub fn begin_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Sum of the byte sizes of resident tiles.
    pub fn resident_bytes(&self) -> u64 {
        self.resident_bytes
    }

    /// Bytes recorded for one tile.
    pub fn bytes_of(&self, id: TileId) -> Option<u64> {
        self.entries.get(&id).map(|e| e.bytes)
    }

    /// The entry that would be evicted next.
    pub fn least_recent(&self) -> Option<TileId> {
        self.head
    }

    /// Tiles from least to most recently used.
    pub fn iter(&self) -> impl Iterator<Item = TileId> + '_ {
        std::iter::successors(self.head, |id| self.entries.get(id).and_then(|e| e.next))
    }

    /// Register a newly ready tile as most recently used.
    ///
    /// Adding a tile that is already resident only touches it and updates
    /// its size; returns `false` in that case.
    pub fn add(&mut self, id: TileId, bytes: u64) -> bool {
        if let Some(entry) = self.entries.get_mut(&id) {
            self.resident_bytes = self.resident_bytes - entry.bytes + bytes;
            entry.bytes = bytes;
            self.touch(id);
            return false;
        }
        self.sequence += 1;
        self.entries.insert(
            id,
            CacheEntry {
                prev: None,
                next: None,
                bytes,
                last_touched: self.sequence,
                touched_frame: self.frame,
            },
        );
        self.push_back(id);
        self.resident_bytes += bytes;
        true
    }

    /// Mark a tile as used this frame and move it to most recently used.
    pub fn touch(&mut self, id: TileId) {
        if !self.entries.contains_key(&id) {
            return;
        }
        self.sequence += 1;
        let (sequence, frame) = (self.sequence, self.frame);
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.last_touched = sequence;
            entry.touched_frame = frame;
        }
        if self.tail != Some(id) {
            self.unlink(id);
            self.push_back(id);
        }
    }

    /// Remove a tile regardless of recency. Returns its recorded bytes.
    pub fn remove(&mut self, id: TileId) -> Option<u64> {
        if !self.entries.contains_key(&id) {
            return None;
        }
        self.unlink(id);
        let entry = self.entries.remove(&id)?;
        self.resident_bytes -= entry.bytes;
        Some(entry.bytes)
    }

    /// Evict on the next [`unload`](Self::unload) every tile not touched this frame.
    pub fn trim(&mut self) {
        self.trim = true;
    }

    /// Evict least recently used tiles while over `budget` (or trimming),
    /// stopping at the first tile touched this frame.
    ///
    /// `on_evict` runs for each evicted tile with its recorded bytes.
    pub fn unload(&mut self, budget: u64, mut on_evict: impl FnMut(TileId, u64)) -> usize {
        let trim = std::mem::take(&mut self.trim);
        let mut evicted = 0;
        while self.resident_bytes > budget || trim {
            let Some(id) = self.head else {
                break;
            };
            let Some(entry) = self.entries.get(&id) else {
                break;
            };
            if entry.touched_frame == self.frame {
                break;
            }
            if let Some(bytes) = self.remove(id) {
                on_evict(id, bytes);
                evicted += 1;
            }
        }
        evicted
    }

    fn push_back(&mut self, id: TileId) {
        let old_tail = self.tail;
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.prev = old_tail;
            entry.next = None;
        }
        match old_tail.and_then(|t| self.entries.get_mut(&t)) {
            Some(tail) => tail.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
    }

    fn unlink(&mut self, id: TileId) {
        let Some(entry) = self.entries.get(&id).copied() else {
            return;
        };
        match entry.prev.and_then(|p| self.entries.get_mut(&p)) {
            Some(prev) => prev.next = entry.next,
            None => self.head = entry.next,
        }
        match entry.next.and_then(|n| self.entries.get_mut(&n)) {
            Some(next) => next.prev = entry.prev,
            None => self.tail = entry.prev,
        }
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.prev = None;
            entry.next = None;
        }
    }
}
