//! Seams to the external content services and the opaque content payload.
//!
//! The core never decodes tile payloads. It asks a [`ContentSource`] for
//! bytes and a [`ContentProcessor`] for a [`RenderContent`], and only reads
//! back the byte sizes it needs for the memory budget.

use std::any::Any;
use std::fmt;

use crate::tile::TileId;

/// Bytes of memory held by a tile's content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContentMemory {
    /// Vertex and index buffers.
    pub geometry_bytes: u64,
    /// Textures.
    pub texture_bytes: u64,
    /// Per-feature batch table data.
    pub batch_table_bytes: u64,
}

impl ContentMemory {
    pub fn new(geometry_bytes: u64, texture_bytes: u64, batch_table_bytes: u64) -> Self {
        Self {
            geometry_bytes,
            texture_bytes,
            batch_table_bytes,
        }
    }

    /// Total bytes counted against the memory budget.
    pub fn total(&self) -> u64 {
        self.geometry_bytes + self.texture_bytes + self.batch_table_bytes
    }
}

/// Renderable content produced by a [`ContentProcessor`].
///
/// The payload is opaque to the core; renderers downcast it.
pub struct RenderContent {
    memory: ContentMemory,
    payload: Box<dyn Any + Send>,
}

impl RenderContent {
    pub fn new<T: Any + Send>(payload: T, memory: ContentMemory) -> Self {
        Self {
            memory,
            payload: Box::new(payload),
        }
    }

    /// Bytes this content holds against the budget.
    pub fn memory(&self) -> ContentMemory {
        self.memory
    }

    /// Borrow the payload as `T`, if that is its type.
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref::<T>()
    }
}

impl fmt::Debug for RenderContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderContent")
            .field("memory", &self.memory)
            .finish_non_exhaustive()
    }
}

/// Context handed to the processor alongside the raw bytes.
#[derive(Clone, Debug)]
pub struct ContentRequest {
    pub tile: TileId,
    /// Resolved content locator.
    pub uri: String,
    /// Depth of the tile in the hierarchy.
    pub depth: u32,
}

/// Delivers raw bytes for a content locator.
///
/// Called from executor threads; implementations may block.
pub trait ContentSource: Send + Sync {
    fn fetch(&self, uri: &str) -> Result<Vec<u8>, String>;
}

/// Turns raw bytes into renderable content.
///
/// Called from executor threads; implementations may block.
pub trait ContentProcessor: Send + Sync {
    fn process(&self, request: &ContentRequest, bytes: Vec<u8>) -> Result<RenderContent, String>;
}

/// Processor that keeps the bytes as the payload and reports their length
/// as geometry memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassthroughProcessor;

impl ContentProcessor for PassthroughProcessor {
    fn process(&self, _request: &ContentRequest, bytes: Vec<u8>) -> Result<RenderContent, String> {
        if bytes.is_empty() {
            return Err("empty tile payload".to_string());
        }
        let memory = ContentMemory::new(bytes.len() as u64, 0, 0);
        Ok(RenderContent::new(bytes, memory))
    }
}

/// Whether the bytes look like a nested tileset document rather than a
/// binary tile payload.
pub fn is_tileset_json(bytes: &[u8]) -> bool {
    bytes
        .iter()
        .find(|b| !b.is_ascii_whitespace())
        .is_some_and(|b| *b == b'{')
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Memory totals add all three categories.
    #[test]
    fn test_memory_total() {
        assert_eq!(ContentMemory::new(10, 20, 5).total(), 35);
    }

    /// The payload can be recovered with its concrete type only.
    #[test]
    fn test_payload_downcast() {
        let content = RenderContent::new(42u32, ContentMemory::default());
        assert_eq!(content.payload::<u32>(), Some(&42));
        assert!(content.payload::<String>().is_none());
    }

    /// JSON detection skips leading whitespace and rejects binary magic.
    #[test]
    fn test_tileset_json_detection() {
        assert!(is_tileset_json(b"  \n{\"asset\":{}}"));
        assert!(!is_tileset_json(b"b3dm\x01\x00"));
        assert!(!is_tileset_json(b""));
    }

    /// The passthrough processor reports the payload length as geometry.
    #[test]
    fn test_passthrough_processor() {
        let request = ContentRequest {
            tile: TileId::from_index(0),
            uri: "a.b3dm".into(),
            depth: 0,
        };
        let content = PassthroughProcessor.process(&request, vec![1, 2, 3]).unwrap();
        assert_eq!(content.memory().geometry_bytes, 3);
        assert!(PassthroughProcessor.process(&request, Vec::new()).is_err());
    }
}
