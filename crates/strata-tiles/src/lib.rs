//! 3D Tiles streaming: tileset hierarchy, view-dependent traversal, prioritised
//! content loading, LRU memory budget, and draw submission.

mod arena;
mod bounds;
mod cache;
mod camera;
mod content;
mod culling;
mod document;
mod dynamic_sse;
mod ellipsoid;
mod error;
mod events;
mod executor;
mod frame;
mod options;
mod pipeline;
mod priority;
mod render;
mod statistics;
mod tile;
mod tileset;
mod traversal;

pub use arena::TileArena;
pub use bounds::{BoundingRegion, BoundingSphere, BoundingVolume, Intersect, OrientedBox};
pub use cache::ResidentCache;
pub use camera::{FrameCamera, Projection};
pub use content::{
    ContentMemory, ContentProcessor, ContentRequest, ContentSource, PassthroughProcessor, RenderContent,
    is_tileset_json,
};
pub use culling::{CullingVolume, PlaneMask};
pub use document::{TilesetDocument, resolve_uri, strip_query};
pub use dynamic_sse::{DynamicSseSettings, DynamicSseTerm};
pub use ellipsoid::Cartographic;
pub use error::{ContentError, StructuralError, TilesError, TilesResult};
pub use events::{LoadProgress, TileFailure, TilesetEvents};
pub use executor::{ContentTask, InlineRunner, TaskRunner, WorkerPool};
pub use frame::FrameContext;
pub use options::TilesetOptions;
pub use pipeline::{ContentEvent, LoadPipeline, RequestId};
pub use priority::{PreferredSorting, PriorityBounds, PriorityKey, compute_priority};
pub use render::{DrawPass, TileRenderer};
pub use statistics::Statistics;
pub use tile::{ContentState, Refinement, Tile, TileFrameState, TileId};
pub use tileset::Tileset;

#[cfg(test)]
mod test_support {
    use std::collections::HashMap;

    use glam::DMat4;

    use crate::arena::TileArena;
    use crate::content::ContentSource;
    use crate::document::TilesetDocument;
    use crate::tile::TileId;

    /// In-memory content keyed by locator. Unknown locators fail.
    #[derive(Clone, Debug, Default)]
    pub struct MapSource {
        entries: HashMap<String, Vec<u8>>,
    }

    impl MapSource {
        pub fn with(mut self, uri: &str, bytes: Vec<u8>) -> Self {
            self.entries.insert(uri.to_string(), bytes);
            self
        }
    }

    impl ContentSource for MapSource {
        fn fetch(&self, uri: &str) -> Result<Vec<u8>, String> {
            self.entries
                .get(uri)
                .cloned()
                .ok_or_else(|| format!("no content at {uri}"))
        }
    }

    fn load(json: &str) -> (TileArena, TileId) {
        let doc = TilesetDocument::parse(json.as_bytes()).unwrap();
        let mut tiles = TileArena::new();
        let root = tiles.insert_document(&doc, "", None, &DMat4::IDENTITY).unwrap();
        (tiles, root)
    }

    /// A lone root tile whose content lives at `uri`.
    pub fn single_tile_arena(uri: &str) -> (TileArena, TileId) {
        load(&format!(
            r#"{{
                "asset": {{ "version": "1.0" }},
                "geometricError": 100,
                "root": {{
                    "boundingVolume": {{ "sphere": [0, 0, 0, 10] }},
                    "geometricError": 10,
                    "content": {{ "uri": "{uri}" }}
                }}
            }}"#
        ))
    }

    /// A replacement root box centred on the origin, 200 x 200 x 20, split
    /// into four quadrant children. Content is `root.b3dm` and `c0.b3dm`
    /// through `c3.b3dm`.
    pub fn quad_tree_json(root_error: f64, child_error: f64) -> String {
        let children: Vec<String> = [(-50.0, -50.0), (50.0, -50.0), (-50.0, 50.0), (50.0, 50.0)]
            .iter()
            .enumerate()
            .map(|(i, (x, y))| {
                format!(
                    r#"{{
                        "boundingVolume": {{ "box": [{x}, {y}, 0, 50, 0, 0, 0, 50, 0, 0, 0, 10] }},
                        "geometricError": {child_error},
                        "content": {{ "uri": "c{i}.b3dm" }}
                    }}"#
                )
            })
            .collect();
        format!(
            r#"{{
                "asset": {{ "version": "1.0" }},
                "geometricError": {tileset_error},
                "root": {{
                    "boundingVolume": {{ "box": [0, 0, 0, 100, 0, 0, 0, 100, 0, 0, 0, 10] }},
                    "geometricError": {root_error},
                    "refine": "REPLACE",
                    "content": {{ "uri": "root.b3dm" }},
                    "children": [{children}]
                }}
            }}"#,
            tileset_error = root_error * 10.0,
            children = children.join(","),
        )
    }

    pub fn quad_tree_arena() -> (TileArena, TileId) {
        load(&quad_tree_json(100.0, 10.0))
    }
}
