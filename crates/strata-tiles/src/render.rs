//! Submission of the selected tiles to an external renderer.
//!
//! When skipped levels of detail leave coarse ancestors and finer
//! descendants selected over the same screen area, the ancestors' back
//! faces are drawn first and the front faces follow in ascending selection
//! depth, so finer content wins depth and stencil ties.

use crate::arena::TileArena;
use crate::tile::{Tile, TileId};

/// Which faces of a tile to draw and how to order them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrawPass {
    /// Back faces of a tile drawn in place of descendants that are not
    /// loaded yet. Writes depth only.
    BackFaces,
    /// Regular draw. `selection_depth` is the stencil reference.
    FrontFaces { selection_depth: u32 },
}

/// Receives draw submissions for one frame.
pub trait TileRenderer {
    /// Clear the selection-depth stencil before mixed-depth draws.
    fn clear_selection_stencil(&mut self) {}

    fn draw_tile(&mut self, tile: &Tile, pass: DrawPass);

    /// Debug outline of a tile's bounds; only called when enabled on the tileset.
    fn draw_bounding_volume(&mut self, _tile: &Tile) {}
}

/// Submit `selected` in draw order.
///
/// `resolve_mixed_depths` enables the stencil clear, the back-face pass and
/// the depth-ordered front-face pass.
pub(crate) fn submit(
    tiles: &TileArena,
    selected: &[TileId],
    resolve_mixed_depths: bool,
    renderer: &mut dyn TileRenderer,
) {
    let selected: Vec<&Tile> = selected.iter().filter_map(|id| tiles.get(*id)).collect();

    if !resolve_mixed_depths || selected.is_empty() {
        for tile in selected {
            let selection_depth = tile.frame.selection_depth;
            renderer.draw_tile(tile, DrawPass::FrontFaces { selection_depth });
        }
        return;
    }

    renderer.clear_selection_stencil();
    for tile in selected.iter().filter(|t| !t.frame.final_resolution) {
        renderer.draw_tile(tile, DrawPass::BackFaces);
    }

    let mut ordered = selected;
    // Stable: equal depths keep selection order.
    ordered.sort_by_key(|t| t.frame.selection_depth);
    for tile in ordered {
        let selection_depth = tile.frame.selection_depth;
        renderer.draw_tile(tile, DrawPass::FrontFaces { selection_depth });
    }
}
