//! Renderer stand-in that tallies draw submissions.

use strata_tiles::{DrawPass, Tile, TileRenderer};

/// Per-frame draw counts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DrawCounter {
    pub tiles: usize,
    pub back_face_passes: usize,
    pub stencil_clears: usize,
    pub bounding_volumes: usize,
    /// Content bytes submitted this frame.
    pub bytes: u64,
    /// Deepest stencil reference used this frame.
    pub max_selection_depth: u32,
}

impl DrawCounter {
    pub fn begin_frame(&mut self) {
        *self = Self::default();
    }
}

impl TileRenderer for DrawCounter {
    fn clear_selection_stencil(&mut self) {
        self.stencil_clears += 1;
    }

    fn draw_tile(&mut self, tile: &Tile, pass: DrawPass) {
        match pass {
            DrawPass::BackFaces => self.back_face_passes += 1,
            DrawPass::FrontFaces { selection_depth } => {
                self.tiles += 1;
                self.max_selection_depth = self.max_selection_depth.max(selection_depth);
                self.bytes += tile.content().map_or(0, |c| c.memory().total());
            }
        }
    }

    fn draw_bounding_volume(&mut self, _tile: &Tile) {
        self.bounding_volumes += 1;
    }
}
