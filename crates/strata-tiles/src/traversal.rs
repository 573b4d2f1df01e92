//! Per-frame selection of tiles to draw and tiles to load.
//!
//! The walk is depth-first from the root with an explicit stack. Each
//! visited tile is culled, its screen-space error compared with the target,
//! and it is then refined, selected, or queued for loading.
//!
//! Without skipping levels of detail a replacement tile refines only when
//! every child can be drawn, so either the tile or a complete child set is
//! selected. With skipping enabled, tiles far below their nearest loaded
//! ancestor may load and draw first; a second pass
//! ([`Traversal::traverse_and_select`]) records a selection depth for each
//! drawn tile so the renderer can resolve overlapping ancestors.

use crate::arena::TileArena;
use crate::bounds::Intersect;
use crate::cache::ResidentCache;
use crate::culling::PlaneMask;
use crate::frame::FrameContext;
use crate::options::TilesetOptions;
use crate::priority::{PriorityBounds, PriorityKey};
use crate::statistics::Statistics;
use crate::tile::{Refinement, Tile, TileId};

/// How far below a tile without a loaded ancestor to search for drawable
/// descendants.
const DESCENDANT_SELECTION_DEPTH: u32 = 2;

/// Everything traversal reads and writes for one frame.
pub(crate) struct TraversalContext<'a> {
    pub tiles: &'a mut TileArena,
    pub cache: &'a mut ResidentCache,
    pub statistics: &'a mut Statistics,
    pub options: &'a TilesetOptions,
    pub frame: &'a FrameContext,
    pub root: TileId,
    /// Skipping is enabled and at least one tile replaces its parent.
    pub skip_level_of_detail: bool,
}

/// Output of one traversal.
#[derive(Debug, Default)]
pub(crate) struct Selection {
    /// Tiles to draw, in selection order.
    pub selected: Vec<TileId>,
    /// Tiles that need content, unsorted and without duplicates.
    pub requested: Vec<TileId>,
    /// Visited organisational tiles.
    pub empty: Vec<TileId>,
    /// Tiles at different selection depths overlap on screen.
    pub has_mixed_content: bool,
    /// Range of priority criteria over the tiles updated this frame.
    pub priority_bounds: PriorityBounds,
}

impl Selection {
    fn clear(&mut self) {
        self.selected.clear();
        self.requested.clear();
        self.empty.clear();
        self.has_mixed_content = false;
        self.priority_bounds.reset();
    }
}

/// Scratch stacks reused across frames, plus the latest selection.
#[derive(Debug, Default)]
pub(crate) struct Traversal {
    stack: Vec<TileId>,
    empty_stack: Vec<TileId>,
    descendant_stack: Vec<TileId>,
    selection_stack: Vec<TileId>,
    ancestor_stack: Vec<TileId>,
    pub selection: Selection,
}

fn has_empty_content(tile: &Tile) -> bool {
    tile.has_empty_content() || tile.has_tileset_content()
}

fn has_unloaded_content(tile: &Tile) -> bool {
    !has_empty_content(tile) && tile.content_unloaded()
}

fn can_traverse(ctx: &TraversalContext<'_>, id: TileId) -> bool {
    let tile = &ctx.tiles[id];
    if tile.children.is_empty() {
        return false;
    }
    if tile.has_tileset_content {
        // An expired nested tileset is about to be replaced.
        return !tile.content_expired();
    }
    tile.frame.screen_space_error > ctx.options.maximum_screen_space_error()
}

/// Recompute distance, error and frustum visibility once per frame.
fn update_visibility(ctx: &mut TraversalContext<'_>, id: TileId) {
    let frame_number = ctx.frame.frame_number;
    let parent_mask = ctx.tiles[id]
        .parent
        .and_then(|p| ctx.tiles.get(p))
        .map_or(PlaneMask::INDETERMINATE, |p| p.frame.plane_mask);
    let tile = &mut ctx.tiles[id];
    if tile.frame.visibility_frame == frame_number {
        return;
    }
    tile.update_visibility(ctx.frame, parent_mask);
    tile.frame.visibility_frame = frame_number;
}

/// Frustum visibility refined by nested-tileset, additive-parent and
/// children-union rules.
fn update_tile_visibility(ctx: &mut TraversalContext<'_>, id: TileId) {
    update_visibility(ctx, id);
    let tile = &ctx.tiles[id];
    if !tile.is_visible() {
        return;
    }

    let has_children = !tile.children.is_empty();
    if tile.has_tileset_content && has_children {
        // Mirror the nested root, which may itself be culled by its children.
        let nested_root = tile.children[0];
        update_tile_visibility(ctx, nested_root);
        let visible = ctx.tiles[nested_root].frame.visible;
        ctx.tiles[id].frame.visible = visible;
        return;
    }

    if meets_screen_space_error_early(ctx, id) {
        ctx.tiles[id].frame.visible = false;
        return;
    }

    let tile = &ctx.tiles[id];
    let use_children_union = tile.refinement() == Refinement::Replace
        && ctx.options.cull_with_children_bounds()
        && tile.children_within_parent
        && has_children;
    if use_children_union {
        let mut any_visible = false;
        for i in 0..ctx.tiles[id].children.len() {
            let child = ctx.tiles[id].children[i];
            update_visibility(ctx, child);
            any_visible |= ctx.tiles[child].is_visible();
        }
        if !any_visible {
            ctx.statistics.culled_with_children_union += 1;
            ctx.tiles[id].frame.visible = false;
        }
    }
}

/// A child of an additive parent whose parent error already meets the
/// target adds nothing.
fn meets_screen_space_error_early(ctx: &TraversalContext<'_>, id: TileId) -> bool {
    let tile = &ctx.tiles[id];
    let Some(parent) = tile.parent.and_then(|p| ctx.tiles.get(p)) else {
        return false;
    };
    if parent.has_tileset_content || parent.refinement() != Refinement::Add {
        return false;
    }
    tile.compute_screen_space_error(ctx.frame, true) <= ctx.options.maximum_screen_space_error()
}

/// Root error minus the tile's error; coarse tiles get small values.
fn priority_reverse_screen_space_error(ctx: &TraversalContext<'_>, id: TileId) -> f64 {
    let tile = &ctx.tiles[id];
    let root_error = ctx.tiles[ctx.root].frame.screen_space_error;
    let error = match tile.parent.and_then(|p| ctx.tiles.get(p)) {
        Some(parent)
            if !ctx.skip_level_of_detail
                || tile.frame.screen_space_error == 0.0
                || parent.has_tileset_content =>
        {
            parent.frame.screen_space_error
        }
        _ => tile.frame.screen_space_error,
    };
    root_error - error
}

/// Link a tile to its nearest ancestors with content and with drawable content.
fn update_ancestor_content_links(ctx: &mut TraversalContext<'_>, id: TileId) {
    let frame_number = ctx.frame.frame_number;
    let links = ctx.tiles[id]
        .parent
        .and_then(|p| ctx.tiles.get(p))
        .map(|parent| {
            let has_content =
                !has_unloaded_content(parent) || parent.frame.requested_frame == frame_number;
            let with_content = if has_content {
                Some(parent.id())
            } else {
                parent.frame.ancestor_with_content
            };
            let with_content_available = if parent.content_available() {
                Some(parent.id())
            } else {
                parent.frame.ancestor_with_content_available
            };
            (with_content, with_content_available)
        });
    let (with_content, with_content_available) = links.unwrap_or((None, None));
    let tile = &mut ctx.tiles[id];
    tile.frame.ancestor_with_content = with_content;
    tile.frame.ancestor_with_content_available = with_content_available;
}

/// Whether a replacement tile is loaded unconditionally.
fn in_base_traversal(ctx: &TraversalContext<'_>, id: TileId, base_screen_space_error: f64) -> bool {
    if !ctx.skip_level_of_detail {
        return true;
    }
    if ctx.options.immediately_load_desired_level_of_detail() {
        return false;
    }
    let tile = &ctx.tiles[id];
    if tile.frame.ancestor_with_content.is_none() {
        // Root and near-root tiles give skipped tiles something to fall back on.
        return true;
    }
    if tile.frame.screen_space_error == 0.0 {
        // Leaves use their parent's error.
        return tile
            .parent
            .and_then(|p| ctx.tiles.get(p))
            .is_some_and(|p| p.frame.screen_space_error > base_screen_space_error);
    }
    tile.frame.screen_space_error > base_screen_space_error
}

/// Whether a tile is far enough below its loaded ancestor to be worth loading.
fn reached_skipping_threshold(ctx: &TraversalContext<'_>, id: TileId) -> bool {
    if ctx.options.immediately_load_desired_level_of_detail() {
        return false;
    }
    let tile = &ctx.tiles[id];
    tile.frame
        .ancestor_with_content
        .and_then(|a| ctx.tiles.get(a))
        .is_some_and(|ancestor| {
            tile.frame.screen_space_error
                < ancestor.frame.screen_space_error / ctx.options.skip_screen_space_error_factor()
                && tile.depth() > ancestor.depth() + ctx.options.skip_levels()
        })
}

/// Farthest first, so the nearest child is popped first.
fn sort_children_by_distance(tiles: &TileArena, children: &mut [TileId]) {
    children.sort_by(|a, b| {
        let (a, b) = (&tiles[*a].frame, &tiles[*b].frame);
        if a.distance_to_camera == 0.0 && b.distance_to_camera == 0.0 {
            b.center_z_depth.total_cmp(&a.center_z_depth)
        } else {
            b.distance_to_camera.total_cmp(&a.distance_to_camera)
        }
    });
}

impl Traversal {
    /// Run one traversal from `ctx.root`, replacing the previous selection.
    pub(crate) fn select_tiles(&mut self, ctx: &mut TraversalContext<'_>) {
        self.selection.clear();

        let root = ctx.root;
        self.update_tile(ctx, root);
        if !ctx.tiles[root].is_visible() {
            return;
        }
        let maximum = ctx.options.maximum_screen_space_error();

        if !ctx.skip_level_of_detail {
            self.execute_traversal(ctx, maximum);
        } else if ctx.options.immediately_load_desired_level_of_detail() {
            self.execute_traversal(ctx, f64::MAX);
            self.traverse_and_select(ctx);
        } else {
            let base = ctx.options.base_screen_space_error().max(maximum);
            self.execute_traversal(ctx, base);
            self.traverse_and_select(ctx);
        }
    }

    fn update_tile(&mut self, ctx: &mut TraversalContext<'_>, id: TileId) {
        update_tile_visibility(ctx, id);
        let reverse_error = priority_reverse_screen_space_error(ctx, id);
        let now = ctx.frame.time_seconds;
        let tile = &mut ctx.tiles[id];
        tile.update_expiration(now);
        tile.reset_traversal_state();
        tile.frame.priority_reverse_screen_space_error = reverse_error;
        self.selection.priority_bounds.include(&PriorityKey {
            distance: tile.frame.distance_to_camera,
            depth: f64::from(tile.depth()),
            reverse_screen_space_error: reverse_error,
        });
    }

    fn visit_tile(ctx: &mut TraversalContext<'_>, id: TileId) {
        ctx.statistics.visited += 1;
        ctx.tiles[id].frame.visited_frame = ctx.frame.frame_number;
    }

    fn touch_tile(ctx: &mut TraversalContext<'_>, id: TileId) {
        let frame_number = ctx.frame.frame_number;
        let tile = &mut ctx.tiles[id];
        if tile.frame.touched_frame == frame_number {
            return;
        }
        tile.frame.touched_frame = frame_number;
        ctx.cache.touch(id);
    }

    fn load_tile(&mut self, ctx: &mut TraversalContext<'_>, id: TileId) {
        let frame_number = ctx.frame.frame_number;
        let tile = &mut ctx.tiles[id];
        if tile.frame.requested_frame == frame_number
            || (!has_unloaded_content(tile) && !tile.content_expired())
        {
            return;
        }
        tile.frame.requested_frame = frame_number;
        self.selection.requested.push(id);
    }

    fn add_empty_tile(&mut self, ctx: &mut TraversalContext<'_>, id: TileId) {
        ctx.statistics.empty_tiles += 1;
        self.selection.empty.push(id);
    }

    fn select_tile(&mut self, ctx: &mut TraversalContext<'_>, id: TileId) {
        let frame_number = ctx.frame.frame_number;
        let tile = &mut ctx.tiles[id];
        if tile.frame.selected_frame == frame_number {
            return;
        }
        if tile.content_visibility(&ctx.frame.culling_volume) == Intersect::Outside {
            return;
        }
        tile.frame.selected_frame = frame_number;
        ctx.statistics.selected += 1;
        self.selection.selected.push(id);
    }

    /// Select a tile that stopped refining, or stand in for it.
    fn select_desired_tile(&mut self, ctx: &mut TraversalContext<'_>, id: TileId) {
        if !ctx.skip_level_of_detail {
            if ctx.tiles[id].content_available() {
                self.select_tile(ctx, id);
            }
            return;
        }

        let tile = &ctx.tiles[id];
        let loaded = if tile.content_available() {
            Some(id)
        } else {
            tile.frame.ancestor_with_content_available
        };
        match loaded {
            // Actually selected by traverse_and_select.
            Some(loaded) => ctx.tiles[loaded].frame.should_select = true,
            // Nothing above is drawable; fill the hole from below.
            None => self.select_descendants(ctx, id),
        }
    }

    fn select_descendants(&mut self, ctx: &mut TraversalContext<'_>, root: TileId) {
        let root_depth = ctx.tiles[root].depth();
        let mut stack = std::mem::take(&mut self.descendant_stack);
        stack.push(root);
        while let Some(id) = stack.pop() {
            for i in 0..ctx.tiles[id].children.len() {
                let child = ctx.tiles[id].children[i];
                update_visibility(ctx, child);
                let tile = &ctx.tiles[child];
                if !tile.is_visible() {
                    continue;
                }
                if tile.content_available() {
                    self.update_tile(ctx, child);
                    Self::touch_tile(ctx, child);
                    self.select_tile(ctx, child);
                } else if tile.depth() - root_depth < DESCENDANT_SELECTION_DEPTH {
                    stack.push(child);
                }
            }
        }
        self.descendant_stack = stack;
    }

    fn execute_traversal(&mut self, ctx: &mut TraversalContext<'_>, base_screen_space_error: f64) {
        let mut stack = std::mem::take(&mut self.stack);
        stack.push(ctx.root);

        while let Some(id) = stack.pop() {
            update_ancestor_content_links(ctx, id);
            let base_traversal = in_base_traversal(ctx, id, base_screen_space_error);
            let tile = &ctx.tiles[id];
            let refine = tile.refinement();
            let parent_refines = tile
                .parent
                .and_then(|p| ctx.tiles.get(p))
                .is_none_or(|p| p.frame.refines);

            let mut refines = false;
            if can_traverse(ctx, id) {
                refines = self.update_and_push_children(ctx, id, &mut stack) && parent_refines;
            }
            let stopped_refining = !refines && parent_refines;

            if has_empty_content(&ctx.tiles[id]) {
                // Loads a nested tileset; stands in for its loaded ancestor
                // when it cannot refine.
                self.add_empty_tile(ctx, id);
                self.load_tile(ctx, id);
                if stopped_refining {
                    self.select_desired_tile(ctx, id);
                }
            } else if refine == Refinement::Add {
                self.select_desired_tile(ctx, id);
                self.load_tile(ctx, id);
            } else if base_traversal {
                self.load_tile(ctx, id);
                if stopped_refining {
                    self.select_desired_tile(ctx, id);
                }
            } else if stopped_refining {
                self.select_desired_tile(ctx, id);
                self.load_tile(ctx, id);
            } else if reached_skipping_threshold(ctx, id) {
                self.load_tile(ctx, id);
            }

            Self::visit_tile(ctx, id);
            Self::touch_tile(ctx, id);
            ctx.tiles[id].frame.refines = refines;
        }

        self.stack = stack;
    }

    /// Update every child, push the visible ones, and report whether the
    /// tile may refine to them.
    fn update_and_push_children(
        &mut self,
        ctx: &mut TraversalContext<'_>,
        id: TileId,
        stack: &mut Vec<TileId>,
    ) -> bool {
        let mut children = ctx.tiles[id].children.clone();
        for &child in &children {
            self.update_tile(ctx, child);
        }
        sort_children_by_distance(ctx.tiles, &mut children);

        let tile = &ctx.tiles[id];
        let replace = tile.refinement() == Refinement::Replace;
        // Without skipping, replacement refines only once every child can
        // draw. Organisational parents are exempt so children stream in.
        let check_refines = !ctx.skip_level_of_detail && replace && !has_empty_content(tile);

        let mut refines = true;
        let mut any_children_visible = false;
        let mut min_child = None;
        let mut min_distance = f64::MAX;

        for &child in &children {
            let tile = &ctx.tiles[child];
            let distance = tile.frame.distance_to_camera;
            if tile.is_visible() {
                stack.push(child);
                any_children_visible = true;
                if distance < min_distance {
                    min_child = Some(child);
                    min_distance = distance;
                }
            } else if check_refines || ctx.options.load_siblings() {
                // Needed before the parent can refine, or siblings are wanted anyway.
                if distance < min_distance {
                    min_child = Some(child);
                    min_distance = distance;
                }
                self.load_tile(ctx, child);
                Self::touch_tile(ctx, child);
            }

            if check_refines {
                let tile = &ctx.tiles[child];
                let child_refines = if !tile.frame.in_request_volume {
                    false
                } else if has_empty_content(tile) {
                    self.execute_empty_traversal(ctx, child)
                } else {
                    tile.content_available()
                };
                refines = refines && child_refines;
            }
        }

        if !any_children_visible {
            refines = false;
        }

        if let Some(min_child) = min_child
            && !ctx.skip_level_of_detail
            && replace
        {
            // Siblings share the distance of the nearest child, carried up
            // a chain of nearest children so whole branches load together.
            ctx.tiles[min_child].frame.was_min_priority_child = true;
            let tile = &ctx.tiles[id];
            let current_holder = tile.frame.priority_holder.unwrap_or(id);
            let holder_distance = ctx
                .tiles
                .get(current_holder)
                .map_or(f64::MAX, |h| h.frame.priority_distance);
            let holder = if (tile.frame.was_min_priority_child || id == ctx.root)
                && min_distance <= holder_distance
            {
                current_holder
            } else {
                id
            };
            let holder_frame = &mut ctx.tiles[holder].frame;
            holder_frame.priority_distance = holder_frame.priority_distance.min(min_distance);
            for &child in &children {
                ctx.tiles[child].frame.priority_holder = Some(holder);
            }
        }

        refines
    }

    /// Whether every nearest descendant with content below an
    /// organisational tile is drawable. Ignores visibility.
    fn execute_empty_traversal(&mut self, ctx: &mut TraversalContext<'_>, root: TileId) -> bool {
        let mut all_descendants_loaded = true;
        let mut stack = std::mem::take(&mut self.empty_stack);
        stack.push(root);

        while let Some(id) = stack.pop() {
            self.update_tile(ctx, id);
            let tile = &ctx.tiles[id];
            let empty = has_empty_content(tile);
            let traverse = empty && can_traverse(ctx, id);
            let empty_leaf = empty && tile.children.is_empty();

            // An empty leaf leaves no hole, so the parent may still refine.
            if !traverse && !tile.content_available() && !empty_leaf {
                all_descendants_loaded = false;
            }
            if !tile.is_visible() {
                // Still needed before the parent can refine.
                self.load_tile(ctx, id);
                Self::touch_tile(ctx, id);
            }
            if traverse {
                stack.extend(ctx.tiles[id].children.iter().copied());
            }
        }

        self.empty_stack = stack;
        all_descendants_loaded
    }

    /// Select the tiles marked during a skipping traversal, assigning each
    /// replacement tile its depth among selected ancestors.
    ///
    /// An ancestor is selected after its whole subtree has been walked; it
    /// loses final resolution if a descendant was selected meanwhile.
    fn traverse_and_select(&mut self, ctx: &mut TraversalContext<'_>) {
        let mut stack = std::mem::take(&mut self.selection_stack);
        let mut ancestors = std::mem::take(&mut self.ancestor_stack);
        let mut last_ancestor = None;
        stack.push(ctx.root);

        while !stack.is_empty() || !ancestors.is_empty() {
            if let Some(&waiting) = ancestors.last()
                && (ctx.tiles[waiting].frame.stack_length == stack.len() || stack.is_empty())
            {
                ancestors.pop();
                if Some(waiting) != last_ancestor {
                    ctx.tiles[waiting].frame.final_resolution = false;
                }
                self.select_tile(ctx, waiting);
                continue;
            }

            let Some(id) = stack.pop() else {
                break;
            };
            let tile = &ctx.tiles[id];
            let add = tile.refinement() == Refinement::Add;
            let should_select = tile.frame.should_select;
            let traverse = can_traverse(ctx, id);

            if should_select {
                if add {
                    self.select_tile(ctx, id);
                } else {
                    let selection_depth = ancestors.len() as u32;
                    ctx.tiles[id].frame.selection_depth = selection_depth;
                    if selection_depth > 0 {
                        self.selection.has_mixed_content = true;
                    }
                    last_ancestor = Some(id);
                    if !traverse {
                        self.select_tile(ctx, id);
                        continue;
                    }
                    ctx.tiles[id].frame.stack_length = stack.len();
                    ancestors.push(id);
                }
            }

            if traverse {
                for i in 0..ctx.tiles[id].children.len() {
                    let child = ctx.tiles[id].children[i];
                    if ctx.tiles[child].is_visible() {
                        stack.push(child);
                    }
                }
            }
        }

        self.selection_stack = stack;
        self.ancestor_stack = ancestors;
    }
}
