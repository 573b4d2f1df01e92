//! A node of the tile hierarchy and its content state machine.
//!
//! Tiles live in a [`TileArena`](crate::arena::TileArena) and refer to each
//! other by [`TileId`]. Traversal scratch data lives in [`TileFrameState`]
//! and is rewritten every frame the tile is visited.

use glam::DMat4;

use crate::bounds::{BoundingVolume, Intersect};
use crate::content::RenderContent;
use crate::culling::{CullingVolume, PlaneMask};
use crate::frame::FrameContext;
use crate::pipeline::ActiveRequest;

/// Stable handle of a tile inside its tileset. Never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(u32);

impl TileId {
    /// Handle for slot `index` of an arena.
    #[must_use]
    pub fn from_index(index: usize) -> Self {
        Self(index as u32)
    }

    /// Slot index in the arena.
    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// How children relate to their parent's content.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Refinement {
    /// Children fully substitute the parent.
    #[default]
    Replace,
    /// Children are drawn in addition to the parent.
    Add,
}

/// Content loading state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentState {
    Unloaded,
    /// Waiting for the content source.
    Loading,
    /// Bytes received; waiting for the processor.
    Processing,
    Ready,
    /// Content is stale and must be reloaded; the old content stays drawable.
    Expired,
    Failed,
}

/// Per-frame traversal fields.
///
/// Frame numbers record the last frame in which something happened; a field
/// is current only when its frame equals the tileset's current frame.
#[derive(Clone, Debug)]
pub struct TileFrameState {
    /// Visibility-update pass that last computed the fields below.
    pub visibility_frame: u64,
    pub visited_frame: u64,
    pub touched_frame: u64,
    pub selected_frame: u64,
    pub requested_frame: u64,
    pub distance_to_camera: f64,
    /// Distance of the bounding volume centre along the view direction.
    pub center_z_depth: f64,
    pub screen_space_error: f64,
    pub plane_mask: PlaneMask,
    pub visible: bool,
    pub in_request_volume: bool,
    /// Children will be drawn in place of this tile.
    pub refines: bool,
    pub should_select: bool,
    /// This tile itself is drawn this frame.
    pub final_resolution: bool,
    /// Depth among selected ancestors; used to order skip-LOD draws.
    pub selection_depth: u32,
    pub stack_length: usize,
    /// Nearest ancestor with renderable content.
    pub ancestor_with_content: Option<TileId>,
    /// Nearest ancestor whose content is available to draw.
    pub ancestor_with_content_available: Option<TileId>,
    /// Tile holding the distance used to prioritise this sibling group.
    pub priority_holder: Option<TileId>,
    pub priority_distance: f64,
    pub was_min_priority_child: bool,
    pub priority_reverse_screen_space_error: f64,
    pub priority: f64,
}

impl Default for TileFrameState {
    fn default() -> Self {
        Self {
            visibility_frame: 0,
            visited_frame: 0,
            touched_frame: 0,
            selected_frame: 0,
            requested_frame: 0,
            distance_to_camera: 0.0,
            center_z_depth: 0.0,
            screen_space_error: 0.0,
            plane_mask: PlaneMask::INDETERMINATE,
            visible: false,
            in_request_volume: true,
            refines: false,
            should_select: false,
            final_resolution: true,
            selection_depth: 0,
            stack_length: 0,
            ancestor_with_content: None,
            ancestor_with_content_available: None,
            priority_holder: None,
            priority_distance: 0.0,
            was_min_priority_child: false,
            priority_reverse_screen_space_error: 0.0,
            priority: 0.0,
        }
    }
}

/// Static description of a tile as read from the document, already
/// resolved into world space.
#[derive(Clone, Debug)]
pub(crate) struct TileSpec {
    pub parent: Option<TileId>,
    pub depth: u32,
    pub refine: Refinement,
    pub geometric_error: f64,
    pub parent_geometric_error: f64,
    pub local_transform: DMat4,
    pub computed_transform: DMat4,
    pub local_bounding_volume: BoundingVolume,
    pub local_content_bounding_volume: Option<BoundingVolume>,
    pub local_viewer_request_volume: Option<BoundingVolume>,
    pub content_uri: Option<String>,
    pub expire_duration: Option<f64>,
}

/// A node in the spatial hierarchy.
#[derive(Debug)]
pub struct Tile {
    id: TileId,
    pub(crate) parent: Option<TileId>,
    pub(crate) children: Vec<TileId>,
    depth: u32,
    refine: Refinement,
    geometric_error: f64,
    parent_geometric_error: f64,
    local_transform: DMat4,
    computed_transform: DMat4,
    local_bounding_volume: BoundingVolume,
    bounding_volume: BoundingVolume,
    local_content_bounding_volume: Option<BoundingVolume>,
    content_bounding_volume: Option<BoundingVolume>,
    local_viewer_request_volume: Option<BoundingVolume>,
    viewer_request_volume: Option<BoundingVolume>,
    content_uri: Option<String>,
    pub(crate) has_tileset_content: bool,
    /// Children lie inside this tile's bounds, so their union may cull it.
    pub(crate) children_within_parent: bool,
    state: ContentState,
    content: Option<RenderContent>,
    expire_duration: Option<f64>,
    expire_at: Option<f64>,
    pub(crate) request: Option<ActiveRequest>,
    pub(crate) frame: TileFrameState,
}

impl Tile {
    pub(crate) fn new(id: TileId, spec: TileSpec) -> Self {
        let bounding_volume = spec.local_bounding_volume.transform(&spec.computed_transform);
        let content_bounding_volume = spec
            .local_content_bounding_volume
            .map(|v| v.transform(&spec.computed_transform));
        let viewer_request_volume = spec
            .local_viewer_request_volume
            .map(|v| v.transform(&spec.computed_transform));
        // Tiles without content are organisational and ready from the start.
        let state = if spec.content_uri.is_some() {
            ContentState::Unloaded
        } else {
            ContentState::Ready
        };
        Self {
            id,
            parent: spec.parent,
            children: Vec::new(),
            depth: spec.depth,
            refine: spec.refine,
            geometric_error: spec.geometric_error,
            parent_geometric_error: spec.parent_geometric_error,
            local_transform: spec.local_transform,
            computed_transform: spec.computed_transform,
            local_bounding_volume: spec.local_bounding_volume,
            bounding_volume,
            local_content_bounding_volume: spec.local_content_bounding_volume,
            content_bounding_volume,
            local_viewer_request_volume: spec.local_viewer_request_volume,
            viewer_request_volume,
            content_uri: spec.content_uri,
            has_tileset_content: false,
            children_within_parent: false,
            state,
            content: None,
            expire_duration: spec.expire_duration,
            expire_at: None,
            request: None,
            frame: TileFrameState::default(),
        }
    }

    /// Handle of this tile in its arena.
    pub fn id(&self) -> TileId {
        self.id
    }

    /// Parent handle; `None` for the tileset root.
    pub fn parent(&self) -> Option<TileId> {
        self.parent
    }

    /// Child handles in document order.
    pub fn children(&self) -> &[TileId] {
        &self.children
    }

    /// Distance from the tileset root, counting nested tilesets.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Declared or inherited refinement.
    pub fn refinement(&self) -> Refinement {
        self.refine
    }

    /// Error in metres introduced by drawing this tile instead of its children.
    pub fn geometric_error(&self) -> f64 {
        self.geometric_error
    }

    /// Error of the parent; +∞ for the tileset root.
    pub fn parent_geometric_error(&self) -> f64 {
        self.parent_geometric_error
    }

    /// Transform relative to the parent tile.
    pub fn local_transform(&self) -> &DMat4 {
        &self.local_transform
    }

    /// Local-to-world transform including every ancestor and the model matrix.
    pub fn computed_transform(&self) -> &DMat4 {
        &self.computed_transform
    }

    /// World-space bounding volume.
    pub fn bounding_volume(&self) -> &BoundingVolume {
        &self.bounding_volume
    }

    pub(crate) fn local_bounding_volume(&self) -> &BoundingVolume {
        &self.local_bounding_volume
    }

    /// Tighter world-space bounds of the content, when declared.
    pub fn content_bounding_volume(&self) -> Option<&BoundingVolume> {
        self.content_bounding_volume.as_ref()
    }

    /// World-space volume the camera must be inside for this tile to be used.
    pub fn viewer_request_volume(&self) -> Option<&BoundingVolume> {
        self.viewer_request_volume.as_ref()
    }

    /// Resolved content locator; `None` for organisational tiles.
    pub fn content_uri(&self) -> Option<&str> {
        self.content_uri.as_deref()
    }

    /// Content is a nested tileset whose root is this tile's only child.
    pub fn has_tileset_content(&self) -> bool {
        self.has_tileset_content
    }

    /// No content at all; the tile only groups children.
    pub fn has_empty_content(&self) -> bool {
        self.content_uri.is_none()
    }

    /// Content that is drawn and counted against the memory budget.
    pub fn has_renderable_content(&self) -> bool {
        self.content_uri.is_some() && !self.has_tileset_content
    }

    /// Current step of the content state machine.
    pub fn content_state(&self) -> ContentState {
        self.state
    }

    /// Content is loaded and current.
    pub fn content_ready(&self) -> bool {
        self.state == ContentState::Ready
    }

    /// No content and no request in flight.
    pub fn content_unloaded(&self) -> bool {
        self.state == ContentState::Unloaded
    }

    /// Content is stale and waiting to be re-requested.
    pub fn content_expired(&self) -> bool {
        self.state == ContentState::Expired
    }

    /// The last load or process attempt failed.
    pub fn content_failed(&self) -> bool {
        self.state == ContentState::Failed
    }

    /// Something drawable is present, possibly stale content awaiting reload.
    pub fn content_available(&self) -> bool {
        self.content.is_some() && self.state != ContentState::Failed
    }

    /// Loaded content, stale or current.
    pub fn content(&self) -> Option<&RenderContent> {
        self.content.as_ref()
    }

    /// Mutable access for styling from `tile_visible` listeners.
    pub fn content_mut(&mut self) -> Option<&mut RenderContent> {
        self.content.as_mut()
    }

    /// Host time after which the content is stale.
    pub fn expire_at(&self) -> Option<f64> {
        self.expire_at
    }

    /// Traversal fields from the most recent frame this tile was visited.
    pub fn frame_state(&self) -> &TileFrameState {
        &self.frame
    }

    /// Visible and inside its viewer request volume.
    pub fn is_visible(&self) -> bool {
        self.frame.visible && self.frame.in_request_volume
    }

    pub(crate) fn set_transform(&mut self, parent_transform: &DMat4) {
        self.computed_transform = *parent_transform * self.local_transform;
        self.bounding_volume = self.local_bounding_volume.transform(&self.computed_transform);
        self.content_bounding_volume = self
            .local_content_bounding_volume
            .map(|v| v.transform(&self.computed_transform));
        self.viewer_request_volume = self
            .local_viewer_request_volume
            .map(|v| v.transform(&self.computed_transform));
    }

    /// Project the tile's geometric error (or its parent's) into pixels.
    ///
    /// Returns zero for zero-error tiles and +∞ when the error is infinite,
    /// which is always the case for the tileset root's parent.
    pub fn compute_screen_space_error(&self, frame: &FrameContext, use_parent_error: bool) -> f64 {
        let error = if use_parent_error {
            self.parent_geometric_error
        } else {
            self.geometric_error
        };
        if error == 0.0 {
            return 0.0;
        }
        if error.is_infinite() {
            return f64::INFINITY;
        }
        let distance = self.frame.distance_to_camera.max(1e-7);
        let mut projected = frame.camera.project_error(error, distance);
        if let Some(dynamic) = &frame.dynamic_sse {
            projected -= dynamic.reduction(distance);
        }
        projected
    }

    /// Recompute distance, error and frustum visibility for this frame.
    pub(crate) fn update_visibility(&mut self, frame: &FrameContext, parent_mask: PlaneMask) {
        let camera = &frame.camera;
        self.frame.distance_to_camera = self.bounding_volume.distance_to_point(camera.position);
        self.frame.center_z_depth = (self.bounding_volume.center() - camera.position).dot(camera.direction);
        self.frame.screen_space_error = self.compute_screen_space_error(frame, false);
        self.frame.plane_mask = frame
            .culling_volume
            .visibility_with_plane_mask(&self.bounding_volume, parent_mask);
        self.frame.visible = !self.frame.plane_mask.is_outside();
        self.frame.in_request_volume = self
            .viewer_request_volume
            .as_ref()
            .is_none_or(|v| v.contains_point(camera.position));
    }

    /// Visibility of the content bounds, falling back to the tile bounds.
    pub(crate) fn content_visibility(&self, culling_volume: &CullingVolume) -> Intersect {
        let Some(volume) = &self.content_bounding_volume else {
            return Intersect::Inside;
        };
        if self.frame.plane_mask == PlaneMask::INSIDE {
            return Intersect::Inside;
        }
        culling_volume.visibility(volume)
    }

    /// Reset the per-frame fields traversal writes before deciding anything.
    pub(crate) fn reset_traversal_state(&mut self) {
        self.frame.priority_holder = Some(self.id);
        self.frame.priority_distance = self.frame.distance_to_camera;
        self.frame.was_min_priority_child = false;
        self.frame.should_select = false;
        self.frame.final_resolution = true;
        self.frame.selection_depth = 0;
    }

    /// Mark stale once the host clock passes the expiry time.
    pub(crate) fn update_expiration(&mut self, now: f64) {
        if self.state == ContentState::Ready
            && let Some(expire_at) = self.expire_at
            && now >= expire_at
        {
            self.state = ContentState::Expired;
        }
    }

    /// Force a reload of ready content. Organisational tiles never expire.
    pub(crate) fn expire(&mut self) -> bool {
        if self.state == ContentState::Ready && (self.content.is_some() || self.has_tileset_content) {
            self.state = ContentState::Expired;
            true
        } else {
            false
        }
    }

    pub(crate) fn begin_request(&mut self, request: ActiveRequest) {
        self.request = Some(request);
        self.state = ContentState::Loading;
    }

    /// Undo [`begin_request`](Self::begin_request) after a cancellation.
    pub(crate) fn cancel_request(&mut self) -> Option<ActiveRequest> {
        let request = self.request.take()?;
        self.state = request.previous_state;
        Some(request)
    }

    pub(crate) fn begin_processing(&mut self) {
        self.state = ContentState::Processing;
    }

    /// Install fresh content. Returns the superseded stale content, if any.
    pub(crate) fn finish_ready(&mut self, content: Option<RenderContent>, now: f64) -> Option<RenderContent> {
        self.request = None;
        self.state = ContentState::Ready;
        self.expire_at = self.expire_duration.map(|d| now + d);
        match content {
            Some(content) => self.content.replace(content),
            None => self.content.take(),
        }
    }

    /// Enter the failed state. Returns stale content that is no longer drawable.
    pub(crate) fn fail(&mut self) -> Option<RenderContent> {
        self.request = None;
        self.state = ContentState::Failed;
        self.expire_at = None;
        self.content.take()
    }

    /// Release content after eviction and return to the unloaded state.
    pub(crate) fn unload_content(&mut self) -> Option<RenderContent> {
        self.state = ContentState::Unloaded;
        self.expire_at = None;
        self.content.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounds::BoundingSphere;
    use crate::camera::FrameCamera;
    use crate::content::ContentMemory;
    use crate::dynamic_sse::DynamicSseTerm;
    use glam::DVec3;

    fn sphere_tile(geometric_error: f64, parent_geometric_error: f64) -> Tile {
        Tile::new(
            TileId::from_index(0),
            TileSpec {
                parent: None,
                depth: 0,
                refine: Refinement::Replace,
                geometric_error,
                parent_geometric_error,
                local_transform: DMat4::IDENTITY,
                computed_transform: DMat4::IDENTITY,
                local_bounding_volume: BoundingVolume::Sphere(BoundingSphere::new(DVec3::ZERO, 10.0)),
                local_content_bounding_volume: None,
                local_viewer_request_volume: None,
                content_uri: Some("t.b3dm".into()),
                expire_duration: Some(5.0),
            },
        )
    }

    fn frame_at(z: f64) -> FrameContext {
        let camera = FrameCamera::look_at(
            DVec3::new(0.0, 0.0, z),
            DVec3::ZERO,
            DVec3::Y,
            std::f64::consts::FRAC_PI_3,
            1000,
            1000,
        );
        FrameContext::new(1, camera, 0.0)
    }

    /// Projected error matches `error * height / (distance * 2 tan(fov/2))`.
    #[test]
    fn test_screen_space_error_formula() {
        let mut tile = sphere_tile(10.0, 100.0);
        let frame = frame_at(110.0);
        tile.update_visibility(&frame, PlaneMask::INDETERMINATE);
        assert!((tile.frame.distance_to_camera - 100.0).abs() < 1e-9);
        let expected = 10.0 * 1000.0 / (100.0 * 2.0 * (std::f64::consts::FRAC_PI_6).tan());
        assert!((tile.frame.screen_space_error - expected).abs() < 1e-9);
    }

    /// An infinite parent error yields infinite error; zero error yields zero.
    #[test]
    fn test_screen_space_error_edges() {
        let mut tile = sphere_tile(0.0, f64::INFINITY);
        let frame = frame_at(110.0);
        tile.update_visibility(&frame, PlaneMask::INDETERMINATE);
        assert_eq!(tile.compute_screen_space_error(&frame, false), 0.0);
        assert!(tile.compute_screen_space_error(&frame, true).is_infinite());
    }

    /// The dynamic term lowers the projected error.
    #[test]
    fn test_dynamic_term_reduces_error() {
        let mut tile = sphere_tile(10.0, 100.0);
        let mut frame = frame_at(1010.0);
        tile.update_visibility(&frame, PlaneMask::INDETERMINATE);
        let plain = tile.compute_screen_space_error(&frame, false);
        frame.dynamic_sse = Some(DynamicSseTerm {
            density: 1e-3,
            factor: 4.0,
        });
        assert!(tile.compute_screen_space_error(&frame, false) < plain);
    }

    /// A tile behind the camera is not visible.
    #[test]
    fn test_visibility_behind_camera() {
        let mut tile = sphere_tile(10.0, 100.0);
        let mut frame = frame_at(110.0);
        frame.camera.direction = DVec3::Z;
        frame.culling_volume = frame.camera.culling_volume();
        tile.update_visibility(&frame, PlaneMask::INDETERMINATE);
        assert!(!tile.is_visible());
    }

    /// Loading, readying, expiring and unloading walk the state machine.
    #[test]
    fn test_content_state_round_trip() {
        let mut tile = sphere_tile(10.0, 100.0);
        assert!(tile.content_unloaded());
        tile.state = ContentState::Loading;
        tile.begin_processing();
        let content = RenderContent::new((), ContentMemory::new(8, 0, 0));
        assert!(tile.finish_ready(Some(content), 10.0).is_none());
        assert!(tile.content_ready() && tile.content_available());
        assert_eq!(tile.expire_at(), Some(15.0));

        tile.update_expiration(14.0);
        assert!(tile.content_ready());
        tile.update_expiration(15.0);
        assert!(tile.content_expired());
        assert!(tile.content_available(), "stale content stays drawable");

        assert!(tile.unload_content().is_some());
        assert!(tile.content_unloaded() && !tile.content_available());
    }

    /// Failing drops stale content so it is never drawn.
    #[test]
    fn test_fail_drops_content() {
        let mut tile = sphere_tile(10.0, 100.0);
        tile.finish_ready(Some(RenderContent::new((), ContentMemory::default())), 0.0);
        assert!(tile.expire());
        assert!(tile.fail().is_some());
        assert!(tile.content_failed() && !tile.content_available());
    }

    /// Tiles without a content locator start ready and never expire.
    #[test]
    fn test_empty_tile_is_ready() {
        let mut tile = sphere_tile(10.0, 100.0);
        tile.content_uri = None;
        tile.state = ContentState::Ready;
        assert!(tile.has_empty_content());
        assert!(!tile.expire());
    }
}
