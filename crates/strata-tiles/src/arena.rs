//! Storage for the tile hierarchy.
//!
//! Tiles are addressed by [`TileId`] into a slot vector. Slots of destroyed
//! tiles stay empty so that handles held by in-flight requests can never
//! alias a newer tile.

use std::collections::VecDeque;
use std::ops::{Index, IndexMut};

use glam::DMat4;

use crate::document::{TileDocument, TilesetDocument, resolve_uri};
use crate::error::StructuralError;
use crate::tile::{Refinement, Tile, TileId, TileSpec};

/// Where a document's root attaches.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Attachment {
    pub parent: TileId,
    pub depth: u32,
    pub refine: Refinement,
    pub geometric_error: f64,
    pub transform: DMat4,
}

#[derive(Debug, Default)]
pub struct TileArena {
    slots: Vec<Option<Tile>>,
    live: usize,
}

impl TileArena {
    /// Empty arena.
    pub fn new() -> Self {
        Self::default()
    }

    /// Tile behind `id`, unless it was destroyed.
    pub fn get(&self, id: TileId) -> Option<&Tile> {
        self.slots.get(id.index()).and_then(Option::as_ref)
    }

    /// Mutable tile behind `id`, unless it was destroyed.
    pub fn get_mut(&mut self, id: TileId) -> Option<&mut Tile> {
        self.slots.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Whether `id` refers to a live tile.
    pub fn contains(&self, id: TileId) -> bool {
        self.get(id).is_some()
    }

    /// Number of live tiles.
    pub fn len(&self) -> usize {
        self.live
    }

    /// No live tiles.
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Live tiles in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.slots.iter().filter_map(Option::as_ref)
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Tile> {
        self.slots.iter_mut().filter_map(Option::as_mut)
    }

    /// Build every tile of `document` breadth-first.
    ///
    /// Without an attachment the document root becomes a new root placed by
    /// `model`; with one it becomes the single child of the attaching tile.
    /// Content locators resolve against `base_uri`.
    pub(crate) fn insert_document(
        &mut self,
        document: &TilesetDocument,
        base_uri: &str,
        attachment: Option<Attachment>,
        model: &DMat4,
    ) -> Result<TileId, StructuralError> {
        let version = document.asset.tileset_version.as_deref();
        let (parent, depth, inherited_refine, parent_error, parent_transform) = match attachment {
            Some(a) => (Some(a.parent), a.depth, a.refine, a.geometric_error, a.transform),
            // The root always refines against an unbounded parent error.
            None => (None, 0, Refinement::Replace, f64::INFINITY, *model),
        };

        let first = self.slots.len();
        let mut queue: VecDeque<(&TileDocument, Option<TileId>, u32, Refinement, f64, DMat4)> = VecDeque::new();
        queue.push_back((&document.root, parent, depth, inherited_refine, parent_error, parent_transform));

        let mut root = None;
        while let Some((doc, parent, depth, inherited, parent_error, parent_transform)) = queue.pop_front() {
            let refine = doc.refinement()?.unwrap_or(inherited);
            let local_transform = doc.local_transform();
            let computed_transform = parent_transform * local_transform;
            let spec = TileSpec {
                parent,
                depth,
                refine,
                geometric_error: doc.geometric_error,
                parent_geometric_error: parent_error,
                local_transform,
                computed_transform,
                local_bounding_volume: doc.bounding_volume.to_volume()?,
                local_content_bounding_volume: doc
                    .content
                    .as_ref()
                    .and_then(|c| c.bounding_volume.as_ref())
                    .map(|v| v.to_volume())
                    .transpose()?,
                local_viewer_request_volume: doc
                    .viewer_request_volume
                    .as_ref()
                    .map(|v| v.to_volume())
                    .transpose()?,
                content_uri: doc.content_uri().map(|uri| resolve_uri(base_uri, uri, version)),
                expire_duration: doc.expire.as_ref().and_then(|e| e.duration),
            };

            let id = TileId::from_index(self.slots.len());
            self.slots.push(Some(Tile::new(id, spec)));
            self.live += 1;
            root.get_or_insert(id);
            if let Some(parent) = parent.and_then(|p| self.get_mut(p)) {
                parent.children.push(id);
            }

            for child in &doc.children {
                queue.push_back((child, Some(id), depth + 1, refine, doc.geometric_error, computed_transform));
            }
        }

        for index in first..self.slots.len() {
            self.update_children_within_parent(TileId::from_index(index));
        }

        root.ok_or(StructuralError::MissingField("root"))
    }

    fn update_children_within_parent(&mut self, id: TileId) {
        let Some(tile) = self.get(id) else {
            return;
        };
        let within = !tile.children.is_empty()
            && tile.children.iter().all(|c| {
                self.get(*c)
                    .is_some_and(|child| child.bounding_volume().is_within(tile.bounding_volume()))
            });
        if let Some(tile) = self.get_mut(id) {
            tile.children_within_parent = within;
        }
    }

    /// Remove every descendant of `id`, returning them in pre-order.
    pub(crate) fn remove_descendants(&mut self, id: TileId) -> Vec<Tile> {
        let Some(tile) = self.get_mut(id) else {
            return Vec::new();
        };
        let mut stack: Vec<TileId> = std::mem::take(&mut tile.children);
        stack.reverse();

        let mut removed = Vec::new();
        while let Some(next) = stack.pop() {
            let Some(tile) = self.slots.get_mut(next.index()).and_then(Option::take) else {
                continue;
            };
            self.live -= 1;
            stack.extend(tile.children.iter().rev().copied());
            removed.push(tile);
        }
        removed
    }

    /// Recompute world transforms below `root` after a model matrix change.
    pub(crate) fn update_transforms(&mut self, root: TileId, model: &DMat4) {
        let mut stack = vec![(root, *model)];
        while let Some((id, parent_transform)) = stack.pop() {
            let Some(tile) = self.get_mut(id) else {
                continue;
            };
            tile.set_transform(&parent_transform);
            let transform = *tile.computed_transform();
            stack.extend(tile.children.iter().map(|c| (*c, transform)));
        }
    }
}

impl Index<TileId> for TileArena {
    type Output = Tile;

    fn index(&self, id: TileId) -> &Tile {
        match self.get(id) {
            Some(tile) => tile,
            None => panic!("tile {id:?} is not live"),
        }
    }
}

impl IndexMut<TileId> for TileArena {
    fn index_mut(&mut self, id: TileId) -> &mut Tile {
        match self.get_mut(id) {
            Some(tile) => tile,
            None => panic!("tile {id:?} is not live"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::quad_tree_json;
    use glam::DVec3;

    fn load(json: &str) -> (TileArena, TileId) {
        let doc = TilesetDocument::parse(json.as_bytes()).unwrap();
        let mut arena = TileArena::new();
        let root = arena
            .insert_document(&doc, "data/tileset.json", None, &DMat4::IDENTITY)
            .unwrap();
        (arena, root)
    }

    /// The root and its four children are built with links and depths.
    #[test]
    fn test_build_hierarchy() {
        let (arena, root) = load(&quad_tree_json(100.0, 10.0));
        assert_eq!(arena.len(), 5);
        let root_tile = &arena[root];
        assert_eq!(root_tile.depth(), 0);
        assert_eq!(root_tile.children().len(), 4);
        assert!(root_tile.parent_geometric_error().is_infinite());
        for child in root_tile.children() {
            assert_eq!(arena[*child].parent(), Some(root));
            assert_eq!(arena[*child].depth(), 1);
            assert_eq!(arena[*child].parent_geometric_error(), 100.0);
        }
        assert_eq!(root_tile.content_uri(), Some("data/root.b3dm"));
        assert!(root_tile.children_within_parent);
    }

    /// Refinement is inherited when a child omits it.
    #[test]
    fn test_refinement_inherited() {
        let json = quad_tree_json(100.0, 10.0).replacen("\"REPLACE\"", "\"add\"", 1);
        let (arena, root) = load(&json);
        assert_eq!(arena[root].refinement(), Refinement::Add);
        assert!(arena[root]
            .children()
            .iter()
            .all(|c| arena[*c].refinement() == Refinement::Add));
    }

    /// Removing descendants frees their slots but keeps the parent.
    #[test]
    fn test_remove_descendants() {
        let (mut arena, root) = load(&quad_tree_json(100.0, 10.0));
        let first_child = arena[root].children()[0];
        let removed = arena.remove_descendants(root);
        assert_eq!(removed.len(), 4);
        assert_eq!(arena.len(), 1);
        assert!(arena[root].children().is_empty());
        assert!(!arena.contains(first_child));
    }

    /// A model matrix moves every world bounding volume.
    #[test]
    fn test_update_transforms() {
        let (mut arena, root) = load(&quad_tree_json(100.0, 10.0));
        let before = arena[root].bounding_volume().center();
        arena.update_transforms(root, &DMat4::from_translation(DVec3::new(0.0, 0.0, 50.0)));
        let after = arena[root].bounding_volume().center();
        assert!((after - before - DVec3::new(0.0, 0.0, 50.0)).length() < 1e-9);
    }
}
