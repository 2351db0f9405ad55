//! The ordered gallery sequence and its drag-reorder surface.
//!
//! The drag surface binds to a snapshot of the membership at
//! `initialize` time; it cannot follow membership changes incrementally.
//! Every insertion or removal therefore requires a reinitialize before the
//! next gesture; a gesture against a stale snapshot is rejected rather
//! than applied to the wrong rows.

use std::sync::Arc;

use shared::domain::ImageId;
use tracing::debug;

use crate::error::GalleryError;
use crate::fragment::{Fragment, NodeId};

/// One server-confirmed image in the gallery. Owned exclusively by the
/// order controller's sequence; other components hold `ImageId`
/// back-references only.
#[derive(Debug, Clone)]
pub struct GalleryItem {
    pub id: ImageId,
    pub fragment: Fragment,
    /// The fragment markup exactly as served, re-emitted to embedders.
    pub markup: String,
}

impl GalleryItem {
    pub fn new(id: ImageId, fragment: Fragment, markup: String) -> Self {
        Self {
            id,
            fragment,
            markup,
        }
    }
}

/// Capability resolving the grab handle inside an item. Only the resolved
/// element starts a drag (and serves as the rendered ghost); grabbing
/// anywhere else, notably the caption text area, must not.
pub type HandleResolver = Arc<dyn Fn(&GalleryItem) -> Option<NodeId> + Send + Sync>;

/// Default resolver: the image element, i.e. the first element child of
/// the item's container node.
pub fn image_handle_resolver(container_class: &str) -> HandleResolver {
    let class = container_class.to_string();
    Arc::new(move |item: &GalleryItem| {
        let container = item.fragment.first_by_class(&class)?;
        item.fragment.first_element_child(container)
    })
}

#[derive(Debug)]
struct ActiveDrag {
    image: ImageId,
    from: usize,
}

#[derive(Debug)]
struct DragBinding {
    generation: u64,
    snapshot: Vec<ImageId>,
    drag: Option<ActiveDrag>,
}

pub struct OrderController {
    items: Vec<GalleryItem>,
    binding: Option<DragBinding>,
    generations: u64,
    resolve_handle: HandleResolver,
}

impl OrderController {
    pub fn new(resolve_handle: HandleResolver) -> Self {
        Self {
            items: Vec::new(),
            binding: None,
            generations: 0,
            resolve_handle,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn order(&self) -> Vec<ImageId> {
        self.items.iter().map(|item| item.id.clone()).collect()
    }

    pub fn item_at(&self, index: usize) -> Option<&GalleryItem> {
        self.items.get(index)
    }

    pub fn position(&self, image: &ImageId) -> Option<usize> {
        self.items.iter().position(|item| &item.id == image)
    }

    pub fn contains(&self, image: &ImageId) -> bool {
        self.position(image).is_some()
    }

    /// Append a new item. The sequence never holds the same id twice.
    pub fn insert(&mut self, item: GalleryItem) -> Result<(), GalleryError> {
        if self.contains(&item.id) {
            return Err(GalleryError::DuplicateItem(item.id));
        }
        self.items.push(item);
        Ok(())
    }

    pub fn remove(&mut self, image: &ImageId) -> Result<GalleryItem, GalleryError> {
        let index = self
            .position(image)
            .ok_or_else(|| GalleryError::UnknownItem(image.clone()))?;
        Ok(self.items.remove(index))
    }

    /// Bind the drag surface over the current membership, disposing any
    /// prior binding first. Rebinding without disposal would leave two
    /// live bindings fighting over the same rows; here the old one (and
    /// any gesture riding on it) is dropped wholesale. Safe to call
    /// repeatedly.
    pub fn initialize(&mut self) -> u64 {
        self.generations += 1;
        self.binding = Some(DragBinding {
            generation: self.generations,
            snapshot: self.order(),
            drag: None,
        });
        debug!(generation = self.generations, items = self.items.len(), "drag surface bound");
        self.generations
    }

    pub fn bound_generation(&self) -> Option<u64> {
        self.binding.as_ref().map(|binding| binding.generation)
    }

    pub fn drag_in_progress(&self) -> bool {
        self.binding
            .as_ref()
            .is_some_and(|binding| binding.drag.is_some())
    }

    fn binding_mut(&mut self) -> Result<&mut DragBinding, GalleryError> {
        self.binding
            .as_mut()
            .ok_or(GalleryError::DragSurfaceUnbound)
    }

    /// Start a gesture on the given item's grab handle.
    pub fn begin_drag(&mut self, image: &ImageId) -> Result<(), GalleryError> {
        let current = self.order();
        let index = self
            .position(image)
            .ok_or_else(|| GalleryError::UnknownItem(image.clone()))?;
        let handle = {
            let item = &self.items[index];
            (self.resolve_handle)(item)
        };

        let binding = self.binding_mut()?;
        if binding.snapshot != current {
            binding.drag = None;
            return Err(GalleryError::StaleDragBinding);
        }
        if handle.is_none() {
            return Err(GalleryError::HandleUnresolved(image.clone()));
        }
        binding.drag = Some(ActiveDrag {
            image: image.clone(),
            from: index,
        });
        Ok(())
    }

    pub fn cancel_drag(&mut self) {
        if let Some(binding) = self.binding.as_mut() {
            binding.drag = None;
        }
    }

    /// Drop the dragged item onto the row at `target`: before it when
    /// coming from below, after it when coming from above.
    pub fn drop_on(&mut self, target: usize) -> Result<Vec<ImageId>, GalleryError> {
        let len = self.items.len();
        if target >= len {
            return Err(GalleryError::DropOutOfRange { target, len });
        }
        let from = self.take_drag_from()?;
        let gap = if target < from {
            target
        } else if target > from {
            target + 1
        } else {
            from
        };
        Ok(self.apply_move(from, gap))
    }

    /// Drop the dragged item past the end of the list.
    pub fn drop_after_last(&mut self) -> Result<Vec<ImageId>, GalleryError> {
        let gap = self.items.len();
        let from = self.take_drag_from()?;
        Ok(self.apply_move(from, gap))
    }

    /// Validate and consume the active gesture, returning its source index.
    fn take_drag_from(&mut self) -> Result<usize, GalleryError> {
        let current = self.order();
        let binding = self.binding_mut()?;
        let Some(drag) = binding.drag.take() else {
            return Err(GalleryError::DragNotActive);
        };
        // Membership changed under the gesture (e.g. a delete raced the
        // drag); applying the move would shuffle the wrong rows.
        if binding.snapshot != current {
            return Err(GalleryError::StaleDragBinding);
        }
        debug_assert_eq!(current.get(drag.from), Some(&drag.image));
        Ok(drag.from)
    }

    fn apply_move(&mut self, from: usize, gap: usize) -> Vec<ImageId> {
        let mut to = gap;
        if to > from {
            to -= 1;
        }
        let to = to.min(self.items.len().saturating_sub(1));
        let item = self.items.remove(from);
        self.items.insert(to, item);

        let order = self.order();
        // The surface performed the move itself; its snapshot follows.
        if let Some(binding) = self.binding.as_mut() {
            binding.snapshot = order.clone();
        }
        debug!(from, to, "gallery item reordered");
        order
    }
}

#[cfg(test)]
#[path = "tests/ordering_tests.rs"]
mod tests;
