// SPDX-License-Identifier: GPL-3.0-only

//! Host-side view of drawables, their backing pixmaps and the outputs
//! they are shown on.
//!
//! All rectangles are in screen coordinates unless noted otherwise.

use crate::buffer::{BufferAllocator, BufferObject};
use smithay::{
    backend::allocator::Fourcc,
    utils::{Logical, Point, Rectangle, Size},
};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DrawableId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PixmapId(pub u32);

/// Index of a display pipe (CRTC) as understood by the vblank transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawableKind {
    Window,
    Pixmap,
}

/// An offscreen surface bound to a GPU buffer object.
#[derive(Debug, Clone)]
pub struct Pixmap {
    pub id: PixmapId,
    /// Screen position of the pixmap's top-left corner.
    pub origin: Point<i32, Logical>,
    pub size: Size<i32, Logical>,
    pub format: Fourcc,
    pub bo: BufferObject,
    damage: Vec<Rectangle<i32, Logical>>,
}

impl Pixmap {
    pub fn new(id: PixmapId, size: Size<i32, Logical>, format: Fourcc, bo: BufferObject) -> Self {
        Self {
            id,
            origin: Point::from((0, 0)),
            size,
            format,
            bo,
            damage: Vec::new(),
        }
    }

    pub fn with_origin(mut self, origin: Point<i32, Logical>) -> Self {
        self.origin = origin;
        self
    }

    /// Pixmap-relative rectangle covering the whole pixmap.
    pub fn extents(&self) -> Rectangle<i32, Logical> {
        Rectangle::from_size(self.size)
    }

    /// Rebind the pixmap to another buffer object.
    ///
    /// Anything mirroring the pixmap has to assume every pixel changed, so
    /// damage accumulated against the old object is dropped and replaced
    /// by the full extents.
    pub fn set_bo<A: BufferAllocator>(&mut self, allocator: &mut A, bo: BufferObject) {
        if bo.id == self.bo.id {
            return;
        }
        debug!(pixmap = ?self.id, old = ?self.bo.id, new = ?bo.id, "Rebinding pixmap");
        allocator.reference(bo.id);
        allocator.unreference(self.bo.id);
        self.bo = bo;
        self.damage.clear();
        self.damage.push(self.extents());
    }

    pub fn add_damage(&mut self, rect: Rectangle<i32, Logical>) {
        self.damage.push(rect);
    }

    pub fn damage(&self) -> &[Rectangle<i32, Logical>] {
        &self.damage
    }

    pub fn take_damage(&mut self) -> Vec<Rectangle<i32, Logical>> {
        std::mem::take(&mut self.damage)
    }
}

/// A window or pixmap that clients render into.
#[derive(Debug, Clone)]
pub struct Drawable {
    pub id: DrawableId,
    pub kind: DrawableKind,
    pub geometry: Rectangle<i32, Logical>,
    /// Visible parts of the drawable.
    pub clip: Vec<Rectangle<i32, Logical>>,
    pub pixmap: PixmapId,
}

impl Drawable {
    pub fn window(id: DrawableId, geometry: Rectangle<i32, Logical>, pixmap: PixmapId) -> Self {
        Self {
            id,
            kind: DrawableKind::Window,
            geometry,
            clip: vec![geometry],
            pixmap,
        }
    }

    pub fn pixmap(id: DrawableId, pixmap: &Pixmap) -> Self {
        let geometry = Rectangle::new(pixmap.origin, pixmap.size);
        Self {
            id,
            kind: DrawableKind::Pixmap,
            geometry,
            clip: vec![geometry],
            pixmap: pixmap.id,
        }
    }

    pub fn is_window(&self) -> bool {
        self.kind == DrawableKind::Window
    }

    /// Nothing overlaps the drawable and nothing clips it.
    pub fn is_unclipped(&self) -> bool {
        matches!(self.clip.as_slice(), [only] if *only == self.geometry)
    }

    /// Clip region translated to drawable-relative coordinates.
    pub fn relative_clip(&self) -> Vec<Rectangle<i32, Logical>> {
        let origin = self.geometry.loc;
        self.clip
            .iter()
            .map(|rect| Rectangle::new(rect.loc - origin, rect.size))
            .collect()
    }
}

/// Screen-wide state consulted when deciding whether to page flip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenState {
    /// Pixmap currently scanned out by the display engine.
    pub scanout: PixmapId,
    /// Our video terminal is in the foreground.
    pub vt_active: bool,
    /// A shadow framebuffer or mirroring is in use.
    pub shadow: bool,
}

/// A pipe driving part of the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputInfo {
    pub id: OutputId,
    pub rect: Rectangle<i32, Logical>,
    /// The pipe has a mode set and produces vblanks.
    pub enabled: bool,
}

/// Pick the output showing the largest part of `rect`.
///
/// Ties go to the output listed first. `None` means the rectangle is not
/// on any enabled output.
pub fn covering_output(rect: Rectangle<i32, Logical>, outputs: &[OutputInfo]) -> Option<OutputId> {
    let mut best: Option<(OutputId, i64)> = None;
    for output in outputs.iter().filter(|o| o.enabled) {
        let Some(overlap) = output.rect.intersection(rect) else {
            continue;
        };
        let area = overlap.size.w as i64 * overlap.size.h as i64;
        if area == 0 {
            continue;
        }
        if best.map_or(true, |(_, best_area)| area > best_area) {
            best = Some((output.id, area));
        }
    }
    best.map(|(id, _)| id)
}

/// Drawables and pixmaps known to the scheduler.
#[derive(Debug, Default)]
pub struct DrawableTable {
    drawables: HashMap<DrawableId, Drawable>,
    pixmaps: HashMap<PixmapId, Pixmap>,
    outputs: Vec<OutputInfo>,
}

impl DrawableTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_pixmap(&mut self, pixmap: Pixmap) {
        self.pixmaps.insert(pixmap.id, pixmap);
    }

    pub fn remove_pixmap(&mut self, id: PixmapId) -> Option<Pixmap> {
        self.pixmaps.remove(&id)
    }

    pub fn insert_drawable(&mut self, drawable: Drawable) {
        self.drawables.insert(drawable.id, drawable);
    }

    pub fn remove_drawable(&mut self, id: DrawableId) -> Option<Drawable> {
        self.drawables.remove(&id)
    }

    pub fn set_outputs(&mut self, outputs: Vec<OutputInfo>) {
        self.outputs = outputs;
    }

    pub fn outputs(&self) -> &[OutputInfo] {
        &self.outputs
    }

    pub fn drawable(&self, id: DrawableId) -> Option<&Drawable> {
        self.drawables.get(&id)
    }

    pub fn drawable_mut(&mut self, id: DrawableId) -> Option<&mut Drawable> {
        self.drawables.get_mut(&id)
    }

    pub fn pixmap(&self, id: PixmapId) -> Option<&Pixmap> {
        self.pixmaps.get(&id)
    }

    pub fn pixmap_mut(&mut self, id: PixmapId) -> Option<&mut Pixmap> {
        self.pixmaps.get_mut(&id)
    }

    /// A drawable together with its backing pixmap.
    pub fn resolve(&self, id: DrawableId) -> Option<(&Drawable, &Pixmap)> {
        let drawable = self.drawables.get(&id)?;
        let pixmap = self.pixmaps.get(&drawable.pixmap)?;
        Some((drawable, pixmap))
    }

    /// Output whose vblanks pace the drawable, `None` when offscreen.
    pub fn output_for(&self, id: DrawableId) -> Option<OutputId> {
        let drawable = self.drawables.get(&id)?;
        if !drawable.is_window() {
            return None;
        }
        covering_output(drawable.geometry, &self.outputs)
    }
}
