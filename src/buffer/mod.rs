// SPDX-License-Identifier: GPL-3.0-only

//! Client visible buffers and their binding to GPU buffer objects.
//!
//! A [`BufferHandle`] names one attachment (front, back, ...) of one
//! drawable. The pool keeps an explicit reference count per handle; the
//! GPU object behind a handle is given back to the allocator exactly
//! once, when the last reference goes away.

use crate::drawable::{Drawable, DrawableId, Pixmap, PixmapId};
use smithay::{
    backend::allocator::Fourcc,
    utils::{Logical, Size},
};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Allocator-side identity of a GPU buffer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tiling {
    Linear,
    X,
    Y,
}

/// A GPU buffer object as handed out by the allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferObject {
    pub id: BoId,
    /// Global name other processes use to import the object.
    pub name: u32,
    pub pitch: u32,
    pub tiling: Tiling,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attachment {
    FrontLeft,
    BackLeft,
    FrontRight,
    BackRight,
    FakeFrontLeft,
    FakeFrontRight,
    DepthStencil,
    Other(u32),
}

impl Attachment {
    /// Front attachments alias the drawable's own pixmap instead of
    /// owning a private allocation.
    pub fn is_front(self) -> bool {
        matches!(self, Attachment::FrontLeft | Attachment::FrontRight)
    }
}

/// What the pool asks the allocator for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocRequest {
    pub drawable: DrawableId,
    pub attachment: Attachment,
    pub size: Size<i32, Logical>,
    pub format: Fourcc,
    /// Layout the object must use, `None` leaves it to the allocator.
    pub tiling: Option<Tiling>,
}

/// The GPU memory manager.
///
/// Objects returned by [`allocate`](Self::allocate) carry one reference
/// owned by the caller.
pub trait BufferAllocator {
    fn allocate(&mut self, request: &AllocRequest) -> Option<BufferObject>;
    fn reference(&mut self, bo: BoId);
    fn unreference(&mut self, bo: BoId);
    /// The GPU still has work queued that touches `bo`.
    fn is_busy(&self, bo: BoId) -> bool;
}

/// Opaque handle to a pooled buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    pub drawable: DrawableId,
    pub attachment: Attachment,
    pub size: Size<i32, Logical>,
    pub format: Fourcc,
    pub bo: BufferObject,
    /// Pixmap this buffer shadows, set for front attachments.
    pub pixmap: Option<PixmapId>,
}

#[derive(Debug)]
struct BufferRecord {
    info: BufferInfo,
    refcount: u32,
}

#[derive(Debug, Default)]
pub struct BufferPool {
    records: HashMap<BufferHandle, BufferRecord>,
    current: HashMap<(DrawableId, Attachment), BufferHandle>,
    next_handle: u64,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a buffer for `attachment` of `drawable`.
    ///
    /// A request for a front buffer whose pixmap is still bound to the
    /// same object, or for any other attachment whose size and format are
    /// unchanged, hands out another reference to the existing handle.
    /// `None` means the allocator ran out of memory.
    pub fn acquire<A: BufferAllocator>(
        &mut self,
        allocator: &mut A,
        drawable: &Drawable,
        pixmap: &Pixmap,
        attachment: Attachment,
        format: Fourcc,
    ) -> Option<BufferHandle> {
        let size = drawable.geometry.size;
        if let Some(handle) = self.current.get(&(drawable.id, attachment)).copied() {
            if let Some(record) = self.records.get_mut(&handle) {
                let unchanged = if attachment.is_front() {
                    record.info.bo.id == pixmap.bo.id
                } else {
                    record.info.size == size && record.info.format == format
                };
                if unchanged {
                    record.refcount += 1;
                    debug!(?handle, refcount = record.refcount, "Reusing buffer");
                    return Some(handle);
                }
            }
        }

        let info = if attachment.is_front() {
            allocator.reference(pixmap.bo.id);
            BufferInfo {
                drawable: drawable.id,
                attachment,
                size: pixmap.size,
                format: pixmap.format,
                bo: pixmap.bo,
                pixmap: Some(pixmap.id),
            }
        } else {
            let request = AllocRequest {
                drawable: drawable.id,
                attachment,
                size,
                format,
                tiling: None,
            };
            let Some(bo) = allocator.allocate(&request) else {
                warn!(drawable = ?drawable.id, ?attachment, "Failed to allocate buffer object");
                return None;
            };
            BufferInfo {
                drawable: drawable.id,
                attachment,
                size,
                format,
                bo,
                pixmap: None,
            }
        };

        let handle = BufferHandle(self.next_handle);
        self.next_handle += 1;
        self.records.insert(handle, BufferRecord { info, refcount: 1 });
        self.current.insert((drawable.id, attachment), handle);
        debug!(?handle, drawable = ?drawable.id, ?attachment, bo = ?info.bo.id, "Created buffer");
        Some(handle)
    }

    pub fn retain(&mut self, handle: BufferHandle) -> bool {
        match self.records.get_mut(&handle) {
            Some(record) => {
                record.refcount += 1;
                true
            }
            None => false,
        }
    }

    /// Drop one reference. Returns `true` if this freed the buffer.
    pub fn release<A: BufferAllocator>(&mut self, allocator: &mut A, handle: BufferHandle) -> bool {
        let Some(record) = self.records.get_mut(&handle) else {
            warn!(?handle, "Releasing unknown buffer");
            return false;
        };
        record.refcount -= 1;
        if record.refcount > 0 {
            return false;
        }

        let Some(record) = self.records.remove(&handle) else {
            return false;
        };
        let key = (record.info.drawable, record.info.attachment);
        if self.current.get(&key) == Some(&handle) {
            self.current.remove(&key);
        }
        allocator.unreference(record.info.bo.id);
        debug!(?handle, bo = ?record.info.bo.id, "Destroyed buffer");
        true
    }

    pub fn get(&self, handle: BufferHandle) -> Option<&BufferInfo> {
        self.records.get(&handle).map(|r| &r.info)
    }

    pub fn contains(&self, handle: BufferHandle) -> bool {
        self.records.contains_key(&handle)
    }

    /// Current reference count, zero for freed handles.
    pub fn refcount(&self, handle: BufferHandle) -> u32 {
        self.records.get(&handle).map_or(0, |r| r.refcount)
    }

    /// Swap the buffer objects behind two handles.
    ///
    /// Each handle keeps its own attachment and reference count, only the
    /// storage moves. Returns the objects now bound to `a` and `b`.
    pub fn exchange(
        &mut self,
        a: BufferHandle,
        b: BufferHandle,
    ) -> Option<(BufferObject, BufferObject)> {
        let bo_a = self.records.get(&a)?.info.bo;
        let bo_b = self.records.get(&b)?.info.bo;
        self.records.get_mut(&a)?.info.bo = bo_b;
        self.records.get_mut(&b)?.info.bo = bo_a;
        Some((bo_b, bo_a))
    }

    /// Bind `handle` to `bo`, returning the object it held. The pool takes
    /// over the caller's reference on `bo` and hands back its reference on
    /// the old object.
    pub fn rebind(&mut self, handle: BufferHandle, bo: BufferObject) -> Option<BufferObject> {
        let record = self.records.get_mut(&handle)?;
        let old = std::mem::replace(&mut record.info.bo, bo);
        debug!(?handle, old = ?old.id, new = ?bo.id, "Rebound buffer");
        Some(old)
    }

    /// Forget which handles are current for a destroyed drawable.
    ///
    /// Outstanding references keep their records alive until released.
    pub fn forget_drawable(&mut self, drawable: DrawableId) {
        self.current.retain(|(d, _), _| *d != drawable);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
