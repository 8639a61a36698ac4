// SPDX-License-Identifier: GPL-3.0-only

//! Interfaces to the display server hosting the scheduler.

use crate::{
    buffer::BufferObject,
    drawable::{ClientId, Drawable, DrawableId},
    msc::Msc,
};
use smithay::utils::{Logical, Rectangle};

/// How a swap ended up being carried out, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompletionKind {
    FlipComplete,
    BlitComplete,
    ExchangeComplete,
}

/// The 2D engine doing pixel copies.
pub trait Renderer {
    /// Queue a copy of `region` (drawable-relative) from `src` to `dst`.
    fn copy_region(
        &mut self,
        drawable: &Drawable,
        region: &[Rectangle<i32, Logical>],
        src: &BufferObject,
        dst: &BufferObject,
    );
}

/// Delivery of completion events to clients.
pub trait ClientSink {
    fn swap_complete(&mut self, client: ClientId, drawable: DrawableId, msc: Msc, kind: CompletionKind);
    fn wait_msc_complete(&mut self, client: ClientId, drawable: DrawableId, msc: Msc);
    /// Stop processing requests from `client` until its wait completes.
    fn block_client(&mut self, client: ClientId, drawable: DrawableId);
}
