// SPDX-License-Identifier: GPL-3.0-only

//! Deciding how a swap gets carried out.
//!
//! The checks only look at the current window, pixmap and buffer state,
//! so they are re-run on every swap and again when a deferred swap is
//! finally executed.

use crate::{
    buffer::{Attachment, BufferInfo},
    config::SwapConfig,
    drawable::{Drawable, Pixmap, ScreenState},
};
use smithay::utils::{Logical, Point};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Scan out the back buffer directly.
    Flip,
    /// Swap the buffer objects behind front and back.
    Exchange,
    /// Copy back into front.
    Blit,
}

/// Whether the back buffer can be page flipped onto the screen.
pub fn can_flip(
    config: &SwapConfig,
    screen: &ScreenState,
    drawable: &Drawable,
    pixmap: &Pixmap,
    front: &BufferInfo,
    back: &BufferInfo,
) -> bool {
    if !drawable.is_window() {
        return false;
    }
    if pixmap.id != screen.scanout {
        return false;
    }
    if !screen.vt_active || !config.page_flipping || screen.shadow {
        return false;
    }
    if front.format != back.format {
        return false;
    }
    if front.attachment != Attachment::FrontLeft || front.bo.id != pixmap.bo.id {
        return false;
    }
    if !drawable.is_unclipped() {
        return false;
    }
    // window size must match the scanout pixmap exactly
    let origin: Point<i32, Logical> = Point::from((0, 0));
    if drawable.geometry.loc != origin || pixmap.origin != origin || drawable.geometry.size != pixmap.size {
        return false;
    }
    // flipping must not change the tiling of the scanout
    front.bo.tiling == back.bo.tiling
}

/// Whether front and back can trade buffer objects.
pub fn can_exchange(
    screen: &ScreenState,
    drawable: &Drawable,
    pixmap: &Pixmap,
    front: &BufferInfo,
    back: &BufferInfo,
) -> bool {
    if front.format != back.format {
        return false;
    }
    if !drawable.is_window() {
        return true;
    }
    if pixmap.id == screen.scanout {
        return false;
    }
    drawable.geometry.size == pixmap.size
}

/// Flip over exchange over blit.
pub fn select(
    config: &SwapConfig,
    screen: &ScreenState,
    drawable: &Drawable,
    pixmap: &Pixmap,
    front: &BufferInfo,
    back: &BufferInfo,
) -> Strategy {
    if can_flip(config, screen, drawable, pixmap, front, back) {
        Strategy::Flip
    } else if can_exchange(screen, drawable, pixmap, front, back) {
        Strategy::Exchange
    } else {
        Strategy::Blit
    }
}
