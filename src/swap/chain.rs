// SPDX-License-Identifier: GPL-3.0-only

//! Per-drawable serialization of immediate swaps.
//!
//! While a flip, exchange or throttled blit is outstanding on a drawable
//! its event occupies the drawable's slot. A swap arriving in that window
//! is stored as the occupant's `chain` and started by the occupant's
//! completion handler.

use crate::{drawable::DrawableId, transport::EventToken};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct FlipChain {
    slots: HashMap<DrawableId, EventToken>,
}

impl FlipChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Event currently holding `drawable`, if any.
    pub fn active(&self, drawable: DrawableId) -> Option<EventToken> {
        self.slots.get(&drawable).copied()
    }

    /// Hand the slot to `token`.
    pub fn open(&mut self, drawable: DrawableId, token: EventToken) {
        self.slots.insert(drawable, token);
    }

    /// Free the slot if `token` holds it.
    pub fn close(&mut self, drawable: DrawableId, token: EventToken) -> bool {
        if self.slots.get(&drawable) == Some(&token) {
            self.slots.remove(&drawable);
            true
        } else {
            false
        }
    }

    /// Drop the slot of a destroyed drawable.
    pub fn forget(&mut self, drawable: DrawableId) -> Option<EventToken> {
        self.slots.remove(&drawable)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
