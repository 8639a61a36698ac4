// SPDX-License-Identifier: GPL-3.0-only

//! The kernel side of vblank synchronization.
//!
//! Requests carry an [`EventToken`]. When the kernel reports the vblank
//! or the flip, the transport hands the same token back inside a
//! [`Completion`], which the scheduler maps to exactly one live frame
//! event.

pub mod kms;
pub mod drm_helpers;

use crate::{
    buffer::BoId,
    drawable::OutputId,
    error::TransportError,
    msc::Msc,
};
use bitflags::bitflags;

/// Correlation token for an in-flight request.
///
/// Tokens are never reused, so a late completion can not be mistaken for
/// a newer request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventToken(pub u64);

impl EventToken {
    pub fn to_user_data(self) -> usize {
        self.0 as usize
    }

    pub fn from_user_data(data: usize) -> Self {
        Self(data as u64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VblankTarget {
    /// Wait until the counter reaches this value.
    Absolute(u32),
    /// Wait this many frames from now.
    Relative(u32),
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitFlags: u32 {
        /// Deliver a completion event instead of blocking.
        const EVENT = 1 << 0;
        /// If the target already passed, wait for the next frame instead
        /// of completing right away.
        const NEXT_ON_MISS = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankRequest {
    pub output: OutputId,
    pub target: VblankTarget,
    pub flags: WaitFlags,
    /// Required when `flags` contains [`WaitFlags::EVENT`].
    pub token: Option<EventToken>,
}

impl VblankRequest {
    /// Read the current counter without queueing anything.
    pub fn query(output: OutputId) -> Self {
        Self {
            output,
            target: VblankTarget::Relative(0),
            flags: WaitFlags::empty(),
            token: None,
        }
    }

    pub fn event(output: OutputId, target: VblankTarget, flags: WaitFlags, token: EventToken) -> Self {
        Self {
            output,
            target,
            flags: flags | WaitFlags::EVENT,
            token: Some(token),
        }
    }
}

/// Immediate answer to a wait request.
///
/// For queries this is the current counter; for event requests the kernel
/// reports the sequence it will complete on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VblankReply {
    pub msc: Msc,
}

/// A vblank or flip the kernel finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub token: EventToken,
    pub msc: Msc,
}

/// Vblank waits and page flips on the display device.
pub trait VblankTransport {
    fn wait_vblank(&mut self, request: VblankRequest) -> Result<VblankReply, TransportError>;

    /// Scan out `bo` on `output` at the next vblank. Completion is reported
    /// with `token`.
    fn page_flip(&mut self, output: OutputId, bo: BoId, token: EventToken) -> Result<(), TransportError>;
}
