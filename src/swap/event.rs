// SPDX-License-Identifier: GPL-3.0-only

use super::strategy::Strategy;
use crate::{
    buffer::{BoId, BufferHandle},
    drawable::{ClientId, DrawableId, OutputId},
    transport::EventToken,
};

/// Where a frame event stands between submission and retirement.
///
/// There is no idle state: an event that finished is removed from the
/// registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Waiting for the vblank before the target frame, then page flip.
    FlipSubmitted,
    /// Page flip queued, waiting for the kernel to report it on screen.
    /// Immediate flips notify their client on submission and only keep
    /// the drawable busy here.
    FlipCompleting,
    /// Waiting for the target vblank, then copy.
    BlitSubmitted,
    /// Copy queued, waiting for the GPU to finish it.
    BlitThrottling,
    /// Buffers exchanged, holding the drawable until the next vblank.
    ExchangeThrottling,
    /// A client is blocked until the target frame.
    WaitingMsc,
    /// Queued behind another swap on the same drawable. Not known to the
    /// kernel.
    Chained,
}

impl FrameState {
    /// The kernel holds a request for this event.
    pub fn in_kernel(self) -> bool {
        !matches!(self, FrameState::Chained)
    }
}

/// Liveness of a client or drawable an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding<T> {
    /// Known, but not attached to the registry's tracking lists yet.
    Unregistered(T),
    Live(T),
    /// Destroyed while the event was outstanding.
    Gone(T),
}

impl<T: Copy> Binding<T> {
    pub fn live(&self) -> Option<T> {
        match self {
            Binding::Live(id) => Some(*id),
            _ => None,
        }
    }

    pub fn id(&self) -> T {
        match self {
            Binding::Unregistered(id) | Binding::Live(id) | Binding::Gone(id) => *id,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Binding::Gone(_))
    }
}

/// Whether the requesting client still waits for a completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Pending,
    /// Already told, the event only continues for bookkeeping.
    Delivered,
}

/// One in-flight swap or wait.
#[derive(Debug)]
pub struct FrameEvent {
    pub client: Binding<ClientId>,
    pub drawable: Binding<DrawableId>,
    pub output: Option<OutputId>,
    pub state: FrameState,
    /// Strategy chosen when the request came in, `None` for waits.
    pub strategy: Option<Strategy>,
    pub delivery: Delivery,
    /// Frame the swap is expected to become visible on.
    pub target: u32,
    pub front: Option<BufferHandle>,
    pub back: Option<BufferHandle>,
    /// Extra buffer object reference dropped when the event retires.
    pub pending_bo: Option<BoId>,
    pub chain: Option<EventToken>,
}

impl FrameEvent {
    pub fn new(client: ClientId, drawable: DrawableId, state: FrameState, strategy: Option<Strategy>) -> Self {
        Self {
            client: Binding::Unregistered(client),
            drawable: Binding::Unregistered(drawable),
            output: None,
            state,
            strategy,
            delivery: Delivery::Pending,
            target: 0,
            front: None,
            back: None,
            pending_bo: None,
            chain: None,
        }
    }

    /// Client to notify, if it still waits and is still around.
    pub fn notify_target(&self) -> Option<(ClientId, DrawableId)> {
        if self.delivery == Delivery::Delivered {
            return None;
        }
        Some((self.client.live()?, self.drawable.live()?))
    }
}
