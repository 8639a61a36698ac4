// SPDX-License-Identifier: GPL-3.0-only

use crate::{
    buffer::{BoId, BufferHandle},
    drawable::{DrawableId, OutputId},
    transport::EventToken,
};
use std::io;
use thiserror::Error;

/// The kernel refused or could not take a request.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("vblank wait on {output:?} failed")]
    Wait {
        output: OutputId,
        #[source]
        source: io::Error,
    },
    #[error("page flip on {output:?} failed")]
    Flip {
        output: OutputId,
        #[source]
        source: io::Error,
    },
    #[error("a page flip is already pending on {0:?}")]
    FlipPending(OutputId),
    #[error("no crtc for {0:?}")]
    UnknownOutput(OutputId),
    #[error("no framebuffer registered for {0:?}")]
    NoFramebuffer(BoId),
}

#[derive(Debug, Error)]
pub enum SwapError {
    #[error("unknown drawable {0:?}")]
    UnknownDrawable(DrawableId),
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferHandle),
    #[error("buffer {buffer:?} does not belong to {drawable:?}")]
    ForeignBuffer {
        buffer: BufferHandle,
        drawable: DrawableId,
    },
    #[error("{0:?} is not shown on any output")]
    Offscreen(DrawableId),
    #[error("no frame event for {0:?}")]
    UnknownEvent(EventToken),
    #[error("failed to allocate a buffer for {0:?}")]
    Allocation(DrawableId),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
