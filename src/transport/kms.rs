// SPDX-License-Identifier: GPL-3.0-only

use super::{Completion, EventToken, VblankReply, VblankRequest, VblankTarget, VblankTransport, WaitFlags};
use crate::{buffer::BoId, drawable::OutputId, error::TransportError, msc::Msc};
use ::drm::{
    control::{crtc, framebuffer, Device as ControlDevice, Event, PageFlipFlags},
    Device as DrmDevice, VblankWaitFlags, VblankWaitTarget,
};
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io,
    os::fd::{AsFd, BorrowedFd},
    path::Path,
    sync::Arc,
};
use tracing::{debug, trace, warn};

/// An opened DRM card node.
#[derive(Debug, Clone)]
pub struct Card(Arc<File>);

impl Card {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self(Arc::new(file)))
    }
}

impl AsFd for Card {
    fn as_fd(&self) -> BorrowedFd<'_> {
        self.0.as_fd()
    }
}

impl DrmDevice for Card {}
impl ControlDevice for Card {}

/// Vblank transport backed by the DRM vblank and page flip ioctls.
///
/// Outputs are pipe indices into `crtcs`. Page flips need a framebuffer
/// for the buffer object being scanned out; the host registers those with
/// [`register_framebuffer`](Self::register_framebuffer).
#[derive(Debug)]
pub struct DrmVblankTransport<D> {
    device: D,
    crtcs: Vec<crtc::Handle>,
    framebuffers: HashMap<BoId, framebuffer::Handle>,
    // the kernel reports flips by crtc, not by user data
    pending_flips: HashMap<crtc::Handle, EventToken>,
}

impl<D: ControlDevice> DrmVblankTransport<D> {
    pub fn new(device: D, crtcs: Vec<crtc::Handle>) -> Self {
        Self {
            device,
            crtcs,
            framebuffers: HashMap::new(),
            pending_flips: HashMap::new(),
        }
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn crtcs(&self) -> &[crtc::Handle] {
        &self.crtcs
    }

    pub fn register_framebuffer(&mut self, bo: BoId, fb: framebuffer::Handle) {
        self.framebuffers.insert(bo, fb);
    }

    pub fn unregister_framebuffer(&mut self, bo: BoId) -> Option<framebuffer::Handle> {
        self.framebuffers.remove(&bo)
    }

    fn crtc(&self, output: OutputId) -> Result<crtc::Handle, TransportError> {
        self.crtcs
            .get(output.0 as usize)
            .copied()
            .ok_or(TransportError::UnknownOutput(output))
    }

    /// Drain the events the kernel queued on the device.
    ///
    /// Call this whenever the device file descriptor becomes readable.
    pub fn receive_completions(&mut self) -> io::Result<Vec<Completion>> {
        let mut completions = Vec::new();
        for event in self.device.receive_events()? {
            match event {
                Event::Vblank(event) => {
                    let token = EventToken::from_user_data(event.user_data);
                    trace!(?token, frame = event.frame, "Vblank event");
                    completions.push(Completion {
                        token,
                        msc: Msc::from_duration(event.frame, Some(event.time)),
                    });
                }
                Event::PageFlip(event) => {
                    let Some(token) = self.pending_flips.remove(&event.crtc) else {
                        debug!(crtc = ?event.crtc, "Page flip completed without a pending request");
                        continue;
                    };
                    trace!(?token, frame = event.frame, "Page flip event");
                    completions.push(Completion {
                        token,
                        msc: Msc::from_duration(event.frame, Some(event.duration)),
                    });
                }
                Event::Unknown(data) => {
                    debug!(len = data.len(), "Ignoring unknown DRM event");
                }
            }
        }
        Ok(completions)
    }
}

impl<D: ControlDevice> VblankTransport for DrmVblankTransport<D> {
    fn wait_vblank(&mut self, request: VblankRequest) -> Result<VblankReply, TransportError> {
        let target = match request.target {
            VblankTarget::Absolute(sequence) => VblankWaitTarget::Absolute(sequence),
            VblankTarget::Relative(count) => VblankWaitTarget::Relative(count),
        };
        let mut flags = VblankWaitFlags::empty();
        if request.flags.contains(WaitFlags::EVENT) {
            flags |= VblankWaitFlags::EVENT;
        }
        if request.flags.contains(WaitFlags::NEXT_ON_MISS) {
            flags |= VblankWaitFlags::NEXT_ON_MISS;
        }
        let user_data = request.token.map_or(0, EventToken::to_user_data);

        let reply = self
            .device
            .wait_vblank(target, flags, request.output.0, user_data)
            .map_err(|source| TransportError::Wait {
                output: request.output,
                source,
            })?;
        Ok(VblankReply {
            msc: Msc::from_duration(reply.frame(), reply.time()),
        })
    }

    fn page_flip(&mut self, output: OutputId, bo: BoId, token: EventToken) -> Result<(), TransportError> {
        let crtc = self.crtc(output)?;
        if self.pending_flips.contains_key(&crtc) {
            return Err(TransportError::FlipPending(output));
        }
        let fb = *self
            .framebuffers
            .get(&bo)
            .ok_or(TransportError::NoFramebuffer(bo))?;

        if let Err(source) = self.device.page_flip(crtc, fb, PageFlipFlags::EVENT, None) {
            if source.raw_os_error() == Some(libc::EBUSY) {
                warn!(?crtc, "Kernel still has a flip queued on this crtc");
                return Err(TransportError::FlipPending(output));
            }
            return Err(TransportError::Flip { output, source });
        }
        self.pending_flips.insert(crtc, token);
        Ok(())
    }
}
