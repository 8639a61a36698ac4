// SPDX-License-Identifier: GPL-3.0-only

#![allow(dead_code)]

use smithay::{
    backend::allocator::Fourcc,
    utils::{Logical, Rectangle},
};
use std::{
    collections::{HashMap, HashSet},
    io,
};
use vblank_swap::{
    buffer::{AllocRequest, Attachment, BoId, BufferAllocator, BufferHandle, BufferObject, Tiling},
    config::SwapConfig,
    drawable::{ClientId, Drawable, DrawableId, OutputId, OutputInfo, Pixmap, PixmapId, ScreenState},
    error::TransportError,
    host::{ClientSink, CompletionKind, Renderer},
    msc::Msc,
    swap::{EventToken, SwapRequest, SwapScheduler, WaitMscRequest},
    transport::{Completion, VblankReply, VblankRequest, VblankTarget, VblankTransport, WaitFlags},
    SwapError,
};

pub const START_FRAME: u32 = 1000;
pub const OUTPUT: OutputId = OutputId(0);
pub const SCREEN: PixmapId = PixmapId(1);
pub const REDIRECT: PixmapId = PixmapId(2);
pub const CLIENT: ClientId = ClientId(7);
pub const WINDOW: DrawableId = DrawableId(10);

/// Vblank transport that records every request and fires them on demand.
#[derive(Debug)]
pub struct MockTransport {
    pub frame: u32,
    pub waits: Vec<VblankRequest>,
    pub flips: Vec<(OutputId, BoId, EventToken)>,
    /// Events the "kernel" still has to deliver, with their frame.
    pub queued: Vec<(EventToken, u32)>,
    pub fail_queries: bool,
    pub fail_events: bool,
    pub fail_flips: bool,
}

impl MockTransport {
    pub fn at(frame: u32) -> Self {
        Self {
            frame,
            waits: Vec::new(),
            flips: Vec::new(),
            queued: Vec::new(),
            fail_queries: false,
            fail_events: false,
            fail_flips: false,
        }
    }

    pub fn last_wait(&self) -> VblankRequest {
        *self.waits.last().expect("no vblank wait was queued")
    }
}

impl VblankTransport for MockTransport {
    fn wait_vblank(&mut self, request: VblankRequest) -> Result<VblankReply, TransportError> {
        if !request.flags.contains(WaitFlags::EVENT) {
            if self.fail_queries {
                return Err(TransportError::Wait {
                    output: request.output,
                    source: io::Error::other("query refused"),
                });
            }
            return Ok(VblankReply {
                msc: Msc::new(self.frame, 100, 250),
            });
        }

        if self.fail_events {
            return Err(TransportError::Wait {
                output: request.output,
                source: io::Error::other("wait refused"),
            });
        }
        let frame = match request.target {
            VblankTarget::Absolute(frame) if frame <= self.frame => {
                if request.flags.contains(WaitFlags::NEXT_ON_MISS) {
                    self.frame + 1
                } else {
                    self.frame
                }
            }
            VblankTarget::Absolute(frame) => frame,
            VblankTarget::Relative(count) => self.frame + count,
        };
        let token = request.token.expect("event wait without token");
        self.waits.push(request);
        self.queued.push((token, frame));
        Ok(VblankReply {
            msc: Msc::new(frame, 0, 0),
        })
    }

    fn page_flip(&mut self, output: OutputId, bo: BoId, token: EventToken) -> Result<(), TransportError> {
        if self.fail_flips {
            return Err(TransportError::Flip {
                output,
                source: io::Error::other("flip refused"),
            });
        }
        self.flips.push((output, bo, token));
        self.queued.push((token, self.frame + 1));
        Ok(())
    }
}

/// Allocator keeping a reference count per buffer object.
#[derive(Debug, Default)]
pub struct MockAllocator {
    next: u32,
    pub refs: HashMap<BoId, u32>,
    pub freed: Vec<BoId>,
    /// Objects unreferenced more often than referenced.
    pub underflows: Vec<BoId>,
    pub busy: HashSet<BoId>,
    pub fail: bool,
}

impl MockAllocator {
    /// Create an object owned by the caller, like a pixmap's storage.
    pub fn adopt(&mut self, width: u32) -> BufferObject {
        self.next += 1;
        let bo = BufferObject {
            id: BoId(self.next),
            name: self.next,
            pitch: width * 4,
            tiling: Tiling::X,
        };
        self.refs.insert(bo.id, 1);
        bo
    }

    pub fn refcount(&self, bo: BoId) -> u32 {
        self.refs.get(&bo).copied().unwrap_or(0)
    }
}

impl BufferAllocator for MockAllocator {
    fn allocate(&mut self, request: &AllocRequest) -> Option<BufferObject> {
        if self.fail {
            return None;
        }
        let mut bo = self.adopt(request.size.w as u32);
        if let Some(tiling) = request.tiling {
            bo.tiling = tiling;
        }
        Some(bo)
    }

    fn reference(&mut self, bo: BoId) {
        *self.refs.entry(bo).or_insert(0) += 1;
    }

    fn unreference(&mut self, bo: BoId) {
        match self.refs.get_mut(&bo) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                self.refs.remove(&bo);
                self.freed.push(bo);
            }
            None => self.underflows.push(bo),
        }
    }

    fn is_busy(&self, bo: BoId) -> bool {
        self.busy.contains(&bo)
    }
}

#[derive(Debug, Default)]
pub struct RecordingRenderer {
    pub copies: Vec<(DrawableId, Vec<Rectangle<i32, Logical>>, BoId, BoId)>,
}

impl Renderer for RecordingRenderer {
    fn copy_region(
        &mut self,
        drawable: &Drawable,
        region: &[Rectangle<i32, Logical>],
        src: &BufferObject,
        dst: &BufferObject,
    ) {
        self.copies.push((drawable.id, region.to_vec(), src.id, dst.id));
    }
}

#[derive(Debug, Default)]
pub struct RecordingClients {
    pub swaps: Vec<(ClientId, DrawableId, Msc, CompletionKind)>,
    pub waits: Vec<(ClientId, DrawableId, Msc)>,
    pub blocked: Vec<(ClientId, DrawableId)>,
}

impl ClientSink for RecordingClients {
    fn swap_complete(&mut self, client: ClientId, drawable: DrawableId, msc: Msc, kind: CompletionKind) {
        self.swaps.push((client, drawable, msc, kind));
    }

    fn wait_msc_complete(&mut self, client: ClientId, drawable: DrawableId, msc: Msc) {
        self.waits.push((client, drawable, msc));
    }

    fn block_client(&mut self, client: ClientId, drawable: DrawableId) {
        self.blocked.push((client, drawable));
    }
}

pub type TestScheduler = SwapScheduler<MockTransport, MockAllocator, RecordingRenderer, RecordingClients>;

/// A 1920x1080 screen with one output and a single client window.
pub struct Harness {
    pub scheduler: TestScheduler,
    pub front: BufferHandle,
    pub back: BufferHandle,
}

impl Harness {
    /// Window covering the whole scanout pixmap, eligible for flips.
    pub fn fullscreen() -> Self {
        Self::build(SwapConfig::default(), Rectangle::new((0, 0).into(), (1920, 1080).into()), SCREEN)
    }

    /// Window of the same size as its own offscreen pixmap.
    pub fn redirected() -> Self {
        Self::redirected_with(SwapConfig::default())
    }

    pub fn redirected_with(config: SwapConfig) -> Self {
        Self::build(config, Rectangle::new((0, 0).into(), (1920, 1080).into()), REDIRECT)
    }

    /// Window drawn straight onto the scanout but not covering it.
    pub fn windowed() -> Self {
        Self::build(SwapConfig::default(), Rectangle::new((100, 100).into(), (800, 600).into()), SCREEN)
    }

    pub fn build(config: SwapConfig, geometry: Rectangle<i32, Logical>, pixmap: PixmapId) -> Self {
        let mut allocator = MockAllocator::default();
        let scanout = allocator.adopt(1920);
        let redirect = allocator.adopt(1920);
        let mut scheduler = SwapScheduler::new(
            config,
            ScreenState {
                scanout: SCREEN,
                vt_active: true,
                shadow: false,
            },
            MockTransport::at(START_FRAME),
            allocator,
            RecordingRenderer::default(),
            RecordingClients::default(),
        );
        scheduler.set_outputs(vec![OutputInfo {
            id: OUTPUT,
            rect: Rectangle::new((0, 0).into(), (1920, 1080).into()),
            enabled: true,
        }]);
        scheduler.insert_pixmap(Pixmap::new(SCREEN, (1920, 1080).into(), Fourcc::Xrgb8888, scanout));
        scheduler.insert_pixmap(Pixmap::new(REDIRECT, (1920, 1080).into(), Fourcc::Xrgb8888, redirect));
        scheduler.insert_drawable(Drawable::window(WINDOW, geometry, pixmap));

        let front = scheduler
            .create_buffer(WINDOW, Attachment::FrontLeft, Fourcc::Xrgb8888)
            .expect("front buffer");
        let back = scheduler
            .create_buffer(WINDOW, Attachment::BackLeft, Fourcc::Xrgb8888)
            .expect("back buffer");
        Self {
            scheduler,
            front,
            back,
        }
    }

    pub fn swap(&mut self, target_msc: u64, divisor: u64, remainder: u64) -> Result<u64, SwapError> {
        self.scheduler.schedule_swap(SwapRequest {
            client: CLIENT,
            drawable: WINDOW,
            front: self.front,
            back: self.back,
            target_msc,
            divisor,
            remainder,
        })
    }

    /// Swap as soon as possible.
    pub fn swap_now(&mut self) -> u64 {
        self.swap(0, 0, 0).expect("immediate swap")
    }

    pub fn wait(&mut self, target_msc: u64, divisor: u64, remainder: u64) -> Result<u64, SwapError> {
        self.scheduler.schedule_wait_msc(WaitMscRequest {
            client: CLIENT,
            drawable: WINDOW,
            target_msc,
            divisor,
            remainder,
        })
    }

    /// Deliver one completion as the kernel would.
    pub fn fire(&mut self, token: EventToken, frame: u32) {
        let transport = self.scheduler.transport_mut();
        transport.queued.retain(|(queued, _)| *queued != token);
        transport.frame = transport.frame.max(frame);
        self.scheduler.handle_completion(Completion {
            token,
            msc: Msc::new(frame, 5, frame),
        });
    }

    /// Deliver everything queued so far, in frame order. Returns how many
    /// completions were delivered.
    pub fn dispatch(&mut self) -> usize {
        let mut queued = std::mem::take(&mut self.scheduler.transport_mut().queued);
        queued.sort_by_key(|(_, frame)| *frame);
        let count = queued.len();
        for (token, frame) in queued {
            self.fire(token, frame);
        }
        count
    }

    pub fn transport(&self) -> &MockTransport {
        self.scheduler.transport()
    }

    pub fn allocator(&self) -> &MockAllocator {
        self.scheduler.allocator()
    }

    pub fn swaps(&self) -> &[(ClientId, DrawableId, Msc, CompletionKind)] {
        &self.scheduler.clients().swaps
    }

    pub fn waits(&self) -> &[(ClientId, DrawableId, Msc)] {
        &self.scheduler.clients().waits
    }

    pub fn copies(&self) -> usize {
        self.scheduler.renderer().copies.len()
    }

    pub fn front_bo(&self) -> BoId {
        self.scheduler.buffer(self.front).expect("front buffer").bo.id
    }

    pub fn back_bo(&self) -> BoId {
        self.scheduler.buffer(self.back).expect("back buffer").bo.id
    }

    pub fn pixmap_bo(&self, pixmap: PixmapId) -> BoId {
        self.scheduler.drawables().pixmap(pixmap).expect("pixmap").bo.id
    }
}
