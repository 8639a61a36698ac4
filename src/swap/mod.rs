// SPDX-License-Identifier: GPL-3.0-only

//! Swap and wait scheduling against the display's vblank counter.
//!
//! [`SwapScheduler`] owns every in-flight [`FrameEvent`]. A request either
//! runs right away, is chained behind the swap currently occupying its
//! drawable, or is handed to the kernel with a token. The kernel gives the
//! token back through [`SwapScheduler::handle_completion`], which advances
//! the event until it retires.

pub mod chain;
pub mod event;
pub mod registry;
pub mod strategy;

pub use self::{
    chain::FlipChain,
    event::{Binding, Delivery, FrameEvent, FrameState},
    registry::FrameEventRegistry,
    strategy::Strategy,
};
pub use crate::transport::EventToken;

use crate::{
    buffer::{AllocRequest, Attachment, BufferAllocator, BufferHandle, BufferInfo, BufferPool},
    config::SwapConfig,
    drawable::{ClientId, Drawable, DrawableId, DrawableTable, OutputId, OutputInfo, Pixmap, PixmapId, ScreenState},
    error::{SwapError, TransportError},
    host::{ClientSink, CompletionKind, Renderer},
    msc::{self, Msc},
    transport::{Completion, VblankRequest, VblankTarget, VblankTransport, WaitFlags},
};
use smithay::{
    backend::allocator::Fourcc,
    utils::{Logical, Rectangle},
};
use tracing::{debug, trace, warn};

/// A client's request to swap front and back.
#[derive(Debug, Clone, Copy)]
pub struct SwapRequest {
    pub client: ClientId,
    pub drawable: DrawableId,
    pub front: BufferHandle,
    pub back: BufferHandle,
    pub target_msc: u64,
    pub divisor: u64,
    pub remainder: u64,
}

/// A client's request to sleep until a frame.
#[derive(Debug, Clone, Copy)]
pub struct WaitMscRequest {
    pub client: ClientId,
    pub drawable: DrawableId,
    pub target_msc: u64,
    pub divisor: u64,
    pub remainder: u64,
}

/// Number of warnings left before a repeating message drops to debug.
#[derive(Debug)]
struct WarningBudget(u32);

impl WarningBudget {
    fn spend(&mut self) -> bool {
        if self.0 == 0 {
            return false;
        }
        self.0 -= 1;
        true
    }
}

fn completion_kind(strategy: Option<Strategy>) -> CompletionKind {
    match strategy {
        Some(Strategy::Flip) => CompletionKind::FlipComplete,
        Some(Strategy::Exchange) => CompletionKind::ExchangeComplete,
        Some(Strategy::Blit) | None => CompletionKind::BlitComplete,
    }
}

pub struct SwapScheduler<T, A, R, C> {
    config: SwapConfig,
    screen: ScreenState,
    drawables: DrawableTable,
    buffers: BufferPool,
    registry: FrameEventRegistry,
    chain: FlipChain,
    transport: T,
    allocator: A,
    renderer: R,
    clients: C,
    impossible_msc_warnings: WarningBudget,
    query_warnings: WarningBudget,
}

impl<T, A, R, C> SwapScheduler<T, A, R, C>
where
    T: VblankTransport,
    A: BufferAllocator,
    R: Renderer,
    C: ClientSink,
{
    pub fn new(
        config: SwapConfig,
        screen: ScreenState,
        transport: T,
        allocator: A,
        renderer: R,
        clients: C,
    ) -> Self {
        Self {
            impossible_msc_warnings: WarningBudget(config.msc_warnings),
            query_warnings: WarningBudget(config.msc_warnings),
            config,
            screen,
            drawables: DrawableTable::new(),
            buffers: BufferPool::new(),
            registry: FrameEventRegistry::new(),
            chain: FlipChain::new(),
            transport,
            allocator,
            renderer,
            clients,
        }
    }

    pub fn config(&self) -> &SwapConfig {
        &self.config
    }

    pub fn screen(&self) -> &ScreenState {
        &self.screen
    }

    pub fn set_screen(&mut self, screen: ScreenState) {
        self.screen = screen;
    }

    pub fn drawables(&self) -> &DrawableTable {
        &self.drawables
    }

    pub fn set_outputs(&mut self, outputs: Vec<OutputInfo>) {
        self.drawables.set_outputs(outputs);
    }

    pub fn insert_pixmap(&mut self, pixmap: Pixmap) {
        self.drawables.insert_pixmap(pixmap);
    }

    pub fn insert_drawable(&mut self, drawable: Drawable) {
        self.drawables.insert_drawable(drawable);
    }

    /// Mutable access for geometry and clip changes. Strategies are
    /// re-evaluated against the new state on the next swap or completion.
    pub fn drawable_mut(&mut self, id: DrawableId) -> Option<&mut Drawable> {
        self.drawables.drawable_mut(id)
    }

    /// Drain damage accumulated on a pixmap by buffer rebinds.
    pub fn take_damage(&mut self, pixmap: PixmapId) -> Vec<Rectangle<i32, Logical>> {
        self.drawables
            .pixmap_mut(pixmap)
            .map(Pixmap::take_damage)
            .unwrap_or_default()
    }

    pub fn buffers(&self) -> &BufferPool {
        &self.buffers
    }

    pub fn buffer(&self, handle: BufferHandle) -> Option<&BufferInfo> {
        self.buffers.get(handle)
    }

    pub fn registry(&self) -> &FrameEventRegistry {
        &self.registry
    }

    pub fn event(&self, token: EventToken) -> Option<&FrameEvent> {
        self.registry.get(token)
    }

    pub fn pending_events(&self) -> usize {
        self.registry.len()
    }

    /// Event currently holding the drawable's flip chain slot.
    pub fn chain_active(&self, drawable: DrawableId) -> Option<EventToken> {
        self.chain.active(drawable)
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn clients(&self) -> &C {
        &self.clients
    }

    pub fn clients_mut(&mut self) -> &mut C {
        &mut self.clients
    }

    /// Create or reuse the buffer for `attachment` of `drawable`.
    pub fn create_buffer(
        &mut self,
        drawable: DrawableId,
        attachment: Attachment,
        format: Fourcc,
    ) -> Result<BufferHandle, SwapError> {
        let (d, pixmap) = self
            .drawables
            .resolve(drawable)
            .ok_or(SwapError::UnknownDrawable(drawable))?;
        self.buffers
            .acquire(&mut self.allocator, d, pixmap, attachment, format)
            .ok_or(SwapError::Allocation(drawable))
    }

    /// Drop the client's reference. In-flight events keep theirs.
    pub fn destroy_buffer(&mut self, handle: BufferHandle) -> Result<bool, SwapError> {
        if !self.buffers.contains(handle) {
            return Err(SwapError::UnknownBuffer(handle));
        }
        Ok(self.buffers.release(&mut self.allocator, handle))
    }

    /// Copy a drawable-relative region between two buffers of `drawable`.
    pub fn copy_region(
        &mut self,
        drawable: DrawableId,
        region: &[Rectangle<i32, Logical>],
        dst: BufferHandle,
        src: BufferHandle,
    ) -> Result<(), SwapError> {
        let dst_bo = self.owned_buffer(drawable, dst)?.bo;
        let src_bo = self.owned_buffer(drawable, src)?.bo;
        let d = self
            .drawables
            .drawable(drawable)
            .ok_or(SwapError::UnknownDrawable(drawable))?;
        self.renderer.copy_region(d, region, &src_bo, &dst_bo);
        Ok(())
    }

    fn owned_buffer(&self, drawable: DrawableId, handle: BufferHandle) -> Result<&BufferInfo, SwapError> {
        if self.drawables.drawable(drawable).is_none() {
            return Err(SwapError::UnknownDrawable(drawable));
        }
        let info = self.buffers.get(handle).ok_or(SwapError::UnknownBuffer(handle))?;
        if info.drawable != drawable {
            return Err(SwapError::ForeignBuffer { buffer: handle, drawable });
        }
        Ok(info)
    }

    pub fn client_destroyed(&mut self, client: ClientId) {
        self.registry.on_client_destroyed(client);
    }

    /// Events of the drawable stay registered until the kernel hands
    /// their tokens back; they are only marked.
    pub fn drawable_destroyed(&mut self, drawable: DrawableId) {
        self.registry.on_drawable_destroyed(drawable);
        self.chain.forget(drawable);
        self.buffers.forget_drawable(drawable);
        self.drawables.remove_drawable(drawable);
    }

    /// Current frame counter and its timestamp on the drawable's output.
    pub fn get_msc(&mut self, drawable: DrawableId) -> Result<Msc, SwapError> {
        if self.drawables.drawable(drawable).is_none() {
            return Err(SwapError::UnknownDrawable(drawable));
        }
        let Some(output) = self.drawables.output_for(drawable) else {
            return Ok(Msc::ZERO);
        };
        Ok(self.query(output)?)
    }

    fn query(&mut self, output: OutputId) -> Result<Msc, TransportError> {
        match self.transport.wait_vblank(VblankRequest::query(output)) {
            Ok(reply) => Ok(reply.msc),
            Err(err) => {
                if self.query_warnings.spend() {
                    warn!(?output, "Failed to read vblank counter: {}", err);
                } else {
                    debug!(?output, "Failed to read vblank counter: {}", err);
                }
                Err(err)
            }
        }
    }

    /// Block `client` until the requested frame. Returns the frame the
    /// wait was armed for.
    pub fn schedule_wait_msc(&mut self, request: WaitMscRequest) -> Result<u64, SwapError> {
        let WaitMscRequest {
            client, drawable, ..
        } = request;
        if self.drawables.drawable(drawable).is_none() {
            return Err(SwapError::UnknownDrawable(drawable));
        }
        let target = msc::truncate(request.target_msc);
        let divisor = msc::truncate(request.divisor);
        let remainder = msc::truncate(request.remainder);

        let Some(output) = self.drawables.output_for(drawable) else {
            debug!(?drawable, target, "Offscreen wait completes immediately");
            self.clients.wait_msc_complete(client, drawable, Msc::without_timing(target));
            return Ok(target as u64);
        };
        let Ok(current) = self.query(output) else {
            self.clients.wait_msc_complete(client, drawable, Msc::without_timing(target));
            return Ok(target as u64);
        };
        if divisor == 0 && current.frame >= target {
            debug!(?drawable, current = current.frame, target, "Wait target already passed");
            self.clients.wait_msc_complete(client, drawable, current);
            return Ok(current.frame as u64);
        }
        let current = current.frame;

        let wait_for = if current < target {
            target
        } else {
            msc::next_matching_frame(current, divisor, remainder)
        };

        let mut event = FrameEvent::new(client, drawable, FrameState::WaitingMsc, None);
        event.output = Some(output);
        event.target = wait_for;
        let token = self.registry.insert(event);
        let registered = self.registry.register(token, client, drawable);
        debug_assert!(registered, "fresh frame event registered twice");

        let request = VblankRequest::event(output, VblankTarget::Absolute(wait_for), WaitFlags::empty(), token);
        match self.transport.wait_vblank(request) {
            Ok(reply) => {
                if let Some(event) = self.registry.get_mut(token) {
                    event.target = reply.msc.frame;
                }
                debug!(?token, ?drawable, current, target = reply.msc.frame, "Client waiting for frame");
                self.clients.block_client(client, drawable);
                Ok(reply.msc.frame as u64)
            }
            Err(err) => {
                warn!(?drawable, "Failed to queue frame wait: {}", err);
                self.free_event(token);
                self.clients.wait_msc_complete(client, drawable, Msc::without_timing(target));
                Ok(target as u64)
            }
        }
    }

    /// Schedule a swap of `front` and `back`.
    ///
    /// Returns the frame the swap is expected to become visible on, or 0
    /// when it was carried out right away.
    pub fn schedule_swap(&mut self, request: SwapRequest) -> Result<u64, SwapError> {
        let SwapRequest {
            client,
            drawable,
            front,
            back,
            ..
        } = request;
        self.owned_buffer(drawable, front)?;
        self.owned_buffer(drawable, back)?;
        let target = msc::truncate(request.target_msc);
        let divisor = msc::truncate(request.divisor);
        let remainder = msc::truncate(request.remainder);

        let output = self.drawables.output_for(drawable);
        let strategy = self.select_strategy(drawable, front, back);
        let state = match strategy {
            Strategy::Flip => FrameState::FlipSubmitted,
            _ => FrameState::BlitSubmitted,
        };
        let token = self.new_swap_event(client, drawable, state, strategy, output, front, back);

        let Some(output) = output else {
            debug!(?drawable, "Offscreen swap");
            self.complete_now(token);
            return Ok(0);
        };

        if divisor == 0 {
            self.start_or_chain(token);
            return Ok(0);
        }

        let Ok(current) = self.query(output) else {
            self.complete_now(token);
            return Ok(0);
        };
        let current = current.frame;

        // a flip queued at vblank N is on screen at N + 1
        let flip = u32::from(strategy == Strategy::Flip);
        let visible = msc::swap_target(current, target, divisor, remainder);
        let mut flags = WaitFlags::empty();
        if flip == 0 {
            flags |= WaitFlags::NEXT_ON_MISS;
        }
        let request = VblankRequest::event(
            output,
            VblankTarget::Absolute(visible.wrapping_sub(flip)),
            flags,
            token,
        );
        match self.transport.wait_vblank(request) {
            Ok(reply) => {
                let target = reply.msc.frame.wrapping_add(flip);
                if let Some(event) = self.registry.get_mut(token) {
                    event.target = target;
                }
                debug!(?token, ?drawable, ?strategy, current, target, "Swap scheduled");
                Ok(target as u64)
            }
            Err(err) => {
                warn!(?drawable, "Failed to queue swap, swapping now: {}", err);
                self.complete_now(token);
                Ok(0)
            }
        }
    }

    /// Advance the event the kernel just reported on.
    pub fn handle_completion(&mut self, completion: Completion) {
        let Completion { token, msc } = completion;
        let Some(event) = self.registry.get(token) else {
            debug!(?token, "Completion for an event that already retired");
            return;
        };
        let state = event.state;
        trace!(?token, ?state, frame = msc.frame, "Frame event completed");

        if event.drawable.is_gone() && state != FrameState::WaitingMsc {
            debug!(?token, ?state, "Drawable destroyed, dropping frame event");
            self.discard(token);
            return;
        }

        match state {
            FrameState::FlipSubmitted => self.on_swap_vblank(token, msc, true),
            FrameState::BlitSubmitted => self.on_swap_vblank(token, msc, false),
            FrameState::FlipCompleting => self.on_flip_complete(token, msc),
            FrameState::BlitThrottling => self.on_blit_idle_check(token, msc),
            FrameState::ExchangeThrottling => {
                self.notify_swap(token, msc, CompletionKind::ExchangeComplete);
                self.retire(token, msc);
            }
            FrameState::WaitingMsc => self.on_wait_msc(token, msc),
            FrameState::Chained => warn!(?token, "Completion for a swap the kernel was never given"),
        }
    }

    fn on_swap_vblank(&mut self, token: EventToken, msc: Msc, try_flip: bool) {
        let Some(drawable) = self.event_drawable(token) else {
            self.discard(token);
            return;
        };
        if let Some(active) = self.chain.active(drawable).filter(|active| *active != token) {
            self.enqueue_behind(active, token);
            return;
        }

        if try_flip && self.current_strategy(token) == Some(Strategy::Flip) {
            match self.submit_flip(token) {
                Ok(()) => {
                    self.set_state(token, FrameState::FlipCompleting);
                    self.chain.open(drawable, token);
                    return;
                }
                Err(err) => warn!(?token, "Page flip failed, copying instead: {}", err),
            }
        }

        if self.blit(token).is_none() {
            self.discard(token);
            return;
        }
        self.set_state(token, FrameState::BlitThrottling);
        self.chain.open(drawable, token);
        self.on_blit_idle_check(token, msc);
    }

    fn on_flip_complete(&mut self, token: EventToken, msc: Msc) {
        let Some(event) = self.registry.get(token) else {
            return;
        };
        let mut msc = msc;
        if event.delivery == Delivery::Pending && msc::is_impossible_completion(msc.frame, event.target) {
            if self.impossible_msc_warnings.spend() {
                warn!(
                    ?token,
                    reported = msc.frame,
                    target = event.target,
                    "Flip completed before its target frame, dropping timestamp"
                );
            } else {
                debug!(?token, reported = msc.frame, target = event.target, "Impossible flip frame");
            }
            msc = Msc::ZERO;
        }
        self.notify_swap(token, msc, CompletionKind::FlipComplete);
        self.retire(token, msc);
    }

    fn on_blit_idle_check(&mut self, token: EventToken, msc: Msc) {
        let busy = self
            .registry
            .get(token)
            .and_then(|event| event.pending_bo)
            .is_some_and(|bo| self.allocator.is_busy(bo));
        if busy {
            match self.arm_next_frame(token) {
                Ok(()) => {
                    trace!(?token, "Copy still running, waiting another frame");
                    return;
                }
                Err(err) => debug!(?token, "Could not re-arm copy throttle: {}", err),
            }
        }
        self.notify_swap(token, msc, CompletionKind::BlitComplete);
        self.retire(token, msc);
    }

    fn on_wait_msc(&mut self, token: EventToken, msc: Msc) {
        let Some(event) = self.free_event(token) else {
            return;
        };
        match event.client.live() {
            Some(client) => self.clients.wait_msc_complete(client, event.drawable.id(), msc),
            None => debug!(?token, "Waiting client is gone"),
        }
    }

    /// Run a divisor 0 swap now, or queue it behind the swap holding the
    /// drawable.
    fn start_or_chain(&mut self, token: EventToken) {
        let Some(drawable) = self.event_drawable(token) else {
            self.discard(token);
            return;
        };
        match self.chain.active(drawable) {
            Some(active) if active != token => self.enqueue_behind(active, token),
            _ => self.start_immediate(token, Msc::ZERO),
        }
    }

    fn enqueue_behind(&mut self, active: EventToken, token: EventToken) {
        self.set_state(token, FrameState::Chained);
        let Some(holder) = self.registry.get_mut(active) else {
            // the holder retired without closing its slot
            if let Some(drawable) = self.event_drawable(token) {
                self.chain.close(drawable, active);
            }
            self.start_immediate(token, Msc::ZERO);
            return;
        };
        let displaced = holder.chain.replace(token);
        debug!(?active, ?token, "Swap chained behind outstanding swap");

        if let Some(displaced) = displaced {
            debug!(?displaced, ?token, "Queued swap superseded");
            let kind = completion_kind(self.registry.get(displaced).and_then(|e| e.strategy));
            self.notify_swap(displaced, Msc::ZERO, kind);
            self.free_event(displaced);
        }
    }

    fn start_immediate(&mut self, token: EventToken, msc: Msc) {
        let Some(drawable) = self.event_drawable(token) else {
            self.discard(token);
            return;
        };
        let Some(strategy) = self.current_strategy(token) else {
            self.discard(token);
            return;
        };

        if strategy == Strategy::Flip {
            match self.submit_flip(token) {
                Ok(()) => {
                    self.set_state(token, FrameState::FlipCompleting);
                    self.chain.open(drawable, token);
                    // clients hear about immediate flips on submission, as
                    // long as their back buffer is no longer on screen
                    if self.replace_back(token).is_some() {
                        self.notify_swap(token, msc, CompletionKind::FlipComplete);
                    } else {
                        debug!(?token, "No spare back buffer, completing on flip");
                    }
                    return;
                }
                Err(err) => warn!(?token, "Page flip failed, falling back: {}", err),
            }
        }

        let Some(kind) = self.exchange_or_blit(token) else {
            self.discard(token);
            return;
        };
        self.notify_swap(token, msc, kind);

        if self.config.swap_throttle {
            let state = match kind {
                CompletionKind::ExchangeComplete => FrameState::ExchangeThrottling,
                _ => FrameState::BlitThrottling,
            };
            self.set_state(token, state);
            match self.arm_next_frame(token) {
                Ok(()) => {
                    self.chain.open(drawable, token);
                    return;
                }
                Err(err) => debug!(?token, "Could not throttle swap: {}", err),
            }
        }
        self.retire(token, msc);
    }

    /// Synchronous swap, used offscreen and after a failed submission.
    fn complete_now(&mut self, token: EventToken) {
        let kind = self.exchange_or_blit(token).unwrap_or(CompletionKind::BlitComplete);
        self.notify_swap(token, Msc::ZERO, kind);
        self.free_event(token);
    }

    fn exchange_or_blit(&mut self, token: EventToken) -> Option<CompletionKind> {
        let event = self.registry.get(token)?;
        let drawable_id = event.drawable.live()?;
        let (front, back) = (event.front?, event.back?);
        let (drawable, pixmap) = self.drawables.resolve(drawable_id)?;
        let exchange = strategy::can_exchange(
            &self.screen,
            drawable,
            pixmap,
            self.buffers.get(front)?,
            self.buffers.get(back)?,
        );
        if exchange {
            self.exchange_buffers(drawable_id, front, back)?;
            Some(CompletionKind::ExchangeComplete)
        } else {
            self.blit(token)?;
            Some(CompletionKind::BlitComplete)
        }
    }

    /// Trade the objects behind front and back and rebind the drawable's
    /// pixmap to the new front.
    fn exchange_buffers(&mut self, drawable: DrawableId, front: BufferHandle, back: BufferHandle) -> Option<()> {
        let (new_front, _) = self.buffers.exchange(front, back)?;
        let pixmap = self.drawables.drawable(drawable)?.pixmap;
        self.drawables
            .pixmap_mut(pixmap)?
            .set_bo(&mut self.allocator, new_front);
        trace!(?drawable, bo = ?new_front.id, "Exchanged buffers");
        Some(())
    }

    /// Copy back into front over the drawable's visible region.
    fn blit(&mut self, token: EventToken) -> Option<()> {
        let event = self.registry.get(token)?;
        let drawable_id = event.drawable.live()?;
        let front = self.buffers.get(event.front?)?.bo;
        let back = self.buffers.get(event.back?)?.bo;
        let drawable = self.drawables.drawable(drawable_id)?;
        let region = drawable.relative_clip();
        self.renderer.copy_region(drawable, &region, &back, &front);

        // the destination stays alive until the copy is known to be done
        self.allocator.reference(front.id);
        if let Some(previous) = self.registry.get_mut(token)?.pending_bo.replace(front.id) {
            self.allocator.unreference(previous);
        }
        Some(())
    }

    fn submit_flip(&mut self, token: EventToken) -> Result<(), SwapError> {
        let event = self.registry.get(token).ok_or(SwapError::UnknownEvent(token))?;
        let drawable = event.drawable.id();
        let output = event.output.ok_or(SwapError::Offscreen(drawable))?;
        let front = event.front.ok_or(SwapError::UnknownEvent(token))?;
        let back = event.back.ok_or(SwapError::UnknownEvent(token))?;
        let old = self.buffers.get(front).ok_or(SwapError::UnknownBuffer(front))?.bo;
        let new = self.buffers.get(back).ok_or(SwapError::UnknownBuffer(back))?.bo;

        self.transport.page_flip(output, new.id, token)?;

        // the old scanout is read until the flip completes
        self.allocator.reference(old.id);
        if let Some(event) = self.registry.get_mut(token) {
            if let Some(previous) = event.pending_bo.replace(old.id) {
                self.allocator.unreference(previous);
            }
        }
        self.exchange_buffers(drawable, front, back);
        debug!(?token, ?output, bo = ?new.id, "Page flip queued");
        Ok(())
    }

    /// Bind the event's back handle to fresh storage. The old object stays
    /// referenced by the event until the flip completes.
    fn replace_back(&mut self, token: EventToken) -> Option<()> {
        let event = self.registry.get(token)?;
        let (front, back) = (event.front?, event.back?);
        let tiling = self.buffers.get(front)?.bo.tiling;
        let info = *self.buffers.get(back)?;
        let request = AllocRequest {
            drawable: info.drawable,
            attachment: info.attachment,
            size: info.size,
            format: info.format,
            tiling: Some(tiling),
        };
        let Some(bo) = self.allocator.allocate(&request) else {
            warn!(?token, drawable = ?info.drawable, "Failed to allocate a new back buffer");
            return None;
        };
        let Some(old) = self.buffers.rebind(back, bo) else {
            self.allocator.unreference(bo.id);
            return None;
        };
        self.allocator.unreference(old.id);
        trace!(?token, old = ?old.id, new = ?bo.id, "Replaced back buffer");
        Some(())
    }

    fn arm_next_frame(&mut self, token: EventToken) -> Result<(), SwapError> {
        let output = self
            .registry
            .get(token)
            .and_then(|event| event.output)
            .ok_or(SwapError::UnknownEvent(token))?;
        let request = VblankRequest::event(output, VblankTarget::Relative(1), WaitFlags::empty(), token);
        self.transport.wait_vblank(request)?;
        Ok(())
    }

    fn notify_swap(&mut self, token: EventToken, msc: Msc, kind: CompletionKind) {
        let Some(event) = self.registry.get_mut(token) else {
            return;
        };
        let target = event.notify_target();
        event.delivery = Delivery::Delivered;
        match target {
            Some((client, drawable)) => {
                trace!(?token, ?client, ?drawable, ?kind, frame = msc.frame, "Swap complete");
                self.clients.swap_complete(client, drawable, msc, kind);
            }
            None => trace!(?token, "Swap completion suppressed"),
        }
    }

    /// Free a finished event and start whatever was chained behind it.
    fn retire(&mut self, token: EventToken, msc: Msc) {
        let Some(event) = self.free_event(token) else {
            return;
        };
        let drawable = event.drawable.live();
        if let Some(drawable) = drawable {
            self.chain.close(drawable, token);
        }
        let Some(next) = event.chain else {
            return;
        };
        if drawable.is_some() {
            debug!(?token, ?next, "Starting chained swap");
            self.start_immediate(next, msc);
        } else {
            self.discard(next);
        }
    }

    /// Drop an event that can no longer be carried out, along with its
    /// chain. A client still waiting is told with a zero count.
    fn discard(&mut self, token: EventToken) {
        if let Some(event) = self.registry.get(token) {
            if event.state != FrameState::WaitingMsc {
                let kind = completion_kind(event.strategy);
                self.notify_swap(token, Msc::ZERO, kind);
            }
        }
        let Some(event) = self.free_event(token) else {
            return;
        };
        if let Some(drawable) = event.drawable.live() {
            self.chain.close(drawable, token);
        }
        if let Some(next) = event.chain {
            self.discard(next);
        }
    }

    /// Remove the event and drop every reference it holds.
    fn free_event(&mut self, token: EventToken) -> Option<FrameEvent> {
        let event = self.registry.remove(token)?;
        if let Some(bo) = event.pending_bo {
            self.allocator.unreference(bo);
        }
        for handle in [event.front, event.back].into_iter().flatten() {
            self.buffers.release(&mut self.allocator, handle);
        }
        trace!(?token, "Frame event freed");
        Some(event)
    }

    #[allow(clippy::too_many_arguments)]
    fn new_swap_event(
        &mut self,
        client: ClientId,
        drawable: DrawableId,
        state: FrameState,
        strategy: Strategy,
        output: Option<OutputId>,
        front: BufferHandle,
        back: BufferHandle,
    ) -> EventToken {
        let mut event = FrameEvent::new(client, drawable, state, Some(strategy));
        event.output = output;
        event.front = Some(front);
        event.back = Some(back);
        self.buffers.retain(front);
        self.buffers.retain(back);
        let token = self.registry.insert(event);
        let registered = self.registry.register(token, client, drawable);
        debug_assert!(registered, "fresh frame event registered twice");
        token
    }

    fn set_state(&mut self, token: EventToken, state: FrameState) {
        if let Some(event) = self.registry.get_mut(token) {
            trace!(?token, from = ?event.state, to = ?state, "Frame event transition");
            event.state = state;
        }
    }

    fn event_drawable(&self, token: EventToken) -> Option<DrawableId> {
        self.registry.get(token)?.drawable.live()
    }

    fn select_strategy(&self, drawable: DrawableId, front: BufferHandle, back: BufferHandle) -> Strategy {
        let resolved = self.drawables.resolve(drawable).and_then(|(d, pixmap)| {
            Some((d, pixmap, self.buffers.get(front)?, self.buffers.get(back)?))
        });
        match resolved {
            Some((d, pixmap, front, back)) => strategy::select(&self.config, &self.screen, d, pixmap, front, back),
            None => Strategy::Blit,
        }
    }

    fn current_strategy(&self, token: EventToken) -> Option<Strategy> {
        let event = self.registry.get(token)?;
        let drawable = event.drawable.live()?;
        let (d, pixmap) = self.drawables.resolve(drawable)?;
        let front = self.buffers.get(event.front?)?;
        let back = self.buffers.get(event.back?)?;
        Some(strategy::select(&self.config, &self.screen, d, pixmap, front, back))
    }
}
