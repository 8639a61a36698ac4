// SPDX-License-Identifier: GPL-3.0-only

use anyhow::{Context, Result};
use calloop::{
    generic::Generic,
    timer::{TimeoutAction, Timer},
    EventLoop, Interest, LoopSignal, Mode, PostAction,
};
use smithay::{
    backend::allocator::Fourcc,
    utils::{Rectangle, Size},
};
use std::{path::PathBuf, time::Duration};
use tracing::{debug, error, info, warn};
use vblank_swap::{
    buffer::{AllocRequest, BoId, BufferAllocator, BufferObject, Tiling},
    config::SwapConfig,
    drawable::{ClientId, Drawable, DrawableId, Pixmap, PixmapId, ScreenState},
    host::{ClientSink, CompletionKind, Renderer},
    msc::Msc,
    swap::{SwapScheduler, WaitMscRequest},
    transport::{
        drm_helpers,
        kms::{Card, DrmVblankTransport},
    },
};

const DEFAULT_CARD: &str = "/dev/dri/card0";
const DEFAULT_FRAMES: u64 = 60;
const PROBE_CLIENT: ClientId = ClientId(1);
const ROOT_PIXMAP: PixmapId = PixmapId(1);

/// The probe never allocates; the scheduler only needs the trait.
struct NoBuffers;

impl BufferAllocator for NoBuffers {
    fn allocate(&mut self, request: &AllocRequest) -> Option<BufferObject> {
        debug!(?request, "Probe does not allocate buffers");
        None
    }

    fn reference(&mut self, _bo: BoId) {}

    fn unreference(&mut self, _bo: BoId) {}

    fn is_busy(&self, _bo: BoId) -> bool {
        false
    }
}

struct NoRenderer;

impl Renderer for NoRenderer {
    fn copy_region(
        &mut self,
        drawable: &Drawable,
        _region: &[Rectangle<i32, smithay::utils::Logical>],
        _src: &BufferObject,
        _dst: &BufferObject,
    ) {
        debug!(drawable = ?drawable.id, "Probe ignores copies");
    }
}

#[derive(Default)]
struct ProbeClient {
    woken: Option<Msc>,
}

impl ClientSink for ProbeClient {
    fn swap_complete(&mut self, client: ClientId, drawable: DrawableId, msc: Msc, kind: CompletionKind) {
        debug!(?client, ?drawable, ?kind, frame = msc.frame, "Swap complete");
    }

    fn wait_msc_complete(&mut self, _client: ClientId, drawable: DrawableId, msc: Msc) {
        info!(?drawable, frame = msc.frame, ust = msc.ust(), "Wait complete");
        self.woken = Some(msc);
    }

    fn block_client(&mut self, _client: ClientId, drawable: DrawableId) {
        debug!(?drawable, "Waiting for frame");
    }
}

type ProbeScheduler = SwapScheduler<DrmVblankTransport<Card>, NoBuffers, NoRenderer, ProbeClient>;

struct Probe {
    scheduler: ProbeScheduler,
    loop_signal: LoopSignal,
    timed_out: bool,
}

fn main() {
    if let Err(err) = main_inner() {
        error!("Error occurred in main(): {:#}", err);
        std::process::exit(1);
    }
}

fn main_inner() -> Result<()> {
    // setup logger
    init_logger()?;

    let mut args = std::env::args().skip(1);
    let path = PathBuf::from(args.next().unwrap_or_else(|| DEFAULT_CARD.to_owned()));
    let frames = match args.next() {
        Some(frames) => frames
            .parse::<u64>()
            .with_context(|| format!("Invalid frame count {:?}", frames))?,
        None => DEFAULT_FRAMES,
    };
    info!("vblank-swap probing {}", path.display());

    let card = Card::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
    let pipes = drm_helpers::pipes(&card).context("Failed to enumerate crtcs")?;
    let active: Vec<_> = pipes.iter().filter(|pipe| pipe.output.enabled).collect();
    if active.is_empty() {
        anyhow::bail!("No active crtc on {}", path.display());
    }
    for pipe in &active {
        let refresh = pipe.mode.map_or(0, drm_helpers::calculate_refresh_rate);
        info!(
            pipe = pipe.output.id.0,
            crtc = ?pipe.crtc,
            "Active pipe at {:?}, {}.{:03} Hz",
            pipe.output.rect,
            refresh / 1000,
            refresh % 1000
        );
    }

    let transport = DrmVblankTransport::new(card.clone(), pipes.iter().map(|pipe| pipe.crtc).collect());
    let screen = ScreenState {
        scanout: ROOT_PIXMAP,
        vt_active: true,
        shadow: false,
    };
    let mut scheduler = SwapScheduler::new(
        SwapConfig::from_env(),
        screen,
        transport,
        NoBuffers,
        NoRenderer,
        ProbeClient::default(),
    );

    // one window per active pipe on a root pixmap spanning all of them
    let bounds = active
        .iter()
        .fold(active[0].output.rect, |bounds, pipe| bounds.merge(pipe.output.rect));
    let root_bo = BufferObject {
        id: BoId(0),
        name: 0,
        pitch: 0,
        tiling: Tiling::Linear,
    };
    scheduler.insert_pixmap(Pixmap::new(
        ROOT_PIXMAP,
        Size::from((bounds.loc.x + bounds.size.w, bounds.loc.y + bounds.size.h)),
        Fourcc::Xrgb8888,
        root_bo,
    ));
    scheduler.set_outputs(pipes.iter().map(|pipe| pipe.output).collect());
    for pipe in &active {
        let id = DrawableId(pipe.output.id.0 + 1);
        scheduler.insert_drawable(Drawable::window(id, pipe.output.rect, ROOT_PIXMAP));
        match scheduler.get_msc(id) {
            Ok(msc) => info!(pipe = pipe.output.id.0, msc = msc.frame, ust = msc.ust(), "Current frame"),
            Err(err) => warn!(pipe = pipe.output.id.0, "Failed to read frame counter: {}", err),
        }
    }

    let drawable = DrawableId(active[0].output.id.0 + 1);
    let current = scheduler.get_msc(drawable).context("Failed to read frame counter")?;
    let target = scheduler
        .schedule_wait_msc(WaitMscRequest {
            client: PROBE_CLIENT,
            drawable,
            target_msc: current.frame as u64 + frames,
            divisor: 0,
            remainder: 0,
        })
        .context("Failed to schedule wait")?;
    info!(from = current.frame, target, "Waiting {} frames", frames);

    // init event loop
    let mut event_loop: EventLoop<'_, Probe> = EventLoop::try_new().context("Failed to initialize event loop")?;
    let handle = event_loop.handle();

    handle
        .insert_source(
            Generic::new(card, Interest::READ, Mode::Level),
            |_, _, probe: &mut Probe| {
                let completions = probe.scheduler.transport_mut().receive_completions()?;
                for completion in completions {
                    probe.scheduler.handle_completion(completion);
                }
                Ok(PostAction::Continue)
            },
        )
        .map_err(|err| err.error)
        .context("Failed to initialize drm event source")?;

    // a stuck counter must not hang the probe: allow twice the wait at 30 Hz
    let timeout = Duration::from_millis(frames.saturating_mul(2000 / 30).max(1000));
    handle
        .insert_source(Timer::from_duration(timeout), |_, _, probe: &mut Probe| {
            warn!("Timed out waiting for vblank events");
            probe.timed_out = true;
            probe.loop_signal.stop();
            TimeoutAction::Drop
        })
        .map_err(|err| err.error)
        .context("Failed to initialize timeout source")?;

    let mut probe = Probe {
        scheduler,
        loop_signal: event_loop.get_signal(),
        timed_out: false,
    };

    event_loop.run(None, &mut probe, |probe| {
        // shall we shut down?
        if probe.scheduler.clients().woken.is_some() {
            probe.loop_signal.stop();
            probe.loop_signal.wakeup();
        }
    })?;

    if probe.timed_out {
        anyhow::bail!("No vblank completion within {:?}", timeout);
    }
    if let Some(msc) = probe.scheduler.clients().woken {
        info!(frame = msc.frame, elapsed = msc.frame.wrapping_sub(current.frame), "Probe done");
    }
    Ok(())
}

fn init_logger() -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("vblank_swap=info"));

    fmt().with_env_filter(filter).init();

    Ok(())
}
