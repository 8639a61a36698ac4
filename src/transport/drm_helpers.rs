// SPDX-License-Identifier: GPL-3.0-only

use crate::drawable::{OutputId, OutputInfo};
use anyhow::Result;
use ::drm::control::{crtc, Device as ControlDevice, Mode};
use smithay::utils::Rectangle;
use tracing::debug;

/// A crtc as seen by the vblank transport.
#[derive(Debug, Clone, Copy)]
pub struct Pipe {
    pub crtc: crtc::Handle,
    pub output: OutputInfo,
    pub mode: Option<Mode>,
}

/// Enumerate the device's crtcs in pipe order.
///
/// Pipe indices follow the kernel's crtc order, which is what the vblank
/// ioctl expects as its pipe selector.
pub fn pipes(device: &impl ControlDevice) -> Result<Vec<Pipe>> {
    let res_handles = device.resource_handles()?;

    let mut pipes = Vec::new();
    for (index, handle) in res_handles.crtcs().iter().enumerate() {
        let info = device.get_crtc(*handle)?;
        let (x, y) = info.position();
        let mode = info.mode();
        let (w, h) = mode.map_or((0, 0), |m| m.size());
        debug!(crtc = ?handle, index, ?mode, "Found crtc");
        pipes.push(Pipe {
            crtc: *handle,
            output: OutputInfo {
                id: OutputId(index as u32),
                rect: Rectangle::new((x as i32, y as i32).into(), (w as i32, h as i32).into()),
                enabled: mode.is_some(),
            },
            mode,
        });
    }
    Ok(pipes)
}

/// Calculate refresh rate from a DRM mode, in millihertz.
pub fn calculate_refresh_rate(mode: Mode) -> u32 {
    let htotal = mode.hsync().2 as u32;
    let vtotal = mode.vsync().2 as u32;
    if htotal == 0 || vtotal == 0 {
        return 0;
    }
    let refresh = (mode.clock() as u64 * 1000000_u64 / htotal as u64 + vtotal as u64 / 2) / vtotal as u64;
    refresh as u32
}
