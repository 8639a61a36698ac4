// SPDX-License-Identifier: GPL-3.0-only

//! Frame counter (MSC) values and the arithmetic used to pick vblank targets.
//!
//! The hardware counter is 32 bits wide and wraps. Client supplied
//! targets are 64 bits on the wire and get truncated before any
//! comparison, the same way the kernel interface truncates them.

use std::time::Duration;

/// How far behind its target a flip completion may be reported before we
/// consider the report bogus rather than a wrapped counter.
pub const IMPOSSIBLE_MSC_WINDOW: u32 = 5;

/// A frame counter value plus the time at which that frame started.
///
/// An all-zero value is what clients receive when timing information is
/// not available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Msc {
    pub frame: u32,
    pub sec: u32,
    pub usec: u32,
}

impl Msc {
    pub const ZERO: Msc = Msc {
        frame: 0,
        sec: 0,
        usec: 0,
    };

    pub fn new(frame: u32, sec: u32, usec: u32) -> Self {
        Self { frame, sec, usec }
    }

    /// Build from a kernel timestamp. Missing timestamps become zero.
    pub fn from_duration(frame: u32, time: Option<Duration>) -> Self {
        let time = time.unwrap_or_default();
        Self {
            frame,
            sec: time.as_secs() as u32,
            usec: time.subsec_micros(),
        }
    }

    /// Unadjusted system time in microseconds.
    pub fn ust(&self) -> u64 {
        self.sec as u64 * 1_000_000 + self.usec as u64
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    /// Same frame, timing wiped.
    pub fn without_timing(frame: u32) -> Self {
        Self {
            frame,
            sec: 0,
            usec: 0,
        }
    }
}

/// Truncate a client supplied counter to the hardware width.
pub fn truncate(value: u64) -> u32 {
    value as u32
}

/// Smallest frame `f > current` with `f % divisor == remainder % divisor`.
///
/// `divisor` must not be zero.
pub fn next_matching_frame(current: u32, divisor: u32, remainder: u32) -> u32 {
    debug_assert!(divisor != 0);
    let remainder = remainder % divisor;
    let base = current - current % divisor;
    let candidate = base.wrapping_add(remainder);
    if candidate <= current {
        candidate.wrapping_add(divisor)
    } else {
        candidate
    }
}

/// Frame on which a swap or wait scheduled at `current` should land.
///
/// A target that is still ahead is used as is. A target that already
/// passed is replaced with the next frame satisfying the divisor and
/// remainder constraint.
pub fn swap_target(current: u32, target: u32, divisor: u32, remainder: u32) -> u32 {
    if current < target || divisor == 0 {
        target
    } else {
        next_matching_frame(current, divisor, remainder)
    }
}

/// Whether a completion reported at `reported` for a flip that was
/// requested to land on `target` is implausible.
///
/// Small negative distances cannot come from a wrapped counter and mean
/// the kernel reported stale timing.
pub fn is_impossible_completion(reported: u32, target: u32) -> bool {
    let behind = target.wrapping_sub(reported);
    behind > 0 && behind < IMPOSSIBLE_MSC_WINDOW
}
