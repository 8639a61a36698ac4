// SPDX-License-Identifier: GPL-3.0-only

use tracing::{debug, warn};

pub const PAGEFLIP_ENV: &str = "VBLANK_SWAP_PAGEFLIP";
pub const THROTTLE_ENV: &str = "VBLANK_SWAP_THROTTLE";
pub const MSC_WARNINGS_ENV: &str = "VBLANK_SWAP_MSC_WARNINGS";

/// Knobs for the swap scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapConfig {
    /// Page flipping is allowed at all.
    pub page_flipping: bool,
    /// Immediate exchanges and blits hold the drawable until the next
    /// vblank so that later swaps queue up behind them.
    pub swap_throttle: bool,
    /// How many bogus flip timestamps or failed counter queries get
    /// reported at warning level.
    pub msc_warnings: u32,
}

impl Default for SwapConfig {
    fn default() -> Self {
        Self {
            page_flipping: true,
            swap_throttle: true,
            msc_warnings: 5,
        }
    }
}

impl SwapConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read the configuration through `lookup`, falling back to the
    /// defaults for missing or invalid values.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let config = Self {
            page_flipping: lookup(PAGEFLIP_ENV)
                .and_then(|value| parse_switch(PAGEFLIP_ENV, &value))
                .unwrap_or(defaults.page_flipping),
            swap_throttle: lookup(THROTTLE_ENV)
                .and_then(|value| parse_switch(THROTTLE_ENV, &value))
                .unwrap_or(defaults.swap_throttle),
            msc_warnings: lookup(MSC_WARNINGS_ENV)
                .and_then(|value| match value.trim().parse() {
                    Ok(count) => Some(count),
                    Err(_) => {
                        warn!("Invalid {} value: {}", MSC_WARNINGS_ENV, value);
                        None
                    }
                })
                .unwrap_or(defaults.msc_warnings),
        };
        debug!(?config, "Swap configuration");
        config
    }
}

fn parse_switch(key: &str, value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "on" | "On" | "ON" | "true" | "yes" => Some(true),
        "0" | "off" | "Off" | "OFF" | "false" | "no" => Some(false),
        _ => {
            warn!("Invalid {} value: {}", key, value);
            None
        }
    }
}
