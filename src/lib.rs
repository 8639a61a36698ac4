// SPDX-License-Identifier: GPL-3.0-only

//! Vblank synchronized buffer swaps.
//!
//! Clients ask for their back buffer to be shown on a given frame. The
//! [`SwapScheduler`](swap::SwapScheduler) picks a page flip, an exchange
//! of buffer objects or a copy, asks the kernel to wake it on the right
//! vblank and tells the client once the swap is done.

pub mod buffer;
pub mod config;
pub mod drawable;
pub mod error;
pub mod host;
pub mod msc;
pub mod swap;
pub mod transport;

pub use error::{SwapError, TransportError};
pub use swap::{SwapRequest, SwapScheduler, WaitMscRequest};
