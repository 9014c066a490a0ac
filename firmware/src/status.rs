#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Shared link status for the firmware target.
//!
//! The USB handler and the frame task only exchange these atomics; the agent
//! itself stays behind its own lock.

use portable_atomic::{AtomicBool, AtomicU32, Ordering};

/// Set while the host has the device configured; frames are only paced then.
static USB_CONFIGURED: AtomicBool = AtomicBool::new(false);
/// Vendor requests answered with a stall.
static CONTROL_STALLS: AtomicU32 = AtomicU32::new(0);
/// Frame ticks delivered to the agent.
static FRAMES_PACED: AtomicU32 = AtomicU32::new(0);

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct LinkStatus {
    pub configured: bool,
    pub stalls: u32,
    pub frames: u32,
}

pub fn set_usb_configured(configured: bool) {
    USB_CONFIGURED.store(configured, Ordering::Release);
}

pub fn usb_configured() -> bool {
    USB_CONFIGURED.load(Ordering::Acquire)
}

pub fn record_stall() {
    CONTROL_STALLS.fetch_add(1, Ordering::Relaxed);
}

pub fn record_frame() {
    FRAMES_PACED.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> LinkStatus {
    LinkStatus {
        configured: usb_configured(),
        stalls: CONTROL_STALLS.load(Ordering::Relaxed),
        frames: FRAMES_PACED.load(Ordering::Relaxed),
    }
}
