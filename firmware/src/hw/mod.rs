#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Memory-mapped register access for the agent.

use icepick_core::regs::{IcepickRegisters, RegisterBus};

use crate::board;

/// One register window addressed with volatile word accesses.
pub struct MmioBus {
    base: usize,
}

impl MmioBus {
    /// # Safety
    ///
    /// `base` must be the start of a register window that is valid for
    /// volatile 32-bit accesses at every offset the agent uses, and nothing
    /// else may access that window while the bus exists.
    pub const unsafe fn new(base: usize) -> Self {
        Self { base }
    }

    fn word(&self, offset: u32) -> *mut u32 {
        (self.base + offset as usize) as *mut u32
    }
}

impl RegisterBus for MmioBus {
    fn read_u32(&mut self, offset: u32) -> u32 {
        // SAFETY: `new` guarantees the window is mapped and exclusively ours.
        unsafe { self.word(offset).read_volatile() }
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        // SAFETY: as for `read_u32`.
        unsafe { self.word(offset).write_volatile(value) }
    }
}

/// Binds the register facade to the board's misc and calibration windows.
///
/// # Safety
///
/// Must be called at most once; the returned facade owns both windows.
pub unsafe fn board_registers() -> IcepickRegisters<MmioBus> {
    // SAFETY: forwarded to the caller.
    unsafe {
        IcepickRegisters::new(
            MmioBus::new(board::MISC_BASE),
            MmioBus::new(board::CALIB_BASE),
        )
    }
}
