#![no_std]

// Shared logic for the iCEpick calibration agent.
//
// Everything here runs on the MCU and on the host alike: hardware access goes
// through `regs::RegisterBus`, so the firmware plugs in MMIO and the emulator
// and tests plug in simulated or latch-only register windows.

pub mod agent;
pub mod bringup;
pub mod calibration;
pub mod channels;
pub mod console;
pub mod math;
pub mod protocol;
pub mod regs;
pub mod sense;
pub mod telemetry;
