//! Simulated iCEpick register windows.
//!
//! Both windows share one [`SimState`]; the calibration window models the RC
//! sense front-end, the I/O bank with its pulls, and the three clock counters.

use std::cell::RefCell;
use std::rc::Rc;

use icepick_core::agent::VioScale;
use icepick_core::channels::SenseChannel;
use icepick_core::math::SenseCalibration;
use icepick_core::regs::{
    CLK_ENABLE, COUNT_MASK, IO_PIN_MASK, IcepickRegisters, RegisterBus, SENSE_DONE, SENSE_START,
    STATUS_FLAG, VIO_ENABLE, calib, misc,
};

/// Reference crystal; clock windows are counted in its cycles.
pub const XO_HZ: u64 = 12_000_000;
/// HF oscillator frequency at the centre trim code.
pub const HF_NOMINAL_HZ: u64 = 48_000_000;
pub const HF_TRIM_CENTER: u32 = 512;
/// HF frequency change per trim code.
pub const HF_TRIM_STEP_HZ: i64 = 12_000;
pub const LF_HZ: u64 = 10_000;
/// Emulated time per frame.
pub const FRAME_US: u64 = 1_000;
/// `csr` polls between a sense trigger and its done bit.
pub const SENSE_LATENCY_POLLS: u32 = 2;
/// Rail level seen by a driven-high pin.
pub const IO_HIGH_MV: u32 = 3_300;
/// Value read back from `misc.boot`.
pub const BOOT_WORD: u32 = 0;
/// Default source voltage on the Vsense input.
pub const DEFAULT_VSENSE_MV: u32 = 2_500;
/// Fraction of the Vsense source that reaches the front-end through the
/// 1.5 kΩ series resistor.
const VSENSE_LOADING: f64 = 65_536.0 / 70_451.0;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Window {
    Misc,
    Calib,
}

#[derive(Default)]
struct IoBank {
    out: u32,
    oe: u32,
    pull_dir: u32,
    pull_ena: u32,
    level: u32,
}

impl IoBank {
    fn settle(&mut self) {
        let driven = self.out & self.oe;
        let pulled = self.pull_dir & self.pull_ena & !self.oe;
        let held = self.level & !self.oe & !self.pull_ena;
        self.level = (driven | pulled | held) & IO_PIN_MASK;
    }
}

#[derive(Default)]
struct SenseUnit {
    csr: u32,
    chg: u32,
    dis: u32,
    pending: Option<(SenseChannel, u32)>,
}

#[derive(Copy, Clone)]
struct ClockWindowState {
    duration: u32,
    elapsed_us: u64,
}

struct ClockUnit {
    trim: u32,
    window: Option<ClockWindowState>,
}

struct SimState {
    physics: SenseCalibration,
    vio: VioScale,
    vio_word: u32,
    vsense_mv: u32,
    io: IoBank,
    sense: SenseUnit,
    clocks: ClockUnit,
    frames: u64,
}

/// Handle to the simulated board. Clones share the same state.
#[derive(Clone)]
pub struct SimHardware {
    state: Rc<RefCell<SimState>>,
}

/// One register window of a [`SimHardware`].
pub struct SimWindow {
    window: Window,
    state: Rc<RefCell<SimState>>,
}

impl SimHardware {
    /// Board whose front-end behaves like `physics`.
    pub fn new(physics: SenseCalibration) -> Self {
        let state = SimState {
            physics,
            vio: VioScale::REFERENCE,
            vio_word: 0,
            vsense_mv: DEFAULT_VSENSE_MV,
            io: IoBank::default(),
            sense: SenseUnit::default(),
            clocks: ClockUnit {
                trim: HF_TRIM_CENTER,
                window: None,
            },
            frames: 0,
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn registers(&self) -> IcepickRegisters<SimWindow> {
        IcepickRegisters::new(self.window(Window::Misc), self.window(Window::Calib))
    }

    fn window(&self, window: Window) -> SimWindow {
        SimWindow {
            window,
            state: Rc::clone(&self.state),
        }
    }

    /// Lets emulated time pass; running clock windows count on.
    pub fn advance_frames(&self, frames: u32) {
        let mut state = self.state.borrow_mut();
        state.frames += u64::from(frames);
        if let Some(window) = state.clocks.window.as_mut() {
            window.elapsed_us += u64::from(frames) * FRAME_US;
        }
    }

    pub fn frames(&self) -> u64 {
        self.state.borrow().frames
    }

    pub fn set_vsense_mv(&self, millivolts: u32) {
        self.state.borrow_mut().vsense_mv = millivolts;
    }

    /// Voltage currently presented to the front-end on `channel`.
    pub fn channel_millivolts(&self, channel: SenseChannel) -> u32 {
        self.state.borrow().channel_millivolts(channel)
    }

    pub fn hf_hz(&self) -> u64 {
        self.state.borrow().hf_hz()
    }
}

impl SimState {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn channel_millivolts(&self, channel: SenseChannel) -> u32 {
        match channel {
            SenseChannel::Gnd => 0,
            SenseChannel::V1v2 => 1_200,
            SenseChannel::V3v3 => 3_300,
            SenseChannel::Vio => {
                if self.vio_word & VIO_ENABLE == 0 {
                    0
                } else {
                    let code = (self.vio_word & u32::from(self.vio.max_pdm())) as u16;
                    self.vio.millivolts_for_pdm(code)
                }
            }
            SenseChannel::Vsense => (f64::from(self.vsense_mv) * VSENSE_LOADING) as u32,
            SenseChannel::Open => u32::MAX,
            pin => match pin.io_bit() {
                Some(bit) if self.io.level & (1 << bit) != 0 => IO_HIGH_MV,
                _ => 0,
            },
        }
    }

    fn hf_hz(&self) -> u64 {
        let offset = (i64::from(self.clocks.trim) - i64::from(HF_TRIM_CENTER)) * HF_TRIM_STEP_HZ;
        HF_NOMINAL_HZ.saturating_add_signed(offset)
    }

    fn complete_sense(&mut self, channel: SenseChannel) {
        let millivolts = self.channel_millivolts(channel);
        self.sense.csr |= SENSE_DONE;
        self.sense.chg = STATUS_FLAG | charge_count(millivolts, self.physics);
        self.sense.dis = STATUS_FLAG | discharge_count(millivolts, self.physics);
    }

    fn read_sense_csr(&mut self) -> u32 {
        if let Some((channel, polls)) = self.sense.pending {
            if polls == 0 {
                self.sense.pending = None;
                self.complete_sense(channel);
            } else {
                self.sense.pending = Some((channel, polls - 1));
            }
        }
        self.sense.csr
    }

    fn write_sense_csr(&mut self, value: u32) {
        self.sense.csr = value & !SENSE_DONE;
        if value & SENSE_START == 0 {
            return;
        }
        #[allow(clippy::cast_possible_truncation)]
        let channel = SenseChannel::from_index((value & 0x0F) as u8);
        self.sense.pending = channel.map(|channel| (channel, SENSE_LATENCY_POLLS));
    }

    fn clock_counter(&self, hz: u64) -> u32 {
        let Some(window) = self.clocks.window else {
            return 0;
        };
        let duration = u64::from(window.duration);
        let xo_elapsed = (window.elapsed_us * XO_HZ / 1_000_000).min(duration);
        let count = u32::try_from(xo_elapsed * hz / XO_HZ).unwrap_or(COUNT_MASK) & COUNT_MASK;
        if xo_elapsed >= duration {
            STATUS_FLAG | count
        } else {
            count
        }
    }

    fn arm_clock(&mut self, word: u32) {
        self.clocks.window = (word & CLK_ENABLE != 0).then_some(ClockWindowState {
            duration: word & COUNT_MASK,
            elapsed_us: 0,
        });
    }

    fn read(&mut self, window: Window, offset: u32) -> u32 {
        match (window, offset) {
            (Window::Misc, misc::BOOT) => BOOT_WORD,
            (Window::Misc, misc::VIO_PDM) => self.vio_word,
            (Window::Calib, calib::IO_DATA) => self.io.level,
            (Window::Calib, calib::IO_OE) => self.io.oe,
            (Window::Calib, calib::IO_PULL_DIR) => self.io.pull_dir,
            (Window::Calib, calib::IO_PULL_ENA) => self.io.pull_ena,
            (Window::Calib, calib::SENSE_CSR) => self.read_sense_csr(),
            (Window::Calib, calib::SENSE_CHG) => self.sense.chg,
            (Window::Calib, calib::SENSE_DIS) => self.sense.dis,
            (Window::Calib, calib::CLK_XO) => self.clock_counter(XO_HZ),
            (Window::Calib, calib::CLK_HF) => self.clock_counter(self.hf_hz()),
            (Window::Calib, calib::CLK_LF) => self.clock_counter(LF_HZ),
            (Window::Calib, calib::CLK_HF_TRIM) => self.clocks.trim,
            _ => 0,
        }
    }

    fn write(&mut self, window: Window, offset: u32, value: u32) {
        match (window, offset) {
            (Window::Misc, misc::VIO_PDM) => self.vio_word = value,
            (Window::Calib, calib::IO_DATA) => self.io.out = value & IO_PIN_MASK,
            (Window::Calib, calib::IO_OE) => self.io.oe = value & IO_PIN_MASK,
            (Window::Calib, calib::IO_PULL_DIR) => self.io.pull_dir = value & IO_PIN_MASK,
            (Window::Calib, calib::IO_PULL_ENA) => self.io.pull_ena = value & IO_PIN_MASK,
            (Window::Calib, calib::SENSE_CSR) => self.write_sense_csr(value),
            (Window::Calib, calib::CLK_XO | calib::CLK_HF | calib::CLK_LF) => {
                self.arm_clock(value);
            }
            (Window::Calib, calib::CLK_HF_TRIM) => self.clocks.trim = value,
            _ => {}
        }
        self.io.settle();
    }
}

impl RegisterBus for SimWindow {
    fn read_u32(&mut self, offset: u32) -> u32 {
        self.state.borrow_mut().read(self.window, offset)
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        self.state.borrow_mut().write(self.window, offset, value);
    }
}

/// Charge count after which the front-end crosses `millivolts`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn charge_count(millivolts: u32, physics: SenseCalibration) -> u32 {
    let fraction = f64::from(millivolts) / f64::from(physics.k_scale);
    if fraction >= 1.0 {
        return COUNT_MASK;
    }
    let fixed = -(1.0 - fraction).log2() * f64::from(1u32 << 26);
    (fixed / f64::from(physics.k_time)).round().min(f64::from(COUNT_MASK)) as u32
}

/// Count taken to discharge from full scale down to `millivolts`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn discharge_count(millivolts: u32, physics: SenseCalibration) -> u32 {
    if millivolts == 0 {
        return COUNT_MASK;
    }
    let fraction = (f64::from(millivolts) / f64::from(physics.k_scale)).min(1.0);
    let fixed = -fraction.log2() * f64::from(1u32 << 26);
    (fixed / f64::from(physics.k_time)).round().min(f64::from(COUNT_MASK)) as u32
}
