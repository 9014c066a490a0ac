#![allow(dead_code)]

use icepick_core::channels::SenseChannel;
use icepick_core::regs::{
    CLK_ENABLE, COUNT_MASK, IO_PIN_MASK, IcepickRegisters, MemoryBus, RegisterBus, SENSE_DONE,
    SENSE_START, STATUS_FLAG, calib,
};

/// Register window that behaves like a board: sense measurements latch as
/// soon as they are triggered, the I/O bank follows drive and pull state and
/// clock windows complete the moment they are armed.
pub struct BenchBus {
    latch: MemoryBus,
    kind: Window,
    charge: [u32; 16],
    pub triggered: Vec<SenseChannel>,
    out: u32,
    oe: u32,
    pull_dir: u32,
    pull_ena: u32,
    level: u32,
    pub stuck_low: u32,
    /// Sense cycles that finish only after this many extra `csr` polls.
    pub latency: u32,
    pending: Option<(SenseChannel, u32)>,
}

#[derive(Copy, Clone, Eq, PartialEq)]
enum Window {
    Misc,
    Calib,
}

impl BenchBus {
    pub fn misc() -> Self {
        Self::new(Window::Misc, [0; 16])
    }

    /// Calibration window where channel `n` reports a charge count of `charge[n]`.
    pub fn calib(charge: [u32; 16]) -> Self {
        Self::new(Window::Calib, charge)
    }

    fn new(kind: Window, charge: [u32; 16]) -> Self {
        Self {
            latch: MemoryBus::new(),
            kind,
            charge,
            triggered: Vec::new(),
            out: 0,
            oe: 0,
            pull_dir: 0,
            pull_ena: 0,
            level: 0,
            stuck_low: 0,
            latency: 0,
            pending: None,
        }
    }

    pub fn latch(&mut self) -> &mut MemoryBus {
        &mut self.latch
    }

    /// Discharge count reported for a channel.
    pub fn discharge_for(charge: u32) -> u32 {
        charge / 2 + 100_000
    }

    fn complete(&mut self, channel: SenseChannel) {
        let charge = self.charge[usize::from(channel.as_index())];
        let csr = self.latch.peek(calib::SENSE_CSR);
        self.latch.poke(calib::SENSE_CSR, csr | SENSE_DONE);
        self.latch.poke(calib::SENSE_CHG, STATUS_FLAG | charge);
        self.latch
            .poke(calib::SENSE_DIS, STATUS_FLAG | Self::discharge_for(charge));
    }

    /// HF counts over a window of `duration` reference cycles at `trim`:
    /// 48 MHz at trim 512 against a 10 MHz reference, 10 kHz per code.
    pub fn hf_count(duration: u32, trim: u32) -> u32 {
        duration / 1_000 * (4_288 + trim)
    }

    fn latch_clock(&mut self, offset: u32, word: u32) {
        if word & CLK_ENABLE == 0 {
            return;
        }
        let duration = word & COUNT_MASK;
        let count = match offset {
            calib::CLK_XO => duration,
            calib::CLK_HF => Self::hf_count(duration, self.latch.peek(calib::CLK_HF_TRIM)),
            _ => duration / 1_000,
        };
        self.latch.poke(offset, STATUS_FLAG | count);
    }

    fn settle_pins(&mut self) {
        let driven = self.out & self.oe;
        let pulled = self.pull_dir & self.pull_ena & !self.oe;
        let floating = self.level & !self.oe & !self.pull_ena;
        self.level = (driven | pulled | floating) & !self.stuck_low & IO_PIN_MASK;
    }
}

pub fn bench(charge: [u32; 16]) -> IcepickRegisters<BenchBus> {
    IcepickRegisters::new(BenchBus::misc(), BenchBus::calib(charge))
}

/// Charge counts that differ per channel so samples can be attributed.
pub fn distinct_charges() -> [u32; 16] {
    let mut charge = [0; 16];
    for (index, value) in charge.iter_mut().enumerate() {
        *value = 1_000 * (index as u32 + 1);
    }
    charge
}

impl RegisterBus for BenchBus {
    fn read_u32(&mut self, offset: u32) -> u32 {
        if self.kind == Window::Calib {
            match offset {
                calib::IO_DATA => return self.level,
                calib::SENSE_CSR => {
                    if let Some((channel, remaining)) = self.pending {
                        if remaining == 0 {
                            self.pending = None;
                            self.complete(channel);
                        } else {
                            self.pending = Some((channel, remaining - 1));
                        }
                    }
                }
                _ => {}
            }
        }
        self.latch.read_u32(offset)
    }

    fn write_u32(&mut self, offset: u32, value: u32) {
        self.latch.write_u32(offset, value);
        if self.kind != Window::Calib {
            return;
        }

        match offset {
            calib::SENSE_CSR if value & SENSE_START != 0 => {
                let channel = SenseChannel::from_index((value & 0x0F) as u8)
                    .expect("four-bit channel");
                self.triggered.push(channel);
                if self.latency == 0 {
                    self.complete(channel);
                } else {
                    self.pending = Some((channel, self.latency));
                }
            }
            calib::CLK_XO | calib::CLK_HF | calib::CLK_LF => self.latch_clock(offset, value),
            calib::IO_DATA => {
                self.out = value;
                self.settle_pins();
            }
            calib::IO_OE => {
                self.oe = value;
                self.settle_pins();
            }
            calib::IO_PULL_DIR => {
                self.pull_dir = value;
                self.settle_pins();
            }
            calib::IO_PULL_ENA => {
                self.pull_ena = value;
                self.settle_pins();
            }
            _ => {}
        }
    }
}
