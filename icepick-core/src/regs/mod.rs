//! Register facade over the misc and calibration blocks.
//!
//! The layout itself is a hardware contract; this module only names the
//! offsets and bit fields and funnels every access through [`RegisterBus`] so
//! the scheduler and dispatcher can be exercised against [`MemoryBus`] on the
//! host.

use crate::channels::SenseChannel;

mod memory;

pub use memory::{BusWrite, MemoryBus};

/// Word-addressed access to one memory-mapped register window.
pub trait RegisterBus {
    /// Returns the instantaneous value of the register at `offset` (bytes).
    fn read_u32(&mut self, offset: u32) -> u32;

    /// Performs a single store to the register at `offset` (bytes).
    fn write_u32(&mut self, offset: u32, value: u32);
}

/// Byte offsets inside the misc window.
pub mod misc {
    pub const BOOT: u32 = 0x00;
    pub const VIO_PDM: u32 = 0x04;
}

/// Byte offsets inside the calibration window.
pub mod calib {
    pub const IO_DATA: u32 = 0x00;
    pub const IO_OE: u32 = 0x04;
    pub const IO_PULL_DIR: u32 = 0x08;
    pub const IO_PULL_ENA: u32 = 0x0C;
    pub const SENSE_CSR: u32 = 0x10;
    pub const SENSE_RSVD: u32 = 0x14;
    pub const SENSE_CHG: u32 = 0x18;
    pub const SENSE_DIS: u32 = 0x1C;
    pub const CLK_XO: u32 = 0x20;
    pub const CLK_HF: u32 = 0x24;
    pub const CLK_LF: u32 = 0x28;
    pub const CLK_HF_TRIM: u32 = 0x2C;
}

/// Writing this bit to `sense.csr` launches a measurement.
pub const SENSE_START: u32 = 1 << 31;
/// Set in `sense.csr` once the launched measurement has latched.
pub const SENSE_DONE: u32 = 1 << 30;
/// Status flag carried in the top bit of `chg`, `dis` and the clock counters.
pub const STATUS_FLAG: u32 = 1 << 31;
/// Payload bits of a status-flagged counter.
pub const COUNT_MASK: u32 = !STATUS_FLAG;
/// Enables the VIO PDM generator.
pub const VIO_ENABLE: u32 = 1 << 31;
/// Enables a clock measurement window.
pub const CLK_ENABLE: u32 = 1 << 31;
/// Valid bits of the I/O bank registers.
pub const IO_PIN_MASK: u32 = 0x3FF;

/// Charge and discharge counts latched at the end of one sense cycle.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RawSenseSample {
    pub charge: u32,
    pub discharge: u32,
}

impl RawSenseSample {
    /// Wire size of one sample.
    pub const ENCODED_LEN: usize = 8;

    /// Builds a sample from raw hardware words, dropping their status bits.
    #[must_use]
    pub const fn from_words(chg: u32, dis: u32) -> Self {
        Self {
            charge: chg & COUNT_MASK,
            discharge: dis & COUNT_MASK,
        }
    }

    /// Little-endian `(charge, discharge)` encoding used by the result request.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..4].copy_from_slice(&self.charge.to_le_bytes());
        out[4..].copy_from_slice(&self.discharge.to_le_bytes());
        out
    }

    /// Decodes one wire sample.
    #[must_use]
    pub fn from_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        let [c0, c1, c2, c3, d0, d1, d2, d3] = bytes;
        Self::from_words(
            u32::from_le_bytes([c0, c1, c2, c3]),
            u32::from_le_bytes([d0, d1, d2, d3]),
        )
    }
}

/// Raw clock counter words as read back from `clk.{xo,hf,lf}`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ClockWords {
    pub xo: u32,
    pub hf: u32,
    pub lf: u32,
}

/// The misc window plus the calibration window of one board.
pub struct IcepickRegisters<B> {
    misc: B,
    calib: B,
}

impl<B> IcepickRegisters<B>
where
    B: RegisterBus,
{
    /// Binds the facade to its two register windows.
    pub const fn new(misc: B, calib: B) -> Self {
        Self { misc, calib }
    }

    /// Direct access to the misc window.
    pub fn misc_bus(&mut self) -> &mut B {
        &mut self.misc
    }

    /// Direct access to the calibration window.
    pub fn calib_bus(&mut self) -> &mut B {
        &mut self.calib
    }

    /// Splits the facade back into its windows.
    pub fn into_buses(self) -> (B, B) {
        (self.misc, self.calib)
    }

    pub fn boot_word(&mut self) -> u32 {
        self.misc.read_u32(misc::BOOT)
    }

    /// Programs the VIO PDM generator; the enable bit is always forced on.
    pub fn set_vio(&mut self, pdm: u16) {
        self.misc.write_u32(misc::VIO_PDM, VIO_ENABLE | u32::from(pdm));
    }

    pub fn vio_pdm(&mut self) -> u32 {
        self.misc.read_u32(misc::VIO_PDM)
    }

    pub fn read_sense_csr(&mut self) -> u32 {
        self.calib.read_u32(calib::SENSE_CSR)
    }

    /// Raw charge word, status bit included.
    pub fn read_sense_chg(&mut self) -> u32 {
        self.calib.read_u32(calib::SENSE_CHG)
    }

    /// Raw discharge word, status bit included.
    pub fn read_sense_dis(&mut self) -> u32 {
        self.calib.read_u32(calib::SENSE_DIS)
    }

    /// Writes `sense.csr`; with `start` set this launches a measurement.
    pub fn write_sense_csr(&mut self, start: bool, channel: SenseChannel) {
        let start_bit = if start { SENSE_START } else { 0 };
        self.calib
            .write_u32(calib::SENSE_CSR, start_bit | u32::from(channel.as_index()));
    }

    /// Launches a measurement on `channel`.
    pub fn trigger_sense(&mut self, channel: SenseChannel) {
        self.write_sense_csr(true, channel);
    }

    /// Returns `true` once the in-flight measurement has latched.
    pub fn sense_done(&mut self) -> bool {
        self.read_sense_csr() & SENSE_DONE != 0
    }

    /// Latched sample with the status bits masked off.
    pub fn read_sense_sample(&mut self) -> RawSenseSample {
        let chg = self.read_sense_chg();
        let dis = self.read_sense_dis();
        RawSenseSample::from_words(chg, dis)
    }

    /// Burns `reads` bus cycles on the reserved sense register.
    pub fn settle(&mut self, reads: usize) {
        for _ in 0..reads {
            let _ = self.calib.read_u32(calib::SENSE_RSVD);
        }
    }

    pub fn io_data(&mut self) -> u32 {
        self.calib.read_u32(calib::IO_DATA)
    }

    pub fn set_io_data(&mut self, value: u32) {
        self.calib.write_u32(calib::IO_DATA, value);
    }

    pub fn io_oe(&mut self) -> u32 {
        self.calib.read_u32(calib::IO_OE)
    }

    pub fn set_io_oe(&mut self, value: u32) {
        self.calib.write_u32(calib::IO_OE, value);
    }

    pub fn io_pull_dir(&mut self) -> u32 {
        self.calib.read_u32(calib::IO_PULL_DIR)
    }

    pub fn set_io_pull_dir(&mut self, value: u32) {
        self.calib.write_u32(calib::IO_PULL_DIR, value);
    }

    pub fn io_pull_ena(&mut self) -> u32 {
        self.calib.read_u32(calib::IO_PULL_ENA)
    }

    pub fn set_io_pull_ena(&mut self, value: u32) {
        self.calib.write_u32(calib::IO_PULL_ENA, value);
    }

    pub fn clk_xo(&mut self) -> u32 {
        self.calib.read_u32(calib::CLK_XO)
    }

    pub fn set_clk_xo(&mut self, value: u32) {
        self.calib.write_u32(calib::CLK_XO, value);
    }

    pub fn clk_hf(&mut self) -> u32 {
        self.calib.read_u32(calib::CLK_HF)
    }

    pub fn set_clk_hf(&mut self, value: u32) {
        self.calib.write_u32(calib::CLK_HF, value);
    }

    pub fn clk_lf(&mut self) -> u32 {
        self.calib.read_u32(calib::CLK_LF)
    }

    pub fn set_clk_lf(&mut self, value: u32) {
        self.calib.write_u32(calib::CLK_LF, value);
    }

    pub fn clk_hf_trim(&mut self) -> u32 {
        self.calib.read_u32(calib::CLK_HF_TRIM)
    }

    pub fn set_clk_hf_trim(&mut self, value: u32) {
        self.calib.write_u32(calib::CLK_HF_TRIM, value);
    }

    /// Reads the three clock counters in `xo`, `hf`, `lf` order.
    pub fn clock_words(&mut self) -> ClockWords {
        ClockWords {
            xo: self.clk_xo(),
            hf: self.clk_hf(),
            lf: self.clk_lf(),
        }
    }

    /// Arms all three clock counters with the same window word.
    pub fn arm_clocks(&mut self, word: u32) {
        self.set_clk_xo(word);
        self.set_clk_hf(word);
        self.set_clk_lf(word);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registers() -> IcepickRegisters<MemoryBus> {
        IcepickRegisters::new(MemoryBus::new(), MemoryBus::new())
    }

    #[test]
    fn set_vio_forces_enable_bit() {
        let mut regs = registers();
        regs.set_vio(0x1234);
        assert_eq!(regs.vio_pdm(), 0x8000_1234);
    }

    #[test]
    fn trigger_writes_start_bit_and_channel() {
        let mut regs = registers();
        regs.trigger_sense(SenseChannel::V3v3);
        assert_eq!(regs.read_sense_csr(), SENSE_START | 8);

        regs.write_sense_csr(false, SenseChannel::B3);
        assert_eq!(regs.read_sense_csr(), 1);
    }

    #[test]
    fn sample_masks_status_bits() {
        let mut regs = registers();
        regs.calib_bus().poke(calib::SENSE_CHG, STATUS_FLAG | 32_173);
        regs.calib_bus().poke(calib::SENSE_DIS, STATUS_FLAG | 229_942);

        let sample = regs.read_sense_sample();
        assert_eq!(
            sample,
            RawSenseSample {
                charge: 32_173,
                discharge: 229_942
            }
        );
    }

    #[test]
    fn done_bit_tracks_csr() {
        let mut regs = registers();
        regs.trigger_sense(SenseChannel::Gnd);
        assert!(!regs.sense_done());

        regs.calib_bus().poke(calib::SENSE_CSR, SENSE_DONE);
        assert!(regs.sense_done());
    }

    #[test]
    fn sample_wire_encoding_is_little_endian() {
        let sample = RawSenseSample {
            charge: 0x0102_0304,
            discharge: 0x0A0B_0C0D,
        };
        assert_eq!(
            sample.to_bytes(),
            [0x04, 0x03, 0x02, 0x01, 0x0D, 0x0C, 0x0B, 0x0A]
        );
        assert_eq!(RawSenseSample::from_bytes(sample.to_bytes()), sample);
    }

    #[test]
    fn settle_only_reads_reserved_register() {
        let mut regs = registers();
        regs.settle(10);
        assert_eq!(regs.calib_bus().read_count(calib::SENSE_RSVD), 10);
        assert_eq!(regs.calib_bus().journal_len(), 0);
    }

    #[test]
    fn arm_clocks_writes_all_three_counters() {
        let mut regs = registers();
        regs.arm_clocks(0x8098_9680);
        assert_eq!(
            regs.clock_words(),
            ClockWords {
                xo: 0x8098_9680,
                hf: 0x8098_9680,
                lf: 0x8098_9680
            }
        );
    }
}
