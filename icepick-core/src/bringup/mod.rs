//! Board bring-up diagnostics.
//!
//! Everything here busy-waits on the hardware and must never run from the
//! frame path. The agent hands out a [`BringUp`] handle only on request.

use core::fmt;

use crate::channels::{IO_SENSE_CHANNELS, SenseChannel};
use crate::math::{SenseCalibration, compensate_vsense, convert_sense};
use crate::protocol::ClockWindow;
use crate::regs::{ClockWords, IO_PIN_MASK, IcepickRegisters, RawSenseSample, RegisterBus};

/// Reads of the reserved sense register used to let pulls settle.
pub const PULL_SETTLE_READS: usize = 10;

/// Window armed by [`BringUp::clock_probe`]: ten million reference cycles.
pub const CLOCK_PROBE_WINDOW: ClockWindow = ClockWindow::split(10_000_000);

/// Number of generic I/O pins exercised by the self test.
pub const IO_PIN_COUNT: usize = IO_SENSE_CHANNELS.len();

/// One converted single-shot measurement.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SenseReading {
    pub channel: SenseChannel,
    pub sample: RawSenseSample,
    /// Converted reading in millivolts.
    pub value: i32,
}

impl fmt::Display for SenseReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} | {} {}",
            self.channel, self.value, self.sample.charge, self.sample.discharge
        )
    }
}

/// Conditions applied to A0 during the survey.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SurveyStep {
    Rail,
    Floating,
    PulledUp,
    PulledDown,
    Released,
}

impl fmt::Display for SurveyStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SurveyStep::Rail => "rail",
            SurveyStep::Floating => "floating",
            SurveyStep::PulledUp => "pull-up",
            SurveyStep::PulledDown => "pull-down",
            SurveyStep::Released => "released",
        };
        f.write_str(label)
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SurveyEntry {
    pub step: SurveyStep,
    pub reading: SenseReading,
}

/// Rails first, then A0 under each pull configuration.
pub const SURVEY_LEN: usize = 9;

pub type SurveyReport = [SurveyEntry; SURVEY_LEN];

/// Stage of the per-pin I/O self test.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum IoStage {
    Discharge,
    DriveHigh,
    DriveLow,
    PullHigh,
    PullLow,
}

impl fmt::Display for IoStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            IoStage::Discharge => "discharge",
            IoStage::DriveHigh => "drive high",
            IoStage::DriveLow => "drive low",
            IoStage::PullHigh => "pull high",
            IoStage::PullLow => "pull low",
        };
        f.write_str(label)
    }
}

/// First failed stage of one pin, with the whole bank as read back.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct IoFailure {
    pub stage: IoStage,
    pub expected: u32,
    pub observed: u32,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct PinCheck {
    pub pin: u8,
    pub channel: SenseChannel,
    pub failure: Option<IoFailure>,
}

impl PinCheck {
    #[must_use]
    pub const fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

impl fmt::Display for PinCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.failure {
            None => write!(f, "IO[{}] ({}) ok", self.pin, self.channel),
            Some(failure) => write!(
                f,
                "IO[{}] ({}) - {:03x} - err {}",
                self.pin, self.channel, failure.observed, failure.stage
            ),
        }
    }
}

/// Results of [`BringUp::io_self_test`], indexed by pin.
pub type IoReport = [PinCheck; IO_PIN_COUNT];

/// Blocking diagnostics over the register facade.
pub struct BringUp<'a, B> {
    regs: &'a mut IcepickRegisters<B>,
    calibration: SenseCalibration,
}

impl<'a, B> BringUp<'a, B>
where
    B: RegisterBus,
{
    pub fn new(regs: &'a mut IcepickRegisters<B>, calibration: SenseCalibration) -> Self {
        Self { regs, calibration }
    }

    /// Triggers one measurement and spins until it latches.
    pub fn sense_blocking(&mut self, channel: SenseChannel) -> SenseReading {
        self.regs.trigger_sense(channel);
        while !self.regs.sense_done() {
            core::hint::spin_loop();
        }

        let sample = self.regs.read_sense_sample();
        SenseReading {
            channel,
            sample,
            value: convert_sense(sample.charge, self.calibration),
        }
    }

    /// Reads the rails, then probes A0 floating, pulled up, pulled down and
    /// released. Pulls are left disabled afterwards.
    pub fn survey(&mut self) -> SurveyReport {
        let a0 = 1u32 << SenseChannel::A0.io_bit().unwrap_or(0);

        let gnd = self.sense_blocking(SenseChannel::Gnd);
        let v1v2 = self.sense_blocking(SenseChannel::V1v2);
        let v3v3 = self.sense_blocking(SenseChannel::V3v3);
        let vio = self.sense_blocking(SenseChannel::Vio);
        let mut vsense = self.sense_blocking(SenseChannel::Vsense);
        vsense.value = compensate_vsense(vsense.value);

        let floating = self.sense_blocking(SenseChannel::A0);

        self.regs.set_io_pull_dir(a0);
        self.regs.set_io_pull_ena(a0);
        let pulled_up = self.sense_blocking(SenseChannel::A0);

        self.regs.set_io_pull_dir(0);
        let pulled_down = self.sense_blocking(SenseChannel::A0);

        self.regs.set_io_pull_ena(0);
        let released = self.sense_blocking(SenseChannel::A0);

        let rail = |reading| SurveyEntry {
            step: SurveyStep::Rail,
            reading,
        };
        [
            rail(gnd),
            rail(v1v2),
            rail(v3v3),
            rail(vio),
            rail(vsense),
            SurveyEntry {
                step: SurveyStep::Floating,
                reading: floating,
            },
            SurveyEntry {
                step: SurveyStep::PulledUp,
                reading: pulled_up,
            },
            SurveyEntry {
                step: SurveyStep::PulledDown,
                reading: pulled_down,
            },
            SurveyEntry {
                step: SurveyStep::Released,
                reading: released,
            },
        ]
    }

    /// Walks every generic pin through discharge, drive and pull checks,
    /// stopping at the first stage that reads back wrong.
    #[allow(clippy::cast_possible_truncation)]
    pub fn io_self_test(&mut self) -> IoReport {
        let mut report = [PinCheck {
            pin: 0,
            channel: IO_SENSE_CHANNELS[0],
            failure: None,
        }; IO_PIN_COUNT];

        for (pin, check) in report.iter_mut().enumerate() {
            check.pin = pin as u8;
            check.channel = IO_SENSE_CHANNELS[pin];
            check.failure = self.check_pin(1 << pin).err();
        }
        report
    }

    fn check_pin(&mut self, bit: u32) -> Result<(), IoFailure> {
        self.regs.set_io_data(0);
        self.regs.set_io_oe(0);
        self.regs.set_io_pull_dir(0);
        self.regs.set_io_pull_ena(0);

        self.regs.set_io_data(0);
        self.regs.set_io_oe(IO_PIN_MASK);
        self.regs.set_io_oe(0);
        self.expect_bank(IoStage::Discharge, 0)?;

        self.regs.set_io_data(bit);
        self.regs.set_io_oe(bit);
        self.expect_bank(IoStage::DriveHigh, bit)?;

        self.regs.set_io_data(0);
        self.expect_bank(IoStage::DriveLow, 0)?;

        self.regs.set_io_oe(0);
        self.regs.set_io_pull_dir(bit);
        self.regs.set_io_pull_ena(bit);
        self.regs.settle(PULL_SETTLE_READS);
        self.expect_bank(IoStage::PullHigh, bit)?;

        self.regs.set_io_pull_dir(0);
        self.regs.settle(PULL_SETTLE_READS);
        self.expect_bank(IoStage::PullLow, 0)
    }

    fn expect_bank(&mut self, stage: IoStage, expected: u32) -> Result<(), IoFailure> {
        let observed = self.regs.io_data();
        if observed == expected {
            Ok(())
        } else {
            Err(IoFailure {
                stage,
                expected,
                observed,
            })
        }
    }

    /// Returns the counters left by the previous window, then arms a new one.
    pub fn clock_probe(&mut self) -> ClockWords {
        let previous = self.regs.clock_words();
        self.regs.arm_clocks(CLOCK_PROBE_WINDOW.arm_word());
        previous
    }
}
