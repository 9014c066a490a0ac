//! Frame-paced multi-channel sense acquisition.
//!
//! A run visits every selected channel in ascending ordinal order, wrapping,
//! until `repeat × channels` samples are stored. The scheduler never waits on
//! hardware: each [`SenseScheduler::on_frame_tick`] either observes the done
//! bit and stores one sample, or returns immediately.

use core::fmt;

use heapless::Vec;

use crate::channels::{ChannelMask, SenseChannel};
use crate::regs::{IcepickRegisters, RawSenseSample, RegisterBus};

mod layout;

pub use layout::{ChannelSamples, SenseLayout};

/// Samples retained per run.
pub const RESULT_CAPACITY: usize = 128;

/// Scheduler lifecycle. Completion is `completed == total`, reported as `Idle`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Reasons a run cannot start.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StartError {
    /// `repeat × channels` exceeds [`RESULT_CAPACITY`].
    CapacityExceeded { requested: u32, capacity: usize },
}

impl fmt::Display for StartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StartError::CapacityExceeded {
                requested,
                capacity,
            } => write!(f, "run needs {requested} samples, capacity is {capacity}"),
        }
    }
}

/// Accepted run parameters.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunPlan {
    pub mask: ChannelMask,
    pub repeat: u16,
    pub total: usize,
    /// First channel triggered, `None` for an empty run.
    pub first: Option<SenseChannel>,
}

/// What a single frame tick did.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TickOutcome {
    /// No run in progress.
    Idle,
    /// The in-flight measurement has not latched yet.
    Pending(SenseChannel),
    /// One sample was stored.
    Captured(CapturedSample),
}

/// A sample stored by a frame tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct CapturedSample {
    pub channel: SenseChannel,
    pub sample: RawSenseSample,
    /// Position of the sample in the result buffer.
    pub index: usize,
    /// Channel triggered next, `None` when the run just completed.
    pub next: Option<SenseChannel>,
}

impl CapturedSample {
    #[must_use]
    pub const fn finished_run(&self) -> bool {
        self.next.is_none()
    }
}

/// State of the current (or last) run.
#[derive(Clone, Debug, Default)]
struct SenseRun {
    mask: ChannelMask,
    repeat: u16,
    cursor: Option<SenseChannel>,
    total: usize,
    results: Vec<RawSenseSample, RESULT_CAPACITY>,
}

impl SenseRun {
    fn completed(&self) -> usize {
        self.results.len()
    }

    fn is_complete(&self) -> bool {
        self.completed() >= self.total
    }
}

/// Owns the sense run and advances it one sample per frame.
#[derive(Clone, Debug, Default)]
pub struct SenseScheduler {
    run: SenseRun,
}

impl SenseScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any run in progress and triggers the first measurement.
    ///
    /// An empty mask yields a run that is already complete; nothing is written
    /// to the hardware. A run larger than [`RESULT_CAPACITY`] is rejected and
    /// leaves the current run untouched.
    pub fn start<B>(
        &mut self,
        regs: &mut IcepickRegisters<B>,
        mask: ChannelMask,
        repeat: u16,
    ) -> Result<RunPlan, StartError>
    where
        B: RegisterBus,
    {
        let requested = u32::from(repeat) * mask.len();
        let total = usize::try_from(requested)
            .ok()
            .filter(|total| *total <= RESULT_CAPACITY)
            .ok_or(StartError::CapacityExceeded {
                requested,
                capacity: RESULT_CAPACITY,
            })?;

        self.run.mask = mask;
        self.run.repeat = repeat;
        self.run.total = total;
        self.run.results.clear();
        self.run.cursor = mask.first();

        let first = if total > 0 { self.run.cursor } else { None };
        if let Some(channel) = first {
            regs.trigger_sense(channel);
        }

        Ok(RunPlan {
            mask,
            repeat,
            total,
            first,
        })
    }

    /// Advances the run by at most one sample.
    pub fn on_frame_tick<B>(&mut self, regs: &mut IcepickRegisters<B>) -> TickOutcome
    where
        B: RegisterBus,
    {
        if self.run.is_complete() {
            return TickOutcome::Idle;
        }
        let Some(channel) = self.run.cursor else {
            return TickOutcome::Idle;
        };

        if !regs.sense_done() {
            return TickOutcome::Pending(channel);
        }

        let sample = regs.read_sense_sample();
        let index = self.run.completed();
        if self.run.results.push(sample).is_err() {
            // total never exceeds the buffer; treat a full buffer as finished.
            self.run.total = index;
            return TickOutcome::Idle;
        }

        let following = self.run.mask.next_after(channel);
        self.run.cursor = following;

        let next = if self.run.is_complete() {
            None
        } else {
            following
        };
        if let Some(next_channel) = next {
            regs.trigger_sense(next_channel);
        }

        TickOutcome::Captured(CapturedSample {
            channel,
            sample,
            index,
            next,
        })
    }

    /// Samples stored so far in the current run, in capture order.
    #[must_use]
    pub fn results(&self) -> &[RawSenseSample] {
        &self.run.results
    }

    #[must_use]
    pub fn state(&self) -> SchedulerState {
        if self.run.is_complete() {
            SchedulerState::Idle
        } else {
            SchedulerState::Running
        }
    }

    #[must_use]
    pub fn completed(&self) -> usize {
        self.run.completed()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.run.total
    }

    /// Channel currently being measured (or measured last).
    #[must_use]
    pub fn cursor(&self) -> Option<SenseChannel> {
        self.run.cursor
    }

    #[must_use]
    pub fn mask(&self) -> ChannelMask {
        self.run.mask
    }

    #[must_use]
    pub fn repeat(&self) -> u16 {
        self.run.repeat
    }

    /// Layout describing which channel produced each stored sample.
    #[must_use]
    pub fn layout(&self) -> SenseLayout {
        SenseLayout::new(self.run.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::regs::{MemoryBus, SENSE_DONE, SENSE_START, STATUS_FLAG, calib};

    fn registers() -> IcepickRegisters<MemoryBus> {
        IcepickRegisters::new(MemoryBus::new(), MemoryBus::new())
    }

    fn latch(regs: &mut IcepickRegisters<MemoryBus>, chg: u32, dis: u32) {
        let bus = regs.calib_bus();
        let csr = bus.peek(calib::SENSE_CSR);
        bus.poke(calib::SENSE_CSR, csr | SENSE_DONE);
        bus.poke(calib::SENSE_CHG, STATUS_FLAG | chg);
        bus.poke(calib::SENSE_DIS, STATUS_FLAG | dis);
    }

    #[test]
    fn fresh_scheduler_is_idle_and_empty() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert!(scheduler.results().is_empty());
        assert_eq!(scheduler.on_frame_tick(&mut regs), TickOutcome::Idle);
    }

    #[test]
    fn start_triggers_lowest_channel() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();

        let plan = scheduler
            .start(&mut regs, ChannelMask::from_bits(0b1_1000), 3)
            .expect("start");

        assert_eq!(plan.total, 6);
        assert_eq!(plan.first, Some(SenseChannel::Vsense));
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert_eq!(
            regs.calib_bus().writes_to(calib::SENSE_CSR).last(),
            Some(SENSE_START | 3)
        );
    }

    #[test]
    fn tick_waits_for_done_bit() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        scheduler
            .start(&mut regs, ChannelMask::from_bits(1), 1)
            .expect("start");

        assert_eq!(
            scheduler.on_frame_tick(&mut regs),
            TickOutcome::Pending(SenseChannel::Gnd)
        );
        assert_eq!(scheduler.completed(), 0);
    }

    #[test]
    fn completed_run_stops_triggering() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        scheduler
            .start(&mut regs, ChannelMask::from_bits(1 << 2), 1)
            .expect("start");
        regs.calib_bus().clear_journal();

        latch(&mut regs, 11, 22);
        let TickOutcome::Captured(captured) = scheduler.on_frame_tick(&mut regs) else {
            panic!("expected a capture");
        };
        assert!(captured.finished_run());
        assert_eq!(captured.channel, SenseChannel::Vio);
        assert_eq!(regs.calib_bus().journal_len(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
        assert_eq!(scheduler.on_frame_tick(&mut regs), TickOutcome::Idle);
    }

    #[test]
    fn oversized_run_is_rejected_without_side_effects() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        scheduler
            .start(&mut regs, ChannelMask::from_bits(1), 2)
            .expect("start");
        latch(&mut regs, 5, 6);
        let _ = scheduler.on_frame_tick(&mut regs);
        regs.calib_bus().clear_journal();

        let err = scheduler
            .start(&mut regs, ChannelMask::from_bits(0xFFFF), 9)
            .expect_err("should not fit");
        assert_eq!(
            err,
            StartError::CapacityExceeded {
                requested: 144,
                capacity: RESULT_CAPACITY
            }
        );
        assert_eq!(regs.calib_bus().journal_len(), 0);
        assert_eq!(scheduler.total(), 2);
        assert_eq!(scheduler.completed(), 1);
        assert_eq!(scheduler.mask(), ChannelMask::from_bits(1));
    }

    #[test]
    fn exactly_full_run_is_accepted() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        let plan = scheduler
            .start(&mut regs, ChannelMask::from_bits(0xFFFF), 8)
            .expect("128 samples fit");
        assert_eq!(plan.total, RESULT_CAPACITY);
    }

    #[test]
    fn zero_repeat_is_immediately_complete() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        let plan = scheduler
            .start(&mut regs, ChannelMask::from_bits(0b11), 0)
            .expect("start");
        assert_eq!(plan.total, 0);
        assert_eq!(plan.first, None);
        assert_eq!(regs.calib_bus().journal_len(), 0);
        assert_eq!(scheduler.state(), SchedulerState::Idle);
    }

    #[test]
    fn restart_discards_previous_results() {
        let mut regs = registers();
        let mut scheduler = SenseScheduler::new();
        scheduler
            .start(&mut regs, ChannelMask::from_bits(1), 2)
            .expect("start");
        latch(&mut regs, 1, 2);
        let _ = scheduler.on_frame_tick(&mut regs);
        assert_eq!(scheduler.results().len(), 1);

        scheduler
            .start(&mut regs, ChannelMask::from_bits(1 << 8), 1)
            .expect("restart");
        assert!(scheduler.results().is_empty());
        assert_eq!(scheduler.cursor(), Some(SenseChannel::V3v3));
        assert_eq!(scheduler.total(), 1);
    }
}
