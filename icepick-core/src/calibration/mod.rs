//! Host-side calibration sweeps.
//!
//! A sweep talks to the board only through vendor commands on a
//! [`ControlLink`] and waits for results by letting frames pass, exactly as
//! bench tooling drives a board over USB. Points are handed to a sink as they
//! are measured so nothing here needs to buffer a whole sweep.

use core::fmt;
use core::iter::StepBy;
use core::ops::RangeInclusive;

use crate::agent::Agent;
use crate::channels::{ChannelMask, SenseChannel};
use crate::protocol::{
    ClockReadback, ClockWindow, DispatchError, MAX_RESPONSE_LEN, Response, VendorCommand,
    vio_pdm_for_millivolts,
};
use crate::regs::{RawSenseSample, RegisterBus};

/// Transport carrying vendor commands to a board.
pub trait ControlLink {
    type Error;

    /// Issues one vendor command; IN payloads land at the front of `data` and
    /// the payload length is returned.
    fn control(&mut self, command: VendorCommand, data: &mut [u8]) -> Result<usize, Self::Error>;

    /// Lets one frame pass on the board.
    fn wait_frame(&mut self);
}

/// Drives an in-process [`Agent`] as if it sat at the far end of a USB link.
///
/// `elapse` runs before every frame notification so simulated hardware can
/// advance its own clock.
pub struct AgentLink<'a, B, F> {
    agent: &'a mut Agent<B>,
    elapse: F,
}

impl<'a, B, F> AgentLink<'a, B, F>
where
    B: RegisterBus,
    F: FnMut(),
{
    pub fn new(agent: &'a mut Agent<B>, elapse: F) -> Self {
        Self { agent, elapse }
    }
}

impl<B, F> ControlLink for AgentLink<'_, B, F>
where
    B: RegisterBus,
    F: FnMut(),
{
    type Error = DispatchError;

    fn control(&mut self, command: VendorCommand, data: &mut [u8]) -> Result<usize, Self::Error> {
        let request = command.to_request();
        match self.agent.handle_control(&request, data)? {
            Response::Data { len, .. } => Ok(len.min(usize::from(request.length))),
            Response::Accepted(_) | Response::Declined => Ok(0),
        }
    }

    fn wait_frame(&mut self) {
        (self.elapse)();
        self.agent.on_frame();
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationError<E> {
    Link(E),
    /// Step `step` produced no result within `frames` frames.
    Timeout { step: u32, frames: u32 },
}

impl<E> fmt::Display for CalibrationError<E>
where
    E: fmt::Display,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationError::Link(err) => err.fmt(f),
            CalibrationError::Timeout { step, frames } => {
                write!(f, "step {step} produced no result after {frames} frames")
            }
        }
    }
}

/// VIO rail sweep: sets each level, lets it settle, then averages a burst of
/// samples on the VIO sense channel.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VioSweep {
    pub first_mv: u32,
    pub last_mv: u32,
    pub step_mv: u32,
    /// Samples averaged per level.
    pub samples: u16,
    pub settle_frames: u32,
    /// Frames to wait for a burst before giving up.
    pub poll_limit: u32,
}

impl VioSweep {
    pub const REFERENCE: Self = Self {
        first_mv: 1_200,
        last_mv: 3_300,
        step_mv: 50,
        samples: 20,
        settle_frames: 100,
        poll_limit: 1_000,
    };

    #[must_use]
    pub const fn between(mut self, first_mv: u32, last_mv: u32) -> Self {
        self.first_mv = first_mv;
        self.last_mv = last_mv;
        self
    }

    /// Levels visited, in millivolts.
    #[must_use]
    pub fn levels(&self) -> StepBy<RangeInclusive<u32>> {
        let step = usize::try_from(self.step_mv.max(1)).unwrap_or(usize::MAX);
        (self.first_mv..=self.last_mv).step_by(step)
    }

    /// Runs the sweep, returning the number of levels measured.
    pub fn run<L>(
        &self,
        link: &mut L,
        mut sink: impl FnMut(VioPoint),
    ) -> Result<u32, CalibrationError<L::Error>>
    where
        L: ControlLink,
    {
        let mask = ChannelMask::EMPTY.with(SenseChannel::Vio);
        let needed = usize::from(self.samples) * RawSenseSample::ENCODED_LEN;
        let mut data = [0u8; MAX_RESPONSE_LEN];
        let mut step = 0;

        for millivolts in self.levels() {
            let pdm = vio_pdm_for_millivolts(millivolts);
            send(link, VendorCommand::SetVio { pdm }, &mut data)?;
            for _ in 0..self.settle_frames {
                link.wait_frame();
            }

            let start = VendorCommand::SenseStart {
                mask,
                repeat: self.samples,
            };
            send(link, start, &mut data)?;
            let len = poll(link, self.poll_limit, step, |link| {
                let len = link.control(VendorCommand::SenseResult, &mut data)?;
                Ok((len >= needed).then_some(len))
            })?;

            let (charge, discharge) = average(data.get(..len.min(needed)).unwrap_or_default());
            sink(VioPoint {
                millivolts,
                pdm,
                charge,
                discharge,
                samples: self.samples,
            });
            step += 1;
        }
        Ok(step)
    }
}

impl Default for VioSweep {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Averaged sense counts at one VIO level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct VioPoint {
    pub millivolts: u32,
    pub pdm: u16,
    pub charge: u32,
    pub discharge: u32,
    pub samples: u16,
}

impl VioPoint {
    #[must_use]
    pub fn as_sample(&self) -> RawSenseSample {
        RawSenseSample::from_words(self.charge, self.discharge)
    }
}

/// HF oscillator trim sweep: one fixed clock window per trim code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrimSweep {
    pub first: u16,
    pub last: u16,
    /// Window length in reference clock cycles.
    pub window: u32,
    /// Frequency of the clock the window is counted in.
    pub reference_hz: u32,
    pub poll_limit: u32,
}

impl TrimSweep {
    /// Full 10-bit trim range with 100 ms windows of a 10 MHz reference.
    pub const REFERENCE: Self = Self {
        first: 0,
        last: 1_023,
        window: 1_000_000,
        reference_hz: 10_000_000,
        poll_limit: 1_000,
    };

    #[must_use]
    pub const fn between(mut self, first: u16, last: u16) -> Self {
        self.first = first;
        self.last = last;
        self
    }

    #[must_use]
    pub const fn counted_at(mut self, reference_hz: u32) -> Self {
        self.reference_hz = reference_hz;
        self
    }

    #[must_use]
    pub fn codes(&self) -> RangeInclusive<u16> {
        self.first..=self.last
    }

    /// Runs the sweep, returning the number of trim codes measured.
    pub fn run<L>(
        &self,
        link: &mut L,
        mut sink: impl FnMut(TrimPoint),
    ) -> Result<u32, CalibrationError<L::Error>>
    where
        L: ControlLink,
    {
        let window = ClockWindow::split(self.window);
        let mut data = [0u8; ClockReadback::ENCODED_LEN];
        let mut step = 0;

        for trim in self.codes() {
            send(link, VendorCommand::SetHfTrim { trim }, &mut data)?;
            send(link, VendorCommand::ClockStart(window), &mut data)?;
            let readback = poll_clock(link, self.poll_limit, step, &mut data)?;

            sink(TrimPoint {
                trim,
                readback,
                hf_hz: scale_count(readback.hf, self.reference_hz, window.duration()),
            });
            step += 1;
        }
        Ok(step)
    }
}

impl Default for TrimSweep {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// HF frequency measured at one trim code.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TrimPoint {
    pub trim: u16,
    pub readback: ClockReadback,
    pub hf_hz: u32,
}

/// Repeated long clock windows at the current trim, for oscillator drift.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockRuns {
    pub runs: u16,
    pub window: u32,
    pub poll_limit: u32,
}

impl ClockRuns {
    /// Ten one-second windows of a 10 MHz reference.
    pub const REFERENCE: Self = Self {
        runs: 10,
        window: 10_000_000,
        poll_limit: 5_000,
    };

    #[must_use]
    pub const fn repeated(mut self, runs: u16) -> Self {
        self.runs = runs;
        self
    }

    /// Runs every window, returning how many completed.
    pub fn run<L>(
        &self,
        link: &mut L,
        mut sink: impl FnMut(ClockRun),
    ) -> Result<u32, CalibrationError<L::Error>>
    where
        L: ControlLink,
    {
        let window = ClockWindow::split(self.window);
        let mut data = [0u8; ClockReadback::ENCODED_LEN];

        for run in 0..self.runs {
            send(link, VendorCommand::ClockStart(window), &mut data)?;
            let readback = poll_clock(link, self.poll_limit, u32::from(run), &mut data)?;
            sink(ClockRun { run, readback });
        }
        Ok(u32::from(self.runs))
    }
}

impl Default for ClockRuns {
    fn default() -> Self {
        Self::REFERENCE
    }
}

/// Counter values from one completed window.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockRun {
    pub run: u16,
    pub readback: ClockReadback,
}

/// Any of the sweeps, as selected from the console.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationPlan {
    Vio(VioSweep),
    Trim(TrimSweep),
    Clock(ClockRuns),
}

impl CalibrationPlan {
    /// Runs the selected sweep, returning the number of points produced.
    pub fn run<L>(
        &self,
        link: &mut L,
        mut sink: impl FnMut(CalibrationPoint),
    ) -> Result<u32, CalibrationError<L::Error>>
    where
        L: ControlLink,
    {
        match self {
            CalibrationPlan::Vio(sweep) => {
                sweep.run(link, |point| sink(CalibrationPoint::Vio(point)))
            }
            CalibrationPlan::Trim(sweep) => {
                sweep.run(link, |point| sink(CalibrationPoint::Trim(point)))
            }
            CalibrationPlan::Clock(runs) => {
                runs.run(link, |run| sink(CalibrationPoint::Clock(run)))
            }
        }
    }
}

impl fmt::Display for CalibrationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationPlan::Vio(sweep) => write!(
                f,
                "vio sweep {}..={} mV step {} mV, {} samples",
                sweep.first_mv, sweep.last_mv, sweep.step_mv, sweep.samples
            ),
            CalibrationPlan::Trim(sweep) => write!(
                f,
                "hf trim sweep {}..={}, {} cycle windows",
                sweep.first, sweep.last, sweep.window
            ),
            CalibrationPlan::Clock(runs) => {
                write!(f, "clock runs x{}, {} cycle windows", runs.runs, runs.window)
            }
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CalibrationPoint {
    Vio(VioPoint),
    Trim(TrimPoint),
    Clock(ClockRun),
}

impl fmt::Display for CalibrationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationPoint::Vio(point) => write!(
                f,
                "vio {} mV pdm={:#05x} chg={} dis={} n={}",
                point.millivolts, point.pdm, point.charge, point.discharge, point.samples
            ),
            CalibrationPoint::Trim(point) => {
                write!(f, "trim {} hf={} Hz", point.trim, point.hf_hz)
            }
            CalibrationPoint::Clock(run) => write!(
                f,
                "run {} xo={} hf={} lf={}",
                run.run, run.readback.xo, run.readback.hf, run.readback.lf
            ),
        }
    }
}

fn send<L>(
    link: &mut L,
    command: VendorCommand,
    data: &mut [u8],
) -> Result<usize, CalibrationError<L::Error>>
where
    L: ControlLink,
{
    link.control(command, data).map_err(CalibrationError::Link)
}

/// Retries `attempt` once per frame until it yields a value or `limit` frames
/// have passed.
fn poll<L, T>(
    link: &mut L,
    limit: u32,
    step: u32,
    mut attempt: impl FnMut(&mut L) -> Result<Option<T>, L::Error>,
) -> Result<T, CalibrationError<L::Error>>
where
    L: ControlLink,
{
    let mut frames = 0;
    loop {
        if let Some(found) = attempt(&mut *link).map_err(CalibrationError::Link)? {
            return Ok(found);
        }
        if frames == limit {
            return Err(CalibrationError::Timeout { step, frames });
        }
        link.wait_frame();
        frames += 1;
    }
}

fn poll_clock<L>(
    link: &mut L,
    limit: u32,
    step: u32,
    data: &mut [u8; ClockReadback::ENCODED_LEN],
) -> Result<ClockReadback, CalibrationError<L::Error>>
where
    L: ControlLink,
{
    poll(link, limit, step, |link| {
        let len = link.control(VendorCommand::ClockResult, &mut data[..])?;
        Ok(data.get(..len).and_then(ClockReadback::from_bytes))
    })
}

/// Mean charge and discharge counts of a result payload.
#[allow(clippy::cast_possible_truncation)]
fn average(payload: &[u8]) -> (u32, u32) {
    let mut count = 0u64;
    let (mut charge, mut discharge) = (0u64, 0u64);
    for sample in payload
        .chunks_exact(RawSenseSample::ENCODED_LEN)
        .filter_map(|chunk| chunk.try_into().ok())
        .map(RawSenseSample::from_bytes)
    {
        count += 1;
        charge += u64::from(sample.charge);
        discharge += u64::from(sample.discharge);
    }
    let count = count.max(1);
    ((charge / count) as u32, (discharge / count) as u32)
}

/// Counts per window scaled to counts per second.
fn scale_count(count: u32, reference_hz: u32, window: u32) -> u32 {
    let hz = u64::from(count) * u64::from(reference_hz) / u64::from(window.max(1));
    u32::try_from(hz).unwrap_or(u32::MAX)
}
