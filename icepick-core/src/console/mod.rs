//! Bring-up console: parses operator lines and runs them against an [`Agent`].
//!
//! Register commands go through the same control-request path the host uses,
//! so a console session exercises the dispatcher exactly as USB traffic does.

pub mod grammar;

use core::fmt;

pub use grammar::{ConsoleCommand, DiagTarget, GpioRegister, ParseError, VioSetting, parse};

use crate::agent::{Agent, AgentStatus, VioScale};
use crate::bringup::{IoReport, SurveyReport};
use crate::calibration::{AgentLink, CalibrationError, CalibrationPlan, CalibrationPoint};
use crate::protocol::{ClockWindow, DispatchError, Response, VendorCommand};
use crate::regs::{ClockWords, RegisterBus};
use crate::sense::TickOutcome;

/// One line per command form.
pub const HELP_LINES: &[&str] = &[
    "vio <pdm> | vio <mv>mv",
    "hftrim <trim>",
    "sense start <chan[,chan..]|mask=N> [count=N]",
    "sense result",
    "clock start <cycles>",
    "clock result",
    "gpio in",
    "gpio <out|oe|pull-dir|pull-ena> <bits>",
    "tick [frames]",
    "diag <sense|io|clock>",
    "calib vio [<first>mv <last>mv]",
    "calib trim [<first> <last>]",
    "calib clock [runs]",
    "status",
    "help",
];

/// What a console command produced.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsoleOutcome {
    /// Control request applied; IN payloads are `len` bytes at the front of
    /// the response buffer.
    Request(Response),
    Ticked { frames: u32, captured: u32 },
    Survey(SurveyReport),
    IoTest(IoReport),
    ClockProbe(ClockWords),
    /// A calibration sweep finished with `points` measurements.
    Calibrated {
        plan: CalibrationPlan,
        points: u32,
        last: Option<CalibrationPoint>,
    },
    Status(AgentStatus),
    Help,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsoleError {
    Parse(ParseError),
    Dispatch(DispatchError),
    Calibration(CalibrationError<DispatchError>),
}

impl fmt::Display for ConsoleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsoleError::Parse(err) => err.fmt(f),
            ConsoleError::Dispatch(err) => err.fmt(f),
            ConsoleError::Calibration(err) => err.fmt(f),
        }
    }
}

impl From<ParseError> for ConsoleError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<DispatchError> for ConsoleError {
    fn from(error: DispatchError) -> Self {
        Self::Dispatch(error)
    }
}

impl From<CalibrationError<DispatchError>> for ConsoleError {
    fn from(error: CalibrationError<DispatchError>) -> Self {
        Self::Calibration(error)
    }
}

impl ConsoleCommand {
    /// The vendor command a host would send for this console command, if any.
    #[must_use]
    pub fn vendor_command(self, vio: VioScale) -> Option<VendorCommand> {
        let command = match self {
            ConsoleCommand::Vio(VioSetting::Pdm(pdm)) => VendorCommand::SetVio { pdm },
            ConsoleCommand::Vio(VioSetting::Millivolts(mv)) => VendorCommand::SetVio {
                pdm: vio.pdm_for_millivolts(mv),
            },
            ConsoleCommand::HfTrim(trim) => VendorCommand::SetHfTrim { trim },
            ConsoleCommand::SenseStart { mask, count } => VendorCommand::SenseStart {
                mask,
                repeat: count,
            },
            ConsoleCommand::SenseResult => VendorCommand::SenseResult,
            ConsoleCommand::ClockStart(duration) => {
                VendorCommand::ClockStart(ClockWindow::split(duration))
            }
            ConsoleCommand::ClockResult => VendorCommand::ClockResult,
            ConsoleCommand::GpioIn => VendorCommand::GpioDataIn,
            ConsoleCommand::GpioWrite(GpioRegister::Out, value) => {
                VendorCommand::GpioDataOut(value)
            }
            ConsoleCommand::GpioWrite(GpioRegister::OutputEnable, value) => {
                VendorCommand::GpioOutputEnable(value)
            }
            ConsoleCommand::GpioWrite(GpioRegister::PullDirection, value) => {
                VendorCommand::GpioPullDirection(value)
            }
            ConsoleCommand::GpioWrite(GpioRegister::PullEnable, value) => {
                VendorCommand::GpioPullEnable(value)
            }
            ConsoleCommand::Tick(_)
            | ConsoleCommand::Diag(_)
            | ConsoleCommand::Calib(_)
            | ConsoleCommand::Status
            | ConsoleCommand::Help => return None,
        };
        Some(command)
    }
}

/// Parses and runs one console line.
pub fn run_line<B>(
    agent: &mut Agent<B>,
    line: &str,
    response: &mut [u8],
) -> Result<ConsoleOutcome, ConsoleError>
where
    B: RegisterBus,
{
    let command = parse(line)?;
    execute(agent, command, response)
}

/// Runs a parsed console command.
pub fn execute<B>(
    agent: &mut Agent<B>,
    command: ConsoleCommand,
    response: &mut [u8],
) -> Result<ConsoleOutcome, ConsoleError>
where
    B: RegisterBus,
{
    if let Some(vendor) = command.vendor_command(agent.config().vio) {
        let outcome = agent.handle_control(&vendor.to_request(), response)?;
        return Ok(ConsoleOutcome::Request(outcome));
    }

    let outcome = match command {
        ConsoleCommand::Tick(frames) => {
            let mut captured = 0;
            for _ in 0..frames {
                if let TickOutcome::Captured(_) = agent.on_frame() {
                    captured += 1;
                }
            }
            ConsoleOutcome::Ticked { frames, captured }
        }
        ConsoleCommand::Diag(DiagTarget::Sense) => {
            ConsoleOutcome::Survey(agent.bring_up().survey())
        }
        ConsoleCommand::Diag(DiagTarget::Io) => {
            ConsoleOutcome::IoTest(agent.bring_up().io_self_test())
        }
        ConsoleCommand::Diag(DiagTarget::Clock) => {
            ConsoleOutcome::ClockProbe(agent.bring_up().clock_probe())
        }
        ConsoleCommand::Calib(plan) => {
            let mut last = None;
            let points = plan.run(&mut AgentLink::new(agent, || {}), |point| last = Some(point))?;
            ConsoleOutcome::Calibrated { plan, points, last }
        }
        ConsoleCommand::Status => ConsoleOutcome::Status(agent.status()),
        _ => ConsoleOutcome::Help,
    };
    Ok(outcome)
}
