//! Line grammar for the bring-up console.
//!
//! Parsed directly from `&str` with `winnow`; keywords are case-insensitive
//! and numbers accept decimal or `0x`-prefixed hex.

use core::fmt;

use winnow::ascii::{Caseless, dec_uint, hex_uint, space0, space1};
use winnow::combinator::{alt, eof, opt, preceded, terminated};
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::token::take_while;

use crate::calibration::{CalibrationPlan, ClockRuns, TrimSweep, VioSweep};
use crate::channels::{ChannelMask, SenseChannel};

/// Commands understood by the console.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ConsoleCommand {
    Vio(VioSetting),
    HfTrim(u16),
    SenseStart { mask: ChannelMask, count: u16 },
    SenseResult,
    ClockStart(u32),
    ClockResult,
    GpioIn,
    GpioWrite(GpioRegister, u16),
    Tick(u32),
    Diag(DiagTarget),
    Calib(CalibrationPlan),
    Status,
    Help,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VioSetting {
    Pdm(u16),
    Millivolts(u32),
}

/// Writable I/O bank registers.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum GpioRegister {
    Out,
    OutputEnable,
    PullDirection,
    PullEnable,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DiagTarget {
    Sense,
    Io,
    Clock,
}

/// Position of the first byte the grammar could not accept.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ParseError {
    pub offset: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at column {}", self.offset + 1)
    }
}

/// Parses one console line; surrounding whitespace is ignored.
pub fn parse(line: &str) -> Result<ConsoleCommand, ParseError> {
    let trimmed = line.trim_end_matches(['\r', '\n']);
    preceded(space0, terminated(command, (space0, eof)))
        .parse(trimmed)
        .map_err(|err| ParseError {
            offset: err.offset(),
        })
}

fn command(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        preceded((Caseless("vio"), space1), vio_setting).map(ConsoleCommand::Vio),
        preceded((Caseless("hftrim"), space1), number16).map(ConsoleCommand::HfTrim),
        preceded((Caseless("sense"), space1), sense),
        preceded((Caseless("clock"), space1), clock),
        preceded((Caseless("gpio"), space1), gpio),
        preceded(Caseless("tick"), opt(preceded(space1, number)))
            .map(|frames| ConsoleCommand::Tick(frames.unwrap_or(1))),
        preceded((Caseless("diag"), space1), diag_target).map(ConsoleCommand::Diag),
        preceded((Caseless("calib"), space1), calibration_plan).map(ConsoleCommand::Calib),
        Caseless("status").value(ConsoleCommand::Status),
        Caseless("help").value(ConsoleCommand::Help),
    ))
    .parse_next(input)
}

fn vio_setting(input: &mut &str) -> ModalResult<VioSetting> {
    let value = number.parse_next(input)?;
    if opt(Caseless("mv")).parse_next(input)?.is_some() {
        return Ok(VioSetting::Millivolts(value));
    }
    u16::try_from(value)
        .map(VioSetting::Pdm)
        .map_err(|_| ErrMode::from_input(input))
}

fn sense(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        Caseless("result").value(ConsoleCommand::SenseResult),
        preceded(
            (Caseless("start"), space1),
            (
                channel_selection,
                opt(preceded((space1, Caseless("count=")), number16)),
            ),
        )
        .map(|(mask, count)| ConsoleCommand::SenseStart {
            mask,
            count: count.unwrap_or(1),
        }),
    ))
    .parse_next(input)
}

fn channel_selection(input: &mut &str) -> ModalResult<ChannelMask> {
    alt((
        preceded(Caseless("mask="), number16).map(ChannelMask::from_bits),
        channel_list,
    ))
    .parse_next(input)
}

fn channel_list(input: &mut &str) -> ModalResult<ChannelMask> {
    let mut mask = ChannelMask::EMPTY.with(channel.parse_next(input)?);
    while opt(',').parse_next(input)?.is_some() {
        mask = mask.with(channel.parse_next(input)?);
    }
    Ok(mask)
}

fn channel(input: &mut &str) -> ModalResult<SenseChannel> {
    take_while(1.., |c: char| c.is_ascii_alphanumeric())
        .verify_map(SenseChannel::from_label)
        .parse_next(input)
}

fn clock(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        Caseless("result").value(ConsoleCommand::ClockResult),
        preceded((Caseless("start"), space1), number).map(ConsoleCommand::ClockStart),
    ))
    .parse_next(input)
}

fn gpio(input: &mut &str) -> ModalResult<ConsoleCommand> {
    alt((
        Caseless("in").value(ConsoleCommand::GpioIn),
        (
            terminated(gpio_register, space1),
            number16,
        )
            .map(|(register, value)| ConsoleCommand::GpioWrite(register, value)),
    ))
    .parse_next(input)
}

fn gpio_register(input: &mut &str) -> ModalResult<GpioRegister> {
    alt((
        Caseless("out").value(GpioRegister::Out),
        Caseless("oe").value(GpioRegister::OutputEnable),
        Caseless("pull-dir").value(GpioRegister::PullDirection),
        Caseless("pull-ena").value(GpioRegister::PullEnable),
    ))
    .parse_next(input)
}

fn diag_target(input: &mut &str) -> ModalResult<DiagTarget> {
    alt((
        Caseless("sense").value(DiagTarget::Sense),
        Caseless("io").value(DiagTarget::Io),
        Caseless("clock").value(DiagTarget::Clock),
    ))
    .parse_next(input)
}

fn calibration_plan(input: &mut &str) -> ModalResult<CalibrationPlan> {
    alt((
        preceded(Caseless("vio"), opt(preceded(space1, millivolt_range))).map(|range| {
            let sweep = VioSweep::REFERENCE;
            CalibrationPlan::Vio(range.map_or(sweep, |(first, last)| sweep.between(first, last)))
        }),
        preceded(Caseless("trim"), opt(preceded(space1, trim_range))).map(|range| {
            let sweep = TrimSweep::REFERENCE;
            CalibrationPlan::Trim(range.map_or(sweep, |(first, last)| sweep.between(first, last)))
        }),
        preceded(Caseless("clock"), opt(preceded(space1, number16))).map(|runs| {
            let plan = ClockRuns::REFERENCE;
            CalibrationPlan::Clock(runs.map_or(plan, |runs| plan.repeated(runs)))
        }),
    ))
    .parse_next(input)
}

fn millivolt_range(input: &mut &str) -> ModalResult<(u32, u32)> {
    (millivolts, preceded(space1, millivolts))
        .verify(|(first, last): &(u32, u32)| first <= last)
        .parse_next(input)
}

fn trim_range(input: &mut &str) -> ModalResult<(u16, u16)> {
    (number16, preceded(space1, number16))
        .verify(|(first, last): &(u16, u16)| first <= last)
        .parse_next(input)
}

fn millivolts(input: &mut &str) -> ModalResult<u32> {
    terminated(number, opt(Caseless("mv"))).parse_next(input)
}

fn number(input: &mut &str) -> ModalResult<u32> {
    alt((preceded(Caseless("0x"), hex_uint), dec_uint)).parse_next(input)
}

fn number16(input: &mut &str) -> ModalResult<u16> {
    number.try_map(u16::try_from).parse_next(input)
}
