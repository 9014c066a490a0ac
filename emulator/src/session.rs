use std::fs::{self, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::time::{Duration, Instant as HostInstant};

use icepick_core::agent::{Agent, AgentConfig, AgentStatus};
use icepick_core::bringup::{CLOCK_PROBE_WINDOW, IoReport, SurveyReport};
use icepick_core::calibration::{AgentLink, CalibrationPlan, CalibrationPoint};
use icepick_core::channels::SenseChannel;
use icepick_core::console::{self, ConsoleCommand, ConsoleError, ConsoleOutcome, HELP_LINES};
use icepick_core::math::compensate_vsense;
use icepick_core::protocol::{ClockReadback, MAX_RESPONSE_LEN, Response, VendorCommand};
use icepick_core::regs::{ClockWords, RawSenseSample};
use icepick_core::sense::{SchedulerState, TickOutcome};
use icepick_core::telemetry::TelemetryEventKind;

use crate::hardware::{SimHardware, SimWindow, XO_HZ};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TranscriptProfile {
    Sense,
    Gpio,
    Clock,
}

impl TranscriptProfile {
    pub fn log_path(self) -> &'static str {
        match self {
            TranscriptProfile::Sense => "transcripts/emulator-sense.log",
            TranscriptProfile::Gpio => "transcripts/emulator-gpio.log",
            TranscriptProfile::Clock => "transcripts/emulator-clock.log",
        }
    }

    pub fn header(self) -> &'static str {
        match self {
            TranscriptProfile::Sense => "iCEpick emulator sense transcript",
            TranscriptProfile::Gpio => "iCEpick emulator gpio transcript",
            TranscriptProfile::Clock => "iCEpick emulator clock transcript",
        }
    }

    pub fn from_tag(tag: &str) -> Result<Self, String> {
        if tag.eq_ignore_ascii_case("sense") {
            Ok(Self::Sense)
        } else if tag.eq_ignore_ascii_case("gpio") {
            Ok(Self::Gpio)
        } else if tag.eq_ignore_ascii_case("clock") {
            Ok(Self::Clock)
        } else {
            Err(format!("Unknown transcript profile `{tag}`"))
        }
    }
}

pub struct Session {
    agent: Agent<SimWindow>,
    hardware: SimHardware,
    transcript: TranscriptLogger,
    started_at: HostInstant,
    telemetry_seen: u32,
    response: Box<[u8; MAX_RESPONSE_LEN]>,
}

impl Session {
    /// Starts a session whose agent uses `config`; the simulated board always
    /// behaves like the reference hardware.
    pub fn new(profile: TranscriptProfile, config: AgentConfig) -> io::Result<Self> {
        let transcript = TranscriptLogger::new(profile)?;
        let hardware = SimHardware::new(AgentConfig::REFERENCE.sense);
        let agent = Agent::new(hardware.registers(), config);

        Ok(Self {
            agent,
            hardware,
            transcript,
            started_at: HostInstant::now(),
            telemetry_seen: 0,
            response: Box::new([0; MAX_RESPONSE_LEN]),
        })
    }

    pub fn hardware(&self) -> &SimHardware {
        &self.hardware
    }

    pub fn handle_command(&mut self, line: &str) -> io::Result<Vec<String>> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }

        let elapsed = self.started_at.elapsed();
        self.transcript
            .append_line(elapsed, TranscriptRole::Host, trimmed)?;

        let mut lines = match console::parse(trimmed) {
            Ok(ConsoleCommand::Tick(frames)) => self.tick(frames),
            Ok(ConsoleCommand::Calib(plan)) => self.calibrate(plan),
            Ok(command) => {
                match console::execute(&mut self.agent, command, &mut self.response[..]) {
                    Ok(outcome) => self.describe(outcome),
                    Err(err) => vec![describe_error(&err)],
                }
            }
            Err(err) => vec![describe_error(&ConsoleError::Parse(err))],
        };
        self.drain_telemetry(&mut lines);

        self.record_output(elapsed, &lines)?;
        Ok(lines)
    }

    fn tick(&mut self, frames: u32) -> Vec<String> {
        let mut lines = Vec::new();
        let mut captured = 0;

        for _ in 0..frames {
            self.hardware.advance_frames(1);
            if let TickOutcome::Captured(sample) = self.agent.on_frame() {
                captured += 1;
                lines.push(format!(
                    "  frame {} {} #{} chg={} dis={} -> {} mV",
                    self.agent.frame(),
                    sample.channel,
                    sample.index,
                    sample.sample.charge,
                    sample.sample.discharge,
                    self.agent.convert(sample.sample)
                ));
            }
        }

        lines.insert(0, format!("OK ticked {frames} frames, captured {captured}"));
        lines
    }

    /// Runs a sweep against the simulated board, letting emulated time pass
    /// with every frame the sweep waits for.
    fn calibrate(&mut self, plan: CalibrationPlan) -> Vec<String> {
        let plan = match plan {
            CalibrationPlan::Trim(sweep) => {
                CalibrationPlan::Trim(sweep.counted_at(u32::try_from(XO_HZ).unwrap_or(u32::MAX)))
            }
            other => other,
        };

        let mut points = Vec::new();
        let hardware = &self.hardware;
        let mut link = AgentLink::new(&mut self.agent, || hardware.advance_frames(1));
        let result = plan.run(&mut link, |point| points.push(point));

        let mut lines = match result {
            Ok(count) => vec![format!("OK {plan}: {count} points")],
            Err(err) => vec![describe_error(&ConsoleError::Calibration(err))],
        };
        lines.extend(points.iter().map(|point| self.describe_point(point)));
        lines
    }

    fn describe_point(&self, point: &CalibrationPoint) -> String {
        match point {
            CalibrationPoint::Vio(vio) => format!(
                "  {point} -> {} mV",
                self.agent.convert(vio.as_sample())
            ),
            other => format!("  {other}"),
        }
    }

    fn describe(&self, outcome: ConsoleOutcome) -> Vec<String> {
        match outcome {
            ConsoleOutcome::Request(Response::Accepted(command)) => vec![format!("OK {command}")],
            ConsoleOutcome::Request(Response::Data { command, len }) => {
                self.describe_payload(command, len)
            }
            ConsoleOutcome::Request(Response::Declined) => vec!["ERR declined".to_string()],
            ConsoleOutcome::Ticked { frames, captured } => {
                vec![format!("OK ticked {frames} frames, captured {captured}")]
            }
            ConsoleOutcome::Survey(report) => describe_survey(&report),
            ConsoleOutcome::IoTest(report) => describe_io_test(&report),
            ConsoleOutcome::ClockProbe(words) => vec![
                format!(
                    "OK clock probe armed for {} cycles",
                    CLOCK_PROBE_WINDOW.duration()
                ),
                format!("  previous {}", describe_words(words)),
            ],
            ConsoleOutcome::Calibrated { plan, points, last } => {
                let mut lines = vec![format!("OK {plan}: {points} points")];
                lines.extend(last.map(|point| self.describe_point(&point)));
                lines
            }
            ConsoleOutcome::Status(status) => self.describe_status(&status),
            ConsoleOutcome::Help => {
                let mut lines = vec!["Available commands:".to_string()];
                lines.extend(HELP_LINES.iter().map(|line| format!("  {line}")));
                lines
            }
        }
    }

    fn describe_payload(&self, command: VendorCommand, len: usize) -> Vec<String> {
        let payload = &self.response[..len];
        match command {
            VendorCommand::SenseResult => self.describe_results(payload),
            VendorCommand::ClockResult => describe_clock(payload),
            VendorCommand::GpioDataIn => {
                let value = u16::from_le_bytes([payload[0], payload[1]]);
                vec![format!("OK gpio-data-in {value:#05x}")]
            }
            other => vec![format!("OK {other} ({len} bytes)")],
        }
    }

    fn describe_results(&self, payload: &[u8]) -> Vec<String> {
        let samples: Vec<RawSenseSample> = payload
            .chunks_exact(RawSenseSample::ENCODED_LEN)
            .filter_map(|chunk| chunk.try_into().ok())
            .map(RawSenseSample::from_bytes)
            .collect();

        let mut lines = vec![format!(
            "OK sense-result {} samples ({} bytes)",
            samples.len(),
            payload.len()
        )];

        let layout = self.agent.scheduler().layout();
        for group in layout.group(&samples) {
            let channel = group.channel();
            let values: Vec<i32> = group
                .map(|sample| {
                    let value = self.agent.convert(sample);
                    if channel == SenseChannel::Vsense {
                        compensate_vsense(value)
                    } else {
                        value
                    }
                })
                .collect();
            if values.is_empty() {
                continue;
            }

            let total: i64 = values.iter().copied().map(i64::from).sum();
            let count = i64::try_from(values.len()).unwrap_or(i64::MAX);
            let min = values.iter().copied().min().unwrap_or_default();
            let max = values.iter().copied().max().unwrap_or_default();
            lines.push(format!(
                "  {:>6}: n={} mean={} mV min={min} max={max}",
                channel.label(),
                values.len(),
                total / count
            ));
        }
        lines
    }

    fn describe_status(&self, status: &AgentStatus) -> Vec<String> {
        let state = match status.state {
            SchedulerState::Idle => "idle",
            SchedulerState::Running => "running",
        };
        vec![
            format!(
                "OK frame={} state={state} samples={}/{} mask={:#06x}",
                status.frame,
                status.completed,
                status.total,
                status.layout.mask().bits()
            ),
            format!(
                "  board frames={} hf={} Hz telemetry={}",
                self.hardware.frames(),
                self.hardware.hf_hz(),
                self.agent.telemetry().recorded()
            ),
        ]
    }

    fn drain_telemetry(&mut self, lines: &mut Vec<String>) {
        let seen = self.telemetry_seen;
        for record in self.agent.telemetry().oldest_first() {
            if record.id < seen || matches!(record.event, TelemetryEventKind::SampleCaptured(_)) {
                continue;
            }
            lines.push(format!("  telemetry {record}"));
        }
        self.telemetry_seen = self.agent.telemetry().recorded();
    }

    fn record_output(&mut self, elapsed: Duration, lines: &[String]) -> io::Result<()> {
        for line in lines {
            self.transcript
                .append_line(elapsed, TranscriptRole::Emulator, line)?;
        }
        Ok(())
    }
}

fn describe_error(error: &ConsoleError) -> String {
    match error {
        ConsoleError::Parse(err) => format!("ERR {err}"),
        ConsoleError::Dispatch(err) => format!("ERR stall {err}"),
        ConsoleError::Calibration(err) => format!("ERR calibration {err}"),
    }
}

fn describe_survey(report: &SurveyReport) -> Vec<String> {
    let mut lines = vec!["OK survey".to_string()];
    lines.extend(
        report
            .iter()
            .map(|entry| format!("  {:>9} {}", entry.step.to_string(), entry.reading)),
    );
    lines
}

fn describe_io_test(report: &IoReport) -> Vec<String> {
    let passed = report.iter().filter(|check| check.passed()).count();
    let mut lines = vec![format!("OK io self test {passed}/{} passed", report.len())];
    lines.extend(report.iter().map(|check| format!("  {check}")));
    lines
}

fn describe_clock(payload: &[u8]) -> Vec<String> {
    let Some(readback) = ClockReadback::from_bytes(payload) else {
        return vec!["OK clock-result pending".to_string()];
    };

    let mut lines = vec![format!(
        "OK clock-result xo={} hf={} lf={}",
        readback.xo, readback.hf, readback.lf
    )];
    if readback.xo != 0 {
        let scale = |count: u32| u64::from(count) * XO_HZ / u64::from(readback.xo);
        lines.push(format!(
            "  hf={} Hz lf={} Hz",
            scale(readback.hf),
            scale(readback.lf)
        ));
    }
    lines
}

fn describe_words(words: ClockWords) -> String {
    format!(
        "xo={:#010x} hf={:#010x} lf={:#010x}",
        words.xo, words.hf, words.lf
    )
}

struct TranscriptLogger {
    writer: BufWriter<std::fs::File>,
}

impl TranscriptLogger {
    fn new(profile: TranscriptProfile) -> io::Result<Self> {
        let path = Path::new(profile.log_path());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut logger = Self {
            writer: BufWriter::new(file),
        };

        logger.write_header(profile)?;
        Ok(logger)
    }

    fn write_header(&mut self, profile: TranscriptProfile) -> io::Result<()> {
        writeln!(self.writer, "# {}", profile.header())?;
        writeln!(
            self.writer,
            "# Timestamps are milliseconds since session start"
        )?;
        writeln!(self.writer)?;
        self.writer.flush()
    }

    fn append_line(
        &mut self,
        elapsed: Duration,
        role: TranscriptRole,
        line: &str,
    ) -> io::Result<()> {
        writeln!(
            self.writer,
            "[+{:>6} ms] {} {}",
            elapsed.as_millis(),
            role.prefix(),
            line
        )?;
        self.writer.flush()
    }
}

enum TranscriptRole {
    Host,
    Emulator,
}

impl TranscriptRole {
    fn prefix(&self) -> &'static str {
        match self {
            TranscriptRole::Host => "HOST>",
            TranscriptRole::Emulator => "EMU <",
        }
    }
}
