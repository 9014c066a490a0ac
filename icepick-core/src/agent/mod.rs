//! The calibration agent context.
//!
//! [`Agent`] owns the register facade, the sense scheduler and the telemetry
//! ring. Transports feed it control requests and frame notifications; it is
//! not reentrant, so callers serialize both paths behind one lock.

mod config;

pub use config::{AgentConfig, VioScale};

use crate::bringup::BringUp;
use crate::math::convert_sense;
use crate::protocol::{ControlRequest, DispatchError, Response, VendorCommand, dispatch};
use crate::regs::{IcepickRegisters, RawSenseSample, RegisterBus};
use crate::sense::{SchedulerState, SenseLayout, SenseScheduler, StartError, TickOutcome};
use crate::telemetry::{
    AgentTelemetry, FrameStamp, RequestTelemetry, RunTelemetry, SampleTelemetry,
};

pub struct Agent<B> {
    regs: IcepickRegisters<B>,
    scheduler: SenseScheduler,
    config: AgentConfig,
    telemetry: AgentTelemetry,
    frame: FrameStamp,
}

/// Snapshot of the agent for status displays.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AgentStatus {
    pub frame: FrameStamp,
    pub state: SchedulerState,
    pub completed: usize,
    pub total: usize,
    pub layout: SenseLayout,
}

impl<B> Agent<B>
where
    B: RegisterBus,
{
    pub fn new(regs: IcepickRegisters<B>, config: AgentConfig) -> Self {
        Self {
            regs,
            scheduler: SenseScheduler::new(),
            config,
            telemetry: AgentTelemetry::new(),
            frame: 0,
        }
    }

    /// Handles one control request. IN payloads land at the front of `response`.
    pub fn handle_control(
        &mut self,
        req: &ControlRequest,
        response: &mut [u8],
    ) -> Result<Response, DispatchError> {
        let result = dispatch(req, &mut self.regs, &mut self.scheduler, response);

        match (&result, VendorCommand::decode(req)) {
            (Ok(Response::Accepted(_)), Some(VendorCommand::SenseStart { mask, repeat })) => {
                let run = RunTelemetry {
                    mask,
                    repeat,
                    samples: u32::try_from(self.scheduler.total()).unwrap_or(u32::MAX),
                };
                self.telemetry.record_run_started(self.frame, run);
                if self.scheduler.state() == SchedulerState::Idle {
                    self.telemetry.record_run_complete(self.frame);
                }
            }
            (
                Err(DispatchError::CapacityExceeded(StartError::CapacityExceeded {
                    requested, ..
                })),
                Some(VendorCommand::SenseStart { mask, repeat }),
            ) => {
                let run = RunTelemetry {
                    mask,
                    repeat,
                    samples: *requested,
                };
                self.telemetry.record_run_rejected(self.frame, run);
            }
            (Err(error), _) => {
                self.telemetry.record_request_rejected(
                    self.frame,
                    RequestTelemetry {
                        request: req.request,
                        direction: req.direction,
                        error: *error,
                    },
                );
            }
            _ => {}
        }

        result
    }

    /// Frame notification: advances the sense run by at most one sample.
    pub fn on_frame(&mut self) -> TickOutcome {
        self.frame = self.frame.wrapping_add(1);
        let outcome = self.scheduler.on_frame_tick(&mut self.regs);

        if let TickOutcome::Captured(captured) = outcome {
            self.telemetry.record_sample(
                self.frame,
                captured.channel,
                SampleTelemetry {
                    index: u16::try_from(captured.index).unwrap_or(u16::MAX),
                    charge: captured.sample.charge,
                },
            );
            if captured.finished_run() {
                self.telemetry.record_run_complete(self.frame);
            }
        }
        outcome
    }

    /// Blocking diagnostics; never call from the frame path.
    pub fn bring_up(&mut self) -> BringUp<'_, B> {
        BringUp::new(&mut self.regs, self.config.sense)
    }

    /// Converts a stored sample with the configured calibration.
    #[must_use]
    pub fn convert(&self, sample: RawSenseSample) -> i32 {
        convert_sense(sample.charge, self.config.sense)
    }

    pub fn results(&self) -> &[RawSenseSample] {
        self.scheduler.results()
    }

    pub fn scheduler(&self) -> &SenseScheduler {
        &self.scheduler
    }

    pub fn registers(&mut self) -> &mut IcepickRegisters<B> {
        &mut self.regs
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn telemetry(&self) -> &AgentTelemetry {
        &self.telemetry
    }

    pub fn frame(&self) -> FrameStamp {
        self.frame
    }

    pub fn status(&self) -> AgentStatus {
        AgentStatus {
            frame: self.frame,
            state: self.scheduler.state(),
            completed: self.scheduler.completed(),
            total: self.scheduler.total(),
            layout: self.scheduler.layout(),
        }
    }
}
