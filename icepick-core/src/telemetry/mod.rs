//! Agent telemetry ring shared by firmware and host targets.
//!
//! Records are stamped with the agent frame counter rather than wall time so
//! the same history renders identically on the device (via defmt) and in
//! emulator transcripts.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::channels::{ChannelMask, SenseChannel};
use crate::protocol::{Direction, DispatchError};

/// Total number of telemetry entries retained in memory.
pub const TELEMETRY_RING_CAPACITY: usize = 64;

/// Monotonic identifier assigned to each record.
pub type EventId = u32;

/// Frame counter value at which an event was recorded.
pub type FrameStamp = u32;

/// Discriminated agent events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryEventKind {
    RunStarted,
    RunRejected,
    SampleCaptured(SenseChannel),
    RunComplete,
    RequestRejected,
}

impl fmt::Display for TelemetryEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryEventKind::RunStarted => f.write_str("run-started"),
            TelemetryEventKind::RunRejected => f.write_str("run-rejected"),
            TelemetryEventKind::SampleCaptured(channel) => write!(f, "sample-captured {channel}"),
            TelemetryEventKind::RunComplete => f.write_str("run-complete"),
            TelemetryEventKind::RequestRejected => f.write_str("request-rejected"),
        }
    }
}

/// Payloads carried alongside telemetry events.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum TelemetryPayload {
    None,
    Run(RunTelemetry),
    Sample(SampleTelemetry),
    Request(RequestTelemetry),
}

/// Parameters of a started or rejected run.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RunTelemetry {
    pub mask: ChannelMask,
    pub repeat: u16,
    /// Samples requested; for a rejected run this is the oversize figure.
    pub samples: u32,
}

/// A sample landing in the result buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SampleTelemetry {
    pub index: u16,
    pub charge: u32,
}

/// A vendor request that stalled.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RequestTelemetry {
    pub request: u8,
    pub direction: Direction,
    pub error: DispatchError,
}

/// Telemetry record stored in the ring buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetryRecord {
    pub id: EventId,
    pub frame: FrameStamp,
    pub event: TelemetryEventKind,
    pub details: TelemetryPayload,
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} @{} {}", self.id, self.frame, self.event)?;
        match self.details {
            TelemetryPayload::None => Ok(()),
            TelemetryPayload::Run(run) => write!(
                f,
                " mask={:#06x} repeat={} samples={}",
                run.mask.bits(),
                run.repeat,
                run.samples
            ),
            TelemetryPayload::Sample(sample) => {
                write!(f, " index={} chg={}", sample.index, sample.charge)
            }
            TelemetryPayload::Request(request) => write!(f, " ({})", request.error),
        }
    }
}

/// Records agent events into a fixed-size ring buffer.
pub struct AgentTelemetry<const CAPACITY: usize = TELEMETRY_RING_CAPACITY> {
    ring: HistoryBuf<TelemetryRecord, CAPACITY>,
    next_event_id: EventId,
}

impl<const CAPACITY: usize> AgentTelemetry<CAPACITY> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
        }
    }

    /// Recorded telemetry in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, TelemetryRecord> {
        self.ring.oldest_ordered()
    }

    pub fn latest(&self) -> Option<&TelemetryRecord> {
        self.ring.recent()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Total number of events recorded, including those already evicted.
    pub fn recorded(&self) -> u32 {
        self.next_event_id
    }

    pub fn record_run_started(&mut self, frame: FrameStamp, run: RunTelemetry) -> EventId {
        self.record(TelemetryEventKind::RunStarted, TelemetryPayload::Run(run), frame)
    }

    pub fn record_run_rejected(&mut self, frame: FrameStamp, run: RunTelemetry) -> EventId {
        self.record(TelemetryEventKind::RunRejected, TelemetryPayload::Run(run), frame)
    }

    pub fn record_sample(
        &mut self,
        frame: FrameStamp,
        channel: SenseChannel,
        sample: SampleTelemetry,
    ) -> EventId {
        self.record(
            TelemetryEventKind::SampleCaptured(channel),
            TelemetryPayload::Sample(sample),
            frame,
        )
    }

    pub fn record_run_complete(&mut self, frame: FrameStamp) -> EventId {
        self.record(TelemetryEventKind::RunComplete, TelemetryPayload::None, frame)
    }

    pub fn record_request_rejected(
        &mut self,
        frame: FrameStamp,
        request: RequestTelemetry,
    ) -> EventId {
        self.record(
            TelemetryEventKind::RequestRejected,
            TelemetryPayload::Request(request),
            frame,
        )
    }

    /// Records an arbitrary event with the supplied payload.
    pub fn record(
        &mut self,
        event: TelemetryEventKind,
        details: TelemetryPayload,
        frame: FrameStamp,
    ) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(TelemetryRecord {
            id,
            frame,
            event,
            details,
        });
        id
    }
}

impl<const CAPACITY: usize> Default for AgentTelemetry<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}
