use core::fmt;

use super::{ClockReadback, ControlRequest, Direction, VendorCommand};
use crate::regs::{IcepickRegisters, RawSenseSample, RegisterBus};
use crate::sense::{SenseScheduler, StartError};

/// Outcome of a handled control request.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Response {
    /// Not a vendor device request; the next handler in the chain should see it.
    Declined,
    /// OUT command applied.
    Accepted(VendorCommand),
    /// IN command answered with `len` bytes at the front of the response buffer.
    ///
    /// `len` is the full payload; the transport clips it to `wLength`.
    Data { command: VendorCommand, len: usize },
}

impl Response {
    #[must_use]
    pub fn command(&self) -> Option<VendorCommand> {
        match self {
            Response::Declined => None,
            Response::Accepted(command) | Response::Data { command, .. } => Some(*command),
        }
    }
}

/// Rejections surfaced to the host as a protocol stall.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DispatchError {
    /// Vendor device request with an unknown `(bRequest, direction)` pair.
    Unrecognized { request: u8, direction: Direction },
    /// Sense start asked for more samples than a run can hold.
    CapacityExceeded(StartError),
    /// Response buffer cannot hold the payload.
    ResponseTooLarge { needed: usize, available: usize },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Unrecognized { request, direction } => {
                write!(f, "unrecognized vendor request {request} ({direction})")
            }
            DispatchError::CapacityExceeded(err) => write!(f, "{err}"),
            DispatchError::ResponseTooLarge { needed, available } => {
                write!(f, "response needs {needed} bytes, buffer holds {available}")
            }
        }
    }
}

impl From<StartError> for DispatchError {
    fn from(err: StartError) -> Self {
        DispatchError::CapacityExceeded(err)
    }
}

/// Applies one control request to the registers and scheduler.
///
/// IN payloads are written to the front of `response`.
pub fn dispatch<B>(
    req: &ControlRequest,
    regs: &mut IcepickRegisters<B>,
    scheduler: &mut SenseScheduler,
    response: &mut [u8],
) -> Result<Response, DispatchError>
where
    B: RegisterBus,
{
    if !req.is_vendor_device() {
        return Ok(Response::Declined);
    }

    let command = VendorCommand::decode(req).ok_or(DispatchError::Unrecognized {
        request: req.request,
        direction: req.direction,
    })?;

    match command {
        VendorCommand::SetVio { pdm } => regs.set_vio(pdm),
        VendorCommand::SetHfTrim { trim } => regs.set_clk_hf_trim(u32::from(trim)),
        VendorCommand::SenseStart { mask, repeat } => {
            scheduler.start(regs, mask, repeat)?;
        }
        VendorCommand::ClockStart(window) => regs.arm_clocks(window.arm_word()),
        VendorCommand::GpioDataOut(value) => regs.set_io_data(u32::from(value)),
        VendorCommand::GpioOutputEnable(value) => regs.set_io_oe(u32::from(value)),
        VendorCommand::GpioPullDirection(value) => regs.set_io_pull_dir(u32::from(value)),
        VendorCommand::GpioPullEnable(value) => regs.set_io_pull_ena(u32::from(value)),
        VendorCommand::SenseResult => {
            let len = write_results(scheduler.results(), response)?;
            return Ok(Response::Data { command, len });
        }
        VendorCommand::ClockResult => {
            let payload = ClockReadback::encode(regs.clock_words());
            let len = write_payload(&payload, response)?;
            return Ok(Response::Data { command, len });
        }
        VendorCommand::GpioDataIn => {
            let data = regs.io_data().to_le_bytes();
            let len = write_payload(&data[..2], response)?;
            return Ok(Response::Data { command, len });
        }
    }

    Ok(Response::Accepted(command))
}

fn write_results(results: &[RawSenseSample], response: &mut [u8]) -> Result<usize, DispatchError> {
    let needed = results.len() * RawSenseSample::ENCODED_LEN;
    let available = response.len();
    let out = response
        .get_mut(..needed)
        .ok_or(DispatchError::ResponseTooLarge { needed, available })?;

    for (chunk, sample) in out
        .chunks_exact_mut(RawSenseSample::ENCODED_LEN)
        .zip(results)
    {
        chunk.copy_from_slice(&sample.to_bytes());
    }
    Ok(needed)
}

fn write_payload(payload: &[u8], response: &mut [u8]) -> Result<usize, DispatchError> {
    let available = response.len();
    let out = response
        .get_mut(..payload.len())
        .ok_or(DispatchError::ResponseTooLarge {
            needed: payload.len(),
            available,
        })?;
    out.copy_from_slice(payload);
    Ok(payload.len())
}
