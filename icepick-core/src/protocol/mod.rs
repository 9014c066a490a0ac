//! Vendor control-request vocabulary shared by the firmware and host tools.
//!
//! The device answers vendor requests addressed to the device recipient.
//! `bRequest` selects the command and the transfer direction distinguishes
//! the start (OUT) and result (IN) halves of the sense and clock commands.

use core::fmt;

use crate::channels::ChannelMask;
use crate::regs::{CLK_ENABLE, COUNT_MASK, ClockWords, STATUS_FLAG};

mod dispatch;

pub use dispatch::{DispatchError, Response, dispatch};

/// Data stage direction, bit 7 of `bmRequestType`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Direction {
    Out,
    In,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Out => f.write_str("out"),
            Direction::In => f.write_str("in"),
        }
    }
}

/// Request type, bits 6..5 of `bmRequestType`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestType {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Recipient, bits 4..0 of `bmRequestType`.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
    Reserved,
}

/// A decoded SETUP packet.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ControlRequest {
    pub direction: Direction,
    pub request_type: RequestType,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl ControlRequest {
    pub const SETUP_LEN: usize = 8;

    /// Decodes the eight SETUP bytes as they arrive on the wire.
    #[must_use]
    pub fn parse(setup: [u8; Self::SETUP_LEN]) -> Self {
        let [request_type, request, v0, v1, i0, i1, l0, l1] = setup;

        let direction = if request_type & 0x80 == 0 {
            Direction::Out
        } else {
            Direction::In
        };
        let kind = match (request_type >> 5) & 0x03 {
            0 => RequestType::Standard,
            1 => RequestType::Class,
            2 => RequestType::Vendor,
            _ => RequestType::Reserved,
        };
        let recipient = match request_type & 0x1F {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            3 => Recipient::Other,
            _ => Recipient::Reserved,
        };

        Self {
            direction,
            request_type: kind,
            recipient,
            request,
            value: u16::from_le_bytes([v0, v1]),
            index: u16::from_le_bytes([i0, i1]),
            length: u16::from_le_bytes([l0, l1]),
        }
    }

    /// Re-encodes the request as a SETUP packet.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SETUP_LEN] {
        let direction = match self.direction {
            Direction::Out => 0x00,
            Direction::In => 0x80,
        };
        let kind = match self.request_type {
            RequestType::Standard => 0x00,
            RequestType::Class => 0x20,
            RequestType::Vendor => 0x40,
            RequestType::Reserved => 0x60,
        };
        let recipient = match self.recipient {
            Recipient::Device => 0x00,
            Recipient::Interface => 0x01,
            Recipient::Endpoint => 0x02,
            Recipient::Other => 0x03,
            Recipient::Reserved => 0x1F,
        };

        let [v0, v1] = self.value.to_le_bytes();
        let [i0, i1] = self.index.to_le_bytes();
        let [l0, l1] = self.length.to_le_bytes();
        [
            direction | kind | recipient,
            self.request,
            v0,
            v1,
            i0,
            i1,
            l0,
            l1,
        ]
    }

    /// Vendor, device-recipient request without a data stage.
    #[must_use]
    pub const fn vendor_out(request: u8, value: u16, index: u16) -> Self {
        Self {
            direction: Direction::Out,
            request_type: RequestType::Vendor,
            recipient: Recipient::Device,
            request,
            value,
            index,
            length: 0,
        }
    }

    /// Vendor, device-recipient request reading up to `length` bytes.
    #[must_use]
    pub const fn vendor_in(request: u8, length: u16) -> Self {
        Self {
            direction: Direction::In,
            request_type: RequestType::Vendor,
            recipient: Recipient::Device,
            request,
            value: 0,
            index: 0,
            length,
        }
    }

    /// Only vendor requests addressed to the device are handled here.
    #[must_use]
    pub fn is_vendor_device(&self) -> bool {
        self.request_type == RequestType::Vendor && self.recipient == Recipient::Device
    }
}

/// `bRequest` codes of the vendor vocabulary.
pub mod request {
    pub const SET_VIO: u8 = 0;
    pub const SET_HFTRIM: u8 = 1;
    pub const SENSE: u8 = 2;
    pub const CLOCK: u8 = 3;
    pub const GPIO_DATA: u8 = 4;
    pub const GPIO_OUTPUT_ENABLE: u8 = 5;
    pub const GPIO_PULL_DIRECTION: u8 = 6;
    pub const GPIO_PULL_ENABLE: u8 = 7;
}

/// Largest payload any IN request produces.
pub const MAX_RESPONSE_LEN: usize =
    crate::sense::RESULT_CAPACITY * crate::regs::RawSenseSample::ENCODED_LEN;

/// A recognised vendor command.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VendorCommand {
    SetVio { pdm: u16 },
    SetHfTrim { trim: u16 },
    SenseStart { mask: ChannelMask, repeat: u16 },
    SenseResult,
    ClockStart(ClockWindow),
    ClockResult,
    GpioDataIn,
    GpioDataOut(u16),
    GpioOutputEnable(u16),
    GpioPullDirection(u16),
    GpioPullEnable(u16),
}

impl VendorCommand {
    /// Decodes a vendor device request; `None` for `(request, direction)`
    /// pairs outside the vocabulary.
    #[must_use]
    pub fn decode(req: &ControlRequest) -> Option<Self> {
        let command = match (req.request, req.direction) {
            (request::SET_VIO, Direction::Out) => VendorCommand::SetVio { pdm: req.value },
            (request::SET_HFTRIM, Direction::Out) => VendorCommand::SetHfTrim { trim: req.value },
            (request::SENSE, Direction::Out) => VendorCommand::SenseStart {
                mask: ChannelMask::from_bits(req.value),
                repeat: req.index,
            },
            (request::SENSE, Direction::In) => VendorCommand::SenseResult,
            (request::CLOCK, Direction::Out) => {
                VendorCommand::ClockStart(ClockWindow::from_request(req.value, req.index))
            }
            (request::CLOCK, Direction::In) => VendorCommand::ClockResult,
            (request::GPIO_DATA, Direction::In) => VendorCommand::GpioDataIn,
            (request::GPIO_DATA, Direction::Out) => VendorCommand::GpioDataOut(req.value),
            (request::GPIO_OUTPUT_ENABLE, Direction::Out) => {
                VendorCommand::GpioOutputEnable(req.value)
            }
            (request::GPIO_PULL_DIRECTION, Direction::Out) => {
                VendorCommand::GpioPullDirection(req.value)
            }
            (request::GPIO_PULL_ENABLE, Direction::Out) => VendorCommand::GpioPullEnable(req.value),
            _ => return None,
        };
        Some(command)
    }

    /// The control request a host issues for this command.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn to_request(self) -> ControlRequest {
        match self {
            VendorCommand::SetVio { pdm } => ControlRequest::vendor_out(request::SET_VIO, pdm, 0),
            VendorCommand::SetHfTrim { trim } => {
                ControlRequest::vendor_out(request::SET_HFTRIM, trim, 0)
            }
            VendorCommand::SenseStart { mask, repeat } => {
                ControlRequest::vendor_out(request::SENSE, mask.bits(), repeat)
            }
            VendorCommand::SenseResult => {
                ControlRequest::vendor_in(request::SENSE, MAX_RESPONSE_LEN as u16)
            }
            VendorCommand::ClockStart(window) => ControlRequest::vendor_out(
                request::CLOCK,
                window.value,
                u16::from(window.index),
            ),
            VendorCommand::ClockResult => {
                ControlRequest::vendor_in(request::CLOCK, ClockReadback::ENCODED_LEN as u16)
            }
            VendorCommand::GpioDataIn => ControlRequest::vendor_in(request::GPIO_DATA, 2),
            VendorCommand::GpioDataOut(value) => {
                ControlRequest::vendor_out(request::GPIO_DATA, value, 0)
            }
            VendorCommand::GpioOutputEnable(value) => {
                ControlRequest::vendor_out(request::GPIO_OUTPUT_ENABLE, value, 0)
            }
            VendorCommand::GpioPullDirection(value) => {
                ControlRequest::vendor_out(request::GPIO_PULL_DIRECTION, value, 0)
            }
            VendorCommand::GpioPullEnable(value) => {
                ControlRequest::vendor_out(request::GPIO_PULL_ENABLE, value, 0)
            }
        }
    }
}

impl fmt::Display for VendorCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VendorCommand::SetVio { pdm } => write!(f, "set-vio pdm={pdm:#05x}"),
            VendorCommand::SetHfTrim { trim } => write!(f, "set-hftrim trim={trim}"),
            VendorCommand::SenseStart { mask, repeat } => {
                write!(f, "sense-start mask={:#06x} repeat={repeat}", mask.bits())
            }
            VendorCommand::SenseResult => f.write_str("sense-result"),
            VendorCommand::ClockStart(window) => {
                write!(f, "clock-start duration={}", window.duration())
            }
            VendorCommand::ClockResult => f.write_str("clock-result"),
            VendorCommand::GpioDataIn => f.write_str("gpio-data-in"),
            VendorCommand::GpioDataOut(value) => write!(f, "gpio-data-out {value:#05x}"),
            VendorCommand::GpioOutputEnable(value) => write!(f, "gpio-oe {value:#05x}"),
            VendorCommand::GpioPullDirection(value) => write!(f, "gpio-pull-dir {value:#05x}"),
            VendorCommand::GpioPullEnable(value) => write!(f, "gpio-pull-ena {value:#05x}"),
        }
    }
}

/// Clock measurement window split across `wValue` (low 16 bits) and the low
/// byte of `wIndex` (bits 23..16).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ClockWindow {
    pub value: u16,
    pub index: u8,
}

impl ClockWindow {
    /// Widest window expressible on the wire.
    pub const MAX_DURATION: u32 = 0x00FF_FFFF;

    /// Splits a 24-bit duration; higher bits are dropped.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn split(duration: u32) -> Self {
        Self {
            value: (duration & 0xFFFF) as u16,
            index: ((duration >> 16) & 0xFF) as u8,
        }
    }

    /// Rebuilds a window from request fields, keeping only the low byte of `index`.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_request(value: u16, index: u16) -> Self {
        Self {
            value,
            index: (index & 0xFF) as u8,
        }
    }

    #[must_use]
    pub const fn duration(self) -> u32 {
        ((self.index as u32) << 16) | self.value as u32
    }

    /// Word written to each clock counter to arm it.
    #[must_use]
    pub const fn arm_word(self) -> u32 {
        CLK_ENABLE | self.duration()
    }
}

/// Decoded clock counter result.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ClockReadback {
    pub xo: u32,
    pub hf: u32,
    pub lf: u32,
}

impl ClockReadback {
    pub const ENCODED_LEN: usize = 12;

    /// Encodes raw counter words, status bits included, as the device sends them.
    #[must_use]
    pub fn encode(words: ClockWords) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[0..4].copy_from_slice(&words.xo.to_le_bytes());
        out[4..8].copy_from_slice(&words.hf.to_le_bytes());
        out[8..12].copy_from_slice(&words.lf.to_le_bytes());
        out
    }

    /// Decodes a clock result; `None` until all three counters report valid.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let words: &[u8; Self::ENCODED_LEN] = bytes.get(..Self::ENCODED_LEN)?.try_into().ok()?;
        let word = |at: usize| {
            u32::from_le_bytes([words[at], words[at + 1], words[at + 2], words[at + 3]])
        };
        let (xo, hf, lf) = (word(0), word(4), word(8));

        if xo & hf & lf & STATUS_FLAG == 0 {
            return None;
        }
        Some(Self {
            xo: xo & COUNT_MASK,
            hf: hf & COUNT_MASK,
            lf: lf & COUNT_MASK,
        })
    }
}

/// PDM code producing `millivolts` on VIO at the reference 3.3 V full scale.
#[must_use]
pub fn vio_pdm_for_millivolts(millivolts: u32) -> u16 {
    crate::agent::VioScale::REFERENCE.pdm_for_millivolts(millivolts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_decodes_vendor_out_setup() {
        let req = ControlRequest::parse([0x40, 0x02, 0x05, 0x00, 0x14, 0x00, 0x00, 0x00]);
        assert_eq!(req, ControlRequest::vendor_out(request::SENSE, 0x0005, 20));
        assert!(req.is_vendor_device());
    }

    #[test]
    fn parse_decodes_vendor_in_setup() {
        let req = ControlRequest::parse([0xC0, 0x03, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x00]);
        assert_eq!(req.direction, Direction::In);
        assert_eq!(req.request, request::CLOCK);
        assert_eq!(req.length, 12);
        assert_eq!(req.to_bytes(), [0xC0, 0x03, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x00]);
    }

    #[test]
    fn standard_and_interface_requests_are_not_vendor_device() {
        let get_descriptor = ControlRequest::parse([0x80, 0x06, 0x00, 0x01, 0, 0, 0x12, 0]);
        assert_eq!(get_descriptor.request_type, RequestType::Standard);
        assert!(!get_descriptor.is_vendor_device());

        let vendor_interface = ControlRequest::parse([0x41, 0x00, 0, 0, 0, 0, 0, 0]);
        assert_eq!(vendor_interface.recipient, Recipient::Interface);
        assert!(!vendor_interface.is_vendor_device());
    }

    #[test]
    fn decode_covers_the_vocabulary() {
        let cases = [
            (ControlRequest::vendor_out(0, 0x123, 0), VendorCommand::SetVio { pdm: 0x123 }),
            (ControlRequest::vendor_out(1, 512, 0), VendorCommand::SetHfTrim { trim: 512 }),
            (
                ControlRequest::vendor_out(2, 0b101, 2),
                VendorCommand::SenseStart {
                    mask: ChannelMask::from_bits(0b101),
                    repeat: 2,
                },
            ),
            (ControlRequest::vendor_in(2, 1024), VendorCommand::SenseResult),
            (ControlRequest::vendor_in(3, 12), VendorCommand::ClockResult),
            (ControlRequest::vendor_in(4, 2), VendorCommand::GpioDataIn),
            (ControlRequest::vendor_out(4, 0x3FF, 0), VendorCommand::GpioDataOut(0x3FF)),
            (ControlRequest::vendor_out(5, 1, 0), VendorCommand::GpioOutputEnable(1)),
            (ControlRequest::vendor_out(6, 2, 0), VendorCommand::GpioPullDirection(2)),
            (ControlRequest::vendor_out(7, 3, 0), VendorCommand::GpioPullEnable(3)),
        ];
        for (req, expected) in cases {
            assert_eq!(VendorCommand::decode(&req), Some(expected), "{req:?}");
        }
    }

    #[test]
    fn decode_rejects_unknown_pairs() {
        assert_eq!(VendorCommand::decode(&ControlRequest::vendor_in(0, 2)), None);
        assert_eq!(VendorCommand::decode(&ControlRequest::vendor_in(5, 2)), None);
        assert_eq!(VendorCommand::decode(&ControlRequest::vendor_out(8, 0, 0)), None);
    }

    #[test]
    fn commands_encode_back_to_their_requests() {
        let command = VendorCommand::ClockStart(ClockWindow::split(1_000_000));
        let req = command.to_request();
        assert_eq!(req.value, 0x4240);
        assert_eq!(req.index, 0x0F);
        assert_eq!(VendorCommand::decode(&req), Some(command));
    }

    #[test]
    fn clock_window_keeps_low_index_byte() {
        let window = ClockWindow::from_request(0x9680, 0xAB98);
        assert_eq!(window.index, 0x98);
        assert_eq!(window.arm_word(), 0x8098_9680);
        assert_eq!(ClockWindow::split(10_000_000).arm_word(), 0x8098_9680);
    }

    #[test]
    fn clock_readback_requires_every_valid_bit() {
        let valid = ClockReadback::encode(ClockWords {
            xo: STATUS_FLAG | 1_000_000,
            hf: STATUS_FLAG | 4_800_000,
            lf: STATUS_FLAG | 10_000,
        });
        assert_eq!(
            ClockReadback::from_bytes(&valid),
            Some(ClockReadback {
                xo: 1_000_000,
                hf: 4_800_000,
                lf: 10_000
            })
        );

        let pending = ClockReadback::encode(ClockWords {
            xo: STATUS_FLAG | 1,
            hf: 2,
            lf: STATUS_FLAG | 3,
        });
        assert_eq!(ClockReadback::from_bytes(&pending), None);
        assert_eq!(ClockReadback::from_bytes(&valid[..11]), None);
    }

    #[test]
    fn vio_pdm_clamps_to_twelve_bits() {
        assert_eq!(vio_pdm_for_millivolts(0), 0);
        assert_eq!(vio_pdm_for_millivolts(1_200), 1_489);
        assert_eq!(vio_pdm_for_millivolts(1_650), 0x800);
        assert_eq!(vio_pdm_for_millivolts(3_300), 0xFFF);
        assert_eq!(vio_pdm_for_millivolts(5_000), 0xFFF);
    }
}
