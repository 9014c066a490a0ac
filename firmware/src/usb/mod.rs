#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! USB device with a single vendor calibration interface.
//!
//! All traffic is control transfers on endpoint 0. [`VendorControl`] hands
//! vendor device requests to the shared agent and passes everything else on
//! to the rest of the embassy-usb stack.

#[cfg(target_os = "none")]
pub use device::*;

/// Interface class advertised for the calibration function.
pub const VENDOR_CLASS: u8 = 0xFF;

#[cfg(target_os = "none")]
pub const MAX_PACKET_SIZE: u8 = 64;

#[cfg(target_os = "none")]
mod device {
    use core::cell::RefCell;

    use embassy_sync::blocking_mutex::Mutex;
    use embassy_sync::blocking_mutex::raw::ThreadModeRawMutex;
    use embassy_usb::control::{self, InResponse, OutResponse, Request};
    use embassy_usb::driver::Direction as UsbDirection;
    use embassy_usb::types::StringIndex;
    use icepick_core::agent::Agent;
    use icepick_core::protocol::{
        ControlRequest, Direction, MAX_RESPONSE_LEN, Recipient, RequestType, Response,
    };

    use super::{MAX_PACKET_SIZE, VENDOR_CLASS};
    use crate::board::{self, UsbDeviceStrings};
    use crate::hw::MmioBus;
    use crate::status;

    /// The agent shared between the control handler and the frame task.
    pub type AgentCell = Mutex<ThreadModeRawMutex, RefCell<Agent<MmioBus>>>;

    const CONTROL_BUFFER_LEN: usize = 64;
    const CONFIG_DESCRIPTOR_LEN: usize = 128;
    const BOS_DESCRIPTOR_LEN: usize = 64;
    const MSOS_DESCRIPTOR_LEN: usize = 64;

    /// Backing storage for the embassy-usb builder.
    pub struct UsbDeviceStorage {
        control_buf: [u8; CONTROL_BUFFER_LEN],
        config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
        bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
        msos_descriptor: [u8; MSOS_DESCRIPTOR_LEN],
    }

    impl UsbDeviceStorage {
        pub const fn new() -> Self {
            Self {
                control_buf: [0; CONTROL_BUFFER_LEN],
                config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
                bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
                msos_descriptor: [0; MSOS_DESCRIPTOR_LEN],
            }
        }
    }

    /// Control handler feeding vendor requests to the agent.
    pub struct VendorControl {
        agent: &'static AgentCell,
        response: [u8; MAX_RESPONSE_LEN],
        interface_string: Option<(StringIndex, &'static str)>,
    }

    impl VendorControl {
        pub const fn new(agent: &'static AgentCell) -> Self {
            Self {
                agent,
                response: [0; MAX_RESPONSE_LEN],
                interface_string: None,
            }
        }

        fn handle(&mut self, req: &Request) -> Option<Result<usize, ()>> {
            let request = control_request(req);
            let outcome = self
                .agent
                .lock(|agent| agent.borrow_mut().handle_control(&request, &mut self.response));

            match outcome {
                Ok(Response::Declined) => None,
                Ok(Response::Accepted(command)) => {
                    defmt::debug!("usb: {}", defmt::Display2Format(&command));
                    Some(Ok(0))
                }
                Ok(Response::Data { len, .. }) => Some(Ok(len.min(usize::from(req.length)))),
                Err(err) => {
                    status::record_stall();
                    defmt::warn!("usb: stall {}", defmt::Display2Format(&err));
                    Some(Err(()))
                }
            }
        }
    }

    impl embassy_usb::Handler for VendorControl {
        fn enabled(&mut self, enabled: bool) {
            if !enabled {
                status::set_usb_configured(false);
            }
        }

        fn reset(&mut self) {
            status::set_usb_configured(false);
        }

        fn configured(&mut self, configured: bool) {
            defmt::info!("usb: configured={}", configured);
            status::set_usb_configured(configured);
        }

        fn control_out(&mut self, req: Request, _data: &[u8]) -> Option<OutResponse> {
            match self.handle(&req)? {
                Ok(_) => Some(OutResponse::Accepted),
                Err(()) => Some(OutResponse::Rejected),
            }
        }

        fn control_in<'a>(
            &'a mut self,
            req: Request,
            _buf: &'a mut [u8],
        ) -> Option<InResponse<'a>> {
            match self.handle(&req)? {
                Ok(len) => Some(InResponse::Accepted(&self.response[..len])),
                Err(()) => Some(InResponse::Rejected),
            }
        }

        fn get_string(&mut self, index: StringIndex, _lang_id: u16) -> Option<&str> {
            match self.interface_string {
                Some((label, text)) if label == index => Some(text),
                _ => None,
            }
        }
    }

    fn control_request(req: &Request) -> ControlRequest {
        ControlRequest {
            direction: match req.direction {
                UsbDirection::In => Direction::In,
                UsbDirection::Out => Direction::Out,
            },
            request_type: match req.request_type {
                control::RequestType::Standard => RequestType::Standard,
                control::RequestType::Class => RequestType::Class,
                control::RequestType::Vendor => RequestType::Vendor,
                _ => RequestType::Reserved,
            },
            recipient: match req.recipient {
                control::Recipient::Device => Recipient::Device,
                control::Recipient::Interface => Recipient::Interface,
                control::Recipient::Endpoint => Recipient::Endpoint,
                control::Recipient::Other => Recipient::Other,
                _ => Recipient::Reserved,
            },
            request: req.request,
            value: req.value,
            index: req.index,
            length: req.length,
        }
    }

    /// Builds the device: one vendor-class interface with no endpoints.
    pub fn build_device<D>(
        driver: D,
        storage: &'static mut UsbDeviceStorage,
        handler: &'static mut VendorControl,
        strings: UsbDeviceStrings,
    ) -> embassy_usb::UsbDevice<'static, D>
    where
        D: embassy_usb::driver::Driver<'static>,
    {
        let mut config = embassy_usb::Config::new(board::USB_VID, board::USB_PID);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        config.max_packet_size_0 = MAX_PACKET_SIZE;
        config.max_power = 100;

        let mut builder = embassy_usb::Builder::new(
            driver,
            config,
            &mut storage.config_descriptor,
            &mut storage.bos_descriptor,
            &mut storage.msos_descriptor,
            &mut storage.control_buf,
        );

        let label = builder.string();
        {
            let mut function = builder.function(VENDOR_CLASS, 0, 0);
            let mut interface = function.interface();
            let _alt = interface.alt_setting(VENDOR_CLASS, 0, 0, Some(label));
        }
        handler.interface_string = Some((label, strings.calibration_interface));
        builder.handler(handler);

        builder.build()
    }
}
