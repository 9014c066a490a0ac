#![cfg_attr(not(target_os = "none"), allow(dead_code))]

//! Board constants for the iCEpick agent.

// Both register windows assume the FPGA soft-core memory map, where the
// calibration gateware decodes these addresses. Nothing is mapped there on a
// bare STM32G0B1; the bus must be bridged to the FPGA before any access.

/// Base address of the misc register window (boot, VIO PDM).
pub const MISC_BASE: usize = 0x8000_0000;
/// Base address of the calibration register window (I/O, sense, clocks).
pub const CALIB_BASE: usize = 0x8100_0000;

/// Sense scheduler pacing; one sample per USB frame.
pub const FRAME_PERIOD_US: u64 = 1_000;

/// Run the blocking survey and I/O self test before USB comes up.
pub const BOOT_DIAGNOSTICS: bool = true;

pub const USB_VID: u16 = 0x1D50;
pub const USB_PID: u16 = 0x6149;

/// User-visible strings advertised in the USB descriptors.
#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    /// Unique serial number string descriptor (optional).
    pub serial_number: Option<&'static str>,
    /// Label for the vendor calibration interface.
    pub calibration_interface: &'static str,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "iCEpick",
            product: "iCEpick calibration agent",
            serial_number: None,
            calibration_interface: "iCEpick calibration",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_do_not_overlap() {
        assert!(CALIB_BASE - MISC_BASE >= 0x100);
    }

    #[test]
    fn windows_follow_the_soft_core_map() {
        assert_eq!(MISC_BASE, 0x8000_0000);
        assert_eq!(CALIB_BASE, MISC_BASE + 0x0100_0000);
    }

    #[test]
    fn default_strings_name_the_board() {
        let strings = UsbDeviceStrings::default();
        assert_eq!(strings.product, "iCEpick calibration agent");
        assert!(strings.serial_number.is_none());
    }
}
