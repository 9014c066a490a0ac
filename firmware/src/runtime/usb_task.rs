use embassy_stm32 as hal;
use embassy_stm32::Peri;
use static_cell::StaticCell;

use crate::board::UsbDeviceStrings;
use crate::usb::{self, AgentCell, UsbDeviceStorage, VendorControl};

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

static USB_STORAGE: StaticCell<UsbDeviceStorage> = StaticCell::new();
static VENDOR_CONTROL: StaticCell<VendorControl> = StaticCell::new();

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
    agent: &'static AgentCell,
) -> ! {
    let storage = USB_STORAGE.init(UsbDeviceStorage::new());
    let handler = VENDOR_CONTROL.init(VendorControl::new(agent));
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);

    let strings = UsbDeviceStrings {
        serial_number: Some(embassy_stm32::uid::uid_hex()),
        ..UsbDeviceStrings::default()
    };
    let mut device = usb::build_device(driver, storage, handler, strings);

    defmt::info!("usb: device built, waiting for host");
    device.run().await
}
