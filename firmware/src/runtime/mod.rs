use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_sync::blocking_mutex::Mutex;
use icepick_core::agent::{Agent, AgentConfig};
use icepick_core::regs::IcepickRegisters;
use static_cell::StaticCell;

use crate::board;
use crate::hw::{self, MmioBus};
use crate::usb::AgentCell;

mod diagnostics;
mod frame_task;
mod usb_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

static AGENT: StaticCell<AgentCell> = StaticCell::new();

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals { USB, PA11, PA12, .. } = hal::init(config);

    // SAFETY: the only binding of the register windows.
    let mut regs: IcepickRegisters<MmioBus> = unsafe { hw::board_registers() };
    defmt::info!("boot: word={=u32:#x}", regs.boot_word());

    let config = AgentConfig::REFERENCE;
    if board::BOOT_DIAGNOSTICS {
        diagnostics::run(&mut regs, config.sense);
    }

    let agent = AGENT.init(Mutex::new(RefCell::new(Agent::new(regs, config))));

    spawner
        .spawn(usb_task::run(USB, PA12, PA11, agent))
        .expect("failed to spawn USB task");
    spawner
        .spawn(frame_task::run(agent))
        .expect("failed to spawn frame task");

    core::future::pending::<()>().await;
}
