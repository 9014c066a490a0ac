use embassy_time::{Duration, Ticker};
use icepick_core::sense::TickOutcome;

use crate::board;
use crate::status;
use crate::usb::AgentCell;

/// Paces the sense scheduler at one step per frame while the host has the
/// device configured.
#[embassy_executor::task]
pub async fn run(agent: &'static AgentCell) -> ! {
    let mut ticker = Ticker::every(Duration::from_micros(board::FRAME_PERIOD_US));

    loop {
        ticker.next().await;
        if !status::usb_configured() {
            continue;
        }

        status::record_frame();
        let outcome = agent.lock(|agent| agent.borrow_mut().on_frame());
        if let TickOutcome::Captured(sample) = outcome {
            defmt::trace!(
                "sense: {} #{} chg={}",
                sample.channel.label(),
                sample.index,
                sample.sample.charge
            );
            if sample.finished_run() {
                defmt::info!(
                    "frame: run complete after {} samples ({} stalls so far)",
                    sample.index + 1,
                    status::snapshot().stalls
                );
            }
        }
    }
}
