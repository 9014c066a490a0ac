use std::io;

use icepick_core::agent::AgentConfig;

#[allow(dead_code)]
#[path = "../hardware.rs"]
mod hardware;

#[allow(dead_code)]
#[path = "../session.rs"]
mod session;

use session::{Session, TranscriptProfile};

fn main() -> io::Result<()> {
    record_profile(TranscriptProfile::Sense)?;
    record_profile(TranscriptProfile::Gpio)?;
    record_profile(TranscriptProfile::Clock)?;
    Ok(())
}

fn record_profile(profile: TranscriptProfile) -> io::Result<()> {
    let mut session = Session::new(profile, AgentConfig::default())?;
    let script: &[&str] = match profile {
        TranscriptProfile::Sense => &[
            "status",
            "vio 1800mv",
            "sense start gnd,vio,3v3,1v2 count=4",
            "tick 20",
            "sense result",
            "sense start vsense count=8",
            "tick 4",
            "status",
            "tick 4",
            "sense result",
            "sense start mask=0xffff count=9",
            "status",
            "diag sense",
            "calib vio 1200mv 1500mv",
        ],
        TranscriptProfile::Gpio => &[
            "gpio oe 0x3ff",
            "gpio out 0x155",
            "gpio in",
            "gpio oe 0",
            "gpio in",
            "gpio pull-dir 0x3ff",
            "gpio pull-ena 0x3ff",
            "gpio in",
            "gpio pull-dir 0",
            "gpio in",
            "gpio pull-ena 0",
            "diag io",
            "gpio frob 1",
            "help",
        ],
        TranscriptProfile::Clock => &[
            "clock result",
            "clock start 12000000",
            "tick 500",
            "clock result",
            "tick 600",
            "clock result",
            "hftrim 600",
            "diag clock",
            "tick 900",
            "clock result",
            "calib trim 508 516",
            "calib clock 2",
        ],
    };

    for line in script {
        let _ = session.handle_command(line)?;
    }
    Ok(())
}
