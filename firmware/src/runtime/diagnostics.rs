use defmt::Display2Format;
use icepick_core::bringup::BringUp;
use icepick_core::math::SenseCalibration;
use icepick_core::regs::IcepickRegisters;

use crate::hw::MmioBus;

/// Blocking boot-time survey, I/O self test and clock probe.
pub fn run(regs: &mut IcepickRegisters<MmioBus>, calibration: SenseCalibration) {
    let mut bring_up = BringUp::new(regs, calibration);

    for entry in bring_up.survey() {
        defmt::info!(
            "sense: {} {}",
            Display2Format(&entry.step),
            Display2Format(&entry.reading)
        );
    }

    let report = bring_up.io_self_test();
    for check in report.iter().filter(|check| !check.passed()) {
        defmt::warn!("io: {}", Display2Format(check));
    }
    defmt::info!(
        "io: {}/{} pins passed",
        report.iter().filter(|check| check.passed()).count(),
        report.len()
    );

    let previous = bring_up.clock_probe();
    defmt::info!(
        "clock: armed probe window (previous xo={=u32:#x} hf={=u32:#x} lf={=u32:#x})",
        previous.xo,
        previous.hf,
        previous.lf
    );
}
