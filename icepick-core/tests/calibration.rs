mod support;

use icepick_core::agent::{Agent, AgentConfig};
use icepick_core::calibration::{
    AgentLink, CalibrationError, CalibrationPlan, CalibrationPoint, ClockRun, ClockRuns,
    TrimPoint, TrimSweep, VioPoint, VioSweep,
};
use icepick_core::console::{ConsoleOutcome, run_line};
use icepick_core::protocol::{ClockReadback, DispatchError, vio_pdm_for_millivolts};
use icepick_core::regs::{VIO_ENABLE, misc};
use icepick_core::sense::StartError;
use support::{BenchBus, bench, distinct_charges};

fn bench_agent() -> Agent<BenchBus> {
    Agent::new(bench(distinct_charges()), AgentConfig::default())
}

#[test]
fn vio_sweep_steps_the_rail_and_averages_each_burst() {
    let mut agent = bench_agent();
    let sweep = VioSweep::REFERENCE.between(1_200, 1_400);
    let mut points = Vec::new();

    let measured = sweep
        .run(&mut AgentLink::new(&mut agent, || {}), |point| points.push(point))
        .expect("sweep");

    assert_eq!(measured, 5);
    let charge = distinct_charges()[2];
    let expected: Vec<VioPoint> = [1_200, 1_250, 1_300, 1_350, 1_400]
        .into_iter()
        .map(|millivolts| VioPoint {
            millivolts,
            pdm: vio_pdm_for_millivolts(millivolts),
            charge,
            discharge: BenchBus::discharge_for(charge),
            samples: 20,
        })
        .collect();
    assert_eq!(points, expected);

    let written: Vec<u32> = agent
        .registers()
        .misc_bus()
        .latch()
        .writes_to(misc::VIO_PDM)
        .collect();
    let levels: Vec<u32> = expected
        .iter()
        .map(|point| VIO_ENABLE | u32::from(point.pdm))
        .collect();
    assert_eq!(written, levels);

    // 100 settle frames plus one frame per sample at every level.
    assert_eq!(agent.frame(), 5 * 120);
}

#[test]
fn vio_sweep_gives_up_when_the_burst_never_lands() {
    let mut agent = bench_agent();
    agent.registers().calib_bus().latency = 1_000;
    let sweep = VioSweep {
        settle_frames: 0,
        poll_limit: 3,
        ..VioSweep::REFERENCE.between(1_800, 1_800)
    };

    let result = sweep.run(&mut AgentLink::new(&mut agent, || {}), |_| {});
    assert_eq!(result, Err(CalibrationError::Timeout { step: 0, frames: 3 }));
}

#[test]
fn oversized_burst_surfaces_the_device_rejection() {
    let mut agent = bench_agent();
    let sweep = VioSweep {
        samples: 200,
        ..VioSweep::REFERENCE
    };

    let result = sweep.run(&mut AgentLink::new(&mut agent, || {}), |_| {});
    assert!(matches!(
        result,
        Err(CalibrationError::Link(DispatchError::CapacityExceeded(
            StartError::CapacityExceeded { requested: 200, .. }
        )))
    ));
}

#[test]
fn trim_sweep_reports_hf_frequency_per_code() {
    let mut agent = bench_agent();
    let mut points = Vec::new();

    let measured = TrimSweep::REFERENCE
        .between(510, 514)
        .run(&mut AgentLink::new(&mut agent, || {}), |point| points.push(point))
        .expect("sweep");

    assert_eq!(measured, 5);
    let hz: Vec<u32> = points.iter().map(|point| point.hf_hz).collect();
    assert_eq!(
        hz,
        [47_980_000, 47_990_000, 48_000_000, 48_010_000, 48_020_000]
    );
    assert!(points.iter().all(|point| point.readback.xo == 1_000_000));
    assert_eq!(agent.frame(), 0);
}

#[test]
fn console_trim_sweep_reports_the_last_point() {
    let mut agent = bench_agent();
    let mut buf = [0u8; 16];

    let outcome = run_line(&mut agent, "calib trim 511 513", &mut buf).expect("calib");
    assert_eq!(
        outcome,
        ConsoleOutcome::Calibrated {
            plan: CalibrationPlan::Trim(TrimSweep::REFERENCE.between(511, 513)),
            points: 3,
            last: Some(CalibrationPoint::Trim(TrimPoint {
                trim: 513,
                readback: ClockReadback {
                    xo: 1_000_000,
                    hf: BenchBus::hf_count(1_000_000, 513),
                    lf: 1_000
                },
                hf_hz: 48_010_000
            }))
        }
    );
}

#[test]
fn console_clock_runs_repeat_the_long_window() {
    let mut agent = bench_agent();
    let mut buf = [0u8; 16];

    let outcome = run_line(&mut agent, "calib clock 3", &mut buf).expect("calib");
    assert_eq!(
        outcome,
        ConsoleOutcome::Calibrated {
            plan: CalibrationPlan::Clock(ClockRuns::REFERENCE.repeated(3)),
            points: 3,
            last: Some(CalibrationPoint::Clock(ClockRun {
                run: 2,
                readback: ClockReadback {
                    xo: 10_000_000,
                    hf: BenchBus::hf_count(10_000_000, 0),
                    lf: 10_000
                }
            }))
        }
    );
}

#[test]
fn console_vio_sweep_uses_the_reference_levels() {
    let mut agent = bench_agent();
    let mut buf = [0u8; 16];

    let outcome = run_line(&mut agent, "calib vio", &mut buf).expect("calib");
    let ConsoleOutcome::Calibrated { plan, points, last } = outcome else {
        panic!("unexpected outcome {outcome:?}");
    };
    assert_eq!(plan, CalibrationPlan::Vio(VioSweep::REFERENCE));
    assert_eq!(points, 43);
    assert!(matches!(
        last,
        Some(CalibrationPoint::Vio(VioPoint {
            millivolts: 3_300,
            pdm: 0x0FFF,
            ..
        }))
    ));
}
