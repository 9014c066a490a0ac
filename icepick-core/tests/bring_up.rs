mod support;

use icepick_core::agent::{Agent, AgentConfig};
use icepick_core::bringup::{BringUp, IoFailure, IoStage, SurveyStep};
use icepick_core::channels::{IO_SENSE_CHANNELS, SenseChannel};
use icepick_core::console::{ConsoleOutcome, run_line};
use icepick_core::math::{SenseCalibration, compensate_vsense, convert_sense};
use icepick_core::protocol::{MAX_RESPONSE_LEN, Response, VendorCommand};
use icepick_core::regs::{RawSenseSample, calib};
use support::{BenchBus, bench, distinct_charges};

#[test]
fn blocking_sense_waits_for_done() {
    let mut regs = bench(distinct_charges());
    regs.calib_bus().latency = 5;

    let reading = BringUp::new(&mut regs, SenseCalibration::REFERENCE)
        .sense_blocking(SenseChannel::V3v3);

    let charge = distinct_charges()[8];
    assert_eq!(
        reading.sample,
        RawSenseSample {
            charge,
            discharge: BenchBus::discharge_for(charge)
        }
    );
    assert_eq!(reading.value, convert_sense(charge, SenseCalibration::REFERENCE));
    assert!(regs.calib_bus().latch().read_count(calib::SENSE_CSR) >= 6);
}

#[test]
fn survey_reads_rails_then_probes_a0() {
    let mut regs = bench(distinct_charges());
    let report = BringUp::new(&mut regs, SenseCalibration::REFERENCE).survey();

    let order: Vec<SenseChannel> = report.iter().map(|entry| entry.reading.channel).collect();
    assert_eq!(
        order,
        [
            SenseChannel::Gnd,
            SenseChannel::V1v2,
            SenseChannel::V3v3,
            SenseChannel::Vio,
            SenseChannel::Vsense,
            SenseChannel::A0,
            SenseChannel::A0,
            SenseChannel::A0,
            SenseChannel::A0
        ]
    );
    assert_eq!(regs.calib_bus().triggered, order);

    let steps: Vec<SurveyStep> = report.iter().map(|entry| entry.step).collect();
    assert_eq!(
        steps[4..],
        [
            SurveyStep::Rail,
            SurveyStep::Floating,
            SurveyStep::PulledUp,
            SurveyStep::PulledDown,
            SurveyStep::Released
        ]
    );

    let vsense_raw = convert_sense(distinct_charges()[3], SenseCalibration::REFERENCE);
    assert_eq!(report[4].reading.value, compensate_vsense(vsense_raw));
    assert_eq!(
        report[3].reading.value,
        convert_sense(distinct_charges()[2], SenseCalibration::REFERENCE)
    );

    assert_eq!(regs.calib_bus().latch().peek(calib::IO_PULL_ENA), 0);
    assert_eq!(regs.calib_bus().latch().peek(calib::IO_PULL_DIR), 0);
}

#[test]
fn io_self_test_passes_on_a_healthy_bank() {
    let mut regs = bench(distinct_charges());
    let report = BringUp::new(&mut regs, SenseCalibration::REFERENCE).io_self_test();

    assert!(report.iter().all(|check| check.passed()));
    for (check, channel) in report.iter().zip(IO_SENSE_CHANNELS) {
        assert_eq!(check.channel, channel);
    }
}

#[test]
fn stuck_pin_reports_its_first_failed_stage() {
    let mut regs = bench(distinct_charges());
    regs.calib_bus().stuck_low = 1 << 2;

    let report = BringUp::new(&mut regs, SenseCalibration::REFERENCE).io_self_test();

    assert_eq!(
        report[2].failure,
        Some(IoFailure {
            stage: IoStage::DriveHigh,
            expected: 1 << 2,
            observed: 0
        })
    );
    assert_eq!(report[2].to_string(), "IO[2] (a2) - 000 - err drive high");
    assert_eq!(report.iter().filter(|check| !check.passed()).count(), 1);
}

#[test]
fn console_session_runs_a_sense_capture() {
    let mut agent = Agent::new(bench(distinct_charges()), AgentConfig::default());
    let mut buf = [0u8; MAX_RESPONSE_LEN];

    let started = run_line(&mut agent, "sense start vio,3v3 count=3", &mut buf).expect("start");
    assert!(matches!(
        started,
        ConsoleOutcome::Request(Response::Accepted(VendorCommand::SenseStart { .. }))
    ));

    let ticked = run_line(&mut agent, "tick 10", &mut buf).expect("tick");
    assert_eq!(
        ticked,
        ConsoleOutcome::Ticked {
            frames: 10,
            captured: 6
        }
    );

    let result = run_line(&mut agent, "sense result", &mut buf).expect("result");
    assert_eq!(
        result,
        ConsoleOutcome::Request(Response::Data {
            command: VendorCommand::SenseResult,
            len: 48
        })
    );

    let layout = agent.scheduler().layout();
    assert_eq!(layout.channel_for(0), Some(SenseChannel::Vio));
    assert_eq!(layout.channel_for(1), Some(SenseChannel::V3v3));
    let first = RawSenseSample::from_bytes(buf[..8].try_into().expect("eight bytes"));
    assert_eq!(first.charge, distinct_charges()[2]);

    let ConsoleOutcome::Status(status) = run_line(&mut agent, "status", &mut buf).expect("status")
    else {
        panic!("expected status");
    };
    assert_eq!(status.frame, 10);
    assert_eq!(status.completed, 6);
    assert_eq!(status.total, 6);
}

#[test]
fn console_io_diag_uses_the_bank() {
    let mut agent = Agent::new(bench(distinct_charges()), AgentConfig::default());
    let mut buf = [0u8; 0];

    let ConsoleOutcome::IoTest(report) = run_line(&mut agent, "diag io", &mut buf).expect("diag")
    else {
        panic!("expected io report");
    };
    assert!(report.iter().all(|check| check.passed()));
}
