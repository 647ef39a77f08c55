mod common;

use common::{ScriptedOperator, so101_bus};
use so101_calibration::{
    ArmCalibration, CalibrationError, CalibrationStore, MotorCalibration, MotorSpec, Role,
    so101_motors,
};
use so101_feetech::sim::Transaction;
use so101_feetech::registers::Register;
use so101_feetech::{
    Arm, CalibrationMode, CalibrationSession, ServoBus, SessionConfig, SessionError, SharedBus,
    SimulatedBus,
};
use std::time::Duration;

fn config(mode: CalibrationMode) -> SessionConfig {
    SessionConfig {
        mode,
        poll_interval: Duration::ZERO,
        settle: Duration::ZERO,
    }
}

fn shoulder_pan() -> Vec<MotorSpec> {
    vec![MotorSpec::new(1, "shoulder_pan").unwrap()]
}

fn device(bus: &SharedBus<SimulatedBus>, id: u8) -> (i16, u16, u16, bool) {
    bus.exclusive(|sim| {
        let m = sim.motor(id).expect("motor on bus");
        (m.homing_offset, m.min_limit, m.max_limit, m.locked)
    })
}

/// Every motor calibrated long ago with a wide window.
fn old_calibration() -> ArmCalibration {
    let mut arm = ArmCalibration::new();
    for spec in so101_motors() {
        arm.insert(
            spec.name.clone(),
            MotorCalibration::new(&spec.name, spec.id, 0, 100, 4000).unwrap(),
        );
    }
    arm
}

#[test]
fn sequential_probe_and_sweep() {
    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(1, 2100)
        .sweep(1, [1800, 2600, 3000, 1500]);

    let outcome = CalibrationSession::new(bus.clone(), shoulder_pan(), config(CalibrationMode::Sequential))
        .run(&mut operator);

    assert!(outcome.is_complete());
    let cal = outcome.calibrated.get("shoulder_pan").copied().unwrap();
    assert_eq!(cal.homing_offset, 53);
    assert_eq!((cal.range_min, cal.range_max), (1447, 2947));
    assert!(operator.progress_updates >= 4);

    // Offset and hardware limits land on the device, EEPROM relocked.
    assert_eq!(device(&bus, 1), (53, 1447, 2947, true));
}

#[test]
fn abort_keeps_finished_motors_and_leaves_the_rest_untouched() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("so101.json");
    let mut store = CalibrationStore::default();
    store.commit(Role::Follower, old_calibration()).unwrap();
    store.save(&path).unwrap();

    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(1, 2100)
        .sweep(1, [1500, 3000])
        .middle(2, 1900)
        .sweep(2, [1000, 2500]);
    operator.abort_at_request = Some(3);

    let mut store = CalibrationStore::load(&path).unwrap();
    let outcome = CalibrationSession::new(bus.clone(), so101_motors(), config(CalibrationMode::Sequential))
        .with_previous(store.calibration(Role::Follower))
        .run(&mut operator);

    assert!(outcome.aborted);
    assert_eq!(outcome.calibrated.len(), 2);
    store.commit(Role::Follower, outcome.calibrated).unwrap();
    store.save(&path).unwrap();

    let reloaded = CalibrationStore::load(&path).unwrap().calibration(Role::Follower);
    let old = old_calibration();
    assert_eq!(reloaded.len(), 6);
    assert_ne!(reloaded.get("shoulder_pan"), old.get("shoulder_pan"));
    assert_ne!(reloaded.get("shoulder_lift"), old.get("shoulder_lift"));
    for name in ["elbow_flex", "wrist_flex", "wrist_roll", "gripper"] {
        assert_eq!(reloaded.get(name), old.get(name), "{name}");
    }

    // The motor in progress got its previous calibration back.
    assert_eq!(device(&bus, 3), (0, 100, 4000, true));
}

#[test]
fn failed_reads_during_sweep_are_skipped() {
    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(1, 2100)
        .sweep(1, [1800, 3000]);
    operator.sweep_read_failures.insert(1, 2);

    let outcome = CalibrationSession::new(bus, shoulder_pan(), config(CalibrationMode::Sequential))
        .run(&mut operator);

    assert!(outcome.is_complete());
    let cal = outcome.calibrated.get("shoulder_pan").copied().unwrap();
    assert_eq!((cal.range_min, cal.range_max), (1747, 2947));
}

#[test]
fn communication_failure_offers_a_restart() {
    let bus = so101_bus();
    bus.exclusive(|sim| sim.fail_reads(1, 1));
    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(1, 2100)
        .sweep(1, [1500, 3000]);
    operator.retries.push_back(true);

    let outcome = CalibrationSession::new(bus, shoulder_pan(), config(CalibrationMode::Sequential))
        .run(&mut operator);

    assert_eq!(operator.retry_requests, vec!["shoulder_pan".to_string()]);
    assert_eq!(operator.middle_requests, 2);
    assert!(outcome.is_complete());
    assert_eq!(outcome.calibrated.get("shoulder_pan").map(|c| c.homing_offset), Some(53));
}

#[test]
fn motionless_sweep_is_not_persisted() {
    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone()).middle(1, 2100);

    let outcome = CalibrationSession::new(bus.clone(), shoulder_pan(), config(CalibrationMode::Sequential))
        .run(&mut operator);

    assert!(outcome.calibrated.is_empty());
    assert_eq!(outcome.failed.len(), 1);
    assert!(matches!(
        &outcome.failed[0].1,
        SessionError::Calibration(CalibrationError::DegenerateCalibration { name, .. }) if name == "shoulder_pan"
    ));
    // No previous calibration: the probe offset is cleared again.
    let (offset, _, _, locked) = device(&bus, 1);
    assert_eq!(offset, 0);
    assert!(locked);
}

#[test]
fn batch_reconciles_middles_from_raw_limits() {
    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(1, 2010)
        .sweep(1, [900, 3100, 2000])
        .middle(2, 3500)
        .sweep(2, [2800, 4000]);
    let motors = vec![
        MotorSpec::new(1, "shoulder_pan").unwrap(),
        MotorSpec::new(2, "shoulder_lift").unwrap(),
    ];

    let outcome = CalibrationSession::new(bus.clone(), motors, config(CalibrationMode::Batch))
        .run(&mut operator);

    assert!(outcome.is_complete());
    assert_eq!(operator.middle_requests, 1);
    assert_eq!(device(&bus, 1), (-48, 948, 3148, true));
    assert_eq!(device(&bus, 2), (1352, 1448, 2648, true));
    let lift = outcome.calibrated.get("shoulder_lift").copied().unwrap();
    assert_eq!((lift.range_min, lift.range_max), (1448, 2648));
}

#[test]
fn batch_follows_a_joint_across_the_encoder_wrap() {
    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(5, 4050)
        .sweep(5, [4000, 4040, 4095, 0, 50, 100]);
    let motors = vec![MotorSpec::new(5, "wrist_roll").unwrap()];

    let outcome = CalibrationSession::new(bus.clone(), motors, config(CalibrationMode::Batch))
        .run(&mut operator);

    assert!(outcome.is_complete(), "{:?}", outcome.failed);
    let roll = outcome.calibrated.get("wrist_roll").copied().unwrap();
    assert_eq!(roll.homing_offset, -2046);
    assert_eq!((roll.range_min, roll.range_max), (1950, 2146));
    assert_eq!(device(&bus, 5), (-2046, 1950, 2146, true));

    // The joint now reads inside its window at both ends of the travel.
    for physical in [4000, 100] {
        bus.exclusive(|sim| sim.set_physical(5, physical));
        let pos = bus.exclusive(|sim| sim.read_position(5)).unwrap();
        assert!(roll.validate(pos), "{physical} reads {pos}");
    }
}

#[test]
fn batch_abort_restores_previous_offsets() {
    let bus = so101_bus();
    let mut operator = ScriptedOperator::new(bus.clone()).middle(1, 2010).sweep(1, [900, 3100]);
    operator.abort_sweep = true;
    let mut previous = ArmCalibration::new();
    previous.insert(
        "shoulder_pan",
        MotorCalibration::new("shoulder_pan", 1, -300, 500, 3500).unwrap(),
    );

    let outcome = CalibrationSession::new(bus.clone(), shoulder_pan(), config(CalibrationMode::Batch))
        .with_previous(previous)
        .run(&mut operator);

    assert!(outcome.aborted);
    assert!(outcome.calibrated.is_empty());
    assert_eq!(device(&bus, 1), (-300, 500, 3500, true));
}

#[test]
fn telemetry_never_splits_the_offset_probe() {
    let bus = so101_bus();
    let mut others = ArmCalibration::new();
    for (name, cal) in old_calibration().iter().filter(|(_, c)| c.id != 1) {
        others.insert(name, *cal);
    }
    let arm = Arm::new(bus.clone(), &others);
    let telemetry = arm.spawn_telemetry(Duration::from_millis(1)).unwrap();

    let mut operator = ScriptedOperator::new(bus.clone())
        .middle(1, 2100)
        .sweep(1, [1500, 3000]);
    let outcome = CalibrationSession::new(
        bus.clone(),
        shoulder_pan(),
        SessionConfig {
            settle: Duration::from_millis(5),
            ..config(CalibrationMode::Sequential)
        },
    )
    .run(&mut operator);
    drop(telemetry);
    assert!(outcome.is_complete());

    let log = bus.exclusive(|sim| sim.transactions().to_vec());
    let first = log
        .iter()
        .position(|t| matches!(t, Transaction::Write { id: 1, reg: Register::HomingOffset, .. }))
        .unwrap();
    let last = log
        .iter()
        .position(|t| {
            *t == Transaction::Write {
                id: 1,
                reg: Register::HomingOffset,
                value: 53,
            }
        })
        .unwrap();
    assert!(log[first..=last + 1].iter().all(|t| t.id() == 1));
    assert_eq!(
        log[last + 1],
        Transaction::Read {
            id: 1,
            reg: Register::PresentPosition
        }
    );
    assert!(log.iter().any(|t| t.id() != 1), "telemetry polled the other motors");
}
