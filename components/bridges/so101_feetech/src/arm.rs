//! Position control of a calibrated arm.
//!
//! Goals are in the logical frame the devices report once calibrated. A
//! multi-motor goal is checked against every motor's limits before anything
//! is transmitted.

use crate::bus::{ServoBus, SharedBus};
use crate::error::{BusError, GoalRejected, RejectedGoal, SessionError, SessionResult};
use crate::registers::{DEFAULT_D_GAIN, DEFAULT_I_GAIN, DEFAULT_P_GAIN, MODE_POSITION, Register};
use so101_calibration::{ArmCalibration, MotorCalibration};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub struct Arm<B> {
    bus: SharedBus<B>,
    /// Sorted by bus id.
    motors: Vec<(String, MotorCalibration)>,
}

impl<B: ServoBus> Arm<B> {
    pub fn new(bus: SharedBus<B>, calibration: &ArmCalibration) -> Self {
        let motors = calibration
            .iter()
            .map(|(name, cal)| (name.to_string(), *cal))
            .collect();
        Self { bus, motors }
    }

    pub fn motor_names(&self) -> impl Iterator<Item = &str> {
        self.motors.iter().map(|(name, _)| name.as_str())
    }

    pub fn calibration(&self, name: &str) -> Option<&MotorCalibration> {
        self.motors.iter().find(|(n, _)| n == name).map(|(_, cal)| cal)
    }

    fn require(&self, name: &str) -> SessionResult<&MotorCalibration> {
        self.calibration(name)
            .ok_or_else(|| SessionError::UnknownMotor(name.to_string()))
    }

    /// Position mode and the default position loop gains on every motor.
    pub fn configure(&mut self) -> SessionResult<()> {
        for (name, cal) in &self.motors {
            self.bus.exclusive(|bus| {
                bus.set_torque(cal.id, false)?;
                bus.set_lock(cal.id, false)?;
                bus.write_register(cal.id, Register::OperatingMode, MODE_POSITION)?;
                bus.write_register(cal.id, Register::PositionP, DEFAULT_P_GAIN)?;
                bus.write_register(cal.id, Register::PositionI, DEFAULT_I_GAIN)?;
                bus.write_register(cal.id, Register::PositionD, DEFAULT_D_GAIN)?;
                bus.set_lock(cal.id, true)
            })?;
            log::debug!("{name}: position mode, P={DEFAULT_P_GAIN} I={DEFAULT_I_GAIN} D={DEFAULT_D_GAIN}");
        }
        Ok(())
    }

    pub fn set_torque(&mut self, enabled: bool) -> SessionResult<()> {
        for (_, cal) in &self.motors {
            self.bus.set_torque(cal.id, enabled)?;
        }
        log::info!("torque {}", if enabled { "on" } else { "off" });
        Ok(())
    }

    pub fn present_positions(&mut self) -> SessionResult<BTreeMap<String, u16>> {
        let mut positions = BTreeMap::new();
        for (name, cal) in &self.motors {
            positions.insert(name.clone(), self.bus.read_position(cal.id)?);
        }
        Ok(positions)
    }

    /// Move several motors. Every goal is validated first; if one is out of
    /// its motor's range nothing is sent and all offending goals are reported.
    pub fn set_goal_positions(&mut self, goals: &BTreeMap<String, u16>) -> SessionResult<()> {
        let mut targets = Vec::with_capacity(goals.len());
        let mut rejected = Vec::new();
        for (name, &goal) in goals {
            let cal = self.require(name)?;
            match cal.check_goal(goal) {
                Ok(()) => targets.push((cal.id, goal)),
                Err(detail) => rejected.push(RejectedGoal {
                    motor: name.clone(),
                    detail,
                }),
            }
        }
        if !rejected.is_empty() {
            return Err(GoalRejected(rejected).into());
        }

        self.bus.exclusive(|bus| {
            targets
                .iter()
                .try_for_each(|&(id, goal)| bus.write_goal_position(id, goal))
        })?;
        Ok(())
    }

    /// Hold every motor where it is, then release torque.
    ///
    /// Keeps going past failures and returns them.
    pub fn stop(&mut self) -> Vec<(String, BusError)> {
        let mut failures = Vec::new();
        for (name, cal) in &self.motors {
            let result = self.bus.exclusive(|bus| {
                let here = bus.read_position(cal.id)?;
                bus.write_goal_position(cal.id, here)?;
                bus.set_torque(cal.id, false)
            });
            if let Err(e) = result {
                log::warn!("{name}: stop failed: {e}");
                failures.push((name.clone(), e));
            }
        }
        failures
    }
}

// =========================================================================
// Telemetry
// =========================================================================

/// One poll of every motor. `None` where the read failed.
pub type TelemetryFrame = BTreeMap<String, Option<u16>>;

/// Background position polling. Stops when dropped.
pub struct Telemetry {
    frames: Receiver<TelemetryFrame>,
    stop: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl Telemetry {
    pub fn frames(&self) -> &Receiver<TelemetryFrame> {
        &self.frames
    }

    pub fn stop(self) {}
}

impl Drop for Telemetry {
    fn drop(&mut self) {
        // Closing the channel wakes the poller.
        self.stop.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::warn!("telemetry thread panicked");
            }
        }
    }
}

impl<B: ServoBus + Send + 'static> Arm<B> {
    /// Poll present positions every `interval` on a separate thread.
    ///
    /// Each read holds the bus for one transaction only, so offset and limit
    /// updates made under [`SharedBus::exclusive`] are never split by it.
    pub fn spawn_telemetry(&self, interval: Duration) -> std::io::Result<Telemetry> {
        let mut bus = self.bus.clone();
        let motors: Vec<(String, u8)> = self
            .motors
            .iter()
            .map(|(name, cal)| (name.clone(), cal.id))
            .collect();
        let (frame_tx, frames) = mpsc::channel();
        let (stop, stop_rx) = mpsc::channel::<()>();

        let handle = thread::Builder::new()
            .name("so101-telemetry".into())
            .spawn(move || {
                loop {
                    let frame: TelemetryFrame = motors
                        .iter()
                        .map(|(name, id)| (name.clone(), bus.read_position(*id).ok()))
                        .collect();
                    if frame_tx.send(frame).is_err() {
                        break;
                    }
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => continue,
                        _ => break,
                    }
                }
                log::debug!("telemetry stopped");
            })?;

        Ok(Telemetry {
            frames,
            stop: Some(stop),
            handle: Some(handle),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimulatedBus, SimulatedMotor};

    fn arm() -> (SharedBus<SimulatedBus>, Arm<SimulatedBus>) {
        let bus = SharedBus::new(
            SimulatedBus::new()
                .with_motor(1, SimulatedMotor::at(2048))
                .with_motor(6, SimulatedMotor::at(2048)),
        );
        let mut calibration = ArmCalibration::new();
        calibration.insert(
            "shoulder_pan",
            MotorCalibration::new("shoulder_pan", 1, 0, 1000, 3000).unwrap(),
        );
        calibration.insert(
            "gripper",
            MotorCalibration::new("gripper", 6, 0, 2000, 3500).unwrap(),
        );
        (bus.clone(), Arm::new(bus, &calibration))
    }

    #[test]
    fn names_follow_bus_order() {
        let (_, arm) = arm();
        assert_eq!(arm.motor_names().collect::<Vec<_>>(), vec!["shoulder_pan", "gripper"]);
    }

    #[test]
    fn configure_writes_gains_and_relocks() {
        let (bus, mut arm) = arm();
        arm.configure().unwrap();
        bus.exclusive(|sim| {
            let m = sim.motor(6).unwrap();
            assert_eq!(m.gains, [DEFAULT_P_GAIN, DEFAULT_I_GAIN, DEFAULT_D_GAIN]);
            assert_eq!(m.operating_mode, MODE_POSITION);
            assert!(m.locked);
        });
    }

    #[test]
    fn unknown_motor_is_refused() {
        let (_, mut arm) = arm();
        let goals = BTreeMap::from([("elbow".to_string(), 2000)]);
        assert!(matches!(
            arm.set_goal_positions(&goals),
            Err(SessionError::UnknownMotor(name)) if name == "elbow"
        ));
    }
}
