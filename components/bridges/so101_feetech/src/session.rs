//! Interactive calibration of the motors of one arm.
//!
//! Two procedures are available:
//!
//! - [`CalibrationMode::Sequential`] handles one motor at a time. The homing
//!   offset comes from a two-write probe around the operator's middle pose,
//!   then the joint is swept to record its logical limits.
//! - [`CalibrationMode::Batch`] zeroes every offset, samples the natural
//!   middles, sweeps all joints at once and derives offsets and limits from
//!   the raw extremes. Samples are unwrapped around each natural middle, so a
//!   joint whose travel crosses 0/4095 keeps a usable range.
//!
//! Each step function takes only what it needs and returns its result. The
//! session accumulates finished motors into an [`ArmCalibration`] that the
//! caller commits to the store; a motor that fails or is aborted never lands
//! in it, and its previous device state is restored when known.

use crate::bus::{ServoBus, SharedBus};
use crate::error::{BusError, BusResult, SessionError, SessionResult};
use crate::operator::{Operator, Signal, SweepRow};
use crate::registers::{MODE_POSITION, Register};
use so101_calibration::offset::PROBE_STEP;
use so101_calibration::{
    ArmCalibration, CalibrationError, MotorCalibration, MotorSpec, RangeRecorders,
    calibrate_from_limits, homing_offset_from_probe, register_offset,
};
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CalibrationMode {
    #[default]
    Sequential,
    Batch,
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMode::Sequential => f.write_str("sequential"),
            CalibrationMode::Batch => f.write_str("batch"),
        }
    }
}

impl FromStr for CalibrationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sequential" => Ok(CalibrationMode::Sequential),
            "batch" => Ok(CalibrationMode::Batch),
            other => Err(format!(
                "unknown calibration mode '{other}' (expected sequential or batch)"
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub mode: CalibrationMode,
    /// Sampling period of a sweep.
    pub poll_interval: Duration,
    /// Wait after an offset write before a reading is trusted.
    pub settle: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::default(),
            poll_interval: Duration::from_millis(20),
            settle: Duration::from_millis(100),
        }
    }
}

/// What a session produced.
#[derive(Debug, Default)]
pub struct SessionOutcome {
    /// Motors that completed every step. Commit these.
    pub calibrated: ArmCalibration,
    /// Motors given up on, with the error that stopped them.
    pub failed: Vec<(String, SessionError)>,
    /// The operator stopped the session early.
    pub aborted: bool,
}

impl SessionOutcome {
    pub fn is_complete(&self) -> bool {
        !self.aborted && self.failed.is_empty()
    }
}

pub struct CalibrationSession<B> {
    bus: SharedBus<B>,
    motors: Vec<MotorSpec>,
    config: SessionConfig,
    previous: ArmCalibration,
}

impl<B: ServoBus> CalibrationSession<B> {
    pub fn new(bus: SharedBus<B>, motors: Vec<MotorSpec>, config: SessionConfig) -> Self {
        Self {
            bus,
            motors,
            config,
            previous: ArmCalibration::new(),
        }
    }

    /// Calibration currently on the devices, restored on abort or failure.
    pub fn with_previous(mut self, previous: ArmCalibration) -> Self {
        self.previous = previous;
        self
    }

    pub fn run(&mut self, operator: &mut dyn Operator) -> SessionOutcome {
        log::info!(
            "{} calibration of {} motor(s)",
            self.config.mode,
            self.motors.len()
        );
        let outcome = match self.config.mode {
            CalibrationMode::Sequential => self.run_sequential(operator),
            CalibrationMode::Batch => self.run_batch(operator),
        };
        log::info!(
            "calibration finished: {} calibrated, {} failed{}",
            outcome.calibrated.len(),
            outcome.failed.len(),
            if outcome.aborted { ", aborted" } else { "" }
        );
        outcome
    }

    // ---------------------------------------------------------------------
    // Sequential
    // ---------------------------------------------------------------------

    fn run_sequential(&mut self, operator: &mut dyn Operator) -> SessionOutcome {
        let mut outcome = SessionOutcome::default();
        let motors = self.motors.clone();
        for spec in &motors {
            loop {
                match self.calibrate_one(spec, operator) {
                    Ok(cal) => {
                        log::info!(
                            "{}: offset {}, range {}..={}",
                            spec.name,
                            cal.homing_offset,
                            cal.range_min,
                            cal.range_max
                        );
                        outcome.calibrated.insert(spec.name.clone(), cal);
                        break;
                    }
                    Err(SessionError::Aborted) => {
                        log::warn!("{}: aborted, discarding", spec.name);
                        self.restore(spec);
                        outcome.aborted = true;
                        return outcome;
                    }
                    Err(e) => {
                        log::warn!("{}: {e}", spec.name);
                        self.restore(spec);
                        if operator.retry(&spec.name, &e) {
                            log::info!("{}: restarting", spec.name);
                            continue;
                        }
                        outcome.failed.push((spec.name.clone(), e));
                        break;
                    }
                }
            }
        }
        outcome
    }

    fn calibrate_one(
        &mut self,
        spec: &MotorSpec,
        operator: &mut dyn Operator,
    ) -> SessionResult<MotorCalibration> {
        let one = std::slice::from_ref(spec);
        self.bus.exclusive(|bus| prepare(bus, spec.id))?;

        if operator.place_at_middle(one) == Signal::Abort {
            return Err(SessionError::Aborted);
        }

        let settle = self.config.settle;
        let offset = self.bus.exclusive(|bus| probe_offset(bus, spec, settle))?;

        operator.sweep_started(one);
        let recorders = RangeRecorders::new([spec.name.as_str()]);
        let recorders = sweep(&mut self.bus, one, recorders, operator, self.config.poll_interval)
            .ok_or(SessionError::Aborted)?;
        let (range_min, range_max) = recorders
            .get(&spec.name)
            .and_then(|r| r.bounds())
            .ok_or_else(|| CalibrationError::NoSamples(spec.name.clone()))?;

        let cal = MotorCalibration::new(&spec.name, spec.id, offset, range_min, range_max)?;
        self.bus.exclusive(|bus| write_back(bus, spec.id, &cal))?;
        Ok(cal)
    }

    // ---------------------------------------------------------------------
    // Batch
    // ---------------------------------------------------------------------

    fn run_batch(&mut self, operator: &mut dyn Operator) -> SessionOutcome {
        let mut outcome = SessionOutcome::default();
        let settle = self.config.settle;

        let mut active = Vec::with_capacity(self.motors.len());
        for spec in &self.motors {
            let zeroed = self.bus.exclusive(|bus| {
                prepare(bus, spec.id)?;
                bus.write_homing_offset(spec.id, 0)?;
                settle_read(bus, spec.id, settle)
            });
            match zeroed {
                Ok(()) => active.push(spec.clone()),
                Err(e) => {
                    log::warn!("{}: {e}", spec.name);
                    outcome.failed.push((spec.name.clone(), e.into()));
                }
            }
        }
        if active.is_empty() {
            return outcome;
        }

        if operator.place_at_middle(&active) == Signal::Abort {
            self.restore_all(&active);
            outcome.aborted = true;
            return outcome;
        }

        let mut naturals = Vec::with_capacity(active.len());
        for spec in active {
            match self.bus.read_position(spec.id) {
                Ok(pos) => {
                    log::debug!("{}: natural middle {pos}", spec.name);
                    naturals.push((spec, pos));
                }
                Err(e) => {
                    log::warn!("{}: {e}", spec.name);
                    self.restore(&spec);
                    outcome.failed.push((spec.name.clone(), e.into()));
                }
            }
        }
        let swept: Vec<MotorSpec> = naturals.iter().map(|(spec, _)| spec.clone()).collect();
        if swept.is_empty() {
            return outcome;
        }

        operator.sweep_started(&swept);
        let recorders =
            RangeRecorders::anchored(naturals.iter().map(|(spec, n)| (spec.name.as_str(), *n)));
        let Some(recorders) =
            sweep(&mut self.bus, &swept, recorders, operator, self.config.poll_interval)
        else {
            self.restore_all(&swept);
            outcome.aborted = true;
            return outcome;
        };

        for (spec, natural) in &naturals {
            let result = batch_calibration(&recorders, spec, *natural).and_then(|cal| {
                self.bus.exclusive(|bus| write_back(bus, spec.id, &cal))?;
                Ok(cal)
            });
            match result {
                Ok(cal) => {
                    log::info!(
                        "{}: offset {}, range {}..={}",
                        spec.name,
                        cal.homing_offset,
                        cal.range_min,
                        cal.range_max
                    );
                    outcome.calibrated.insert(spec.name.clone(), cal);
                }
                Err(e) => {
                    log::warn!("{}: {e}", spec.name);
                    self.restore(spec);
                    outcome.failed.push((spec.name.clone(), e));
                }
            }
        }
        outcome
    }

    // ---------------------------------------------------------------------
    // Restore
    // ---------------------------------------------------------------------

    /// Put back the previous calibration of `spec`, or a zero offset if there
    /// was none. Failures are logged and otherwise ignored.
    fn restore(&mut self, spec: &MotorSpec) {
        let previous = self.previous.get(&spec.name).copied();
        let result = self.bus.exclusive(|bus| match previous {
            Some(cal) => write_back(bus, spec.id, &cal),
            None => {
                bus.set_lock(spec.id, false)?;
                bus.write_homing_offset(spec.id, 0)?;
                bus.set_lock(spec.id, true)
            }
        });
        match result {
            Ok(()) => log::debug!("{}: previous device state restored", spec.name),
            Err(e) => log::warn!("{}: could not restore previous state: {e}", spec.name),
        }
    }

    fn restore_all(&mut self, motors: &[MotorSpec]) {
        for spec in motors {
            self.restore(spec);
        }
    }
}

fn batch_calibration(
    recorders: &RangeRecorders,
    spec: &MotorSpec,
    natural: u16,
) -> SessionResult<MotorCalibration> {
    let (raw_min, raw_max) = recorders
        .get(&spec.name)
        .and_then(|r| r.bounds())
        .ok_or_else(|| CalibrationError::NoSamples(spec.name.clone()))?;
    Ok(calibrate_from_limits(
        &spec.name, spec.id, raw_min, raw_max, natural,
    )?)
}

// =========================================================================
// Steps
// =========================================================================

/// Torque off, EEPROM unlocked, position mode.
fn prepare<B: ServoBus>(bus: &mut B, id: u8) -> BusResult<()> {
    bus.set_torque(id, false)?;
    bus.set_lock(id, false)?;
    bus.write_register(id, Register::OperatingMode, MODE_POSITION)
}

/// Wait out a register write, then drop the first reading.
fn settle_read<B: ServoBus>(bus: &mut B, id: u8, settle: Duration) -> BusResult<()> {
    thread::sleep(settle);
    bus.read_position(id).map(drop)
}

/// Direction-sensing offset probe. Leaves the computed offset on the device.
fn probe_offset<B: ServoBus>(bus: &mut B, spec: &MotorSpec, settle: Duration) -> BusResult<i16> {
    bus.write_homing_offset(spec.id, 0)?;
    settle_read(bus, spec.id, settle)?;
    let pos_a = bus.read_position(spec.id)?;

    bus.write_homing_offset(spec.id, PROBE_STEP)?;
    settle_read(bus, spec.id, settle)?;
    let pos_b = bus.read_position(spec.id)?;

    let offset = register_offset(homing_offset_from_probe(pos_a, pos_b));
    log::debug!(
        "{}: probe read {pos_a} then {pos_b}, offset {offset}",
        spec.name
    );

    bus.write_homing_offset(spec.id, offset)?;
    settle_read(bus, spec.id, settle)?;
    Ok(offset)
}

/// Sample `motors` into `recorders` until the operator signals. Failed reads
/// are skipped. `None` when the operator aborted.
fn sweep<B: ServoBus>(
    bus: &mut B,
    motors: &[MotorSpec],
    mut recorders: RangeRecorders,
    operator: &mut dyn Operator,
    interval: Duration,
) -> Option<RangeRecorders> {
    let mut current = vec![None; motors.len()];
    loop {
        sample(bus, motors, &mut recorders, &mut current);
        let rows: Vec<SweepRow<'_>> = motors
            .iter()
            .zip(&current)
            .map(|(m, pos)| SweepRow {
                name: &m.name,
                current: *pos,
                bounds: recorders.get(&m.name).and_then(|r| r.bounds()),
            })
            .collect();
        operator.sweep_progress(&rows);

        match operator.poll(interval) {
            None => {}
            Some(Signal::Done) => {
                sample(bus, motors, &mut recorders, &mut current);
                return Some(recorders);
            }
            Some(Signal::Abort) => return None,
        }
    }
}

fn sample<B: ServoBus>(
    bus: &mut B,
    motors: &[MotorSpec],
    recorders: &mut RangeRecorders,
    current: &mut [Option<u16>],
) {
    for (spec, slot) in motors.iter().zip(current.iter_mut()) {
        match bus.read_position(spec.id) {
            Ok(pos) => {
                recorders.observe(&spec.name, pos);
                *slot = Some(pos);
            }
            Err(e) => {
                log::debug!("{}: sample skipped: {e}", spec.name);
                *slot = None;
            }
        }
    }
}

/// Offset, hardware limits, lock. Torque stays off.
fn write_back<B: ServoBus>(bus: &mut B, id: u8, cal: &MotorCalibration) -> BusResult<()> {
    bus.set_torque(id, false)?;
    bus.set_lock(id, false)?;
    bus.write_homing_offset(id, cal.homing_offset)?;
    bus.write_limits(id, cal.range_min, cal.range_max)?;
    bus.set_lock(id, true)
}

// =========================================================================
// Applying a stored calibration
// =========================================================================

#[derive(Debug, Default)]
pub struct ApplyReport {
    pub applied: Vec<String>,
    pub failed: Vec<(String, BusError)>,
}

/// Write a stored calibration to the motors on `bus`.
///
/// Every motor is attempted. A motor whose writes fail is reported once and
/// left out of `applied`.
pub fn apply<B: ServoBus>(bus: &mut B, calibration: &ArmCalibration) -> ApplyReport {
    let mut report = ApplyReport::default();
    for (name, cal) in calibration.iter() {
        match write_back(bus, cal.id, cal) {
            Ok(()) => {
                log::info!(
                    "{name}: applied offset {}, range {}..={}",
                    cal.homing_offset,
                    cal.range_min,
                    cal.range_max
                );
                report.applied.push(name.to_string());
            }
            Err(e) => {
                log::warn!("{name}: {e}");
                report.failed.push((name.to_string(), e));
            }
        }
    }
    report
}
