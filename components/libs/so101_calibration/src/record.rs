//! Calibration records: static motor description, per-motor calibration and
//! the per-arm collection.

use crate::error::{CalibrationError, CalibrationResult, OutOfRange};
use crate::offset::{ENCODER_RESOLUTION, MAX_OFFSET, MIN_REGISTER_OFFSET};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::RangeInclusive;

/// Highest position a 12-bit encoder reports.
pub const MAX_POSITION: u16 = (ENCODER_RESOLUTION - 1) as u16;

/// Addresses a motor may answer on. 0 is reserved, 253..=255 include broadcast.
pub const MOTOR_IDS: RangeInclusive<u8> = 1..=252;

pub fn check_motor_id(id: u8) -> CalibrationResult<u8> {
    if MOTOR_IDS.contains(&id) {
        Ok(id)
    } else {
        Err(CalibrationError::InvalidMotorId(id))
    }
}

// =========================================================================
// Static motor description
// =========================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotorSpec {
    /// Bus address, 1..=252.
    pub id: u8,
    /// Unique within an arm.
    pub name: String,
    pub encoder_resolution: u16,
}

impl MotorSpec {
    pub fn new(id: u8, name: impl Into<String>) -> CalibrationResult<Self> {
        Ok(Self::at(check_motor_id(id)?, name))
    }

    fn at(id: u8, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            encoder_resolution: ENCODER_RESOLUTION as u16,
        }
    }
}

/// The six STS3215 joints of an SO-101 arm, in bus order.
pub fn so101_motors() -> Vec<MotorSpec> {
    [
        (1, "shoulder_pan"),
        (2, "shoulder_lift"),
        (3, "elbow_flex"),
        (4, "wrist_flex"),
        (5, "wrist_roll"),
        (6, "gripper"),
    ]
    .into_iter()
    .map(|(id, name)| MotorSpec::at(id, name))
    .collect()
}

// =========================================================================
// Per-motor calibration
// =========================================================================

/// Homing offset plus logical travel limits for one motor.
///
/// Limits are expressed after the offset is applied. A valid record always
/// has `range_min < range_max <= 4095` and an offset inside the register
/// range; the middle of the joint does not have to sit inside the limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorCalibration {
    pub id: u8,
    pub homing_offset: i16,
    pub range_min: u16,
    pub range_max: u16,
}

impl MotorCalibration {
    /// Build a record, rejecting degenerate ranges and out-of-register offsets.
    pub fn new(
        name: &str,
        id: u8,
        homing_offset: i16,
        range_min: u16,
        range_max: u16,
    ) -> CalibrationResult<Self> {
        let cal = Self {
            id,
            homing_offset,
            range_min,
            range_max,
        };
        cal.check(name)?;
        Ok(cal)
    }

    /// Re-check the invariants of a record that came from outside (e.g. disk).
    ///
    /// The offset must be one the register can hold, so a stored record
    /// always matches what the device reports back.
    pub fn check(&self, name: &str) -> CalibrationResult<()> {
        check_motor_id(self.id)?;
        if self.range_min >= self.range_max || self.range_max > MAX_POSITION {
            return Err(CalibrationError::DegenerateCalibration {
                name: name.to_string(),
                range_min: self.range_min,
                range_max: self.range_max,
            });
        }
        if !(MIN_REGISTER_OFFSET..=MAX_OFFSET).contains(&self.homing_offset) {
            return Err(CalibrationError::OffsetOutOfRange {
                name: name.to_string(),
                offset: self.homing_offset,
            });
        }
        Ok(())
    }

    /// Inclusive bounds check of a goal position.
    pub fn validate(&self, target: u16) -> bool {
        (self.range_min..=self.range_max).contains(&target)
    }

    /// Like [`Self::validate`] but returns the valid window on failure.
    pub fn check_goal(&self, target: u16) -> Result<(), OutOfRange> {
        if self.validate(target) {
            Ok(())
        } else {
            Err(OutOfRange {
                id: self.id,
                requested: target,
                range_min: self.range_min,
                range_max: self.range_max,
            })
        }
    }

    /// Usable travel in logical ticks.
    pub fn width(&self) -> u16 {
        self.range_max.saturating_sub(self.range_min)
    }
}

// =========================================================================
// Whole arm
// =========================================================================

/// Motor name to calibration, one entry per physical motor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArmCalibration {
    motors: BTreeMap<String, MotorCalibration>,
}

impl ArmCalibration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, cal: MotorCalibration) -> Option<MotorCalibration> {
        self.motors.insert(name.into(), cal)
    }

    pub fn get(&self, name: &str) -> Option<&MotorCalibration> {
        self.motors.get(name)
    }

    pub fn len(&self) -> usize {
        self.motors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.motors.is_empty()
    }

    /// Entries sorted by bus id.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &MotorCalibration)> {
        let mut entries: Vec<_> = self
            .motors
            .iter()
            .map(|(name, cal)| (name.as_str(), cal))
            .collect();
        entries.sort_by_key(|(_, cal)| cal.id);
        entries.into_iter()
    }

    /// Overwrite entries with the ones in `other`, keep everything else.
    pub fn merge(&mut self, other: ArmCalibration) {
        self.motors.extend(other.motors);
    }

    /// Check every entry.
    pub fn check(&self) -> CalibrationResult<()> {
        self.motors.iter().try_for_each(|(name, cal)| cal.check(name))
    }

    /// Calibration for a bus id.
    pub fn by_id(&self, id: u8) -> Option<(&str, &MotorCalibration)> {
        self.motors
            .iter()
            .find(|(_, cal)| cal.id == id)
            .map(|(name, cal)| (name.as_str(), cal))
    }
}
