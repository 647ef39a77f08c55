//! Picking the logical middle of a joint from its recorded limits.
//!
//! The plain midpoint of `min..max` is wrong when the travel straddles the
//! encoder wrap (for instance `4000 -> 4095 -> 0 -> 100`). A second candidate
//! assumes the wrap and lifts `min` by a full turn. The independently sampled
//! natural middle of the joint decides between them.

use crate::error::CalibrationResult;
use crate::offset::{ENCODER_RESOLUTION, compute_homing_offset, logical_position, register_offset};
use crate::record::MotorCalibration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MiddleKind {
    Simple,
    Overflow,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MiddleChoice {
    pub value: u16,
    pub kind: MiddleKind,
}

/// `(min + max) / 2`, floored.
pub fn simple_middle(range_min: u16, range_max: u16) -> u16 {
    ((range_min as u32 + range_max as u32) / 2) as u16
}

/// Midpoint assuming the range crosses 0/4095, folded back into the encoder range.
pub fn overflow_middle(range_min: u16, range_max: u16) -> u16 {
    let turn = ENCODER_RESOLUTION as u32;
    let mid = (range_max as u32 + range_min as u32 + turn) / 2;
    if mid >= turn { (mid - turn) as u16 } else { mid as u16 }
}

/// Shortest distance between two encoder readings, going either way round.
pub fn circular_distance(a: u16, b: u16) -> u16 {
    let d = (a as i32 - b as i32).rem_euclid(ENCODER_RESOLUTION);
    d.min(ENCODER_RESOLUTION - d) as u16
}

/// Candidate closest to the sampled natural middle. Ties keep the simple one.
pub fn reconcile_middle(range_min: u16, range_max: u16, natural: u16) -> MiddleChoice {
    let simple = simple_middle(range_min, range_max);
    let overflow = overflow_middle(range_min, range_max);
    if circular_distance(overflow, natural) < circular_distance(simple, natural) {
        MiddleChoice {
            value: overflow,
            kind: MiddleKind::Overflow,
        }
    } else {
        MiddleChoice {
            value: simple,
            kind: MiddleKind::Simple,
        }
    }
}

/// Calibration for a motor swept with a zero homing offset.
///
/// The reconciled middle becomes logical 2048 and the raw limits are moved
/// into the resulting logical frame. The offset is the one the register will
/// hold, so a middle at raw 0 lands on logical 2047.
pub fn calibrate_from_limits(
    name: &str,
    id: u8,
    raw_min: u16,
    raw_max: u16,
    natural: u16,
) -> CalibrationResult<MotorCalibration> {
    let middle = reconcile_middle(raw_min, raw_max, natural);
    let offset = register_offset(compute_homing_offset(middle.value));
    log::debug!(
        "{name}: raw {raw_min}..{raw_max}, natural {natural}, {:?} middle {}, offset {offset}",
        middle.kind,
        middle.value
    );
    MotorCalibration::new(
        name,
        id,
        offset,
        logical_position(raw_min, offset),
        logical_position(raw_max, offset),
    )
}
