//! Homing-offset math for 12-bit absolute encoders.
//!
//! The servo reports `present = (physical - homing_offset) mod 4096`. Picking
//! the offset therefore moves the logical origin of the joint. Two ways of
//! deriving it are supported:
//!
//! - [`compute_homing_offset`]: the joint sits at its physical middle, the
//!   offset is chosen so the next read returns [`LOGICAL_CENTER`].
//! - [`homing_offset_from_probe`]: the relation between offset sign and
//!   reported motion is not known, so the device is probed twice (offset `0`
//!   then offset [`PROBE_STEP`]) and the direction is read from the result.

/// Counts per revolution. Readings span `0..=4095` and wrap modulo this.
pub const ENCODER_RESOLUTION: i32 = 4096;

/// Logical center the basic offset form targets.
pub const LOGICAL_CENTER: u16 = 2048;

/// Center used by the direction-sensing probe.
pub const PROBE_CENTER: i32 = 2047;

/// Offset written for the second probe read.
pub const PROBE_STEP: i16 = 10;

/// Two probe readings further apart than this wrapped across 0/4095.
pub const WRAP_THRESHOLD: i32 = 4000;

/// Smallest offset the homing register accepts.
pub const MIN_OFFSET: i16 = -2048;
/// Largest offset the homing register accepts.
pub const MAX_OFFSET: i16 = 2047;

/// Smallest offset the sign-magnitude register can hold. `-2048` saturates to this.
pub const MIN_REGISTER_OFFSET: i16 = -2047;

/// Fold any integer offset into `[-2048, 2047]` modulo 4096.
pub fn wrap_offset(offset: i32) -> i16 {
    let folded = offset.rem_euclid(ENCODER_RESOLUTION);
    let signed = if folded > MAX_OFFSET as i32 {
        folded - ENCODER_RESOLUTION
    } else {
        folded
    };
    signed as i16
}

/// Offset that makes `raw_mid` read back as [`LOGICAL_CENTER`].
pub fn compute_homing_offset(raw_mid: u16) -> i16 {
    wrap_offset(raw_mid as i32 - LOGICAL_CENTER as i32)
}

/// Reading reported by the device for a raw encoder value once `offset` is applied.
pub fn logical_position(raw: u16, offset: i16) -> u16 {
    (raw as i32 - offset as i32).rem_euclid(ENCODER_RESOLUTION) as u16
}

/// Inverse of [`logical_position`].
pub fn raw_position(logical: u16, offset: i16) -> u16 {
    (logical as i32 + offset as i32).rem_euclid(ENCODER_RESOLUTION) as u16
}

/// How the reported position moved when the offset was increased.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// A larger offset lowered the reported position.
    OffsetDecreasesPosition,
    /// A larger offset raised (or kept) the reported position.
    OffsetIncreasesPosition,
}

/// Undo a wrap between two probe readings.
///
/// When the readings are more than [`WRAP_THRESHOLD`] apart one of them
/// crossed the 0/4095 boundary, so the smaller one is lifted by a full turn.
pub fn normalize_probe(pos_a: u16, pos_b: u16) -> (i32, i32) {
    let (mut a, mut b) = (pos_a as i32, pos_b as i32);
    if (a - b).abs() > WRAP_THRESHOLD {
        if a < b {
            a += ENCODER_RESOLUTION;
        } else {
            b += ENCODER_RESOLUTION;
        }
    }
    (a, b)
}

/// Direction of motion between a read at offset `0` and one at [`PROBE_STEP`].
pub fn sense_direction(pos_a: u16, pos_b: u16) -> Direction {
    let (a, b) = normalize_probe(pos_a, pos_b);
    if a > b {
        Direction::OffsetDecreasesPosition
    } else {
        Direction::OffsetIncreasesPosition
    }
}

/// The offset a device actually holds after `offset` is written to it.
///
/// Only `-2048` differs: the register has no encoding for it and stores `-2047`.
pub fn register_offset(offset: i16) -> i16 {
    offset.max(MIN_REGISTER_OFFSET)
}

/// Homing offset derived from the two probe readings.
///
/// `pos_a` is the read with offset `0`, `pos_b` the read with
/// [`PROBE_STEP`]. The result is already folded into the register range.
pub fn homing_offset_from_probe(pos_a: u16, pos_b: u16) -> i16 {
    let (a, _) = normalize_probe(pos_a, pos_b);
    let offset = match sense_direction(pos_a, pos_b) {
        Direction::OffsetDecreasesPosition => a - PROBE_CENTER,
        Direction::OffsetIncreasesPosition => PROBE_CENTER - a,
    };
    wrap_offset(offset)
}
