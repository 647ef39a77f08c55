//! Calibration engine for the 12-bit absolute encoders of an SO-101 arm.
//!
//! A servo reports a raw reading that wraps at 0/4095. Calibration turns it
//! into a stable logical coordinate system: a homing offset the device
//! subtracts from every reading, and a validated `[min, max]` travel window.
//!
//! The crate is pure. Hardware access lives in the bus crate, which feeds raw
//! samples in and writes the resulting [`MotorCalibration`] back.
//!
//! - [`offset`]: homing offset, basic and direction-sensing forms.
//! - [`range`]: running min/max while a joint is swept by hand.
//! - [`middle`]: choosing the middle of a range that may straddle the wrap.
//! - [`record`]: per-motor and per-arm records with validation.
//! - [`store`]: the persisted JSON document.
//! - [`units`]: ticks to angles.

pub mod error;
pub mod middle;
pub mod offset;
pub mod range;
pub mod record;
pub mod store;
pub mod units;

pub use error::{CalibrationError, CalibrationResult, OutOfRange};
pub use middle::{MiddleChoice, MiddleKind, calibrate_from_limits, reconcile_middle};
pub use offset::{compute_homing_offset, homing_offset_from_probe, logical_position, register_offset};
pub use range::{RangeRecorder, RangeRecorders};
pub use record::{ArmCalibration, MOTOR_IDS, MotorCalibration, MotorSpec, check_motor_id, so101_motors};
pub use store::{ArmConfig, CalibrationStore, Role};
pub use units::Units;
