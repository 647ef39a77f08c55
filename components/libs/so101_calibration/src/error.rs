//! Errors raised by the calibration engine and the calibration store.

use std::path::PathBuf;
use thiserror::Error;

pub type CalibrationResult<T> = Result<T, CalibrationError>;

/// A goal position that falls outside the calibrated travel of a motor.
///
/// Carries the valid window so callers can report it back instead of a
/// generic failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("goal {requested} for motor {id} is outside its calibrated range [{range_min}, {range_max}]")]
pub struct OutOfRange {
    pub id: u8,
    pub requested: u16,
    pub range_min: u16,
    pub range_max: u16,
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error(transparent)]
    OutOfRange(#[from] OutOfRange),

    /// Zero-width, inverted or out-of-encoder range. Blocks persistence.
    #[error("degenerate calibration for '{name}': range [{range_min}, {range_max}]")]
    DegenerateCalibration {
        name: String,
        range_min: u16,
        range_max: u16,
    },

    #[error("homing offset {offset} for '{name}' is outside [-2047, 2047]")]
    OffsetOutOfRange { name: String, offset: i16 },

    #[error("motor id {0} is outside the bus range 1..=252")]
    InvalidMotorId(u8),

    #[error("no samples were recorded for motor '{0}'")]
    NoSamples(String),

    #[error("cannot access calibration store {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("bad calibration document {path}: {source}")]
    StoreFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
