//! Error types for bus access, calibration sessions and arm control.

use so101_calibration::{CalibrationError, OutOfRange};
use std::fmt;
use thiserror::Error;

pub type BusResult<T> = Result<T, BusError>;
pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum BusError {
    /// The serial connection could not be opened or configured. Fatal.
    #[error("cannot open serial port {port}: {source}")]
    PortUnavailable {
        port: String,
        #[source]
        source: serialport::Error,
    },

    /// No (complete) answer within the read window. Retryable.
    #[error("motor {id}: no response within the read window")]
    CommunicationTimeout { id: u8 },

    #[error("motor {id}: malformed status packet ({reason})")]
    Protocol { id: u8, reason: &'static str },

    /// The servo answered but raised error flags in its status packet.
    #[error("motor {id}: servo reported error flags {flags:#04x}")]
    Status { id: u8, flags: u8 },

    #[error("serial i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// One goal that was refused, with the motor it was meant for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedGoal {
    pub motor: String,
    pub detail: OutOfRange,
}

/// Every out-of-range goal of a multi-motor command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalRejected(pub Vec<RejectedGoal>);

impl fmt::Display for GoalRejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, r) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(
                f,
                "{} accepts only {}..={} (got {})",
                r.motor, r.detail.range_min, r.detail.range_max, r.detail.requested
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for GoalRejected {}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    /// Nothing was transmitted.
    #[error("goal positions rejected: {0}")]
    OutOfRange(#[from] GoalRejected),

    #[error("unknown motor '{0}'")]
    UnknownMotor(String),

    #[error("id {0} is already taken on the bus")]
    IdTaken(u8),

    #[error("aborted by operator")]
    Aborted,
}
