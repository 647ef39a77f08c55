//! Feetech STS3215 bus access for the SO-101 arm.
//!
//! Layers, bottom up:
//!
//! - [`protocol`]: instruction and status packets.
//! - [`registers`]: the control table entries the tooling uses.
//! - [`bus`]: the [`ServoBus`] trait, the serial implementation and
//!   [`SharedBus`] for use from several threads.
//! - [`sim`]: an in-memory bus for tests and dry runs.
//! - [`session`]: interactive calibration feeding `so101-calibration`.
//! - [`arm`]: goal positions, torque and telemetry on a calibrated arm.
//!
//! The `so101` binary puts a command line on top.

pub mod arm;
pub mod bus;
pub mod error;
pub mod operator;
pub mod protocol;
pub mod registers;
pub mod session;
pub mod sim;

pub use arm::{Arm, Telemetry, TelemetryFrame};
pub use bus::{FeetechBus, Port, ServoBus, SharedBus, open, readdress, scan};
pub use error::{BusError, BusResult, GoalRejected, RejectedGoal, SessionError, SessionResult};
pub use operator::{ConsoleOperator, Operator, Signal, SweepRow};
pub use session::{
    ApplyReport, CalibrationMode, CalibrationSession, SessionConfig, SessionOutcome, apply,
};
pub use sim::{SimulatedBus, SimulatedMotor};
