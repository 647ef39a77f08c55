//! STS3215 control table entries used by the SO-101 tooling.
//!
//! Addresses below [`Register::TorqueEnable`] live in EEPROM and only stick
//! while the [`Register::Lock`] byte is cleared.

/// Default bus speed of the SO-101 controller boards.
pub const DEFAULT_BAUD: u32 = 1_000_000;

/// Bit carrying the sign of the homing offset.
pub const HOMING_OFFSET_SIGN_BIT: u8 = 11;

/// `Operating_Mode` value for position control.
pub const MODE_POSITION: u16 = 0;

/// Position loop gains written when a control session starts.
pub const DEFAULT_P_GAIN: u16 = 16;
pub const DEFAULT_I_GAIN: u16 = 0;
pub const DEFAULT_D_GAIN: u16 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Register {
    ModelNumber,
    Id,
    MinPositionLimit,
    MaxPositionLimit,
    PositionP,
    PositionD,
    PositionI,
    HomingOffset,
    OperatingMode,
    TorqueEnable,
    GoalPosition,
    Lock,
    PresentPosition,
}

impl Register {
    pub const fn address(self) -> u8 {
        match self {
            Register::ModelNumber => 3,
            Register::Id => 5,
            Register::MinPositionLimit => 9,
            Register::MaxPositionLimit => 11,
            Register::PositionP => 21,
            Register::PositionD => 22,
            Register::PositionI => 23,
            Register::HomingOffset => 31,
            Register::OperatingMode => 33,
            Register::TorqueEnable => 40,
            Register::GoalPosition => 42,
            Register::Lock => 55,
            Register::PresentPosition => 56,
        }
    }

    /// Width in bytes.
    pub const fn width(self) -> u8 {
        match self {
            Register::ModelNumber
            | Register::MinPositionLimit
            | Register::MaxPositionLimit
            | Register::HomingOffset
            | Register::GoalPosition
            | Register::PresentPosition => 2,
            _ => 1,
        }
    }

    pub const fn is_eeprom(self) -> bool {
        self.address() < Register::TorqueEnable.address()
    }
}

/// Encode a signed value as sign-magnitude with the sign at `sign_bit`.
///
/// The magnitude saturates, so `-2048` goes out as `-2047` for bit 11.
pub fn encode_sign_magnitude(value: i16, sign_bit: u8) -> u16 {
    let magnitude = value.unsigned_abs().min((1 << sign_bit) - 1);
    if value < 0 {
        (1 << sign_bit) | magnitude
    } else {
        magnitude
    }
}

pub fn decode_sign_magnitude(raw: u16, sign_bit: u8) -> i16 {
    let magnitude = (raw & ((1 << sign_bit) - 1)) as i16;
    if raw & (1 << sign_bit) != 0 {
        -magnitude
    } else {
        magnitude
    }
}
