//! Conversions between logical encoder ticks and angles.
//!
//! Once the homing offset is applied the joint middle reads
//! [`LOGICAL_CENTER`], which is used as the angular zero.

use crate::offset::{ENCODER_RESOLUTION, LOGICAL_CENTER};
use crate::record::MAX_POSITION;
use std::fmt;
use std::str::FromStr;
use uom::si::angle::{degree, radian};
use uom::si::f32::Angle;

/// Full circle: 4096 ticks = 360°.
const TICKS_PER_REV: f32 = ENCODER_RESOLUTION as f32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Units {
    /// Logical 12-bit ticks (0–4095).
    #[default]
    Raw,
    /// Degrees from the logical center.
    Deg,
    /// Radians from the logical center.
    Rad,
}

impl FromStr for Units {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "raw" => Ok(Self::Raw),
            "deg" => Ok(Self::Deg),
            "rad" => Ok(Self::Rad),
            other => Err(format!("unknown unit '{other}' (expected raw, deg or rad)")),
        }
    }
}

impl fmt::Display for Units {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raw => "raw",
            Self::Deg => "deg",
            Self::Rad => "rad",
        })
    }
}

impl Units {
    fn angle_of(ticks_from_center: f32) -> Angle {
        Angle::new::<radian>(ticks_from_center * core::f32::consts::TAU / TICKS_PER_REV)
    }

    /// Logical tick to this unit.
    #[inline]
    pub fn from_logical(self, pos: u16) -> f32 {
        let from_center = pos as f32 - LOGICAL_CENTER as f32;
        match self {
            Self::Raw => pos as f32,
            Self::Deg => Self::angle_of(from_center).get::<degree>(),
            Self::Rad => Self::angle_of(from_center).get::<radian>(),
        }
    }

    /// Value in this unit back to a logical tick, clamped to `0..=4095`.
    #[inline]
    pub fn to_logical(self, value: f32) -> u16 {
        let ticks = match self {
            Self::Raw => value,
            Self::Deg => {
                let rad = Angle::new::<degree>(value).get::<radian>();
                rad * TICKS_PER_REV / core::f32::consts::TAU + LOGICAL_CENTER as f32
            }
            Self::Rad => value * TICKS_PER_REV / core::f32::consts::TAU + LOGICAL_CENTER as f32,
        };
        ticks.round().clamp(0.0, MAX_POSITION as f32) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_zero() {
        assert_eq!(Units::Deg.from_logical(2048), 0.0);
        assert_eq!(Units::Rad.from_logical(2048), 0.0);
        assert_eq!(Units::Raw.from_logical(2048), 2048.0);
    }

    #[test]
    fn quarter_turn() {
        assert!((Units::Deg.from_logical(3072) - 90.0).abs() < 1e-3);
        assert!((Units::Rad.from_logical(1024) + core::f32::consts::FRAC_PI_2).abs() < 1e-4);
    }

    #[test]
    fn back_to_ticks() {
        assert_eq!(Units::Deg.to_logical(90.0), 3072);
        assert_eq!(Units::Rad.to_logical(-core::f32::consts::FRAC_PI_2), 1024);
        assert_eq!(Units::Raw.to_logical(5000.0), 4095);
        assert_eq!(Units::Deg.to_logical(-400.0), 0);
    }

    #[test]
    fn parse() {
        assert_eq!("deg".parse::<Units>(), Ok(Units::Deg));
        assert!("turns".parse::<Units>().is_err());
    }
}
