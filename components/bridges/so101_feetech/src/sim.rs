//! In-memory model of STS3215 servos for tests and dry runs.
//!
//! Each simulated motor has a physical encoder angle that the test moves
//! around, plus the registers the tooling touches. Reads follow the device
//! rule `present = (physical - homing_offset) mod 4096`, EEPROM writes are
//! refused while the lock byte is set, and torque-on goal writes move the
//! joint instantly.

use crate::bus::ServoBus;
use crate::error::{BusError, BusResult};
use crate::registers::{HOMING_OFFSET_SIGN_BIT, Register, decode_sign_magnitude, encode_sign_magnitude};
use so101_calibration::offset::{logical_position, raw_position};
use std::collections::{BTreeMap, VecDeque};

/// Model number reported by an STS3215.
pub const STS3215_MODEL: u16 = 777;

/// Error flag raised when an EEPROM write hits a locked servo.
pub const FLAG_LOCKED: u8 = 0x08;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedMotor {
    pub physical: u16,
    pub homing_offset: i16,
    pub min_limit: u16,
    pub max_limit: u16,
    pub goal: u16,
    pub torque: bool,
    pub locked: bool,
    pub operating_mode: u16,
    pub gains: [u16; 3],
    /// Upcoming physical positions, one consumed per position read.
    pub path: VecDeque<u16>,
}

impl SimulatedMotor {
    pub fn at(physical: u16) -> Self {
        Self {
            physical,
            homing_offset: 0,
            min_limit: 0,
            max_limit: 4095,
            goal: physical,
            torque: false,
            locked: true,
            operating_mode: 0,
            gains: [32, 0, 32],
            path: VecDeque::new(),
        }
    }

    pub fn present(&self) -> u16 {
        logical_position(self.physical, self.homing_offset)
    }
}

/// One bus transaction as seen by the simulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    Ping { id: u8 },
    Read { id: u8, reg: Register },
    Write { id: u8, reg: Register, value: u16 },
}

impl Transaction {
    pub fn id(&self) -> u8 {
        match *self {
            Transaction::Ping { id } | Transaction::Read { id, .. } | Transaction::Write { id, .. } => id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimulatedBus {
    motors: BTreeMap<u8, SimulatedMotor>,
    failing_reads: BTreeMap<u8, u32>,
    log: Vec<Transaction>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_motor(mut self, id: u8, motor: SimulatedMotor) -> Self {
        self.motors.insert(id, motor);
        self
    }

    pub fn motor(&self, id: u8) -> Option<&SimulatedMotor> {
        self.motors.get(&id)
    }

    pub fn motor_mut(&mut self, id: u8) -> Option<&mut SimulatedMotor> {
        self.motors.get_mut(&id)
    }

    /// Put a joint at a physical angle and forget any queued path.
    pub fn set_physical(&mut self, id: u8, physical: u16) {
        if let Some(m) = self.motors.get_mut(&id) {
            m.physical = physical;
            m.path.clear();
        }
    }

    /// Queue physical positions, one per upcoming position read.
    pub fn push_path(&mut self, id: u8, path: impl IntoIterator<Item = u16>) {
        if let Some(m) = self.motors.get_mut(&id) {
            m.path.extend(path);
        }
    }

    /// Make the next `count` reads from `id` time out.
    pub fn fail_reads(&mut self, id: u8, count: u32) {
        *self.failing_reads.entry(id).or_default() += count;
    }

    /// Remove a motor from the bus (unplugged).
    pub fn unplug(&mut self, id: u8) -> Option<SimulatedMotor> {
        self.motors.remove(&id)
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.log
    }

    fn motor_or_timeout(&mut self, id: u8) -> BusResult<&mut SimulatedMotor> {
        self.motors
            .get_mut(&id)
            .ok_or(BusError::CommunicationTimeout { id })
    }
}

impl ServoBus for SimulatedBus {
    fn ping(&mut self, id: u8) -> BusResult<u16> {
        self.log.push(Transaction::Ping { id });
        self.motor_or_timeout(id)?;
        Ok(STS3215_MODEL)
    }

    fn read_register(&mut self, id: u8, reg: Register) -> BusResult<u16> {
        self.log.push(Transaction::Read { id, reg });
        if let Some(left) = self.failing_reads.get_mut(&id) {
            if *left > 0 {
                *left -= 1;
                return Err(BusError::CommunicationTimeout { id });
            }
        }
        let m = self.motor_or_timeout(id)?;
        Ok(match reg {
            Register::ModelNumber => STS3215_MODEL,
            Register::Id => id as u16,
            Register::MinPositionLimit => m.min_limit,
            Register::MaxPositionLimit => m.max_limit,
            Register::PositionP => m.gains[0],
            Register::PositionD => m.gains[2],
            Register::PositionI => m.gains[1],
            Register::HomingOffset => encode_sign_magnitude(m.homing_offset, HOMING_OFFSET_SIGN_BIT),
            Register::OperatingMode => m.operating_mode,
            Register::TorqueEnable => m.torque as u16,
            Register::GoalPosition => m.goal,
            Register::Lock => m.locked as u16,
            Register::PresentPosition => {
                if let Some(next) = m.path.pop_front() {
                    m.physical = next;
                }
                m.present()
            }
        })
    }

    fn write_register(&mut self, id: u8, reg: Register, value: u16) -> BusResult<()> {
        self.log.push(Transaction::Write { id, reg, value });
        if reg.is_eeprom() && self.motor_or_timeout(id)?.locked {
            return Err(BusError::Status {
                id,
                flags: FLAG_LOCKED,
            });
        }
        if reg == Register::Id {
            if let Some(m) = self.motors.remove(&id) {
                self.motors.insert(value as u8, m);
            }
            return Ok(());
        }
        let m = self.motor_or_timeout(id)?;
        match reg {
            Register::ModelNumber | Register::PresentPosition | Register::Id => {
                return Err(BusError::Status { id, flags: 0x01 });
            }
            Register::MinPositionLimit => m.min_limit = value,
            Register::MaxPositionLimit => m.max_limit = value,
            Register::PositionP => m.gains[0] = value,
            Register::PositionI => m.gains[1] = value,
            Register::PositionD => m.gains[2] = value,
            Register::HomingOffset => {
                m.homing_offset = decode_sign_magnitude(value, HOMING_OFFSET_SIGN_BIT)
            }
            Register::OperatingMode => m.operating_mode = value,
            Register::TorqueEnable => m.torque = value != 0,
            Register::Lock => m.locked = value != 0,
            Register::GoalPosition => {
                let goal = if m.min_limit <= m.max_limit {
                    value.clamp(m.min_limit, m.max_limit)
                } else {
                    value
                };
                m.goal = goal;
                if m.torque {
                    m.physical = raw_position(goal, m.homing_offset);
                    m.path.clear();
                }
            }
        }
        Ok(())
    }
}
