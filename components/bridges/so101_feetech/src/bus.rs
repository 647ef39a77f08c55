//! Register-level access to the servos on one serial bus.
//!
//! [`ServoBus`] is the seam between calibration/control logic and hardware.
//! [`FeetechBus`] speaks the wire protocol over any [`Port`],
//! [`crate::sim::SimulatedBus`] stands in for it in tests, and [`SharedBus`]
//! lets several threads use one connection without interleaving packets.

use crate::error::{BusError, BusResult, SessionError, SessionResult};
use crate::protocol::{self, INSTR_PING, INSTR_READ, INSTR_WRITE};
use crate::registers::{
    HOMING_OFFSET_SIGN_BIT, Register, decode_sign_magnitude, encode_sign_magnitude,
};
use so101_calibration::check_motor_id;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Request/response access to servo registers.
///
/// Exactly one transaction is in flight per call; the bus is half duplex.
pub trait ServoBus {
    /// Ping a bus address and return its model number.
    fn ping(&mut self, id: u8) -> BusResult<u16>;

    fn read_register(&mut self, id: u8, reg: Register) -> BusResult<u16>;

    fn write_register(&mut self, id: u8, reg: Register, value: u16) -> BusResult<()>;

    fn read_position(&mut self, id: u8) -> BusResult<u16> {
        self.read_register(id, Register::PresentPosition)
    }

    fn write_goal_position(&mut self, id: u8, pos: u16) -> BusResult<()> {
        self.write_register(id, Register::GoalPosition, pos)
    }

    fn read_homing_offset(&mut self, id: u8) -> BusResult<i16> {
        let raw = self.read_register(id, Register::HomingOffset)?;
        Ok(decode_sign_magnitude(raw, HOMING_OFFSET_SIGN_BIT))
    }

    /// Caller must clear the lock first, the offset lives in EEPROM.
    fn write_homing_offset(&mut self, id: u8, offset: i16) -> BusResult<()> {
        self.write_register(
            id,
            Register::HomingOffset,
            encode_sign_magnitude(offset, HOMING_OFFSET_SIGN_BIT),
        )
    }

    fn write_limits(&mut self, id: u8, range_min: u16, range_max: u16) -> BusResult<()> {
        self.write_register(id, Register::MinPositionLimit, range_min)?;
        self.write_register(id, Register::MaxPositionLimit, range_max)
    }

    fn set_torque(&mut self, id: u8, enabled: bool) -> BusResult<()> {
        self.write_register(id, Register::TorqueEnable, enabled as u16)
    }

    fn set_lock(&mut self, id: u8, locked: bool) -> BusResult<()> {
        self.write_register(id, Register::Lock, locked as u16)
    }
}

impl<B: ServoBus + ?Sized> ServoBus for &mut B {
    fn ping(&mut self, id: u8) -> BusResult<u16> {
        (**self).ping(id)
    }

    fn read_register(&mut self, id: u8, reg: Register) -> BusResult<u16> {
        (**self).read_register(id, reg)
    }

    fn write_register(&mut self, id: u8, reg: Register, value: u16) -> BusResult<()> {
        (**self).write_register(id, reg, value)
    }
}

// =========================================================================
// Wire implementation
// =========================================================================

/// Byte stream a [`FeetechBus`] talks over.
pub trait Port: Read + Write {
    /// Drop whatever was received but not read yet.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl Port for Box<dyn serialport::SerialPort> {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)?;
        Ok(())
    }
}

/// Feetech protocol over a byte port.
///
/// Input left over from an earlier request, such as an answer that came in
/// after its read timed out, is discarded before every new request.
pub struct FeetechBus<P> {
    port: P,
}

impl<P: Port> FeetechBus<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn transact(&mut self, id: u8, instr: u8, params: &[u8]) -> BusResult<Vec<u8>> {
        self.port.discard_input()?;
        protocol::send_packet(&mut self.port, id, instr, params)?;
        Ok(protocol::read_status(&mut self.port, id)?.params)
    }
}

impl<P: Port> ServoBus for FeetechBus<P> {
    fn ping(&mut self, id: u8) -> BusResult<u16> {
        self.transact(id, INSTR_PING, &[])?;
        self.read_register(id, Register::ModelNumber)
    }

    fn read_register(&mut self, id: u8, reg: Register) -> BusResult<u16> {
        let width = reg.width();
        let data = self.transact(id, INSTR_READ, &[reg.address(), width])?;
        match (width, data.as_slice()) {
            (1, [b, ..]) => Ok(*b as u16),
            (2, [lo, hi, ..]) => Ok(u16::from_le_bytes([*lo, *hi])),
            _ => Err(BusError::Protocol {
                id,
                reason: "short response",
            }),
        }
    }

    fn write_register(&mut self, id: u8, reg: Register, value: u16) -> BusResult<()> {
        let [lo, hi] = value.to_le_bytes();
        let mut params = vec![reg.address(), lo];
        if reg.width() == 2 {
            params.push(hi);
        }
        self.transact(id, INSTR_WRITE, &params)?;
        Ok(())
    }
}

/// Open a serial port and wrap it in a [`FeetechBus`].
///
/// `timeout` bounds every read; keep it short (a few hundred ms at most).
pub fn open(
    port: &str,
    baud: u32,
    timeout: Duration,
) -> BusResult<FeetechBus<Box<dyn serialport::SerialPort>>> {
    let serial = serialport::new(port, baud)
        .timeout(timeout)
        .open()
        .map_err(|source| BusError::PortUnavailable {
            port: port.to_string(),
            source,
        })?;
    log::info!("opened {port} at {baud} baud");
    Ok(FeetechBus::new(serial))
}

// =========================================================================
// Sharing one connection
// =========================================================================

/// A bus shared between threads, one transaction at a time.
///
/// Single calls lock for the duration of one transaction. [`Self::exclusive`]
/// holds the lock for a whole sequence, so a read-modify-write on a motor's
/// offset or limit registers cannot interleave with a telemetry poll.
pub struct SharedBus<B> {
    inner: Arc<Mutex<B>>,
}

impl<B> Clone for SharedBus<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<B: ServoBus> SharedBus<B> {
    pub fn new(bus: B) -> Self {
        Self {
            inner: Arc::new(Mutex::new(bus)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, B> {
        // A panic mid-transaction leaves nothing half-written on our side.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with the bus held for every call it makes.
    pub fn exclusive<T>(&self, f: impl FnOnce(&mut B) -> T) -> T {
        let mut bus = self.lock();
        f(&mut *bus)
    }
}

impl<B: ServoBus> ServoBus for SharedBus<B> {
    fn ping(&mut self, id: u8) -> BusResult<u16> {
        self.lock().ping(id)
    }

    fn read_register(&mut self, id: u8, reg: Register) -> BusResult<u16> {
        self.lock().read_register(id, reg)
    }

    fn write_register(&mut self, id: u8, reg: Register, value: u16) -> BusResult<()> {
        self.lock().write_register(id, reg, value)
    }
}

/// Addresses `1..=max_id` that answer a ping, with their model numbers.
pub fn scan<B: ServoBus>(bus: &mut B, max_id: u8) -> Vec<(u8, u16)> {
    (1..=max_id)
        .filter_map(|id| match bus.ping(id) {
            Ok(model) => {
                log::debug!("motor found at id {id} (model {model})");
                Some((id, model))
            }
            Err(e) => {
                log::trace!("id {id}: {e}");
                None
            }
        })
        .collect()
}

/// Move the motor at `from` to bus address `to`.
///
/// Both ids must be valid motor addresses and `to` must be free. The motor
/// is left with torque off and its EEPROM locked.
pub fn readdress<B: ServoBus>(bus: &mut B, from: u8, to: u8) -> SessionResult<()> {
    check_motor_id(from)?;
    check_motor_id(to)?;
    if bus.ping(to).is_ok() {
        return Err(SessionError::IdTaken(to));
    }
    bus.ping(from)?;
    bus.set_torque(from, false)?;
    bus.set_lock(from, false)?;
    bus.write_register(from, Register::Id, to as u16)?;
    bus.set_lock(to, true)?;
    log::info!("motor {from} now answers as {to}");
    Ok(())
}
