//! Typed operations on the E510 drive, built on a [`RegisterTransport`].
//!
//! The driver maps named quantities to their registers and scales them; it
//! neither retries nor swallows transport failures.

use tracing::debug;

use crate::backend::RegisterTransport;
use crate::data::{Identity, InverterSnapshot, MotorNameplate, Operation};
use crate::error::{DriverError, TransportError};
use crate::registers::{
    Block, FREQUENCY_COMMAND_SCALE, IDENTITY_BLOCK, NAMEPLATE_BLOCK, REG_FREQUENCY_COMMAND,
    REG_OPERATION, STATUS_BLOCK, STATUS_FLAGS,
};
use crate::rtu::Function;

pub struct Inverter<T> {
    transport: T,
    slave: u8,
}

impl<T: RegisterTransport> Inverter<T> {
    pub fn new(transport: T, slave: u8) -> Self {
        Self { transport, slave }
    }

    pub fn read_identity(&mut self) -> Result<Identity, DriverError> {
        let values = self.read_block(IDENTITY_BLOCK)?;
        Identity::from_registers(&values)
    }

    pub fn read_motor_nameplate(&mut self) -> Result<MotorNameplate, DriverError> {
        let values = self.read_block(NAMEPLATE_BLOCK)?;
        MotorNameplate::from_registers(&values)
    }

    pub fn read_status(&mut self) -> Result<InverterSnapshot, DriverError> {
        let values = self.read_block(STATUS_BLOCK)?;
        let flags = self.read_block(STATUS_FLAGS)?;
        InverterSnapshot::from_registers(&values, flags[0])
    }

    /// Writes the frequency command with two implied decimals.
    ///
    /// Range against the nameplate is the caller's job; only values that
    /// cannot be encoded at all are refused here.
    pub fn write_frequency(&mut self, hz: f64) -> Result<(), DriverError> {
        let raw = encode_frequency(hz)?;
        debug!(hz, raw, "write frequency command");
        self.write_register(REG_FREQUENCY_COMMAND, raw)
    }

    /// Writes the operation register: 0 stop-forward, 1 run-forward,
    /// 2 stop-reverse, 3 run-reverse.
    pub fn write_operation(&mut self, mode: u16) -> Result<(), DriverError> {
        if Operation::from_code(mode).is_none() {
            return Err(DriverError::InvalidArgument(format!(
                "operation mode {mode} must be 0, 1, 2 or 3"
            )));
        }
        debug!(mode, "write operation");
        self.write_register(REG_OPERATION, mode)
    }

    fn read_block(&mut self, block: Block) -> Result<Vec<u16>, DriverError> {
        let values = self.transport.exchange(
            self.slave,
            Function::ReadHoldingRegisters {
                quantity: block.count,
            },
            block.address,
        )?;
        if values.len() != usize::from(block.count) {
            return Err(TransportError::Framing(format!(
                "block 0x{:04X}: expected {} registers, got {}",
                block.address,
                block.count,
                values.len()
            ))
            .into());
        }
        Ok(values)
    }

    fn write_register(&mut self, address: u16, value: u16) -> Result<(), DriverError> {
        self.transport.exchange(
            self.slave,
            Function::WriteSingleRegister { value },
            address,
        )?;
        Ok(())
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn encode_frequency(hz: f64) -> Result<u16, DriverError> {
    let raw = (hz * FREQUENCY_COMMAND_SCALE).round();
    if !raw.is_finite() || raw < 0.0 || raw > f64::from(u16::MAX) {
        return Err(DriverError::InvalidArgument(format!(
            "frequency {hz} Hz cannot be encoded"
        )));
    }
    Ok(raw as u16)
}
