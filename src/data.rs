use std::fmt;

use crate::error::{DriverError, TransportError};
use crate::registers::{
    Block, COMMAND_FREQUENCY, DC_BUS_VOLTAGE, FIRMWARE, FLAG_FAULT, FLAG_READY, FLAG_REVERSE,
    FLAG_RUNNING, IDENTITY_BLOCK, MODEL, MOTOR_CURRENT, MOTOR_FREQUENCY, MOTOR_POLES, MOTOR_POWER,
    MOTOR_SPEED, MOTOR_VOLTAGE, NAMEPLATE_BLOCK, OUTPUT_CURRENT, OUTPUT_FREQUENCY, OUTPUT_TORQUE,
    OUTPUT_VOLTAGE, RegisterSpec, STATUS_BLOCK, TEMPERATURE,
};

/// Rotation of the mill vessel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Forward,
    Reverse,
}

impl Rotation {
    pub const fn toggled(self) -> Self {
        match self {
            Self::Forward => Self::Reverse,
            Self::Reverse => Self::Forward,
        }
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Forward => f.write_str("Forward (CCW)"),
            Self::Reverse => f.write_str("Reverse (CW)"),
        }
    }
}

/// Value written to the operation register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Stop(Rotation),
    Run(Rotation),
}

impl Operation {
    pub const STOP_FORWARD: u16 = 0;
    pub const RUN_FORWARD: u16 = 1;
    pub const STOP_REVERSE: u16 = 2;
    pub const RUN_REVERSE: u16 = 3;

    pub const fn code(self) -> u16 {
        match self {
            Self::Stop(Rotation::Forward) => Self::STOP_FORWARD,
            Self::Run(Rotation::Forward) => Self::RUN_FORWARD,
            Self::Stop(Rotation::Reverse) => Self::STOP_REVERSE,
            Self::Run(Rotation::Reverse) => Self::RUN_REVERSE,
        }
    }

    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            Self::STOP_FORWARD => Some(Self::Stop(Rotation::Forward)),
            Self::RUN_FORWARD => Some(Self::Run(Rotation::Forward)),
            Self::STOP_REVERSE => Some(Self::Stop(Rotation::Reverse)),
            Self::RUN_REVERSE => Some(Self::Run(Rotation::Reverse)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub model: String,
    pub firmware: String,
}

impl Identity {
    pub fn from_registers(values: &[u16]) -> Result<Self, DriverError> {
        let model = word(MODEL, IDENTITY_BLOCK, values)?;
        let firmware = word(FIRMWARE, IDENTITY_BLOCK, values)?;
        Ok(Self {
            model: model.to_string(),
            firmware: firmware.to_string(),
        })
    }
}

/// Rated motor parameters, read once per connection.
#[derive(Debug, Clone, PartialEq)]
pub struct MotorNameplate {
    pub voltage: f64,
    pub current: f64,
    pub frequency: f64,
    /// kW
    pub power: f64,
    pub poles: u16,
    pub speed_rpm: u16,
}

impl MotorNameplate {
    /// Decodes the 9-register nameplate block.
    ///
    /// Pole count and rated frequency feed divisions further down, so a zero
    /// or implausible value is a fault rather than something to default.
    pub fn from_registers(values: &[u16]) -> Result<Self, DriverError> {
        let nameplate = Self {
            voltage: scaled(MOTOR_VOLTAGE, NAMEPLATE_BLOCK, values)?,
            current: scaled(MOTOR_CURRENT, NAMEPLATE_BLOCK, values)?,
            frequency: scaled(MOTOR_FREQUENCY, NAMEPLATE_BLOCK, values)?,
            power: scaled(MOTOR_POWER, NAMEPLATE_BLOCK, values)?,
            poles: word(MOTOR_POLES, NAMEPLATE_BLOCK, values)?,
            speed_rpm: word(MOTOR_SPEED, NAMEPLATE_BLOCK, values)?,
        };
        nameplate.validate()?;
        Ok(nameplate)
    }

    pub fn validate(&self) -> Result<(), DriverError> {
        if self.poles < 2 {
            return Err(DriverError::InvalidNameplate(format!(
                "pole count {} must be at least 2",
                self.poles
            )));
        }
        if self.frequency <= 0.0 {
            return Err(DriverError::InvalidNameplate(format!(
                "rated frequency {} Hz must be positive",
                self.frequency
            )));
        }
        Ok(())
    }
}

/// Status word at 0x2520, one bit per flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[allow(clippy::struct_excessive_bools)]
pub struct StatusFlags {
    pub running: bool,
    pub reverse: bool,
    pub ready: bool,
    pub fault: bool,
}

impl StatusFlags {
    pub const fn from_word(word: u16) -> Self {
        Self {
            running: word & FLAG_RUNNING != 0,
            reverse: word & FLAG_REVERSE != 0,
            ready: word & FLAG_READY != 0,
            fault: word & FLAG_FAULT != 0,
        }
    }

    pub const fn direction(self) -> Rotation {
        if self.reverse {
            Rotation::Reverse
        } else {
            Rotation::Forward
        }
    }
}

/// One poll's worth of drive status. Built fresh on every poll.
#[derive(Debug, Clone, PartialEq)]
pub struct InverterSnapshot {
    pub command_frequency: f64,
    pub output_frequency: f64,
    pub output_voltage: f64,
    pub dc_bus_voltage: u16,
    pub output_current: f64,
    pub temperature: f64,
    pub output_torque: i16,
    pub flags: StatusFlags,
}

impl InverterSnapshot {
    pub fn from_registers(values: &[u16], flag_word: u16) -> Result<Self, DriverError> {
        let torque = word(OUTPUT_TORQUE, STATUS_BLOCK, values)?;
        Ok(Self {
            command_frequency: scaled(COMMAND_FREQUENCY, STATUS_BLOCK, values)?,
            output_frequency: scaled(OUTPUT_FREQUENCY, STATUS_BLOCK, values)?,
            output_voltage: scaled(OUTPUT_VOLTAGE, STATUS_BLOCK, values)?,
            dc_bus_voltage: word(DC_BUS_VOLTAGE, STATUS_BLOCK, values)?,
            output_current: scaled(OUTPUT_CURRENT, STATUS_BLOCK, values)?,
            temperature: scaled(TEMPERATURE, STATUS_BLOCK, values)?,
            output_torque: i16::from_be_bytes(torque.to_be_bytes()),
            flags: StatusFlags::from_word(flag_word),
        })
    }
}

fn scaled(spec: RegisterSpec, block: Block, values: &[u16]) -> Result<f64, DriverError> {
    spec.decode(block, values).ok_or_else(|| missing(spec, values))
}

fn word(spec: RegisterSpec, block: Block, values: &[u16]) -> Result<u16, DriverError> {
    spec.raw(block, values).ok_or_else(|| missing(spec, values))
}

/// A block shorter than its map is a malformed reply, not a caller error.
fn missing(spec: RegisterSpec, values: &[u16]) -> DriverError {
    DriverError::Transport(TransportError::Framing(format!(
        "{} missing from {}-register block",
        spec.name,
        values.len()
    )))
}
