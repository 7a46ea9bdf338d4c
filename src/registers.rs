//! Register map of the TECO E510 drive, as addressed on the wire.

/// Fixed serial parameters of the drive's RS-485 port (group 09 defaults).
pub const BAUD_RATE: u32 = 19_200;
pub const DEFAULT_SLAVE_ADDRESS: u8 = 1;

/// A contiguous run of holding registers fetched in one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub address: u16,
    pub count: u16,
}

pub const IDENTITY_BLOCK: Block = Block {
    address: 0x0D00,
    count: 2,
};
pub const NAMEPLATE_BLOCK: Block = Block {
    address: 0x0200,
    count: 9,
};
pub const STATUS_BLOCK: Block = Block {
    address: 0x2523,
    count: 7,
};
pub const STATUS_FLAGS: Block = Block {
    address: 0x2520,
    count: 1,
};

pub const REG_OPERATION: u16 = 0x2501;
pub const REG_FREQUENCY_COMMAND: u16 = 0x2502;

/// Frequency command carries two implied decimals.
pub const FREQUENCY_COMMAND_SCALE: f64 = 100.0;

pub const FLAG_RUNNING: u16 = 1 << 0;
pub const FLAG_REVERSE: u16 = 1 << 1;
pub const FLAG_READY: u16 = 1 << 2;
pub const FLAG_FAULT: u16 = 1 << 3;

/// One named quantity: where it lives and how its raw word is scaled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegisterSpec {
    pub name: &'static str,
    pub address: u16,
    /// Raw value = physical value x scale.
    pub scale: f64,
    pub signed: bool,
}

impl RegisterSpec {
    const fn new(name: &'static str, address: u16, scale: f64, signed: bool) -> Self {
        Self {
            name,
            address,
            scale,
            signed,
        }
    }

    /// Picks this register out of a block read starting at `block.address`.
    pub fn raw(&self, block: Block, values: &[u16]) -> Option<u16> {
        let offset = self.address.checked_sub(block.address)?;
        if offset >= block.count {
            return None;
        }
        values.get(usize::from(offset)).copied()
    }

    /// Raw word converted into the physical quantity.
    pub fn decode(&self, block: Block, values: &[u16]) -> Option<f64> {
        let raw = self.raw(block, values)?;
        let value = if self.signed {
            f64::from(i16::from_be_bytes(raw.to_be_bytes()))
        } else {
            f64::from(raw)
        };
        Some(value / self.scale)
    }
}

pub const MODEL: RegisterSpec = RegisterSpec::new("inverter.model", 0x0D00, 1.0, false);
pub const FIRMWARE: RegisterSpec = RegisterSpec::new("inverter.firmware", 0x0D01, 1.0, false);

pub const MOTOR_CURRENT: RegisterSpec = RegisterSpec::new("motor.current", 0x0201, 10.0, false);
pub const MOTOR_SPEED: RegisterSpec = RegisterSpec::new("motor.speed", 0x0203, 1.0, false);
pub const MOTOR_VOLTAGE: RegisterSpec = RegisterSpec::new("motor.voltage", 0x0204, 10.0, false);
pub const MOTOR_POWER: RegisterSpec = RegisterSpec::new("motor.power", 0x0205, 10.0, false);
pub const MOTOR_FREQUENCY: RegisterSpec =
    RegisterSpec::new("motor.frequency", 0x0206, 10.0, false);
pub const MOTOR_POLES: RegisterSpec = RegisterSpec::new("motor.poles", 0x0207, 1.0, false);

pub const COMMAND_FREQUENCY: RegisterSpec =
    RegisterSpec::new("status.command_frequency", 0x2523, 100.0, false);
pub const OUTPUT_FREQUENCY: RegisterSpec =
    RegisterSpec::new("status.output_frequency", 0x2524, 100.0, false);
pub const OUTPUT_VOLTAGE: RegisterSpec =
    RegisterSpec::new("status.output_voltage", 0x2525, 10.0, false);
pub const DC_BUS_VOLTAGE: RegisterSpec =
    RegisterSpec::new("status.dc_bus_voltage", 0x2526, 1.0, false);
pub const OUTPUT_CURRENT: RegisterSpec =
    RegisterSpec::new("status.output_current", 0x2527, 10.0, false);
pub const TEMPERATURE: RegisterSpec = RegisterSpec::new("status.temperature", 0x2528, 10.0, true);
pub const OUTPUT_TORQUE: RegisterSpec = RegisterSpec::new("status.output_torque", 0x2529, 1.0, true);
