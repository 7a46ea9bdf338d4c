use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::backend::RegisterTransport;
use crate::data::{Operation, Rotation};
use crate::error::TransportError;
use crate::registers::{
    DEFAULT_SLAVE_ADDRESS, FLAG_READY, FLAG_REVERSE, FLAG_RUNNING, REG_FREQUENCY_COMMAND,
    REG_OPERATION, STATUS_BLOCK, STATUS_FLAGS,
};
use crate::rtu::Function;

const REG_STATUS_COMMAND_FREQ: u16 = STATUS_BLOCK.address;
const REG_STATUS_OUTPUT_FREQ: u16 = STATUS_BLOCK.address + 1;
const REG_STATUS_OUTPUT_VOLTAGE: u16 = STATUS_BLOCK.address + 2;
const REG_STATUS_DC_BUS: u16 = STATUS_BLOCK.address + 3;
const REG_STATUS_CURRENT: u16 = STATUS_BLOCK.address + 4;
const REG_STATUS_TEMPERATURE: u16 = STATUS_BLOCK.address + 5;
const REG_STATUS_TORQUE: u16 = STATUS_BLOCK.address + 6;

/// In-memory E510 drive behind a shared handle.
///
/// Clones talk to the same register file, so a test can keep one handle to
/// inspect writes and inject faults while the controller owns another.
#[derive(Debug, Clone)]
pub struct SimInverter {
    state: Arc<Mutex<SimState>>,
}

#[derive(Debug)]
struct SimState {
    slave: u8,
    registers: BTreeMap<u16, u16>,
    operation: u16,
    output_frequency: f64,
    writes: Vec<(u16, u16)>,
    exchanges: usize,
    faults: VecDeque<TransportError>,
}

impl SimInverter {
    pub fn new() -> Self {
        let mut registers = BTreeMap::new();
        // identity: model, firmware
        registers.insert(0x0D00, 510);
        registers.insert(0x0D01, 102);
        // nameplate: 3.6 A, 720 rpm, 220.0 V, 1.5 kW, 50.0 Hz, 8 poles
        for (address, value) in (0x0200u16..).zip([0, 36, 0, 720, 2200, 15, 500, 8, 0]) {
            registers.insert(address, value);
        }
        registers.insert(REG_STATUS_DC_BUS, 311);
        registers.insert(REG_STATUS_TEMPERATURE, 312);
        Self {
            state: Arc::new(Mutex::new(SimState {
                slave: DEFAULT_SLAVE_ADDRESS,
                registers,
                operation: Operation::STOP_FORWARD,
                output_frequency: 0.0,
                writes: Vec::new(),
                exchanges: 0,
                faults: VecDeque::new(),
            })),
        }
    }

    #[cfg(test)]
    pub fn set_register(&self, address: u16, value: u16) {
        self.lock().registers.insert(address, value);
    }

    #[cfg(test)]
    pub fn register(&self, address: u16) -> u16 {
        self.lock().registers.get(&address).copied().unwrap_or(0)
    }

    /// The next exchange fails with `err` instead of reaching the drive.
    #[cfg(test)]
    pub fn fail_next(&self, err: TransportError) {
        self.lock().faults.push_back(err);
    }

    /// Accepted single-register writes, oldest first.
    #[cfg(test)]
    pub fn writes(&self) -> Vec<(u16, u16)> {
        self.lock().writes.clone()
    }

    #[cfg(test)]
    pub fn exchanges(&self) -> usize {
        self.lock().exchanges
    }

    #[cfg(test)]
    pub fn operation(&self) -> u16 {
        self.lock().operation
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimInverter {
    fn default() -> Self {
        Self::new()
    }
}

impl SimState {
    fn running(&self) -> bool {
        matches!(Operation::from_code(self.operation), Some(Operation::Run(_)))
    }

    /// Moves the output toward the command the way the drive's ramp does.
    fn tick(&mut self) {
        let command = f64::from(self.read(REG_FREQUENCY_COMMAND)) / 100.0;
        let target = if self.running() { command } else { 0.0 };
        let delta = target - self.output_frequency;
        self.output_frequency = if delta.abs() < 0.05 {
            target
        } else {
            self.output_frequency + delta * 0.3
        };

        let ratio = (self.output_frequency / 50.0).clamp(0.0, 1.0);
        let command_raw = self.read(REG_FREQUENCY_COMMAND);
        self.registers.insert(REG_STATUS_COMMAND_FREQ, command_raw);
        self.registers
            .insert(REG_STATUS_OUTPUT_FREQ, to_raw(self.output_frequency * 100.0));
        self.registers
            .insert(REG_STATUS_OUTPUT_VOLTAGE, to_raw(ratio * 2200.0));
        self.registers.insert(REG_STATUS_CURRENT, to_raw(ratio * 30.0));
        self.registers.insert(REG_STATUS_TORQUE, to_raw(ratio * 80.0));

        let mut flags = FLAG_READY;
        if self.running() {
            flags |= FLAG_RUNNING;
        }
        if matches!(
            Operation::from_code(self.operation),
            Some(Operation::Run(Rotation::Reverse) | Operation::Stop(Rotation::Reverse))
        ) {
            flags |= FLAG_REVERSE;
        }
        self.registers.insert(STATUS_FLAGS.address, flags);
    }

    fn read(&self, address: u16) -> u16 {
        self.registers.get(&address).copied().unwrap_or(0)
    }

    fn write(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        match address {
            REG_OPERATION => {
                if Operation::from_code(value).is_none() {
                    return Err(TransportError::Exception(String::from(
                        "function 0x06 code 0x03 (illegal data value)",
                    )));
                }
                self.operation = value;
            }
            REG_FREQUENCY_COMMAND => {
                if value > 500 * 10 {
                    return Err(TransportError::Exception(String::from(
                        "function 0x06 code 0x03 (illegal data value)",
                    )));
                }
            }
            _ => {}
        }
        self.registers.insert(address, value);
        self.writes.push((address, value));
        Ok(())
    }
}

impl RegisterTransport for SimInverter {
    fn exchange(
        &mut self,
        slave: u8,
        function: Function,
        address: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let mut state = self.lock();
        state.exchanges += 1;
        if let Some(err) = state.faults.pop_front() {
            return Err(err);
        }
        if slave != state.slave {
            return Err(TransportError::Timeout(std::time::Duration::ZERO));
        }
        match function {
            Function::ReadHoldingRegisters { quantity } => {
                if address == STATUS_BLOCK.address {
                    state.tick();
                }
                Ok((address..address.saturating_add(quantity))
                    .map(|reg| state.read(reg))
                    .collect())
            }
            Function::WriteSingleRegister { value } => {
                state.write(address, value)?;
                Ok(vec![value])
            }
        }
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_raw(value: f64) -> u16 {
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}
