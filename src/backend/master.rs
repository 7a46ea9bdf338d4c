use std::io;
use std::time::Duration;

use modbus_rtu::{Master, Request, Response};

use crate::backend::RegisterTransport;
use crate::error::TransportError;
use crate::registers::BAUD_RATE;
use crate::rtu::Function;

/// Transport backed by the `modbus-rtu` master over an RS-485 adapter.
pub(crate) struct MasterTransport {
    master: Master,
    timeout: Duration,
}

impl MasterTransport {
    pub(crate) fn open(port: &str, timeout: Duration) -> Result<Self, TransportError> {
        let master = Master::new_rs485(port, BAUD_RATE).map_err(link_error)?;
        Ok(Self { master, timeout })
    }
}

impl RegisterTransport for MasterTransport {
    fn exchange(
        &mut self,
        slave: u8,
        function: Function,
        address: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let request_function = match function {
            Function::ReadHoldingRegisters { quantity } => {
                modbus_rtu::Function::ReadHoldingRegisters {
                    starting_address: address,
                    quantity,
                }
            }
            Function::WriteSingleRegister { value } => {
                modbus_rtu::Function::WriteSingleRegister { address, value }
            }
        };
        let request = Request::new(slave, &request_function, self.timeout);
        let response = self.master.send(&request).map_err(link_error)?;

        match (function, response) {
            (Function::ReadHoldingRegisters { quantity }, Response::Value(values)) => {
                let values = values.into_vec();
                if values.len() != usize::from(quantity) {
                    return Err(TransportError::Framing(format!(
                        "expected {quantity} registers, got {}",
                        values.len()
                    )));
                }
                Ok(values)
            }
            (_, Response::Exception(exception)) => {
                Err(TransportError::Exception(format!("{exception:?}")))
            }
            (Function::WriteSingleRegister { value }, response) if response.is_success() => {
                Ok(vec![value])
            }
            (_, response) => Err(TransportError::Framing(format!(
                "unexpected response: {response}"
            ))),
        }
    }
}

fn link_error<E>(err: E) -> TransportError
where
    E: std::error::Error + Send + Sync + 'static,
{
    TransportError::Io(io::Error::other(err))
}
