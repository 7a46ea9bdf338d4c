use std::time::Duration;

use crate::error::TransportError;
use crate::interface::InterfaceMode;
use crate::rtu::Function;

mod master;
mod serial;
pub mod sim;

pub use serial::RtuTransport;
pub use sim::SimInverter;

/// One request/response exchange with a slave on the bus.
///
/// Reads return the requested registers; a single-register write returns the
/// value the device echoed. Implementations never retry.
pub trait RegisterTransport: Send {
    fn exchange(
        &mut self,
        slave: u8,
        function: Function,
        address: u16,
    ) -> Result<Vec<u16>, TransportError>;
}

impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn exchange(
        &mut self,
        slave: u8,
        function: Function,
        address: u16,
    ) -> Result<Vec<u16>, TransportError> {
        (**self).exchange(slave, function, address)
    }
}

/// Opens a transport on a named port.
pub trait Connector: Send {
    fn open(&self, port: &str) -> Result<Box<dyn RegisterTransport>, TransportError>;
}

impl<F> Connector for F
where
    F: Fn(&str) -> Result<Box<dyn RegisterTransport>, TransportError> + Send,
{
    fn open(&self, port: &str) -> Result<Box<dyn RegisterTransport>, TransportError> {
        self(port)
    }
}

/// Connector selected by the `--interface` option.
#[derive(Debug, Clone)]
pub struct LinkConnector {
    pub interface: InterfaceMode,
    pub timeout: Duration,
    sim: SimInverter,
}

impl LinkConnector {
    pub fn new(interface: InterfaceMode, timeout: Duration) -> Self {
        Self {
            interface,
            timeout,
            sim: SimInverter::new(),
        }
    }
}

impl Connector for LinkConnector {
    fn open(&self, port: &str) -> Result<Box<dyn RegisterTransport>, TransportError> {
        match self.interface {
            InterfaceMode::Rs485 => Ok(Box::new(master::MasterTransport::open(
                port,
                self.timeout,
            )?)),
            InterfaceMode::Native => Ok(Box::new(RtuTransport::open(port, self.timeout)?)),
            InterfaceMode::Simulation => Ok(Box::new(self.sim.clone())),
        }
    }
}

/// Candidate ports for discovery, in the order they are tried.
pub fn candidate_ports(interface: InterfaceMode) -> Result<Vec<String>, TransportError> {
    if interface == InterfaceMode::Simulation {
        return Ok(vec![String::from("sim")]);
    }
    let ports = serialport::available_ports()
        .map_err(|err| TransportError::Io(std::io::Error::other(err)))?;
    let mut names: Vec<String> = ports
        .into_iter()
        .filter(|port| match &port.port_type {
            serialport::SerialPortType::UsbPort(usb) => usb.manufacturer.as_deref() != Some("Intel"),
            _ => true,
        })
        .map(|port| port.port_name)
        .collect();
    names.sort();
    Ok(names)
}
