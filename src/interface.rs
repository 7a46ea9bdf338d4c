use clap::ValueEnum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum InterfaceMode {
    /// `modbus-rtu` master on the serial or RS-485 adapter
    #[default]
    Rs485,
    /// In-crate RTU framing, for adapters the master does not drive well
    Native,
    /// Simulated drive, no hardware
    Simulation,
}

impl InterfaceMode {
    pub const fn label(self) -> &'static str {
        match self {
            Self::Rs485 => "RS485",
            Self::Native => "RTU",
            Self::Simulation => "SIM",
        }
    }
}
