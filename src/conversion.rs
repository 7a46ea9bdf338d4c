//! Vessel RPM, shaft RPM and drive frequency are one speed seen three ways.
//!
//! Vessel and shaft are linked by the diameter ratio of the roller drive,
//! shaft and frequency by the motor's synchronous speed
//! `120 x rated frequency / poles`.

use crate::data::MotorNameplate;
use crate::error::ConversionError;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MillGeometry {
    vessel_diameter_mm: f64,
    shaft_diameter_mm: f64,
}

impl MillGeometry {
    pub fn new(vessel_diameter_mm: f64, shaft_diameter_mm: f64) -> Result<Self, ConversionError> {
        let valid = |value: f64| value.is_finite() && value > 0.0;
        if !valid(vessel_diameter_mm) || !valid(shaft_diameter_mm) {
            return Err(ConversionError::InvalidGeometry {
                vessel_mm: vessel_diameter_mm,
                shaft_mm: shaft_diameter_mm,
            });
        }
        Ok(Self {
            vessel_diameter_mm,
            shaft_diameter_mm,
        })
    }

    pub const fn vessel_diameter_mm(&self) -> f64 {
        self.vessel_diameter_mm
    }

    pub const fn shaft_diameter_mm(&self) -> f64 {
        self.shaft_diameter_mm
    }

    pub fn shaft_rpm_from_vessel_rpm(&self, vessel_rpm: u32) -> u32 {
        round_rpm(f64::from(vessel_rpm) * (self.vessel_diameter_mm / self.shaft_diameter_mm))
    }

    pub fn vessel_rpm_from_shaft_rpm(&self, shaft_rpm: u32) -> u32 {
        round_rpm(f64::from(shaft_rpm) * (self.shaft_diameter_mm / self.vessel_diameter_mm))
    }
}

/// Electrical side of the conversion, fixed for the life of a connection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveRating {
    rated_frequency: f64,
    motor_max_rpm: u32,
}

impl DriveRating {
    pub fn from_nameplate(nameplate: &MotorNameplate) -> Self {
        Self {
            rated_frequency: nameplate.frequency,
            motor_max_rpm: motor_max_rpm(nameplate.frequency, nameplate.poles),
        }
    }

    pub const fn rated_frequency(&self) -> f64 {
        self.rated_frequency
    }

    pub const fn motor_max_rpm(&self) -> u32 {
        self.motor_max_rpm
    }

    /// Rounded to one decimal, as entered on the drive keypad.
    pub fn frequency_from_shaft_rpm(&self, shaft_rpm: u32) -> f64 {
        let hz = f64::from(shaft_rpm) / f64::from(self.motor_max_rpm) * self.rated_frequency;
        (hz * 10.0).round() / 10.0
    }

    pub fn shaft_rpm_from_frequency(&self, hz: f64) -> u32 {
        round_rpm(f64::from(self.motor_max_rpm) * (hz / self.rated_frequency))
    }

    pub fn check_frequency(&self, hz: f64) -> Result<(), ConversionError> {
        if !hz.is_finite() {
            return Err(ConversionError::InvalidInput("frequency"));
        }
        if !(0.0..=self.rated_frequency).contains(&hz) {
            return Err(ConversionError::OutOfRange {
                quantity: "frequency",
                value: hz,
                min: 0.0,
                max: self.rated_frequency,
            });
        }
        Ok(())
    }
}

/// Synchronous speed in RPM. `poles` is at least 2 for a validated nameplate.
pub fn motor_max_rpm(rated_frequency: f64, poles: u16) -> u32 {
    round_rpm(120.0 * rated_frequency / f64::from(poles.max(1)))
}

/// The one quantity the operator is steering by.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlMode {
    Vessel(u32),
    Shaft(u32),
    Frequency(f64),
}

impl ControlMode {
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Vessel(_) => "Vessel RPM",
            Self::Shaft(_) => "Shaft RPM",
            Self::Frequency(_) => "Frequency",
        }
    }
}

/// All three representations, recomputed together from one authority.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivedQuantities {
    pub vessel_rpm: u32,
    pub shaft_rpm: u32,
    pub frequency: f64,
}

impl DerivedQuantities {
    pub fn from_mode(
        mode: ControlMode,
        geometry: &MillGeometry,
        rating: &DriveRating,
    ) -> Result<Self, ConversionError> {
        let derived = match mode {
            ControlMode::Vessel(vessel_rpm) => {
                let shaft_rpm = geometry.shaft_rpm_from_vessel_rpm(vessel_rpm);
                Self {
                    vessel_rpm,
                    shaft_rpm,
                    frequency: rating.frequency_from_shaft_rpm(shaft_rpm),
                }
            }
            ControlMode::Shaft(shaft_rpm) => Self {
                vessel_rpm: geometry.vessel_rpm_from_shaft_rpm(shaft_rpm),
                shaft_rpm,
                frequency: rating.frequency_from_shaft_rpm(shaft_rpm),
            },
            ControlMode::Frequency(frequency) => {
                rating.check_frequency(frequency)?;
                Self::from_frequency(frequency, geometry, rating)
            }
        };
        rating.check_frequency(derived.frequency)?;
        Ok(derived)
    }

    /// Display speeds for a frequency reported by the drive.
    pub fn from_frequency(frequency: f64, geometry: &MillGeometry, rating: &DriveRating) -> Self {
        let shaft_rpm = rating.shaft_rpm_from_frequency(frequency);
        Self {
            vessel_rpm: geometry.vessel_rpm_from_shaft_rpm(shaft_rpm),
            shaft_rpm,
            frequency,
        }
    }

    /// Full-scale values: the motor at rated frequency.
    pub fn maximum(geometry: &MillGeometry, rating: &DriveRating) -> Self {
        Self::from_frequency(rating.rated_frequency(), geometry, rating)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn round_rpm(value: f64) -> u32 {
    value.round().clamp(0.0, f64::from(u32::MAX)) as u32
}
