//! Initial speed from the accelerating voltage
//!
//! Two kinematic regimes share the rest of the pipeline:
//! - classical: `qV = m v² / 2`
//! - relativistic: `qV = (γ - 1) m c²`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants::Species;
use crate::error::{BeamError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Regime {
    #[default]
    Classical,
    Relativistic,
}

impl Regime {
    /// Speed (m/s) after falling through `voltage`
    pub fn initial_speed(&self, voltage: f64, species: &Species, speed_of_light: f64) -> Result<f64> {
        match self {
            Regime::Classical => classical_speed(voltage, species, speed_of_light),
            Regime::Relativistic => relativistic_speed(voltage, species, speed_of_light),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Regime::Classical => "classical",
            Regime::Relativistic => "relativistic",
        }
    }
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Regime {
    type Err = BeamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "classical" | "newtonian" | "non-relativistic" => Ok(Regime::Classical),
            "relativistic" => Ok(Regime::Relativistic),
            _ => Err(BeamError::InvalidInput(format!(
                "unknown regime: {}. Use: classical or relativistic",
                s
            ))),
        }
    }
}

fn check_voltage(voltage: f64) -> Result<()> {
    if !voltage.is_finite() || voltage < 0.0 {
        return Err(BeamError::InvalidInput(format!(
            "accelerating voltage must be finite and non-negative, got {}",
            voltage
        )));
    }
    Ok(())
}

fn newtonian_speed(voltage: f64, species: &Species) -> f64 {
    (2.0 * species.charge.abs() * voltage / species.mass).sqrt()
}

/// v = sqrt(2 |q| V / m)
pub fn classical_speed(voltage: f64, species: &Species, speed_of_light: f64) -> Result<f64> {
    check_voltage(voltage)?;
    let v = newtonian_speed(voltage, species);
    if v >= speed_of_light {
        tracing::warn!(
            "classical speed {:.4e} m/s exceeds c at {} V; consider the relativistic regime",
            v,
            voltage
        );
    }
    Ok(v)
}

/// v = c sqrt(1 - 1/γ²) with γ = 1 + |q|V / (m c²)
///
/// Always strictly below both c and the classical speed for V > 0.
pub fn relativistic_speed(voltage: f64, species: &Species, speed_of_light: f64) -> Result<f64> {
    check_voltage(voltage)?;

    let k = species.charge.abs() * voltage / (species.mass * speed_of_light * speed_of_light);

    // β itself rounds to 1 once 1/γ² drops below double precision
    if !(speed_of_light * (k * (k + 2.0)).sqrt() / (k + 1.0) < speed_of_light) {
        return Err(BeamError::InvalidInput(format!(
            "{} V drives the particle to the speed of light in double precision",
            voltage
        )));
    }

    // c sqrt(k (k + 2)) / (k + 1) = v_classical sqrt(1 + k/2) / (1 + k)
    let classical = newtonian_speed(voltage, species);
    let mut v = classical * (1.0 + 0.5 * k).sqrt() / (1.0 + k);
    if v > 0.0 && v >= classical {
        // Correction lost to rounding at tiny k
        v = f64::from_bits(classical.to_bits() - 1);
    }

    if !(v < speed_of_light) {
        return Err(BeamError::InvalidInput(format!(
            "{} V drives the particle to the speed of light in double precision",
            voltage
        )));
    }
    Ok(v)
}

/// γ for a given speed
pub fn lorentz_factor(speed: f64, speed_of_light: f64) -> f64 {
    let beta = speed / speed_of_light;
    1.0 / (1.0 - beta * beta).sqrt()
}

/// Kinetic energy in electron-volts gained by a particle of charge `charge` across `voltage`
pub fn kinetic_energy_ev(voltage: f64, charge: f64, elementary_charge: f64) -> f64 {
    voltage * charge.abs() / elementary_charge
}
