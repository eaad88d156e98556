//! Physical constants and apparatus defaults

use serde::{Deserialize, Serialize};

/// Elementary charge (C), CODATA 2018 exact value
pub const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;
/// Electron rest mass (kg)
pub const ELECTRON_MASS: f64 = 9.109_383_701_5e-31;
/// Proton rest mass (kg)
pub const PROTON_MASS: f64 = 1.672_621_923_69e-27;
/// Speed of light in vacuum (m/s)
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Separation between the accelerating plates (m)
pub const DEFAULT_ELECTRODE_GAP: f64 = 0.10;
/// Trajectory samples per run
pub const DEFAULT_SAMPLE_COUNT: usize = 1000;
/// Length of one internal time unit (s)
pub const DEFAULT_TIME_UNIT: f64 = 1e-9;

/// Constants every computation reads. Passed explicitly so runs stay
/// deterministic and can be overridden per run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicalConstants {
    /// Elementary charge (C)
    pub elementary_charge: f64,
    /// Electron rest mass (kg)
    pub electron_mass: f64,
    /// Speed of light (m/s)
    pub speed_of_light: f64,
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self {
            elementary_charge: ELEMENTARY_CHARGE,
            electron_mass: ELECTRON_MASS,
            speed_of_light: SPEED_OF_LIGHT,
        }
    }
}

impl PhysicalConstants {
    /// Electron with these constants
    pub fn electron(&self) -> Species {
        Species {
            charge: -self.elementary_charge,
            mass: self.electron_mass,
        }
    }
}

/// The charged particle being traced
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Species {
    /// Signed charge (C)
    pub charge: f64,
    /// Rest mass (kg)
    pub mass: f64,
}

impl Default for Species {
    fn default() -> Self {
        Self::electron()
    }
}

impl Species {
    pub fn electron() -> Self {
        Self {
            charge: -ELEMENTARY_CHARGE,
            mass: ELECTRON_MASS,
        }
    }

    pub fn positron() -> Self {
        Self {
            charge: ELEMENTARY_CHARGE,
            mass: ELECTRON_MASS,
        }
    }

    pub fn proton() -> Self {
        Self {
            charge: ELEMENTARY_CHARGE,
            mass: PROTON_MASS,
        }
    }

    /// Charge-to-mass ratio q/m (C/kg)
    pub fn charge_to_mass(&self) -> f64 {
        self.charge / self.mass
    }
}
