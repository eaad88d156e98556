//! Field model for the electron gun
//!
//! Uniform parallel-plate electric field inside the accelerating gap and a
//! uniform deflecting magnetic field whose direction comes from the magnet
//! position projected onto the plane transverse to the beam.
//!
//! Axes: +y is the beam axis, +x points at the right magnet, +z is up.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_ELECTRODE_GAP;
use crate::error::{BeamError, Result};

/// Unit vector along the beam axis
pub fn beam_axis() -> Vector3<f64> {
    Vector3::y()
}

/// Fields for one simulation run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldConfiguration {
    /// Accelerating voltage between the plates (V)
    pub voltage: f64,
    /// Plate separation (m)
    pub electrode_gap: f64,
    /// |B| (T)
    pub magnetic_field_magnitude: f64,
    /// Magnet position relative to the origin (m)
    pub magnet_position: Vector3<f64>,
}

impl FieldConfiguration {
    pub fn new(voltage: f64, magnetic_field_magnitude: f64, magnet_position: Vector3<f64>) -> Self {
        Self {
            voltage,
            electrode_gap: DEFAULT_ELECTRODE_GAP,
            magnetic_field_magnitude,
            magnet_position,
        }
    }

    pub fn with_electrode_gap(mut self, electrode_gap: f64) -> Self {
        self.electrode_gap = electrode_gap;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.electrode_gap.is_finite() && self.electrode_gap > 0.0) {
            return Err(BeamError::Configuration(format!(
                "electrode gap must be positive, got {}",
                self.electrode_gap
            )));
        }
        if !self.magnetic_field_magnitude.is_finite() {
            return Err(BeamError::InvalidInput(format!(
                "magnetic field must be finite, got {}",
                self.magnetic_field_magnitude
            )));
        }
        if !self.magnet_position.iter().all(|c| c.is_finite()) {
            return Err(BeamError::InvalidInput("magnet position must be finite".into()));
        }
        Ok(())
    }
}

/// Evaluates E and B at a point. Built from a validated configuration and
/// immutable afterwards, so one model can be shared across threads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldModel {
    gap: f64,
    e_plate: Vector3<f64>,
    b: Vector3<f64>,
}

impl FieldModel {
    pub fn new(config: &FieldConfiguration) -> Result<Self> {
        config.validate()?;

        // Field points from the anode (origin) back toward the cathode (y = -gap)
        let e_plate = -beam_axis() * (config.voltage / config.electrode_gap);

        Ok(Self {
            gap: config.electrode_gap,
            e_plate,
            b: magnetic_field_vector(config.magnetic_field_magnitude, &config.magnet_position),
        })
    }

    /// Electric field (V/m). Only the open slab between the plates is
    /// filled; the drift region downstream of the anode is field-free.
    pub fn electric_field(&self, position: &Vector3<f64>) -> Vector3<f64> {
        self.plate_field(self.plate_boundary_distance(position) < 0.0)
    }

    /// Plate field with the point taken as between the plates or not
    pub fn plate_field(&self, between_plates: bool) -> Vector3<f64> {
        if between_plates {
            self.e_plate
        } else {
            Vector3::zeros()
        }
    }

    /// Signed distance (m) along the beam axis to the nearer plate, negative
    /// between the plates. Infinite when the plates are uncharged, since the
    /// field then has no jump to locate.
    pub fn plate_boundary_distance(&self, position: &Vector3<f64>) -> f64 {
        if self.e_plate == Vector3::zeros() {
            return f64::INFINITY;
        }
        let along = position.dot(&beam_axis());
        along.max(-self.gap - along)
    }

    /// Magnetic field (T). Uniform over the trajectory.
    pub fn magnetic_field(&self, _position: &Vector3<f64>) -> Vector3<f64> {
        self.b
    }

    pub fn magnetic_field_magnitude(&self) -> f64 {
        self.b.norm()
    }

    pub fn fields(&self, position: &Vector3<f64>) -> (Vector3<f64>, Vector3<f64>) {
        (self.electric_field(position), self.magnetic_field(position))
    }

    /// |E| between the plates (V/m)
    pub fn plate_field_strength(&self) -> f64 {
        self.e_plate.norm()
    }
}

/// Point-source approximation: direction from the origin to the magnet,
/// with the beam-axis component removed.
fn magnetic_field_vector(magnitude: f64, magnet_position: &Vector3<f64>) -> Vector3<f64> {
    if magnitude == 0.0 {
        return Vector3::zeros();
    }

    let axis = beam_axis();
    let transverse = magnet_position - axis * magnet_position.dot(&axis);
    let norm = transverse.norm();

    // Magnet on the beam axis: use the line joining the two magnets
    let direction = if norm < 1e-12 {
        Vector3::x()
    } else {
        transverse / norm
    };

    direction * magnitude
}
