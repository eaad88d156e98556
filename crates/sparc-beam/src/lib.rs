//! sparc-beam: electron-gun beam trajectories
//!
//! This crate provides:
//! - A field model for the accelerating plates and the deflecting magnet
//! - Lorentz-force equations of motion over the `[x, y, z, vx, vy, vz]` state
//! - Initial speed from the accelerating voltage (classical or relativistic)
//! - Fixed-step and adaptive Runge-Kutta integration onto a sampled time domain
//!
//! Units are SI. The beam travels along +y from the anode aperture at the
//! origin; +x points at the right magnet and +z is up.

pub mod constants;
pub mod eom;
pub mod error;
pub mod field;
pub mod kinematics;
pub mod solver;
pub mod trajectory;

pub use constants::{PhysicalConstants, Species};
pub use eom::{Branch, EquationsOfMotion, LorentzEom, State};
pub use error::{BeamError, Result};
pub use field::{FieldConfiguration, FieldModel};
pub use kinematics::Regime;
pub use solver::{DormandPrince, Rk4, Solver, SolverKind, TimeDomain};
pub use trajectory::{ScreenHit, Trajectory};

use std::fmt;
use std::path::Path;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn};

use constants::DEFAULT_ELECTRODE_GAP;

/// Main entry point: trace an electron with default apparatus settings.
/// Returns one point per time sample.
pub fn compute_trajectory(
    voltage: f64,
    magnetic_field_magnitude: f64,
    magnet_position: Vector3<f64>,
    regime: Regime,
) -> Result<Vec<Vector3<f64>>> {
    let params = RunParameters {
        voltage,
        magnetic_field: magnetic_field_magnitude,
        magnet_position,
        regime,
    };
    compute_trajectory_with(&params, &SimulationConfig::default()).map(Trajectory::into_points)
}

/// Trace one run with explicit configuration. Either the whole trajectory is
/// returned or an error; there are no partial results.
pub fn compute_trajectory_with(params: &RunParameters, config: &SimulationConfig) -> Result<Trajectory> {
    let span = info_span!("run", voltage = params.voltage, b = params.magnetic_field, regime = %params.regime);
    let _enter = span.enter();

    debug!("{}", RunPhase::Integrating);
    match integrate_run(params, config) {
        Ok(trajectory) => {
            debug!("{}: {} points, path {:.4e} m", RunPhase::Done, trajectory.len(), trajectory.path_length());
            Ok(trajectory)
        }
        Err(e) => {
            warn!("{}: {}", RunPhase::Failed, e);
            Err(e)
        }
    }
}

fn integrate_run(params: &RunParameters, config: &SimulationConfig) -> Result<Trajectory> {
    config.validate()?;
    params.validate()?;

    let species = config.species();
    let v0 = params
        .regime
        .initial_speed(params.voltage, &species, config.constants.speed_of_light)?;
    debug!("initial speed {:.6e} m/s", v0);

    let fields = FieldModel::new(&params.field_configuration(config.electrode_gap))?;
    let eom = LorentzEom::new(species, fields);

    let y0 = eom::state_from(Vector3::zeros(), field::beam_axis() * v0);
    let times = config.time_domain.seconds();

    let states = solver::integrate(config.solver.as_solver(), &eom, &y0, &times)?;
    Trajectory::from_states(&times, &states)
}

/// Lifecycle of a single run. Nothing survives between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    Integrating,
    Done,
    Failed,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunPhase::Idle => "idle",
            RunPhase::Integrating => "integrating",
            RunPhase::Done => "done",
            RunPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Per-run scalars chosen by the user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunParameters {
    /// Accelerating voltage (V)
    pub voltage: f64,
    /// Magnetic field magnitude (T)
    #[serde(default)]
    pub magnetic_field: f64,
    /// Magnet position (m)
    #[serde(default = "origin")]
    pub magnet_position: Vector3<f64>,
    #[serde(default)]
    pub regime: Regime,
}

impl RunParameters {
    pub fn validate(&self) -> Result<()> {
        if !(self.voltage.is_finite() && self.voltage > 0.0) {
            return Err(BeamError::InvalidInput(format!(
                "voltage must be positive, got {}",
                self.voltage
            )));
        }
        Ok(())
    }

    pub fn field_configuration(&self, electrode_gap: f64) -> FieldConfiguration {
        FieldConfiguration::new(self.voltage, self.magnetic_field, self.magnet_position)
            .with_electrode_gap(electrode_gap)
    }
}

fn origin() -> Vector3<f64> {
    Vector3::zeros()
}

/// Configuration shared by every run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Physical constants
    pub constants: PhysicalConstants,
    /// Traced particle; an electron built from `constants` when absent
    pub species: Option<Species>,
    /// Plate separation (m)
    pub electrode_gap: f64,
    /// Sample instants
    pub time_domain: TimeDomain,
    /// Integration method
    pub solver: SolverKind,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            constants: PhysicalConstants::default(),
            species: None,
            electrode_gap: DEFAULT_ELECTRODE_GAP,
            time_domain: TimeDomain::default(),
            solver: SolverKind::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BeamError::Configuration(format!("malformed config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            BeamError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&json)
    }

    pub fn species(&self) -> Species {
        self.species.unwrap_or_else(|| self.constants.electron())
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.constants;
        for (name, value) in [
            ("elementary_charge", c.elementary_charge),
            ("electron_mass", c.electron_mass),
            ("speed_of_light", c.speed_of_light),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(BeamError::Configuration(format!("{} must be positive, got {}", name, value)));
            }
        }

        let species = self.species();
        if !(species.mass.is_finite() && species.mass > 0.0) || !species.charge.is_finite() || species.charge == 0.0 {
            return Err(BeamError::Configuration(format!(
                "species needs positive mass and non-zero charge, got {:?}",
                species
            )));
        }

        if !(self.electrode_gap.is_finite() && self.electrode_gap > 0.0) {
            return Err(BeamError::Configuration(format!(
                "electrode gap must be positive, got {}",
                self.electrode_gap
            )));
        }

        self.time_domain.validate()?;
        self.solver.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_straight_beam_without_field() {
        let points = compute_trajectory(10_000.0, 0.0, Vector3::zeros(), Regime::Classical).unwrap();
        assert_eq!(points.len(), constants::DEFAULT_SAMPLE_COUNT);
        for p in &points {
            assert_eq!(p.x, 0.0);
            assert_eq!(p.z, 0.0);
        }
        assert!(points.windows(2).all(|w| w[1].y > w[0].y));
    }

    #[test]
    fn test_straight_beam_follows_initial_speed() {
        let config = SimulationConfig::default();
        let params = RunParameters {
            voltage: 10_000.0,
            magnetic_field: 0.0,
            magnet_position: Vector3::new(0.2, 0.0, 0.0),
            regime: Regime::Relativistic,
        };
        let traj = compute_trajectory_with(&params, &config).unwrap();
        let v0 = Regime::Relativistic
            .initial_speed(10_000.0, &Species::electron(), constants::SPEED_OF_LIGHT)
            .unwrap();
        for (t, p) in traj.times().iter().zip(traj.points()) {
            assert!((p.y - v0 * t).abs() <= 1e-12 * (v0 * t).max(1e-30));
        }
    }

    #[test]
    fn test_negative_voltage_fails() {
        for voltage in [-5.0, 0.0, f64::NAN] {
            let result = compute_trajectory(voltage, 0.0, Vector3::zeros(), Regime::Classical);
            assert!(matches!(result, Err(BeamError::InvalidInput(_))), "voltage {}", voltage);
        }
    }

    #[test]
    fn test_huge_voltage_relativistic() {
        let points = compute_trajectory(1e12, 0.0, Vector3::zeros(), Regime::Relativistic).unwrap();
        let end = points.last().unwrap();
        // Over 1 ns light covers just under 0.3 m
        let c_t = constants::SPEED_OF_LIGHT * constants::DEFAULT_TIME_UNIT;
        assert!(end.y < c_t * (1.0 + 1e-9));
        assert!(end.y > 0.999 * c_t);

        let v0 = Regime::Relativistic
            .initial_speed(1e12, &Species::electron(), constants::SPEED_OF_LIGHT)
            .unwrap();
        assert!(v0 < constants::SPEED_OF_LIGHT);
    }

    #[test]
    fn test_magnetic_deflection_is_upward_for_electron() {
        let points = compute_trajectory(10_000.0, 1e-3, Vector3::new(0.1, 0.0, 0.0), Regime::Classical).unwrap();
        let end = points.last().unwrap();
        assert!(end.z > 0.0);
        assert!(points.iter().all(|p| p.x == 0.0));

        // Speed is conserved by a pure magnetic force: end stays on the
        // gyration circle y² + (z - R)² = R²
        let v0 = kinematics::classical_speed(10_000.0, &Species::electron(), constants::SPEED_OF_LIGHT).unwrap();
        let r = v0 / (Species::electron().charge_to_mass().abs() * 1e-3);
        let off = (end.y * end.y + (end.z - r) * (end.z - r)).sqrt() - r;
        assert!(off.abs() / r < 1e-8);
    }

    #[test]
    fn test_sample_count_follows_config() {
        let config = SimulationConfig {
            time_domain: TimeDomain::new(37, 1.0),
            ..SimulationConfig::default()
        };
        let params = RunParameters {
            voltage: 20_000.0,
            magnetic_field: 5e-4,
            magnet_position: Vector3::new(-0.1, 0.0, 0.05),
            regime: Regime::Classical,
        };
        let traj = compute_trajectory_with(&params, &config).unwrap();
        assert_eq!(traj.len(), 37);
        assert_eq!(traj.times().len(), 37);
    }

    #[test]
    fn test_strong_field_matches_denser_reference() {
        let reference = SimulationConfig {
            solver: SolverKind::Rk4(Rk4::default().denser(10)),
            ..SimulationConfig::default()
        };
        for b in [0.5, 5.0] {
            let params = RunParameters {
                voltage: 10_000.0,
                magnetic_field: b,
                magnet_position: Vector3::new(0.1, 0.0, 0.0),
                regime: Regime::Classical,
            };
            let run = compute_trajectory_with(&params, &SimulationConfig::default()).unwrap();
            let fine = compute_trajectory_with(&params, &reference).unwrap();

            let scale = fine.points().iter().map(|p| p.norm()).fold(0.0, f64::max);
            let worst = run
                .points()
                .iter()
                .zip(fine.points())
                .map(|(a, b)| (a - b).norm())
                .fold(0.0, f64::max);
            assert!(worst / scale <= 1e-5, "B = {} T: relative deviation {}", b, worst / scale);
        }
    }

    #[test]
    fn test_solvers_agree() {
        let params = RunParameters {
            voltage: 50_000.0,
            magnetic_field: 2e-3,
            magnet_position: Vector3::new(0.1, 0.0, 0.1),
            regime: Regime::Relativistic,
        };
        let rk4 = compute_trajectory_with(&params, &SimulationConfig::default()).unwrap();
        let dp_config = SimulationConfig {
            solver: SolverKind::DormandPrince(DormandPrince::default()),
            ..SimulationConfig::default()
        };
        let dp = compute_trajectory_with(&params, &dp_config).unwrap();

        let scale = rk4.points().iter().map(|p| p.norm()).fold(0.0, f64::max);
        for (a, b) in rk4.points().iter().zip(dp.points()) {
            assert!((a - b).norm() / scale < 1e-6);
        }
    }

    #[test]
    fn test_bad_gap_is_configuration_error() {
        let config = SimulationConfig {
            electrode_gap: 0.0,
            ..SimulationConfig::default()
        };
        let params = RunParameters {
            voltage: 100.0,
            magnetic_field: 0.0,
            magnet_position: Vector3::zeros(),
            regime: Regime::Classical,
        };
        assert!(matches!(
            compute_trajectory_with(&params, &config),
            Err(BeamError::Configuration(_))
        ));
    }

    #[test]
    fn test_proton_is_slower_and_bends_down() {
        let config = SimulationConfig {
            species: Some(Species::proton()),
            ..SimulationConfig::default()
        };
        let params = RunParameters {
            voltage: 10_000.0,
            magnetic_field: 1e-2,
            magnet_position: Vector3::new(0.1, 0.0, 0.0),
            regime: Regime::Classical,
        };
        let proton = compute_trajectory_with(&params, &config).unwrap();
        let electron = compute_trajectory_with(&params, &SimulationConfig::default()).unwrap();
        assert!(proton.final_point().unwrap().y < electron.final_point().unwrap().y.abs());
        assert!(proton.final_point().unwrap().z < 0.0);
    }

    #[test]
    fn test_config_from_json() {
        let config = SimulationConfig::from_json_str(
            r#"{
                "electrode_gap": 0.05,
                "time_domain": { "samples": 200 },
                "solver": { "method": "dormand_prince", "max_err": 1e-8 }
            }"#,
        )
        .unwrap();
        assert_eq!(config.electrode_gap, 0.05);
        assert_eq!(config.time_domain.samples, 200);
        assert_eq!(config.time_domain.duration, 1.0);
        assert_eq!(config.species(), Species::electron());

        assert!(matches!(
            SimulationConfig::from_json_str(r#"{ "time_domain": { "samples": 0 } }"#),
            Err(BeamError::Configuration(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json_str("not json"),
            Err(BeamError::Configuration(_))
        ));
    }

    #[test]
    fn test_config_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "species": {{ "charge": 1.602176634e-19, "mass": 9.1093837015e-31 }} }}"#).unwrap();
        let config = SimulationConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.species(), Species::positron());

        let missing = SimulationConfig::from_json_file(Path::new("/nonexistent/sparc.json"));
        assert!(matches!(missing, Err(BeamError::Configuration(_))));
    }

    #[test]
    fn test_run_parameters_defaults() {
        let params: RunParameters = serde_json::from_str(r#"{ "voltage": 20000 }"#).unwrap();
        assert_eq!(params.magnetic_field, 0.0);
        assert_eq!(params.magnet_position, Vector3::zeros());
        assert_eq!(params.regime, Regime::Classical);
    }
}
