//! Equations of motion for a charged particle under the Lorentz force
//!
//! The state is `[x, y, z, vx, vy, vz]` and the system is
//!
//! ```text
//! dr/dt = v
//! dv/dt = (q/m) (E + v × B)
//! ```

use nalgebra::{Vector3, Vector6};

use crate::constants::Species;
use crate::field::FieldModel;

/// Position and velocity packed into one vector
pub type State = Vector6<f64>;

pub fn state_from(position: Vector3<f64>, velocity: Vector3<f64>) -> State {
    State::new(
        position.x, position.y, position.z, velocity.x, velocity.y, velocity.z,
    )
}

pub fn position_of(state: &State) -> Vector3<f64> {
    state.fixed_rows::<3>(0).into_owned()
}

pub fn velocity_of(state: &State) -> Vector3<f64> {
    state.fixed_rows::<3>(3).into_owned()
}

/// Side of a switching surface, picked by the sign of the switching function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Switching function negative
    Inside,
    /// Switching function zero or positive
    Outside,
}

impl Branch {
    pub fn of(switching: f64) -> Self {
        if switching < 0.0 {
            Branch::Inside
        } else {
            Branch::Outside
        }
    }
}

/// A first-order ODE system over the particle state.
///
/// Implementations must be pure: solvers call `derivative` many times at
/// trial states, possibly from several threads.
///
/// The right-hand side may jump across one switching surface. Systems that do
/// expose it through `switching_function` and `branch_derivative` so a solver
/// can stop on the surface instead of stepping across the jump.
pub trait EquationsOfMotion: Send + Sync {
    fn derivative(&self, t: f64, state: &State) -> State;

    /// Zero on the switching surface; the sign selects the branch
    fn switching_function(&self, _state: &State) -> f64 {
        f64::INFINITY
    }

    /// Right-hand side of `branch`, continued smoothly past the surface
    fn branch_derivative(&self, t: f64, state: &State, _branch: Branch) -> State {
        self.derivative(t, state)
    }

    /// Fastest angular frequency of the motion (rad/s), 0 when unknown
    fn max_frequency(&self) -> f64 {
        0.0
    }
}

/// Newton's second law with the Lorentz force
#[derive(Debug, Clone, Copy)]
pub struct LorentzEom {
    species: Species,
    fields: FieldModel,
}

impl LorentzEom {
    pub fn new(species: Species, fields: FieldModel) -> Self {
        Self { species, fields }
    }

    /// Acceleration (m/s²) for a particle at `position` moving with `velocity`
    pub fn acceleration(&self, position: &Vector3<f64>, velocity: &Vector3<f64>) -> Vector3<f64> {
        let (e, b) = self.fields.fields(position);
        (e + velocity.cross(&b)) * self.species.charge_to_mass()
    }

    /// Acceleration with the plate field held on (`Inside`) or off (`Outside`)
    fn branch_acceleration(&self, branch: Branch, velocity: &Vector3<f64>) -> Vector3<f64> {
        let e = self.fields.plate_field(branch == Branch::Inside);
        let b = self.fields.magnetic_field(&Vector3::zeros());
        (e + velocity.cross(&b)) * self.species.charge_to_mass()
    }

    /// Cyclotron frequency |q| B / m (rad/s)
    pub fn cyclotron_frequency(&self) -> f64 {
        self.species.charge_to_mass().abs() * self.fields.magnetic_field_magnitude()
    }
}

impl EquationsOfMotion for LorentzEom {
    fn derivative(&self, _t: f64, state: &State) -> State {
        let position = position_of(state);
        let velocity = velocity_of(state);
        state_from(velocity, self.acceleration(&position, &velocity))
    }

    /// Signed distance to the nearer plate, negative between the plates
    fn switching_function(&self, state: &State) -> f64 {
        self.fields.plate_boundary_distance(&position_of(state))
    }

    fn branch_derivative(&self, _t: f64, state: &State, branch: Branch) -> State {
        let velocity = velocity_of(state);
        state_from(velocity, self.branch_acceleration(branch, &velocity))
    }

    fn max_frequency(&self) -> f64 {
        self.cyclotron_frequency()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::ELEMENTARY_CHARGE;
    use crate::field::FieldConfiguration;

    fn eom(voltage: f64, b: f64, magnet: Vector3<f64>) -> LorentzEom {
        let fields = FieldModel::new(&FieldConfiguration::new(voltage, b, magnet)).unwrap();
        LorentzEom::new(Species::electron(), fields)
    }

    #[test]
    fn test_state_packing() {
        let s = state_from(Vector3::new(1.0, 2.0, 3.0), Vector3::new(4.0, 5.0, 6.0));
        assert_eq!(position_of(&s), Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(velocity_of(&s), Vector3::new(4.0, 5.0, 6.0));
    }

    #[test]
    fn test_zero_field_derivative_is_exact() {
        let eom = eom(10_000.0, 0.0, Vector3::zeros());
        let s = state_from(Vector3::new(0.0, 0.02, 0.0), Vector3::new(0.0, 5.9e7, 0.0));
        let d = eom.derivative(0.0, &s);
        assert_eq!(d, State::new(0.0, 5.9e7, 0.0, 0.0, 0.0, 0.0));
    }

    #[test]
    fn test_magnetic_force_direction() {
        // Electron moving along +y in B along +x: v × B = -z, q < 0, so the
        // force points up (+z)
        let eom = eom(10_000.0, 1e-3, Vector3::new(0.1, 0.0, 0.0));
        let a = eom.acceleration(&Vector3::zeros(), &Vector3::new(0.0, 1e7, 0.0));
        assert_eq!(a.x, 0.0);
        assert_eq!(a.y, 0.0);
        assert!(a.z > 0.0);
        // |a| = (e/m) v B
        let expected = Species::electron().charge_to_mass().abs() * 1e7 * 1e-3;
        assert!((a.z - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_plate_field_accelerates_electron_forward() {
        let eom = eom(10_000.0, 0.0, Vector3::zeros());
        let a = eom.acceleration(&Vector3::new(0.0, -0.05, 0.0), &Vector3::zeros());
        assert!(a.y > 0.0);
        let expected = ELEMENTARY_CHARGE * 1e5 / Species::electron().mass;
        assert!((a.y - expected).abs() / expected < 1e-12);
    }

    #[test]
    fn test_branch_derivative_matches_pointwise_field() {
        let eom = eom(10_000.0, 0.5, Vector3::x());
        let v = Vector3::new(0.0, 3e7, 1e6);
        for y in [-0.05, -1e-9, 0.0, 1e-9, 0.02, -0.2] {
            let s = state_from(Vector3::new(0.0, y, 0.0), v);
            let branch = Branch::of(eom.switching_function(&s));
            assert_eq!(eom.branch_derivative(0.0, &s, branch), eom.derivative(0.0, &s), "y = {}", y);
        }
        assert_eq!(Branch::of(eom.switching_function(&state_from(Vector3::new(0.0, -0.05, 0.0), v))), Branch::Inside);
        assert_eq!(Branch::of(eom.switching_function(&state_from(Vector3::new(0.0, 0.05, 0.0), v))), Branch::Outside);
    }

    #[test]
    fn test_branch_derivative_continues_past_surface() {
        // Just downstream of the anode, the inside branch still feels the plate field
        let eom = eom(10_000.0, 0.0, Vector3::zeros());
        let s = state_from(Vector3::new(0.0, 1e-6, 0.0), Vector3::zeros());
        assert_eq!(eom.derivative(0.0, &s)[4], 0.0);
        assert!(eom.branch_derivative(0.0, &s, Branch::Inside)[4] > 0.0);
    }

    #[test]
    fn test_cyclotron_frequency() {
        let eom = eom(0.0, 2.0, Vector3::x());
        let expected = Species::electron().charge_to_mass().abs() * 2.0;
        assert!((eom.max_frequency() - expected).abs() / expected < 1e-15);
        // Uncharged plates never switch
        let s = state_from(Vector3::new(0.0, -0.05, 0.0), Vector3::zeros());
        assert_eq!(Branch::of(eom.switching_function(&s)), Branch::Outside);
    }

    #[test]
    fn test_species_substitution_flips_force() {
        let fields = FieldModel::new(&FieldConfiguration::new(1.0, 1e-3, Vector3::x())).unwrap();
        let v = Vector3::new(0.0, 1e6, 0.0);
        let electron = LorentzEom::new(Species::electron(), fields).acceleration(&Vector3::zeros(), &v);
        let positron = LorentzEom::new(Species::positron(), fields).acceleration(&Vector3::zeros(), &v);
        assert_eq!(electron, -positron);
    }
}
