//! ODE solvers that report the state at caller-chosen sample times
//!
//! Both solvers take an initial state and a strictly increasing list of
//! sample times (s) and return one state per sample, the first being the
//! initial state itself.
//!
//! - [`Rk4`]: classical fourth-order Runge-Kutta with equal sub-steps per
//!   sample interval, sized from the fastest rotation of the system
//! - [`DormandPrince`]: embedded RK5(4) with adaptive step size, clipped so
//!   that every sample time is hit exactly

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::constants::{DEFAULT_SAMPLE_COUNT, DEFAULT_TIME_UNIT};
use crate::eom::{Branch, EquationsOfMotion, State};
use crate::error::{BeamError, Result};

/// Evenly spaced sample instants over `[0, duration]` in internal time units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeDomain {
    /// Number of samples, including both end points
    pub samples: usize,
    /// Simulated interval in internal time units
    pub duration: f64,
    /// Seconds per internal time unit
    pub time_unit: f64,
}

impl Default for TimeDomain {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SAMPLE_COUNT,
            duration: 1.0,
            time_unit: DEFAULT_TIME_UNIT,
        }
    }
}

impl TimeDomain {
    pub fn new(samples: usize, duration: f64) -> Self {
        Self {
            samples,
            duration,
            ..Self::default()
        }
    }

    pub fn with_time_unit(mut self, time_unit: f64) -> Self {
        self.time_unit = time_unit;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.samples == 0 {
            return Err(BeamError::Configuration("time domain needs at least one sample".into()));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(BeamError::Configuration(format!(
                "time domain duration must be positive, got {}",
                self.duration
            )));
        }
        if !(self.time_unit.is_finite() && self.time_unit > 0.0) {
            return Err(BeamError::Configuration(format!(
                "time unit must be positive, got {}",
                self.time_unit
            )));
        }
        Ok(())
    }

    /// Sample instants in seconds
    pub fn seconds(&self) -> Vec<f64> {
        if self.samples == 1 {
            return vec![0.0];
        }
        let last = (self.samples - 1) as f64;
        (0..self.samples)
            .map(|i| self.duration * self.time_unit * i as f64 / last)
            .collect()
    }
}

/// Counters kept by a solve
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SolveStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub fn_evals: usize,
}

/// States at each requested time plus counters
#[derive(Debug, Clone)]
pub struct Solution {
    pub states: Vec<State>,
    pub stats: SolveStats,
}

pub trait Solver: Send + Sync {
    fn name(&self) -> &str;

    /// Integrate `eom` from `y0` at `times[0]` and sample at every entry of `times`
    fn solve(&self, eom: &dyn EquationsOfMotion, y0: &State, times: &[f64]) -> Result<Solution>;
}

fn check_times(times: &[f64]) -> Result<()> {
    if times.is_empty() {
        return Err(BeamError::Configuration("no sample times given".into()));
    }
    if times.iter().any(|t| !t.is_finite()) {
        return Err(BeamError::Configuration("sample times must be finite".into()));
    }
    if let Some(w) = times.windows(2).find(|w| w[1] <= w[0]) {
        return Err(BeamError::Configuration(format!(
            "sample times must be strictly increasing ({} then {})",
            w[0], w[1]
        )));
    }
    Ok(())
}

fn check_finite(state: &State, t: f64) -> Result<()> {
    if state.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(BeamError::Numerical(format!("state became non-finite at t = {:e} s", t)))
    }
}

/// Search for a surface crossing stops once the bracket is this narrow,
/// as a fraction of the step
const CROSSING_TOLERANCE: f64 = 1e-10;
const MAX_CROSSING_ITERATIONS: usize = 60;
/// Crossings split out of one step before the rest is taken whole
const MAX_CROSSINGS_PER_STEP: usize = 4;
const MAX_SUBSTEPS: f64 = 1e7;

/// Fourth-order Runge-Kutta with equal steps per sample interval.
///
/// Each interval gets at least `substeps` steps, and more when the fastest
/// rotation of the system would turn by over `max_phase` radians in one
/// step. A step that would cross the switching surface is cut on the
/// surface, so the jump in the right-hand side never falls inside a step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Rk4 {
    pub substeps: usize,
    /// Largest rotation per step (rad)
    pub max_phase: f64,
}

impl Default for Rk4 {
    fn default() -> Self {
        Self {
            substeps: 4,
            max_phase: 0.01,
        }
    }
}

impl Rk4 {
    pub fn new(substeps: usize) -> Self {
        Self {
            substeps,
            ..Self::default()
        }
    }

    /// The same solver taking `factor` times as many steps
    pub fn denser(&self, factor: usize) -> Self {
        Self {
            substeps: self.substeps * factor,
            max_phase: self.max_phase / factor as f64,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.substeps == 0 {
            return Err(BeamError::Configuration("rk4 needs at least one substep".into()));
        }
        if !(self.max_phase.is_finite() && self.max_phase > 0.0) {
            return Err(BeamError::Configuration(format!(
                "max_phase must be positive, got {}",
                self.max_phase
            )));
        }
        Ok(())
    }

    /// Steps for one sample interval of `dt` seconds
    fn steps_for(&self, dt: f64, frequency: f64) -> Result<usize> {
        let needed = (frequency * dt / self.max_phase).ceil();
        if !(needed <= MAX_SUBSTEPS) {
            return Err(BeamError::Numerical(format!(
                "{:e} rad/s needs {:e} steps per sample; use dormand_prince or raise max_phase",
                frequency, needed
            )));
        }
        Ok(self.substeps.max(needed as usize))
    }

    /// One RK4 step on a fixed branch:
    /// y(t+h) = y + h/6 (k1 + 2 k2 + 2 k3 + k4)
    pub fn step(eom: &dyn EquationsOfMotion, t: f64, y: &State, h: f64, branch: Branch) -> State {
        let k1 = eom.branch_derivative(t, y, branch);
        let k2 = eom.branch_derivative(t + 0.5 * h, &(y + k1 * (0.5 * h)), branch);
        let k3 = eom.branch_derivative(t + 0.5 * h, &(y + k2 * (0.5 * h)), branch);
        let k4 = eom.branch_derivative(t + h, &(y + k3 * h), branch);
        y + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (h / 6.0)
    }

    /// Advance by `h`, stopping on the switching surface and changing branch
    /// there whenever the step would cross it
    fn advance(
        eom: &dyn EquationsOfMotion,
        t: f64,
        y: &State,
        h: f64,
        branch: &mut Branch,
        stats: &mut SolveStats,
    ) -> State {
        let (mut t, mut y, mut h) = (t, *y, h);

        for _ in 0..MAX_CROSSINGS_PER_STEP {
            let y_new = Self::step(eom, t, &y, h, *branch);
            stats.fn_evals += 4;

            let g_new = eom.switching_function(&y_new);
            if Branch::of(g_new) == *branch || !g_new.is_finite() {
                stats.accepted_steps += 1;
                return y_new;
            }
            if Branch::of(eom.switching_function(&y)) != *branch {
                // Left the surface back toward the side it came from
                stats.accepted_steps += 1;
                *branch = Branch::of(g_new);
                return y_new;
            }

            // Replace the step with one that ends on the surface
            stats.rejected_steps += 1;
            stats.accepted_steps += 1;
            let (theta, y_surface) = Self::locate_crossing(eom, t, &y, h, *branch, g_new, stats);
            t += theta * h;
            h *= 1.0 - theta;
            y = y_surface;
            *branch = Branch::of(g_new);
        }

        stats.fn_evals += 4;
        stats.accepted_steps += 1;
        Self::step(eom, t, &y, h, *branch)
    }

    /// Illinois regula falsi on the step fraction. Returns the fraction and
    /// state at the near edge of the final bracket, still on `branch`.
    fn locate_crossing(
        eom: &dyn EquationsOfMotion,
        t: f64,
        y: &State,
        h: f64,
        branch: Branch,
        g_end: f64,
        stats: &mut SolveStats,
    ) -> (f64, State) {
        let (mut lo, mut hi) = (0.0, 1.0);
        let (mut g_lo, mut g_hi) = (eom.switching_function(y), g_end);
        let mut y_lo = *y;
        // -1 when `lo` moved last, 1 when `hi` did
        let mut last = 0;

        for _ in 0..MAX_CROSSING_ITERATIONS {
            if hi - lo <= CROSSING_TOLERANCE {
                break;
            }
            let mut theta = (lo * g_hi - hi * g_lo) / (g_hi - g_lo);
            if !(theta > lo && theta < hi) {
                theta = 0.5 * (lo + hi);
            }

            let y_mid = Self::step(eom, t, y, theta * h, branch);
            stats.fn_evals += 4;
            let g_mid = eom.switching_function(&y_mid);

            if Branch::of(g_mid) == branch {
                lo = theta;
                g_lo = g_mid;
                y_lo = y_mid;
                if last == -1 {
                    g_hi *= 0.5;
                }
                last = -1;
            } else {
                hi = theta;
                g_hi = g_mid;
                if last == 1 {
                    g_lo *= 0.5;
                }
                last = 1;
            }
        }

        (lo, y_lo)
    }
}

impl Solver for Rk4 {
    fn name(&self) -> &str {
        "rk4"
    }

    fn solve(&self, eom: &dyn EquationsOfMotion, y0: &State, times: &[f64]) -> Result<Solution> {
        self.validate()?;
        check_times(times)?;

        let mut stats = SolveStats::default();
        let mut states = Vec::with_capacity(times.len());
        let mut y = *y0;
        let mut branch = Branch::of(eom.switching_function(&y));
        let frequency = eom.max_frequency();
        states.push(y);

        for w in times.windows(2) {
            let n = self.steps_for(w[1] - w[0], frequency)?;
            let h = (w[1] - w[0]) / n as f64;
            for i in 0..n {
                y = Self::advance(eom, w[0] + i as f64 * h, &y, h, &mut branch, &mut stats);
            }
            check_finite(&y, w[1])?;
            states.push(y);
        }

        Ok(Solution { states, stats })
    }
}

// Dormand-Prince 5(4) tableau
const C2: f64 = 1.0 / 5.0;
const C3: f64 = 3.0 / 10.0;
const C4: f64 = 4.0 / 5.0;
const C5: f64 = 8.0 / 9.0;

const A21: f64 = 1.0 / 5.0;
const A31: f64 = 3.0 / 40.0;
const A32: f64 = 9.0 / 40.0;
const A41: f64 = 44.0 / 45.0;
const A42: f64 = -56.0 / 15.0;
const A43: f64 = 32.0 / 9.0;
const A51: f64 = 19372.0 / 6561.0;
const A52: f64 = -25360.0 / 2187.0;
const A53: f64 = 64448.0 / 6561.0;
const A54: f64 = -212.0 / 729.0;
const A61: f64 = 9017.0 / 3168.0;
const A62: f64 = -355.0 / 33.0;
const A63: f64 = 46732.0 / 5247.0;
const A64: f64 = 49.0 / 176.0;
const A65: f64 = -5103.0 / 18656.0;

// Fifth-order weights (also row 7 of the tableau)
const B1: f64 = 35.0 / 384.0;
const B3: f64 = 500.0 / 1113.0;
const B4: f64 = 125.0 / 192.0;
const B5: f64 = -2187.0 / 6784.0;
const B6: f64 = 11.0 / 84.0;

// Fifth minus fourth order weights
const E1: f64 = 71.0 / 57600.0;
const E3: f64 = -71.0 / 16695.0;
const E4: f64 = 71.0 / 1920.0;
const E5: f64 = -17253.0 / 339200.0;
const E6: f64 = 22.0 / 525.0;
const E7: f64 = -1.0 / 40.0;

/// Adaptive embedded Runge-Kutta (Dormand-Prince 5(4)).
///
/// Position and velocity errors are measured separately, each relative to
/// the larger of the old and new vector norms, and the step is accepted when
/// both stay under `max_err`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DormandPrince {
    /// Relative error allowed per step
    pub max_err: f64,
    /// Safety factor on the step-size update
    pub headroom: f64,
    /// Smallest step before giving up (s)
    pub dt_min: f64,
    /// Largest step (s); unbounded when absent
    pub dt_max: Option<f64>,
    /// Step budget (accepted + rejected) for the whole solve
    pub max_steps: usize,
}

impl Default for DormandPrince {
    fn default() -> Self {
        Self {
            max_err: 1e-9,
            headroom: 0.8,
            dt_min: 1e-22,
            dt_max: None,
            max_steps: 1_000_000,
        }
    }
}

impl DormandPrince {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_err.is_finite() && self.max_err > 0.0) {
            return Err(BeamError::Configuration(format!(
                "max_err must be positive, got {}",
                self.max_err
            )));
        }
        if !(self.headroom > 0.0 && self.headroom <= 1.0) {
            return Err(BeamError::Configuration(format!(
                "headroom must lie in (0, 1], got {}",
                self.headroom
            )));
        }
        if !(self.dt_min.is_finite() && self.dt_min >= 0.0) {
            return Err(BeamError::Configuration(format!("invalid dt_min {}", self.dt_min)));
        }
        if let Some(dt_max) = self.dt_max {
            if !(dt_max > self.dt_min) {
                return Err(BeamError::Configuration(format!(
                    "dt_max ({}) must exceed dt_min ({})",
                    dt_max, self.dt_min
                )));
            }
        }
        if self.max_steps == 0 {
            return Err(BeamError::Configuration("max_steps must be positive".into()));
        }
        Ok(())
    }

    fn clamp_step(&self, h: f64) -> f64 {
        let h = h.max(self.dt_min);
        match self.dt_max {
            Some(dt_max) => h.min(dt_max),
            None => h,
        }
    }

    /// Error ratio; <= 1 means the step is acceptable
    fn error_ratio(&self, y: &State, y_new: &State, err: &State) -> f64 {
        let pos_scale = y.fixed_rows::<3>(0).norm().max(y_new.fixed_rows::<3>(0).norm());
        let vel_scale = y.fixed_rows::<3>(3).norm().max(y_new.fixed_rows::<3>(3).norm());
        let pos_err = err.fixed_rows::<3>(0).norm();
        let vel_err = err.fixed_rows::<3>(3).norm();

        let ratio = |e: f64, scale: f64| {
            if e == 0.0 {
                0.0
            } else {
                e / (self.max_err * scale).max(f64::MIN_POSITIVE)
            }
        };
        ratio(pos_err, pos_scale).max(ratio(vel_err, vel_scale))
    }
}

impl Solver for DormandPrince {
    fn name(&self) -> &str {
        "dormand_prince"
    }

    fn solve(&self, eom: &dyn EquationsOfMotion, y0: &State, times: &[f64]) -> Result<Solution> {
        self.validate()?;
        check_times(times)?;

        let mut stats = SolveStats::default();
        let mut states = Vec::with_capacity(times.len());
        let mut y = *y0;
        let mut t = times[0];
        states.push(y);

        let mut h = match times.get(1) {
            Some(t1) => self.clamp_step(t1 - t),
            None => return Ok(Solution { states, stats }),
        };

        let mut k1 = eom.derivative(t, &y);
        stats.fn_evals += 1;

        for &target in &times[1..] {
            while t < target {
                if stats.accepted_steps + stats.rejected_steps >= self.max_steps {
                    return Err(BeamError::Numerical(format!(
                        "step budget of {} exhausted at t = {:e} s",
                        self.max_steps, t
                    )));
                }

                let remaining = target - t;
                let landing = h >= remaining;
                let step = if landing { remaining } else { h };

                let k2 = eom.derivative(t + C2 * step, &(y + k1 * (A21 * step)));
                let k3 = eom.derivative(t + C3 * step, &(y + (k1 * A31 + k2 * A32) * step));
                let k4 = eom.derivative(t + C4 * step, &(y + (k1 * A41 + k2 * A42 + k3 * A43) * step));
                let k5 = eom.derivative(
                    t + C5 * step,
                    &(y + (k1 * A51 + k2 * A52 + k3 * A53 + k4 * A54) * step),
                );
                let k6 = eom.derivative(
                    t + step,
                    &(y + (k1 * A61 + k2 * A62 + k3 * A63 + k4 * A64 + k5 * A65) * step),
                );
                let y_new = y + (k1 * B1 + k3 * B3 + k4 * B4 + k5 * B5 + k6 * B6) * step;
                let k7 = eom.derivative(t + step, &y_new);
                stats.fn_evals += 6;

                let err = (k1 * E1 + k3 * E3 + k4 * E4 + k5 * E5 + k6 * E6 + k7 * E7) * step;
                let ratio = self.error_ratio(&y, &y_new, &err);

                if !ratio.is_finite() || !y_new.iter().all(|x| x.is_finite()) {
                    return Err(BeamError::Numerical(format!(
                        "state became non-finite at t = {:e} s",
                        t + step
                    )));
                }

                let factor = if ratio == 0.0 {
                    5.0
                } else {
                    (self.headroom * ratio.powf(-0.2)).clamp(0.2, 5.0)
                };

                if ratio <= 1.0 {
                    stats.accepted_steps += 1;
                    t = if landing { target } else { t + step };
                    y = y_new;
                    k1 = k7;
                    // A short landing step says nothing about the natural step size
                    if !landing || step >= h {
                        h = self.clamp_step(step * factor);
                    }
                } else {
                    stats.rejected_steps += 1;
                    if step <= self.dt_min {
                        return Err(BeamError::Numerical(format!(
                            "step size fell below dt_min = {:e} s at t = {:e} s",
                            self.dt_min, t
                        )));
                    }
                    h = self.clamp_step(step * factor.min(1.0));
                }
            }
            states.push(y);
        }

        Ok(Solution { states, stats })
    }
}

/// Solver selection as it appears in configuration files
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum SolverKind {
    Rk4(Rk4),
    DormandPrince(DormandPrince),
}

impl Default for SolverKind {
    fn default() -> Self {
        SolverKind::Rk4(Rk4::default())
    }
}

impl SolverKind {
    pub fn validate(&self) -> Result<()> {
        match self {
            SolverKind::Rk4(s) => s.validate(),
            SolverKind::DormandPrince(s) => s.validate(),
        }
    }

    pub fn as_solver(&self) -> &dyn Solver {
        match self {
            SolverKind::Rk4(s) => s,
            SolverKind::DormandPrince(s) => s,
        }
    }
}

/// Solve and log the counters
pub fn integrate(
    solver: &dyn Solver,
    eom: &dyn EquationsOfMotion,
    y0: &State,
    times: &[f64],
) -> Result<Vec<State>> {
    let solution = solver.solve(eom, y0, times)?;
    debug!(
        "{}: {} samples, {} accepted / {} rejected steps, {} evaluations",
        solver.name(),
        solution.states.len(),
        solution.stats.accepted_steps,
        solution.stats.rejected_steps,
        solution.stats.fn_evals
    );
    Ok(solution.states)
}
