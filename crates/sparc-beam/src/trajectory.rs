//! Beam trajectory assembled from solver output

use nalgebra::Vector3;
use serde::Serialize;

use crate::eom::{position_of, State};
use crate::error::{BeamError, Result};
use crate::field::beam_axis;

/// Ordered beam positions; point `i` was sampled at `times[i]`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trajectory {
    /// Sample instants (s)
    times: Vec<f64>,
    /// Positions (m)
    points: Vec<Vector3<f64>>,
}

impl Trajectory {
    /// Pair each sample time with the position of the state solved for it.
    /// x, y and z of a point always come from the same state.
    pub fn from_states(times: &[f64], states: &[State]) -> Result<Self> {
        if times.len() != states.len() {
            return Err(BeamError::Numerical(format!(
                "solver returned {} states for {} sample times",
                states.len(),
                times.len()
            )));
        }

        Ok(Self {
            times: times.to_vec(),
            points: states.iter().map(position_of).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn times(&self) -> &[f64] {
        &self.times
    }

    pub fn points(&self) -> &[Vector3<f64>] {
        &self.points
    }

    pub fn into_points(self) -> Vec<Vector3<f64>> {
        self.points
    }

    pub fn final_point(&self) -> Option<&Vector3<f64>> {
        self.points.last()
    }

    /// Arc length of the sampled polyline (m)
    pub fn path_length(&self) -> f64 {
        self.points.windows(2).map(|w| (w[1] - w[0]).norm()).sum()
    }

    /// Where the beam first reaches the screen plane `y = distance`,
    /// linearly interpolated between the bracketing samples
    pub fn screen_hit(&self, distance: f64) -> Option<ScreenHit> {
        let axis = beam_axis();
        let first = self.points.first()?;
        if first.dot(&axis) >= distance {
            return Some(ScreenHit {
                index: 0,
                time: self.times[0],
                point: *first,
            });
        }

        self.points.windows(2).enumerate().find_map(|(i, w)| {
            let (a, b) = (w[0].dot(&axis), w[1].dot(&axis));
            if a < distance && b >= distance {
                let s = (distance - a) / (b - a);
                Some(ScreenHit {
                    index: i + 1,
                    time: self.times[i] + s * (self.times[i + 1] - self.times[i]),
                    point: w[0] + (w[1] - w[0]) * s,
                })
            } else {
                None
            }
        })
    }

    /// Keep the samples in front of the screen and end on the impact point.
    /// Unchanged if the beam never gets there.
    pub fn truncate_at_screen(&self, distance: f64) -> Trajectory {
        match self.screen_hit(distance) {
            Some(hit) => {
                let mut times = self.times[..hit.index].to_vec();
                let mut points = self.points[..hit.index].to_vec();
                times.push(hit.time);
                points.push(hit.point);
                Trajectory { times, points }
            }
            None => self.clone(),
        }
    }

    /// Binary frame for streaming to a viewer:
    /// `"TRAJ\0\0\0\0"`, u32 point count, then per point t (s) and x, y, z (m)
    /// as little-endian f32
    pub fn to_binary(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(12 + self.points.len() * 16);

        data.extend_from_slice(b"TRAJ\0\0\0\0");
        data.extend_from_slice(&(self.points.len() as u32).to_le_bytes());

        for (t, p) in self.times.iter().zip(&self.points) {
            data.extend_from_slice(&(*t as f32).to_le_bytes());
            for c in p.iter() {
                data.extend_from_slice(&(*c as f32).to_le_bytes());
            }
        }

        data
    }
}

/// Crossing of the phosphor screen
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScreenHit {
    /// First sample at or beyond the screen
    pub index: usize,
    /// Interpolated crossing time (s)
    pub time: f64,
    /// Interpolated crossing point (m)
    pub point: Vector3<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eom::state_from;
    use pretty_assertions::assert_eq;

    fn line(n: usize) -> Trajectory {
        let times: Vec<f64> = (0..n).map(|i| i as f64).collect();
        let states: Vec<State> = times
            .iter()
            .map(|&t| state_from(Vector3::new(0.1 * t, t, -0.5 * t), Vector3::new(0.1, 1.0, -0.5)))
            .collect();
        Trajectory::from_states(&times, &states).unwrap()
    }

    #[test]
    fn test_points_are_index_aligned() {
        let traj = line(4);
        assert_eq!(traj.len(), 4);
        for (t, p) in traj.times().iter().zip(traj.points()) {
            assert_eq!(*p, Vector3::new(0.1 * t, *t, -0.5 * t));
        }
    }

    #[test]
    fn test_length_mismatch_rejected() {
        let states = vec![State::zeros(); 2];
        assert!(Trajectory::from_states(&[0.0, 1.0, 2.0], &states).is_err());
    }

    #[test]
    fn test_path_length() {
        let traj = line(3);
        let step = (0.01f64 + 1.0 + 0.25).sqrt();
        assert!((traj.path_length() - 2.0 * step).abs() < 1e-12);
    }

    #[test]
    fn test_screen_hit_interpolates() {
        let traj = line(5);
        let hit = traj.screen_hit(2.5).unwrap();
        assert_eq!(hit.index, 3);
        assert!((hit.time - 2.5).abs() < 1e-12);
        assert!((hit.point - Vector3::new(0.25, 2.5, -1.25)).norm() < 1e-12);

        assert!(traj.screen_hit(10.0).is_none());
    }

    #[test]
    fn test_truncate_at_screen() {
        let traj = line(5);
        let cut = traj.truncate_at_screen(2.5);
        assert_eq!(cut.len(), 4);
        assert!((cut.final_point().unwrap().y - 2.5).abs() < 1e-12);

        assert_eq!(traj.truncate_at_screen(100.0), traj);
    }

    #[test]
    fn test_binary_layout() {
        let traj = line(2);
        let data = traj.to_binary();
        assert_eq!(&data[0..8], b"TRAJ\0\0\0\0");
        assert_eq!(u32::from_le_bytes([data[8], data[9], data[10], data[11]]), 2);
        assert_eq!(data.len(), 12 + 2 * 16);
        // second point's y
        let off = 12 + 16 + 8;
        let y = f32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]]);
        assert_eq!(y, 1.0);
    }
}
