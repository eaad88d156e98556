//! Run requests from viewers and their replies
//!
//! A viewer sends `{"id": ..., "voltage": ..., "magnetic_field": ...,
//! "magnet_position": [x, y, z], "regime": "classical"}` as a text message
//! and gets back one JSON reply carrying the same id.

use serde::{Deserialize, Serialize};
use sparc_beam::{compute_trajectory_with, BeamError, RunParameters, RunPhase, SimulationConfig};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RunRequest {
    /// Correlation id chosen by the viewer
    pub id: u64,
    #[serde(flatten)]
    pub params: RunParameters,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    InvalidInput,
    Numerical,
    BadRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResponse {
    Done {
        id: u64,
        /// Sample instants (s)
        times: Vec<f64>,
        /// Positions (m)
        points: Vec<[f64; 3]>,
    },
    Failed {
        id: Option<u64>,
        kind: ErrorKind,
        message: String,
    },
}

impl RunResponse {
    fn failed(id: Option<u64>, err: &BeamError) -> Self {
        let kind = match err {
            BeamError::Configuration(_) => ErrorKind::Configuration,
            BeamError::InvalidInput(_) => ErrorKind::InvalidInput,
            BeamError::Numerical(_) => ErrorKind::Numerical,
        };
        RunResponse::Failed {
            id,
            kind,
            message: err.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        // Only plain numbers and strings, so serialization cannot fail
        serde_json::to_string(self).unwrap_or_else(|e| format!(r#"{{"status":"failed","message":"{}"}}"#, e))
    }
}

/// Parse a text message, or produce the reply explaining why it was rejected
pub fn parse_request(text: &str) -> Result<RunRequest, RunResponse> {
    serde_json::from_str::<RunRequest>(text).map_err(|e| {
        // Echo the id back when the rest of the message is unusable
        let id = serde_json::from_str::<serde_json::Value>(text)
            .ok()
            .and_then(|v| v.get("id").and_then(|id| id.as_u64()));
        RunResponse::Failed {
            id,
            kind: ErrorKind::BadRequest,
            message: format!("malformed run request: {}", e),
        }
    })
}

/// Compute one run. Blocking; call from a worker thread.
pub fn execute(request: &RunRequest, config: &SimulationConfig) -> RunResponse {
    debug!("run {}: {}", request.id, RunPhase::Integrating);
    match compute_trajectory_with(&request.params, config) {
        Ok(trajectory) => {
            info!("run {}: {} points", request.id, trajectory.len());
            RunResponse::Done {
                id: request.id,
                times: trajectory.times().to_vec(),
                points: trajectory.points().iter().map(|p| [p.x, p.y, p.z]).collect(),
            }
        }
        Err(e) => RunResponse::failed(Some(request.id), &e),
    }
}
