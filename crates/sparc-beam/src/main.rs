//! sparc-beam: CLI tool for tracing one electron-gun trajectory

use anyhow::{Context, Result};
use clap::Parser;
use nalgebra::Vector3;
use serde::Serialize;
use sparc_beam::{
    compute_trajectory_with, DormandPrince, Regime, RunParameters, ScreenHit, SimulationConfig, SolverKind, Trajectory,
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sparc-beam")]
#[command(about = "Trace an electron beam through the SPARC electron gun")]
#[command(version)]
struct Args {
    /// Accelerating voltage in V
    #[arg(short, long, default_value = "10000")]
    voltage: f64,

    /// Magnetic field magnitude in T
    #[arg(short = 'b', long, default_value = "0")]
    magnetic_field: f64,

    /// Magnet position in m as x,y,z
    #[arg(long, default_value = "0,0,0", value_parser = parse_vector)]
    magnet: Vector3<f64>,

    /// Kinematic regime for the initial speed
    #[arg(long, value_enum, default_value_t = Regime::Classical)]
    regime: Regime,

    /// JSON configuration file (constants, species, time domain, solver)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the number of time samples
    #[arg(long)]
    samples: Option<usize>,

    /// Override the electrode gap in m
    #[arg(long)]
    gap: Option<f64>,

    /// Use the adaptive Dormand-Prince solver
    #[arg(long)]
    adaptive: bool,

    /// Cut the trajectory at the phosphor screen this far downstream (m)
    #[arg(long)]
    screen: Option<f64>,

    /// Print only the point list
    #[arg(long)]
    points_only: bool,
}

fn parse_vector(s: &str) -> Result<Vector3<f64>> {
    let parts = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid vector: {}", s))?;
    match parts.as_slice() {
        [x, y, z] => Ok(Vector3::new(*x, *y, *z)),
        _ => anyhow::bail!("Expected three comma-separated values, got: {}", s),
    }
}

#[derive(Serialize)]
struct Output<'a> {
    generated: String,
    parameters: &'a RunParameters,
    config: &'a SimulationConfig,
    screen_hit: Option<ScreenHit>,
    trajectory: &'a Trajectory,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    // Build config
    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => SimulationConfig::default(),
    };
    if let Some(samples) = args.samples {
        config.time_domain.samples = samples;
    }
    if let Some(gap) = args.gap {
        config.electrode_gap = gap;
    }
    if args.adaptive {
        config.solver = SolverKind::DormandPrince(DormandPrince::default());
    }

    let params = RunParameters {
        voltage: args.voltage,
        magnetic_field: args.magnetic_field,
        magnet_position: args.magnet,
        regime: args.regime,
    };

    // Trace
    let trajectory = compute_trajectory_with(&params, &config).context("Trajectory computation failed")?;

    let screen_hit = args.screen.and_then(|d| trajectory.screen_hit(d));
    let trajectory = match args.screen {
        Some(d) => trajectory.truncate_at_screen(d),
        None => trajectory,
    };

    // Output
    let json = if args.points_only {
        serde_json::to_string_pretty(trajectory.points())?
    } else {
        serde_json::to_string_pretty(&Output {
            generated: chrono::Utc::now().to_rfc3339(),
            parameters: &params,
            config: &config,
            screen_hit,
            trajectory: &trajectory,
        })?
    };
    println!("{}", json);

    match screen_hit {
        Some(hit) => eprintln!(
            "Beam reaches the screen at ({:.4e}, {:.4e}, {:.4e}) m after {:.4e} s",
            hit.point.x, hit.point.y, hit.point.z, hit.time
        ),
        None if args.screen.is_some() => eprintln!("Beam never reaches the screen"),
        None => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("0.1, 0, -2").unwrap(), Vector3::new(0.1, 0.0, -2.0));
        assert!(parse_vector("1,2").is_err());
        assert!(parse_vector("a,b,c").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["sparc-beam", "-v", "20000", "-b", "0.001", "--regime", "relativistic"]).unwrap();
        assert_eq!(args.voltage, 20_000.0);
        assert_eq!(args.magnetic_field, 0.001);
        assert_eq!(args.regime, Regime::Relativistic);
        assert_eq!(args.magnet, Vector3::zeros());
    }

    #[test]
    fn test_default_voltage_matches_run_file_units() {
        let args = Args::try_parse_from(["sparc-beam"]).unwrap();
        let from_file: RunParameters = serde_json::from_str(r#"{"voltage": 10000}"#).unwrap();
        assert_eq!(args.voltage, from_file.voltage);
    }
}
