//! Generate a synthetic 3D pose graph in g2o format
//!
//! Run with: cargo run --example simulate_pose_graph -- --output ../simulator3d_out.g2o
//!
//! The ground-truth poses are written next to it so that the optimized output
//! of `pose_graph_3d` can be compared against them.

use anyhow::{Context, Result};
use clap::Parser;
use posegraph3d::io::{write_g2o, write_poses};
use posegraph3d::simulation::{mean_position_error, mean_rotation_error, simulate, SimulationConfig};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "simulate_pose_graph")]
#[command(about = "Generate a noisy 3D pose graph with loop closures")]
struct Args {
    /// Output g2o file
    #[arg(short, long, default_value = "simulator3d_out.g2o")]
    output: PathBuf,

    /// Ground-truth poses output
    #[arg(long, default_value = "poses_ground_truth.txt")]
    ground_truth: PathBuf,

    #[arg(short, long, default_value = "100")]
    num_poses: usize,

    /// Translation noise half-width (meters)
    #[arg(long, default_value = "0.05")]
    translation_noise: f64,

    /// Rotation noise half-width (radians)
    #[arg(long, default_value = "0.01")]
    rotation_noise: f64,

    #[arg(long, default_value = "42")]
    seed: u64,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_filter(filter))
        .init();

    let args = Args::parse();
    let config = SimulationConfig::default()
        .with_num_poses(args.num_poses)
        .with_noise(args.translation_noise, args.rotation_noise)
        .with_seed(args.seed);

    let simulated = simulate(&config)?;

    println!("Poses:         {}", simulated.graph.len());
    println!("Constraints:   {}", simulated.graph.num_constraints());
    println!("Loop closures: {}", simulated.num_loop_closures);
    println!(
        "Initial estimate error: {:.4} m, {:.4} rad",
        mean_position_error(simulated.graph.poses(), &simulated.ground_truth),
        mean_rotation_error(simulated.graph.poses(), &simulated.ground_truth)
    );

    write_g2o(&args.output, &simulated.graph)
        .with_context(|| format!("writing {}", args.output.display()))?;
    write_poses(&args.ground_truth, &simulated.ground_truth)
        .with_context(|| format!("writing {}", args.ground_truth.display()))?;

    println!("Wrote {} and {}", args.output.display(), args.ground_truth.display());
    Ok(())
}
