//! Optimize a 3-D pose graph read from a g2o file
//!
//! Writes `poses_original.txt` and `poses_optimized.txt` to the current
//! directory.

use anyhow::{Context, Result};
use clap::Parser;
use posegraph3d::io::{read_g2o_file, write_poses};
use posegraph3d::optimization::{build_optimization_problem, solve_optimization_problem, PoseGraphConfig};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser)]
#[command(name = "pose_graph_3d")]
#[command(about = "Optimize a 3D pose graph stored in g2o format")]
struct Args {
    /// Pose graph in g2o format (VERTEX_SE3:QUAT / EDGE_SE3:QUAT records)
    #[arg(long, default_value = "../simulator3d_out.g2o")]
    input: PathBuf,
}

fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let layer = tracing_subscriber::fmt::layer().with_filter(filter);
    tracing_subscriber::registry().with(layer).init();

    let args = Args::parse();

    let mut graph = read_g2o_file(&args.input)
        .with_context(|| format!("Error reading the file: {}", args.input.display()))?;

    println!("Number of poses: {}", graph.len());
    println!("Number of constraints: {}", graph.num_constraints());

    write_poses("poses_original.txt", graph.poses()).context("Error outputting to poses_original.txt")?;

    match build_optimization_problem(&mut graph).context("Error building the optimization problem")? {
        Some(problem) => {
            let solver = PoseGraphConfig::default().solver();
            let report = solve_optimization_problem(problem, &solver)
                .context("The solve was not successful, exiting.")?;
            println!("{}", report.summary.full_report());
        }
        None => info!("Nothing to optimize; writing the original poses"),
    }

    write_poses("poses_optimized.txt", graph.poses()).context("Error outputting to poses_optimized.txt")?;

    Ok(())
}
