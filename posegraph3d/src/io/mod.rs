//! Reading and writing pose graphs and pose lists
//!
//! Input graphs use the g2o `VERTEX_SE3:QUAT` / `EDGE_SE3:QUAT` records.
//! Optimized poses are written one per line as
//! `id p.x p.y p.z q.x q.y q.z q.w`.

use crate::error::PoseGraphError;
use crate::pose::{normalized_quaternion, Pose3d, VertexId};
use posegraph_solver::math3d::{Quat, Vec3};
use std::path::Path;

pub mod g2o;
pub mod poses;

pub use g2o::{parse_g2o, read_g2o_file, write_g2o, write_g2o_to};
pub use poses::{parse_poses, read_poses, write_poses, write_poses_to};

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> PoseGraphError {
    let path = path.to_path_buf();
    move |source| PoseGraphError::Io { path, source }
}

/// Parse one whitespace-separated field as a finite float
fn parse_f64(token: &str, line: usize, what: &str) -> Result<f64, PoseGraphError> {
    let value: f64 = token.parse().map_err(|_| PoseGraphError::Parse {
        line,
        message: format!("invalid {} '{}'", what, token),
    })?;
    if !value.is_finite() {
        return Err(PoseGraphError::Parse {
            line,
            message: format!("non-finite {} '{}'", what, token),
        });
    }
    Ok(value)
}

fn parse_id(token: &str, line: usize) -> Result<VertexId, PoseGraphError> {
    token.parse().map_err(|_| PoseGraphError::Parse {
        line,
        message: format!("invalid vertex id '{}'", token),
    })
}

/// Read `p.x p.y p.z q.x q.y q.z q.w` and renormalize the quaternion
fn parse_pose(tokens: &[&str], line: usize) -> Result<Pose3d, PoseGraphError> {
    let mut values = [0.0; 7];
    for (value, token) in values.iter_mut().zip(tokens) {
        *value = parse_f64(token, line, "pose value")?;
    }
    let q = Quat::from_xyzw(&values[3..7]);
    let q = normalized_quaternion(q).ok_or_else(|| PoseGraphError::Parse {
        line,
        message: "quaternion has zero norm".to_string(),
    })?;
    Ok(Pose3d::new(Vec3::from_slice(&values[0..3]), q))
}
