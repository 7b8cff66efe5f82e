//! Pose lists: `id p.x p.y p.z q.x q.y q.z q.w` per line

use super::{io_error, parse_id, parse_pose};
use crate::error::{PoseGraphError, Result};
use crate::pose::{Pose3d, VertexId};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub fn write_poses_to<W: Write>(writer: &mut W, poses: &BTreeMap<VertexId, Pose3d>) -> std::io::Result<()> {
    for (id, pose) in poses {
        let [x, y, z] = pose.position();
        let [qx, qy, qz, qw] = pose.orientation();
        writeln!(writer, "{} {} {} {} {} {} {} {}", id, x, y, z, qx, qy, qz, qw)?;
    }
    Ok(())
}

/// Write poses in id order
pub fn write_poses(path: impl AsRef<Path>, poses: &BTreeMap<VertexId, Pose3d>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    write_poses_to(&mut writer, poses).map_err(io_error(path))?;
    writer.flush().map_err(io_error(path))
}

pub fn parse_poses(contents: &str) -> Result<BTreeMap<VertexId, Pose3d>> {
    let mut poses = BTreeMap::new();
    for (index, text) in contents.lines().enumerate() {
        let line = index + 1;
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            continue;
        }
        if tokens.len() != 8 {
            return Err(PoseGraphError::Parse {
                line,
                message: format!("pose line needs 8 fields, found {}", tokens.len()),
            });
        }
        let id = parse_id(tokens[0], line)?;
        let pose = parse_pose(&tokens[1..], line)?;
        if poses.insert(id, pose).is_some() {
            return Err(PoseGraphError::DuplicateVertex { id }.at_line(line));
        }
    }
    Ok(poses)
}

/// Read a file written by [`write_poses`]
pub fn read_poses(path: impl AsRef<Path>) -> Result<BTreeMap<VertexId, Pose3d>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(io_error(path))?;
    parse_poses(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use posegraph_solver::math3d::{Quat, Vec3};

    #[test]
    fn test_write_format() {
        let mut poses = BTreeMap::new();
        poses.insert(2, Pose3d::new(Vec3::new(1.5, -2.0, 0.25), Quat::identity()));
        poses.insert(-1, Pose3d::identity());

        let mut buffer = Vec::new();
        write_poses_to(&mut buffer, &poses).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert_eq!(text, "-1 0 0 0 0 0 0 1\n2 1.5 -2 0.25 0 0 0 1\n");
    }

    #[test]
    fn test_round_trip_is_exact() {
        let mut poses = BTreeMap::new();
        for id in 0..5 {
            let t = id as f64;
            let pose = Pose3d::from_axis_angle(
                Vec3::new(t / 3.0, -t * 1e-7, 1e5 + t),
                Vec3::new(0.1 * t, -0.3, 0.7 / (t + 1.0)),
            );
            poses.insert(id, pose);
        }

        let path = std::env::temp_dir().join(format!(
            "posegraph3d_{}_poses_round_trip.txt",
            std::process::id()
        ));
        write_poses(&path, &poses).unwrap();
        let reloaded = read_poses(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(reloaded.len(), poses.len());
        for (id, pose) in &poses {
            let other = &reloaded[id];
            assert_eq!(pose.position(), other.position());
            assert!(pose.q.angle_to(other.q) < 1e-14);
        }
    }

    #[test]
    fn test_bad_lines() {
        assert!(matches!(
            parse_poses("0 0 0 0 0 0 0 1\n1 0 0\n"),
            Err(PoseGraphError::Parse { line: 2, .. })
        ));
        match parse_poses("0 0 0 0 0 0 0 1\n0 1 0 0 0 0 0 1\n") {
            Err(PoseGraphError::Record { line, source }) => {
                assert_eq!(line, 2);
                assert!(matches!(*source, PoseGraphError::DuplicateVertex { id: 0 }));
            }
            other => panic!("expected a record error, got {:?}", other.map(|p| p.len())),
        }
    }
}
