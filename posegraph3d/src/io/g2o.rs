//! g2o SE3 records
//!
//! ```text
//! VERTEX_SE3:QUAT id p.x p.y p.z q.x q.y q.z q.w
//! EDGE_SE3:QUAT id_begin id_end p.x p.y p.z q.x q.y q.z q.w I_00 I_01 … I_55
//! ```
//!
//! The information entries are the upper triangle in row-major order.
//! `VERTEX` and `EDGE` are accepted as aliases; other tags are skipped.

use super::{io_error, parse_f64, parse_id, parse_pose};
use crate::error::{PoseGraphError, Result};
use crate::graph::PoseGraph;
use crate::pose::{information_from_upper_triangle, upper_triangle, Constraint3d, Pose3d};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{debug, info};

const VERTEX_TAGS: [&str; 2] = ["VERTEX_SE3:QUAT", "VERTEX"];
const EDGE_TAGS: [&str; 2] = ["EDGE_SE3:QUAT", "EDGE"];

/// Fields after the tag
const VERTEX_FIELDS: usize = 8;
const EDGE_FIELDS: usize = 30;

/// Load a pose graph from a g2o file
pub fn read_g2o_file(path: impl AsRef<Path>) -> Result<PoseGraph> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(io_error(path))?;
    let graph = parse_g2o(&contents)?;
    info!(
        "Loaded {} poses and {} constraints from {}",
        graph.len(),
        graph.num_constraints(),
        path.display()
    );
    Ok(graph)
}

/// Parse g2o text
///
/// Edges may appear before the vertices they reference; endpoints are
/// checked once every vertex has been read. Graph errors are reported as
/// [`PoseGraphError::Record`] with the line of the offending record.
pub fn parse_g2o(contents: &str) -> Result<PoseGraph> {
    let mut graph = PoseGraph::new();
    let mut constraints = Vec::new();
    let mut skipped = 0usize;

    for (index, text) in contents.lines().enumerate() {
        let line = index + 1;
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let Some((&tag, fields)) = tokens.split_first() else {
            continue;
        };

        if VERTEX_TAGS.contains(&tag) {
            expect_fields(tag, fields, VERTEX_FIELDS, line)?;
            let id = parse_id(fields[0], line)?;
            let pose = parse_pose(&fields[1..], line)?;
            graph.add_pose(id, pose).map_err(|e| e.at_line(line))?;
        } else if EDGE_TAGS.contains(&tag) {
            expect_fields(tag, fields, EDGE_FIELDS, line)?;
            let id_begin = parse_id(fields[0], line)?;
            let id_end = parse_id(fields[1], line)?;
            let t_be = parse_pose(&fields[2..9], line)?;

            let mut upper = [0.0; 21];
            for (value, token) in upper.iter_mut().zip(&fields[9..]) {
                *value = parse_f64(token, line, "information entry")?;
            }
            let information = information_from_upper_triangle(&upper);
            constraints.push((line, Constraint3d::new(id_begin, id_end, t_be, information)));
        } else {
            skipped += 1;
        }
    }

    if skipped > 0 {
        debug!("skipped {} records with unrecognized tags", skipped);
    }

    for (line, constraint) in constraints {
        graph.add_constraint(constraint).map_err(|e| e.at_line(line))?;
    }
    Ok(graph)
}

fn expect_fields(tag: &str, fields: &[&str], expected: usize, line: usize) -> Result<()> {
    if fields.len() != expected {
        return Err(PoseGraphError::Parse {
            line,
            message: format!(
                "{} record needs {} fields, found {}",
                tag,
                expected,
                fields.len()
            ),
        });
    }
    Ok(())
}

fn write_pose_fields<W: Write>(writer: &mut W, pose: &Pose3d) -> std::io::Result<()> {
    let [x, y, z] = pose.position();
    let [qx, qy, qz, qw] = pose.orientation();
    write!(writer, "{} {} {} {} {} {} {}", x, y, z, qx, qy, qz, qw)
}

/// Serialize `graph` as g2o records: vertices in id order, then edges
pub fn write_g2o_to<W: Write>(writer: &mut W, graph: &PoseGraph) -> std::io::Result<()> {
    for (id, pose) in graph.poses() {
        write!(writer, "{} {} ", VERTEX_TAGS[0], id)?;
        write_pose_fields(writer, pose)?;
        writeln!(writer)?;
    }
    for constraint in graph.constraints() {
        write!(
            writer,
            "{} {} {} ",
            EDGE_TAGS[0], constraint.id_begin, constraint.id_end
        )?;
        write_pose_fields(writer, &constraint.t_be)?;
        for value in upper_triangle(&constraint.information) {
            write!(writer, " {}", value)?;
        }
        writeln!(writer)?;
    }
    Ok(())
}

pub fn write_g2o(path: impl AsRef<Path>, graph: &PoseGraph) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(io_error(path))?;
    let mut writer = BufWriter::new(file);
    write_g2o_to(&mut writer, graph).map_err(io_error(path))?;
    writer.flush().map_err(io_error(path))
}
