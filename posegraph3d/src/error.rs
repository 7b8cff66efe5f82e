use crate::pose::VertexId;
use posegraph_solver::ProblemError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors from loading, building and solving a pose graph
#[derive(Debug, Error)]
pub enum PoseGraphError {
    #[error("error accessing {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("line {line}: {message}")]
    Parse { line: usize, message: String },

    /// A record that parsed but broke a graph invariant
    #[error("line {line}: {source}")]
    Record {
        line: usize,
        #[source]
        source: Box<PoseGraphError>,
    },

    #[error("duplicate vertex with id {id}")]
    DuplicateVertex { id: VertexId },

    #[error("pose with id {id} not found")]
    MissingVertex { id: VertexId },

    #[error("edge {id} -> {id} connects a pose to itself")]
    SelfLoop { id: VertexId },

    #[error("information matrix of edge {id_begin} -> {id_end} is not positive definite")]
    NotPositiveDefinite { id_begin: VertexId, id_end: VertexId },

    #[error(transparent)]
    Problem(#[from] ProblemError),

    #[error("the solve was not successful\n{report}")]
    SolveFailed { report: String },
}

impl PoseGraphError {
    pub(crate) fn at_line(self, line: usize) -> Self {
        Self::Record {
            line,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, PoseGraphError>;
