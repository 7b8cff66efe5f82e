//! The pose graph: poses keyed by vertex id plus relative constraints

use crate::error::{PoseGraphError, Result};
use crate::pose::{Constraint3d, Pose3d, VertexId};
use std::collections::BTreeMap;

/// Poses ordered by id together with the constraints between them
///
/// Every stored constraint references two distinct existing poses.
#[derive(Debug, Clone, Default)]
pub struct PoseGraph {
    poses: BTreeMap<VertexId, Pose3d>,
    constraints: Vec<Constraint3d>,
}

impl PoseGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_pose(&mut self, id: VertexId, pose: Pose3d) -> Result<()> {
        if self.poses.contains_key(&id) {
            return Err(PoseGraphError::DuplicateVertex { id });
        }
        self.poses.insert(id, pose);
        Ok(())
    }

    pub fn add_constraint(&mut self, constraint: Constraint3d) -> Result<()> {
        self.check_endpoints(&constraint)?;
        self.constraints.push(constraint);
        Ok(())
    }

    pub fn pose(&self, id: VertexId) -> Option<&Pose3d> {
        self.poses.get(&id)
    }

    pub(crate) fn pose_mut(&mut self, id: VertexId) -> Option<&mut Pose3d> {
        self.poses.get_mut(&id)
    }

    pub fn poses(&self) -> &BTreeMap<VertexId, Pose3d> {
        &self.poses
    }

    pub fn constraints(&self) -> &[Constraint3d] {
        &self.constraints
    }

    /// Number of poses
    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// Re-check that every constraint joins two distinct existing poses
    pub fn validate(&self) -> Result<()> {
        self.constraints
            .iter()
            .try_for_each(|constraint| self.check_endpoints(constraint))
    }

    /// Groups of vertex ids connected through constraints, each sorted, in
    /// order of their smallest id. Vertices without constraints form
    /// singleton groups.
    pub fn connected_components(&self) -> Vec<Vec<VertexId>> {
        let ids: Vec<VertexId> = self.poses.keys().copied().collect();
        let index_of = |id: VertexId| ids.binary_search(&id).ok();

        let mut parent: Vec<usize> = (0..ids.len()).collect();
        fn find(parent: &mut [usize], mut i: usize) -> usize {
            while parent[i] != i {
                parent[i] = parent[parent[i]];
                i = parent[i];
            }
            i
        }

        for constraint in &self.constraints {
            if let (Some(a), Some(b)) = (index_of(constraint.id_begin), index_of(constraint.id_end)) {
                let (root_a, root_b) = (find(&mut parent, a), find(&mut parent, b));
                if root_a != root_b {
                    parent[root_a.max(root_b)] = root_a.min(root_b);
                }
            }
        }

        let mut components: BTreeMap<usize, Vec<VertexId>> = BTreeMap::new();
        for (i, &id) in ids.iter().enumerate() {
            let root = find(&mut parent, i);
            components.entry(root).or_default().push(id);
        }
        components.into_values().collect()
    }

    /// Apply `rigid ∘ pose` to every pose. Relative constraints are unchanged.
    pub fn transform(&mut self, rigid: &Pose3d) {
        for pose in self.poses.values_mut() {
            *pose = rigid.compose(pose);
        }
    }

    fn check_endpoints(&self, constraint: &Constraint3d) -> Result<()> {
        if constraint.id_begin == constraint.id_end {
            return Err(PoseGraphError::SelfLoop {
                id: constraint.id_begin,
            });
        }
        for id in [constraint.id_begin, constraint.id_end] {
            if !self.poses.contains_key(&id) {
                return Err(PoseGraphError::MissingVertex { id });
            }
        }
        Ok(())
    }
}
