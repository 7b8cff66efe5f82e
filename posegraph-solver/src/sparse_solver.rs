//! Sparse Jacobian assembly and normal-equation solves using sprs
//!
//! Pose-graph Jacobians are block sparse: each residual block touches at most
//! four parameter blocks. The structure is fixed when the evaluator is built;
//! only values change during optimization.

use crate::problem::Problem;
use nalgebra::{DMatrix, DVector};
use sprs::{CsMat, SymmetryCheck, TriMat};
use sprs_ldl::Ldl;

/// Build a CSR matrix with explicit zeros at `entries`
pub fn build_jacobian(entries: &[(usize, usize)], n_rows: usize, n_cols: usize) -> CsMat<f64> {
    let mut tri = TriMat::new((n_rows, n_cols));
    for &(row, col) in entries {
        tri.add_triplet(row, col, 0.0);
    }
    tri.to_csr()
}

/// Evaluates a problem's residuals and tangent-space Jacobian
///
/// Columns are assigned to non-constant parameter blocks in insertion order,
/// each taking its tangent size. Constant blocks get no columns.
pub(crate) struct JacobianEvaluator {
    block_columns: Vec<Option<usize>>,
    residual_offsets: Vec<usize>,
    num_residuals: usize,
    num_columns: usize,
    jacobian: CsMat<f64>,
    // Per residual block: data index of each (argument, row, tangent col)
    slots: Vec<Vec<usize>>,
    // Per residual block: ambient Jacobian scratch, one per argument
    ambient_jacobians: Vec<Vec<DMatrix<f64>>>,
}

impl JacobianEvaluator {
    pub(crate) fn new(problem: &Problem) -> Self {
        let mut block_columns = Vec::with_capacity(problem.parameter_blocks.len());
        let mut num_columns = 0;
        for block in &problem.parameter_blocks {
            if block.constant {
                block_columns.push(None);
            } else {
                block_columns.push(Some(num_columns));
                num_columns += block.tangent_size();
            }
        }

        let mut residual_offsets = Vec::with_capacity(problem.residual_blocks.len());
        let mut entries = Vec::new();
        let mut num_residuals = 0;
        for residual_block in &problem.residual_blocks {
            residual_offsets.push(num_residuals);
            let m = residual_block.num_residuals();
            for row in num_residuals..num_residuals + m {
                for id in &residual_block.parameter_blocks {
                    if let Some(start) = block_columns[id.index()] {
                        let t = problem.parameter_blocks[id.index()].tangent_size();
                        entries.extend((start..start + t).map(|col| (row, col)));
                    }
                }
            }
            num_residuals += m;
        }

        let jacobian = build_jacobian(&entries, num_residuals, num_columns);

        let mut slots = Vec::with_capacity(problem.residual_blocks.len());
        let mut ambient_jacobians = Vec::with_capacity(problem.residual_blocks.len());
        for (residual_block, &offset) in problem.residual_blocks.iter().zip(&residual_offsets) {
            let m = residual_block.num_residuals();
            let mut block_slots = Vec::new();
            for id in &residual_block.parameter_blocks {
                let Some(start) = block_columns[id.index()] else {
                    continue;
                };
                let t = problem.parameter_blocks[id.index()].tangent_size();
                for row in offset..offset + m {
                    for col in start..start + t {
                        // Every (row, col) was inserted above
                        if let Some(index) = jacobian.nnz_index(row, col) {
                            block_slots.push(index.0);
                        }
                    }
                }
            }
            slots.push(block_slots);

            ambient_jacobians.push(
                residual_block
                    .cost
                    .parameter_block_sizes()
                    .iter()
                    .map(|&size| DMatrix::zeros(m, size))
                    .collect(),
            );
        }

        Self {
            block_columns,
            residual_offsets,
            num_residuals,
            num_columns,
            jacobian,
            slots,
            ambient_jacobians,
        }
    }

    pub(crate) fn num_residuals(&self) -> usize {
        self.num_residuals
    }

    pub(crate) fn num_columns(&self) -> usize {
        self.num_columns
    }

    #[cfg(test)]
    pub(crate) fn jacobian(&self) -> &CsMat<f64> {
        &self.jacobian
    }

    /// Evaluate all residual blocks at `state` and return the total cost.
    ///
    /// When `with_jacobian` is set the sparse Jacobian is refreshed as well.
    /// Returns `None` if any block fails to evaluate.
    pub(crate) fn evaluate(
        &mut self,
        problem: &Problem,
        state: &[Vec<f64>],
        residuals: &mut DVector<f64>,
        with_jacobian: bool,
    ) -> Option<f64> {
        let mut cost = 0.0;

        for (index, residual_block) in problem.residual_blocks.iter().enumerate() {
            let offset = self.residual_offsets[index];
            let m = residual_block.num_residuals();
            let rows = &mut residuals.as_mut_slice()[offset..offset + m];

            if !with_jacobian {
                cost += residual_block.evaluate(state, rows, None)?;
                continue;
            }

            let ambient = &mut self.ambient_jacobians[index];
            cost += residual_block.evaluate(state, rows, Some(ambient.as_mut_slice()))?;

            // Chain each ambient Jacobian through its manifold and scatter
            let data = self.jacobian.data_mut();
            let mut slots = self.slots[index].iter();
            for (id, ambient_jacobian) in residual_block.parameter_blocks.iter().zip(ambient.iter()) {
                if self.block_columns[id.index()].is_none() {
                    continue;
                }
                let parameter_block = &problem.parameter_blocks[id.index()];
                let local = match &parameter_block.manifold {
                    Some(manifold) => ambient_jacobian * manifold.plus_jacobian(&state[id.index()]),
                    None => ambient_jacobian.clone(),
                };
                for row in 0..m {
                    for col in 0..local.ncols() {
                        if let Some(&slot) = slots.next() {
                            data[slot] = local[(row, col)];
                        }
                    }
                }
            }
        }

        Some(cost)
    }

    /// Jᵀ r
    pub(crate) fn gradient(&self, residuals: &DVector<f64>) -> DVector<f64> {
        let mut jtr = DVector::zeros(self.num_columns);
        for (row, values) in self.jacobian.outer_iterator().enumerate() {
            let r = residuals[row];
            for (col, &value) in values.iter() {
                jtr[col] += value * r;
            }
        }
        jtr
    }

    /// Jᵀ J
    pub(crate) fn normal_matrix(&self) -> CsMat<f64> {
        let jt: CsMat<f64> = self.jacobian.clone().transpose_into();
        &jt * &self.jacobian
    }

    /// Retract a tangent-space step onto every non-constant block
    pub(crate) fn plus(&self, problem: &Problem, state: &[Vec<f64>], step: &DVector<f64>) -> Vec<Vec<f64>> {
        problem
            .parameter_blocks
            .iter()
            .zip(state)
            .zip(&self.block_columns)
            .map(|((block, x), column)| match column {
                Some(start) => {
                    let t = block.tangent_size();
                    let mut x_plus_delta = vec![0.0; x.len()];
                    block.plus(x, &step.as_slice()[*start..*start + t], &mut x_plus_delta);
                    x_plus_delta
                }
                None => x.clone(),
            })
            .collect()
    }

    /// Euclidean norm of the values of all non-constant blocks
    pub(crate) fn state_norm(&self, state: &[Vec<f64>]) -> f64 {
        state
            .iter()
            .zip(&self.block_columns)
            .filter(|(_, column)| column.is_some())
            .flat_map(|(values, _)| values.iter())
            .map(|v| v * v)
            .sum::<f64>()
            .sqrt()
    }
}

/// Add Levenberg-Marquardt damping to the diagonal: JtJ[i,i] += lambda * max(JtJ[i,i], 1)
///
/// Structurally missing diagonal entries are inserted as `lambda`.
pub fn add_damping(jtj: &CsMat<f64>, lambda: f64) -> CsMat<f64> {
    let n = jtj.cols();
    let mut tri = TriMat::new((n, n));
    let mut has_diagonal = vec![false; n];

    for (outer, values) in jtj.outer_iterator().enumerate() {
        for (inner, &value) in values.iter() {
            if inner == outer {
                has_diagonal[outer] = true;
                tri.add_triplet(inner, outer, value + lambda * value.max(1.0));
            } else {
                tri.add_triplet(inner, outer, value);
            }
        }
    }
    for (i, present) in has_diagonal.into_iter().enumerate() {
        if !present {
            tri.add_triplet(i, i, lambda);
        }
    }

    tri.to_csc()
}

/// Solve `A x = b` for symmetric positive definite `A` with sparse LDLᵀ
///
/// Returns `None` if the factorization fails or yields a non-finite solution.
pub fn solve_ldl(a: &CsMat<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    let ldl = match Ldl::new()
        .check_symmetry(SymmetryCheck::DontCheckSymmetry)
        .numeric(a.view())
    {
        Ok(ldl) => ldl,
        Err(e) => {
            tracing::warn!("LDL factorization failed: {:?}", e);
            return None;
        }
    };

    let rhs: Vec<f64> = b.iter().copied().collect();
    let x = DVector::from_vec(ldl.solve(&rhs));
    x.iter().all(|v| v.is_finite()).then_some(x)
}
