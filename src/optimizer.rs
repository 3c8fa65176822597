//! Constrained mean-variance weight optimization.
//!
//! Solves, per rebalance date, the single-period program
//!
//! ```text
//! maximize   mu . w  -  risk_aversion * w' S w
//! subject to sum(w) = 1,  0 <= w_i <= max_weight,
//!            sum(w_i, i in sector) <= sector_cap   (per sector, when supplied)
//! ```
//!
//! Externally supplied risk matrices are preconditioned before solving:
//! symmetrized, and diagonal-shifted when the smallest eigenvalue is negative,
//! so the program stays convex. The solver itself sits behind
//! [`QuadraticProgramSolver`] so alternative convex solvers can be substituted.

use crate::error::{BacktestError, Result};
use crate::types::{SectorMatrix, WeightVector};
use nalgebra::{DMatrix, DVector};
use tracing::debug;

/// Diagonal shift padding applied when restoring positive semi-definiteness.
pub const EIGEN_SHIFT_EPSILON: f64 = 1e-8;

/// Feasibility slack for constraint checks.
const FEASIBILITY_TOL: f64 = 1e-9;

/// Symmetrize a risk matrix and shift its diagonal so the minimum eigenvalue
/// is >= 0 (within [`EIGEN_SHIFT_EPSILON`]).
///
/// Numerical asymmetry and slight indefiniteness are expected artifacts of
/// externally supplied matrices; both are corrected silently.
pub fn precondition_risk_matrix(matrix: &DMatrix<f64>) -> DMatrix<f64> {
    let mut sym = 0.5 * (matrix + matrix.transpose());
    let eigen = sym.clone().symmetric_eigen();
    let min_eigenvalue = eigen.eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if min_eigenvalue < 0.0 {
        debug!(
            min_eigenvalue,
            "shifting risk-matrix diagonal to restore positive semi-definiteness"
        );
        let shift = -min_eigenvalue + EIGEN_SHIFT_EPSILON;
        for i in 0..sym.nrows() {
            sym[(i, i)] += shift;
        }
    }
    sym
}

/// A single-period quadratic program over the capped simplex.
#[derive(Debug, Clone)]
pub struct QuadraticProgram {
    /// Linear objective coefficients (expected returns or scores).
    pub expected_returns: DVector<f64>,
    /// Preconditioned risk matrix.
    pub risk_matrix: DMatrix<f64>,
    /// Quadratic penalty scalar.
    pub risk_aversion: f64,
    /// Per-asset box cap.
    pub max_weight: f64,
    /// Asset indices per sector, paired with the per-sector cap.
    pub sector_groups: Option<(Vec<Vec<usize>>, f64)>,
}

impl QuadraticProgram {
    fn n(&self) -> usize {
        self.expected_returns.len()
    }

    /// Objective value at `w`.
    fn objective(&self, w: &DVector<f64>) -> f64 {
        self.expected_returns.dot(w) - self.risk_aversion * (w.transpose() * &self.risk_matrix * w)[(0, 0)]
    }

    fn is_feasible(&self, w: &[f64]) -> bool {
        let sum: f64 = w.iter().sum();
        if (sum - 1.0).abs() > 1e-6 {
            return false;
        }
        if w.iter().any(|&x| x < -FEASIBILITY_TOL || x > self.max_weight + FEASIBILITY_TOL) {
            return false;
        }
        if let Some((groups, cap)) = &self.sector_groups {
            for group in groups {
                let total: f64 = group.iter().map(|&i| w[i]).sum();
                if total > cap + FEASIBILITY_TOL {
                    return false;
                }
            }
        }
        true
    }
}

/// Capability seam for the convex solver: a program in, a feasible weight
/// vector or an infeasibility error out.
pub trait QuadraticProgramSolver: Send + Sync {
    fn solve(&self, program: &QuadraticProgram) -> Result<Vec<f64>>;
}

/// Projected-gradient solver over the capped simplex with sector repair.
///
/// Each iteration takes a gradient-ascent step and maps it back onto the
/// feasible set: exact projection onto `{sum(w)=1, 0<=w<=cap}` via bisection,
/// followed by a sector-cap repair pass that rescales violating sectors and
/// redistributes the freed mass into remaining headroom.
#[derive(Debug, Clone)]
pub struct ProjectedGradientSolver {
    pub max_iters: usize,
    pub tolerance: f64,
}

impl Default for ProjectedGradientSolver {
    fn default() -> Self {
        Self {
            max_iters: 500,
            tolerance: 1e-10,
        }
    }
}

impl ProjectedGradientSolver {
    fn project(&self, v: &[f64], program: &QuadraticProgram) -> Vec<f64> {
        let mut w = project_capped_simplex(v, program.max_weight);
        if let Some((groups, cap)) = &program.sector_groups {
            repair_sector_caps(&mut w, groups, *cap, program.max_weight);
        }
        w
    }
}

impl QuadraticProgramSolver for ProjectedGradientSolver {
    fn solve(&self, program: &QuadraticProgram) -> Result<Vec<f64>> {
        let n = program.n();

        // Step size from the gradient's Lipschitz scale.
        let curvature = 2.0
            * program.risk_aversion
            * program
                .risk_matrix
                .iter()
                .fold(0.0_f64, |acc, &x| acc.max(x.abs()))
            * n as f64;
        let step = 1.0 / (curvature + 1.0);

        let start = vec![1.0 / n as f64; n];
        let mut w = DVector::from_vec(self.project(&start, program));
        let mut best = w.clone();
        let mut best_objective = f64::NEG_INFINITY;

        for iter in 0..self.max_iters {
            let gradient =
                &program.expected_returns - 2.0 * program.risk_aversion * (&program.risk_matrix * &w);
            let stepped: Vec<f64> = w
                .iter()
                .zip(gradient.iter())
                .map(|(wi, gi)| wi + step * gi)
                .collect();
            let projected = DVector::from_vec(self.project(&stepped, program));

            let objective = program.objective(&projected);
            if objective.is_finite() && objective > best_objective {
                best_objective = objective;
                best = projected.clone();
            }

            let movement = (&projected - &w).norm();
            w = projected;
            if movement < self.tolerance {
                debug!(iter, "projected gradient converged");
                break;
            }
        }

        let solution: Vec<f64> = best.iter().copied().collect();
        if !solution.iter().all(|x| x.is_finite()) || !program.is_feasible(&solution) {
            return Err(BacktestError::Infeasible {
                assets: n,
                max_weight: program.max_weight,
                sector_cap: program.sector_groups.as_ref().map(|(_, cap)| *cap),
                detail: "solver terminated without a feasible solution".to_string(),
            });
        }
        Ok(solution)
    }
}

/// Exact Euclidean projection of `v` onto `{w : sum(w) = 1, 0 <= w_i <= cap}`.
///
/// Finds the shift `tau` with `sum(clamp(v_i - tau, 0, cap)) = 1` by bisection;
/// the clamped vector at that shift is the projection.
pub fn project_capped_simplex(v: &[f64], cap: f64) -> Vec<f64> {
    let mass_at = |tau: f64| -> f64 { v.iter().map(|&x| (x - tau).clamp(0.0, cap)).sum() };

    let hi_start = v.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let lo_start = v.iter().copied().fold(f64::INFINITY, f64::min) - cap - 1.0;
    let (mut lo, mut hi) = (lo_start, hi_start);
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if mass_at(mid) > 1.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    let tau = 0.5 * (lo + hi);
    v.iter().map(|&x| (x - tau).clamp(0.0, cap)).collect()
}

/// Scale sectors exceeding `cap` down to it, then redistribute the freed mass
/// into assets with both box and sector headroom, restoring `sum(w) = 1`.
fn repair_sector_caps(w: &mut [f64], groups: &[Vec<usize>], cap: f64, max_weight: f64) {
    let mut freed = 0.0;
    for group in groups {
        let total: f64 = group.iter().map(|&i| w[i]).sum();
        if total > cap + FEASIBILITY_TOL && total > 0.0 {
            let scale = cap / total;
            for &i in group {
                freed += w[i] * (1.0 - scale);
                w[i] *= scale;
            }
        }
    }
    if freed <= FEASIBILITY_TOL {
        return;
    }

    for group in groups {
        if freed <= FEASIBILITY_TOL {
            break;
        }
        let sector_total: f64 = group.iter().map(|&i| w[i]).sum();
        let sector_room = (cap - sector_total).max(0.0);
        let headrooms: Vec<f64> = group.iter().map(|&i| (max_weight - w[i]).max(0.0)).collect();
        let box_room: f64 = headrooms.iter().sum();
        let take = freed.min(sector_room).min(box_room);
        if take <= 0.0 || box_room <= 0.0 {
            continue;
        }
        for (&i, headroom) in group.iter().zip(headrooms.iter()) {
            w[i] += take * headroom / box_room;
        }
        freed -= take;
    }
}

/// Single-period constrained mean-variance optimizer.
pub struct WeightOptimizer {
    risk_aversion: f64,
    max_weight: f64,
    sector_cap: Option<f64>,
    solver: Box<dyn QuadraticProgramSolver>,
}

impl WeightOptimizer {
    pub fn new(risk_aversion: f64, max_weight: f64) -> Self {
        Self {
            risk_aversion,
            max_weight,
            sector_cap: None,
            solver: Box::new(ProjectedGradientSolver::default()),
        }
    }

    /// Enforce a per-sector aggregate cap when a sector matrix is supplied.
    pub fn with_sector_cap(mut self, cap: f64) -> Self {
        self.sector_cap = Some(cap);
        self
    }

    /// Substitute the convex solver implementation.
    pub fn with_solver(mut self, solver: Box<dyn QuadraticProgramSolver>) -> Self {
        self.solver = solver;
        self
    }

    /// Solve for target weights over `tickers`.
    ///
    /// `expected_returns` and `risk_matrix` must be indexed consistently with
    /// `tickers`; `sectors`, when given, must cover the same universe. Fails
    /// with [`BacktestError::Infeasible`] when the constraint set admits no
    /// solution or the solver cannot find one.
    pub fn optimize(
        &self,
        tickers: &[String],
        expected_returns: &[f64],
        risk_matrix: &DMatrix<f64>,
        sectors: Option<&SectorMatrix>,
    ) -> Result<WeightVector> {
        let n = tickers.len();
        let infeasible = |detail: String| BacktestError::Infeasible {
            assets: n,
            max_weight: self.max_weight,
            sector_cap: self.sector_cap,
            detail,
        };

        if n == 0 {
            return Err(infeasible("empty universe".to_string()));
        }
        if expected_returns.len() != n || risk_matrix.nrows() != n || risk_matrix.ncols() != n {
            return Err(BacktestError::DataError(format!(
                "optimizer inputs disagree on universe size: {} tickers, {} scores, {}x{} risk matrix",
                n,
                expected_returns.len(),
                risk_matrix.nrows(),
                risk_matrix.ncols()
            )));
        }
        if self.max_weight * (n as f64) < 1.0 - FEASIBILITY_TOL {
            return Err(infeasible(format!(
                "max_weight * n = {:.6} < 1, weights cannot sum to 1",
                self.max_weight * n as f64
            )));
        }

        let sector_groups = match (sectors, self.sector_cap) {
            (Some(matrix), Some(cap)) => {
                let groups = matrix.groups();
                let capacity: f64 = groups
                    .iter()
                    .map(|g| cap.min(g.len() as f64 * self.max_weight))
                    .sum();
                if capacity < 1.0 - FEASIBILITY_TOL {
                    return Err(infeasible(format!(
                        "sector capacity {:.6} < 1 under sector_cap {}",
                        capacity, cap
                    )));
                }
                Some((groups, cap))
            }
            _ => None,
        };

        let program = QuadraticProgram {
            expected_returns: DVector::from_column_slice(expected_returns),
            risk_matrix: precondition_risk_matrix(risk_matrix),
            risk_aversion: self.risk_aversion,
            max_weight: self.max_weight,
            sector_groups,
        };

        let solution = self.solver.solve(&program)?;
        Ok(WeightVector::from_pairs(
            tickers.iter().cloned().zip(solution),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tickers(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("T{}", i)).collect()
    }

    #[test]
    fn preconditioning_restores_psd() {
        // Symmetric with a synthetically negative eigenvalue (eigenvalues 3, -1).
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let fixed = precondition_risk_matrix(&m);
        let min_ev = fixed
            .symmetric_eigen()
            .eigenvalues
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min);
        assert!(min_ev >= -EIGEN_SHIFT_EPSILON);
    }

    #[test]
    fn preconditioning_symmetrizes() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 0.3, 0.1, 1.0]);
        let fixed = precondition_risk_matrix(&m);
        assert!((fixed[(0, 1)] - fixed[(1, 0)]).abs() < 1e-15);
        assert!((fixed[(0, 1)] - 0.2).abs() < 1e-12);
    }

    #[test]
    fn uniform_scores_identity_risk_gives_equal_weight() {
        for k in [0.5, 1.0, 10.0] {
            let n = 5;
            let optimizer = WeightOptimizer::new(0.1, 0.6);
            let weights = optimizer
                .optimize(
                    &tickers(n),
                    &vec![0.02; n],
                    &(DMatrix::identity(n, n) * k),
                    None,
                )
                .unwrap();
            for (_, w) in weights.iter() {
                assert!((w - 0.2).abs() < 1e-6, "expected 0.2, got {}", w);
            }
        }
    }

    #[test]
    fn infeasible_cap_is_an_error() {
        let optimizer = WeightOptimizer::new(0.1, 0.2);
        let err = optimizer
            .optimize(
                &tickers(3),
                &[0.01, 0.02, 0.03],
                &DMatrix::identity(3, 3),
                None,
            )
            .unwrap_err();
        match err {
            BacktestError::Infeasible {
                assets, max_weight, ..
            } => {
                assert_eq!(assets, 3);
                assert!((max_weight - 0.2).abs() < 1e-12);
            }
            other => panic!("expected Infeasible, got {:?}", other),
        }
    }

    #[test]
    fn box_constraint_binds() {
        // One asset dominates the scores; its weight must stop at the cap.
        let optimizer = WeightOptimizer::new(0.0, 0.6);
        let weights = optimizer
            .optimize(
                &tickers(3),
                &[1.0, 0.0, 0.0],
                &DMatrix::identity(3, 3),
                None,
            )
            .unwrap();
        let top = weights.get("T0").unwrap();
        assert!(top <= 0.6 + 1e-9);
        assert!((weights.sum() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn sector_cap_binds() {
        let sectors = SectorMatrix::from_assignments(&[
            ("T0".to_string(), "Tech".to_string()),
            ("T1".to_string(), "Tech".to_string()),
            ("T2".to_string(), "Energy".to_string()),
            ("T3".to_string(), "Utilities".to_string()),
        ])
        .unwrap();
        let optimizer = WeightOptimizer::new(0.1, 0.5).with_sector_cap(0.4);
        let weights = optimizer
            .optimize(
                &tickers(4),
                &[0.05, 0.05, 0.01, 0.01],
                &DMatrix::identity(4, 4),
                Some(&sectors),
            )
            .unwrap();
        let tech = weights.get("T0").unwrap() + weights.get("T1").unwrap();
        assert!(tech <= 0.4 + 1e-9, "tech weight {} exceeds cap", tech);
        assert!((weights.sum() - 1.0).abs() < 1e-6);
        for (_, w) in weights.iter() {
            assert!(*w >= -1e-9 && *w <= 0.5 + 1e-9);
        }
    }

    #[test]
    fn sector_infeasibility_is_an_error() {
        // Two sectors capped at 0.3 with ample box room still cannot reach 1.
        let sectors = SectorMatrix::from_assignments(&[
            ("T0".to_string(), "A".to_string()),
            ("T1".to_string(), "B".to_string()),
        ])
        .unwrap();
        let optimizer = WeightOptimizer::new(0.1, 1.0).with_sector_cap(0.3);
        let err = optimizer
            .optimize(
                &tickers(2),
                &[0.01, 0.01],
                &DMatrix::identity(2, 2),
                Some(&sectors),
            )
            .unwrap_err();
        assert!(matches!(err, BacktestError::Infeasible { .. }));
    }

    #[test]
    fn projection_lands_on_capped_simplex() {
        let w = project_capped_simplex(&[10.0, 0.0, -3.0, 0.2], 0.6);
        let sum: f64 = w.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        for x in &w {
            assert!(*x >= -1e-12 && *x <= 0.6 + 1e-12);
        }
        assert!((w[0] - 0.6).abs() < 1e-9);
    }

    #[test]
    fn indefinite_risk_matrix_is_corrected_not_fatal() {
        let optimizer = WeightOptimizer::new(0.5, 1.0);
        let indefinite = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let weights = optimizer
            .optimize(&tickers(2), &[0.01, 0.01], &indefinite, None)
            .unwrap();
        assert!((weights.sum() - 1.0).abs() < 1e-6);
    }
}
