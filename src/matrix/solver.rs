//! Reference iterative solvers for one scalar component of an equation.
//! Residuals are normalised so that they do not depend on the level of the
//! solution; every reduction is global, so in a decomposed run all ranks
//! iterate in lock step.

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::ldu::LduSystem;
use crate::error::{Error, Result};
use crate::mesh::geometry::VSMALL;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SolverKind {
    /// Jacobi-preconditioned conjugate gradients; symmetric matrices only.
    Pcg,
    /// Jacobi-preconditioned stabilised bi-conjugate gradients.
    PBiCGStab,
    GaussSeidel,
}

/// Per-field solver settings.
///
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SolverControls {
    pub solver: SolverKind,
    pub tolerance: f64,
    pub rel_tol: f64,
    pub max_iter: usize,
    pub min_iter: usize,
}

impl Default for SolverControls {
    fn default() -> Self {
        Self {
            solver: SolverKind::PBiCGStab,
            tolerance: 1e-6,
            rel_tol: 0.0,
            max_iter: 1000,
            min_iter: 0,
        }
    }
}

impl SolverControls {
    pub fn with_solver(solver: SolverKind) -> Self {
        Self {
            solver,
            ..Self::default()
        }
    }

    fn converged(&self, initial: f64, fin: f64) -> bool {
        fin < self.tolerance || (self.rel_tol > 0.0 && fin < self.rel_tol * initial)
    }
}

/// What a solve achieved. Not converging is reported here, never raised as
/// an error.
///
#[derive(Clone, Debug, PartialEq)]
pub struct SolverPerformance {
    pub solver_name: String,
    pub field_name: String,
    pub initial_residual: f64,
    pub final_residual: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl SolverPerformance {
    fn new(solver_name: &str, field_name: &str) -> Self {
        Self {
            solver_name: solver_name.to_string(),
            field_name: field_name.to_string(),
            initial_residual: 0.0,
            final_residual: 0.0,
            iterations: 0,
            converged: false,
        }
    }

    /// Combine the performance of the components of one field: the worst
    /// residuals and iteration count.
    ///
    pub fn merge(self, other: Self) -> Self {
        Self {
            solver_name: self.solver_name,
            field_name: self.field_name,
            initial_residual: self.initial_residual.max(other.initial_residual),
            final_residual: self.final_residual.max(other.final_residual),
            iterations: self.iterations.max(other.iterations),
            converged: self.converged && other.converged,
        }
    }

    pub fn log(&self) {
        info!(
            "{}:  Solving for {}, Initial residual = {:e}, Final residual = {:e}, No Iterations {}",
            self.solver_name, self.field_name, self.initial_residual, self.final_residual, self.iterations
        );
        if !self.converged {
            warn!("{}: {} did not converge", self.solver_name, self.field_name);
        }
    }
}

/// Solve `A psi = source` for one component, choosing the algorithm from
/// the controls and the structure of the matrix.
///
pub fn solve(system: &LduSystem, psi: &mut [f64], source: &[f64], controls: &SolverControls, field_name: &str) -> Result<SolverPerformance> {
    check_diagonal(system, field_name)?;
    if system.diagonal()? {
        return Ok(diagonal(system, psi, source, field_name));
    }
    match controls.solver {
        SolverKind::Pcg if !system.symmetric() => {
            warn!("PCG requested for asymmetric matrix {}, using PBiCGStab", field_name);
            pbicgstab(system, psi, source, controls, field_name)
        }
        SolverKind::Pcg => pcg(system, psi, source, controls, field_name),
        SolverKind::PBiCGStab => pbicgstab(system, psi, source, controls, field_name),
        SolverKind::GaussSeidel => gauss_seidel(system, psi, source, controls, field_name),
    }
}

/// Every solver divides by the diagonal, so a zero entry on any rank is
/// refused on all of them. A floating level left without `set_reference`
/// is the usual cause.
///
fn check_diagonal(system: &LduSystem, field_name: &str) -> Result<()> {
    let zeros: Vec<usize> = system
        .diag
        .iter()
        .enumerate()
        .filter(|(_, d)| **d == 0.0)
        .map(|(cell, _)| cell)
        .collect();
    if let Some(cell) = zeros.first() {
        warn!("{}: {} zero diagonal coefficient(s), first in cell {}", field_name, zeros.len(), cell);
    }
    if system.mesh.comm().sum(zeros.len() as f64)? > 0.0 {
        return Err(Error::MatrixState {
            field: field_name.to_string(),
            state: "singular",
            operation: "solve",
        });
    }
    Ok(())
}

fn diagonal(system: &LduSystem, psi: &mut [f64], source: &[f64], field_name: &str) -> SolverPerformance {
    for ((p, b), d) in psi.iter_mut().zip(source).zip(&system.diag) {
        *p = b / d
    }
    let mut perf = SolverPerformance::new("diagonal", field_name);
    perf.converged = true;
    perf
}

fn precondition(r_d: &[f64], r: &[f64]) -> Vec<f64> {
    r_d.iter().zip(r).map(|(d, r)| d * r).collect()
}

fn reciprocal_diag(system: &LduSystem) -> Vec<f64> {
    system.diag.iter().map(|d| 1.0 / d).collect()
}

pub fn pcg(system: &LduSystem, psi: &mut [f64], source: &[f64], controls: &SolverControls, field_name: &str) -> Result<SolverPerformance> {
    let mut perf = SolverPerformance::new("PCG", field_name);
    let r_d = reciprocal_diag(system);

    let mut w_a = system.amul(psi)?;
    let mut r_a: Vec<f64> = source.iter().zip(&w_a).map(|(b, a)| b - a).collect();
    let norm_factor = system.norm_factor(psi, source, &w_a)?;
    perf.initial_residual = system.sum_mag(&r_a)? / norm_factor;
    perf.final_residual = perf.initial_residual;

    if controls.min_iter > 0 || !controls.converged(perf.initial_residual, perf.final_residual) {
        let mut p_a = vec![0.0; psi.len()];
        let mut w_ar_a = f64::MAX;

        loop {
            let w_ar_a_old = w_ar_a;
            w_a = precondition(&r_d, &r_a);
            w_ar_a = system.sum_prod(&w_a, &r_a)?;

            if perf.iterations == 0 {
                p_a.copy_from_slice(&w_a);
            } else {
                let beta = w_ar_a / w_ar_a_old;
                for (p, w) in p_a.iter_mut().zip(&w_a) {
                    *p = w + beta * *p
                }
            }

            w_a = system.amul(&p_a)?;
            let w_ap_a = system.sum_prod(&w_a, &p_a)?;
            if (w_ap_a / norm_factor).abs() < VSMALL {
                break;
            }

            let alpha = w_ar_a / w_ap_a;
            for i in 0..psi.len() {
                psi[i] += alpha * p_a[i];
                r_a[i] -= alpha * w_a[i];
            }
            perf.final_residual = system.sum_mag(&r_a)? / norm_factor;
            perf.iterations += 1;

            let done = perf.iterations >= controls.max_iter || controls.converged(perf.initial_residual, perf.final_residual);
            if done && perf.iterations >= controls.min_iter {
                break;
            }
        }
    }
    perf.converged = controls.converged(perf.initial_residual, perf.final_residual);
    Ok(perf)
}

pub fn pbicgstab(system: &LduSystem, psi: &mut [f64], source: &[f64], controls: &SolverControls, field_name: &str) -> Result<SolverPerformance> {
    let mut perf = SolverPerformance::new("PBiCGStab", field_name);
    let r_d = reciprocal_diag(system);
    let n = psi.len();

    let y_a = system.amul(psi)?;
    let mut r_a: Vec<f64> = source.iter().zip(&y_a).map(|(b, a)| b - a).collect();
    let norm_factor = system.norm_factor(psi, source, &y_a)?;
    perf.initial_residual = system.sum_mag(&r_a)? / norm_factor;
    perf.final_residual = perf.initial_residual;

    if controls.min_iter > 0 || !controls.converged(perf.initial_residual, perf.final_residual) {
        let r_a0 = r_a.clone();
        let mut p_a = vec![0.0; n];
        let mut ay_a = vec![0.0; n];
        let mut r_a0r_a = 0.0;
        let mut alpha = 0.0;
        let mut omega = 0.0;

        loop {
            let r_a0r_a_old = r_a0r_a;
            r_a0r_a = system.sum_prod(&r_a0, &r_a)?;

            if perf.iterations == 0 {
                p_a.copy_from_slice(&r_a);
            } else {
                if r_a0r_a_old.abs() < VSMALL {
                    break;
                }
                let beta = (r_a0r_a / r_a0r_a_old) * (alpha / omega);
                for i in 0..n {
                    p_a[i] = r_a[i] + beta * (p_a[i] - omega * ay_a[i])
                }
            }

            let y_a = precondition(&r_d, &p_a);
            ay_a = system.amul(&y_a)?;
            let r_a0ay_a = system.sum_prod(&r_a0, &ay_a)?;
            alpha = r_a0r_a / r_a0ay_a;

            let s_a: Vec<f64> = r_a.iter().zip(&ay_a).map(|(r, a)| r - alpha * a).collect();
            perf.final_residual = system.sum_mag(&s_a)? / norm_factor;

            if controls.converged(perf.initial_residual, perf.final_residual) && perf.iterations + 1 >= controls.min_iter {
                for (p, y) in psi.iter_mut().zip(&y_a) {
                    *p += alpha * y
                }
                perf.iterations += 1;
                break;
            }

            let z_a = precondition(&r_d, &s_a);
            let t_a = system.amul(&z_a)?;
            let t_at_a = system.sum_prod(&t_a, &t_a)?;
            omega = if t_at_a > VSMALL { system.sum_prod(&t_a, &s_a)? / t_at_a } else { 0.0 };

            for i in 0..n {
                psi[i] += alpha * y_a[i] + omega * z_a[i];
                r_a[i] = s_a[i] - omega * t_a[i];
            }
            perf.final_residual = system.sum_mag(&r_a)? / norm_factor;
            perf.iterations += 1;

            let done = perf.iterations >= controls.max_iter || controls.converged(perf.initial_residual, perf.final_residual);
            if (done && perf.iterations >= controls.min_iter) || omega == 0.0 {
                break;
            }
        }
    }
    perf.converged = controls.converged(perf.initial_residual, perf.final_residual);
    Ok(perf)
}

/// One Gauss-Seidel sweep in cell order. Interface contributions are
/// lagged: they are moved to the source with the far-side values from the
/// start of the sweep.
///
fn gauss_seidel_sweep(system: &LduSystem, psi: &mut [f64], source: &[f64]) -> Result<()> {
    let mesh = system.mesh;
    let owner = mesh.owner();
    let neighbour = mesh.neighbour();
    let lower = system.lower();
    let mut b_prime = source.to_vec();

    let far = system.interface_values(psi)?;
    for (iface, pnf) in system.interfaces.iter().zip(far) {
        for ((&c, coeff), v) in mesh.patch_face_cells(iface.patch).iter().zip(&iface.coeffs).zip(pnf) {
            b_prime[c] += coeff * v
        }
    }

    for cell in 0..psi.len() {
        let owned = mesh
            .cell_faces(cell)
            .iter()
            .copied()
            .filter(|&f| f < system.upper.len() && owner[f] == cell);

        let mut psi_i = b_prime[cell];
        for face in owned.clone() {
            psi_i -= system.upper[face] * psi[neighbour[face]];
        }
        psi_i /= system.diag[cell];
        for face in owned {
            b_prime[neighbour[face]] -= lower[face] * psi_i;
        }
        psi[cell] = psi_i;
    }
    Ok(())
}

pub fn gauss_seidel(system: &LduSystem, psi: &mut [f64], source: &[f64], controls: &SolverControls, field_name: &str) -> Result<SolverPerformance> {
    let mut perf = SolverPerformance::new("GaussSeidel", field_name);

    let a_psi = system.amul(psi)?;
    let norm_factor = system.norm_factor(psi, source, &a_psi)?;
    let r_a: Vec<f64> = source.iter().zip(&a_psi).map(|(b, a)| b - a).collect();
    perf.initial_residual = system.sum_mag(&r_a)? / norm_factor;
    perf.final_residual = perf.initial_residual;

    if controls.min_iter > 0 || !controls.converged(perf.initial_residual, perf.final_residual) {
        loop {
            gauss_seidel_sweep(system, psi, source)?;
            let r_a = system.residual(psi, source)?;
            perf.final_residual = system.sum_mag(&r_a)? / norm_factor;
            perf.iterations += 1;

            let done = perf.iterations >= controls.max_iter || controls.converged(perf.initial_residual, perf.final_residual);
            if done && perf.iterations >= controls.min_iter {
                break;
            }
        }
    }
    perf.converged = controls.converged(perf.initial_residual, perf.final_residual);
    Ok(perf)
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::mesh::Mesh;
    use crate::meshing::BlockMesh;
    use approx::assert_relative_eq;

    /// `-psi'' = 0` on a line with both ends held by the diagonal and the
    /// source, so the exact solution is linear from 0 to 1.
    fn dirichlet_line(mesh: &Mesh, asymmetric: bool) -> (LduSystem, Vec<f64>) {
        let n = mesh.n_cells();
        let mut diag = vec![2.0; n];
        diag[0] = 3.0;
        diag[n - 1] = 3.0;
        let mut source = vec![0.0; n];
        source[n - 1] = 2.0;
        let upper = vec![-1.0; mesh.n_internal_faces()];
        let system = LduSystem {
            mesh,
            diag,
            lower: if asymmetric { Some(upper.clone()) } else { None },
            upper,
            interfaces: vec![],
        };
        (system, source)
    }

    fn exact(n: usize) -> Vec<f64> {
        (0..n).map(|i| (i as f64 + 0.5) / n as f64).collect()
    }

    #[test]
    fn every_solver_reaches_the_linear_profile() {
        let mesh = BlockMesh::line(8, 1.0).build().unwrap();
        for kind in [SolverKind::Pcg, SolverKind::PBiCGStab, SolverKind::GaussSeidel] {
            let (system, source) = dirichlet_line(&mesh, false);
            let mut psi = vec![0.0; 8];
            let controls = SolverControls {
                tolerance: 1e-12,
                max_iter: 5000,
                ..SolverControls::with_solver(kind)
            };
            let perf = solve(&system, &mut psi, &source, &controls, "T").unwrap();
            assert!(perf.converged, "{:?} did not converge", kind);
            for (p, e) in psi.iter().zip(exact(8)) {
                assert_relative_eq!(*p, e, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn pcg_falls_back_on_asymmetric_matrices() {
        let mesh = BlockMesh::line(4, 1.0).build().unwrap();
        let (system, source) = dirichlet_line(&mesh, true);
        let mut psi = vec![0.0; 4];
        let perf = solve(&system, &mut psi, &source, &SolverControls::with_solver(SolverKind::Pcg), "T").unwrap();
        assert_eq!(perf.solver_name, "PBiCGStab");
        assert!(perf.converged);
    }

    #[test]
    fn diagonal_matrices_are_solved_directly() {
        let mesh = BlockMesh::line(2, 1.0).build().unwrap();
        let system = LduSystem {
            mesh: &mesh,
            diag: vec![2.0, 4.0],
            upper: vec![0.0],
            lower: None,
            interfaces: vec![],
        };
        let mut psi = vec![0.0; 2];
        let perf = solve(&system, &mut psi, &[2.0, 2.0], &SolverControls::default(), "T").unwrap();
        assert_eq!(perf.solver_name, "diagonal");
        assert_eq!(psi, vec![1.0, 0.5]);
    }

    #[test]
    fn zero_diagonal_is_refused() {
        let mesh = BlockMesh::line(3, 1.0).build().unwrap();
        let (mut system, source) = dirichlet_line(&mesh, false);
        system.diag[1] = 0.0;
        let mut psi = vec![0.0; 3];
        for kind in [SolverKind::Pcg, SolverKind::GaussSeidel] {
            let r = solve(&system, &mut psi, &source, &SolverControls::with_solver(kind), "p");
            assert!(matches!(r, Err(Error::MatrixState { state: "singular", .. })));
        }
        assert!(psi.iter().all(|p| p.is_finite()));
    }

    #[test]
    fn iteration_budget_is_reported_not_raised() {
        let mesh = BlockMesh::line(16, 1.0).build().unwrap();
        let (system, source) = dirichlet_line(&mesh, false);
        let mut psi = vec![0.0; 16];
        let controls = SolverControls {
            solver: SolverKind::GaussSeidel,
            tolerance: 1e-14,
            max_iter: 3,
            ..SolverControls::default()
        };
        let perf = solve(&system, &mut psi, &source, &controls, "T").unwrap();
        assert_eq!(perf.iterations, 3);
        assert!(!perf.converged);
        assert!(perf.final_residual < perf.initial_residual);
    }

    #[test]
    fn merged_performance_keeps_the_worst_component() {
        let mut a = SolverPerformance::new("PCG", "U");
        a.initial_residual = 1.0;
        a.iterations = 4;
        a.converged = true;
        let mut b = SolverPerformance::new("PCG", "U");
        b.final_residual = 1e-3;
        b.iterations = 7;
        let m = a.merge(b);
        assert_eq!(m.iterations, 7);
        assert_eq!(m.initial_residual, 1.0);
        assert!(!m.converged);
    }
}
