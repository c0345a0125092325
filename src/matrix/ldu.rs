//! The scalar linear system seen by the solvers: lower-diagonal-upper
//! coefficients over the mesh faces, plus the coupled-patch interfaces
//! through which a row reaches cells on the far side of a cyclic or
//! processor patch.

use crate::error::Result;
use crate::mesh::{Mesh, PatchKind};
use crate::message::exchange;

/// The coefficients multiplying the far-side cell values of one coupled
/// patch. A matrix-vector product subtracts `coeffs[i] * psi_far[i]` from
/// the row of the face cell.
///
#[derive(Clone, Debug)]
pub struct Interface {
    pub patch: usize,
    pub coeffs: Vec<f64>,
}

/// One component of an assembled equation in LDU form.
///
pub struct LduSystem<'a> {
    pub mesh: &'a Mesh,
    pub diag: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Option<Vec<f64>>,
    pub interfaces: Vec<Interface>,
}

impl<'a> LduSystem<'a> {
    pub fn lower(&self) -> &[f64] {
        self.lower.as_deref().unwrap_or(&self.upper)
    }

    pub fn symmetric(&self) -> bool {
        self.lower.is_none()
    }

    /// Whether no row couples to another cell on any rank. This is a
    /// collective call, so that all ranks pick the same solver.
    ///
    pub fn diagonal(&self) -> Result<bool> {
        let local = self.upper.iter().all(|u| *u == 0.0)
            && self.lower().iter().all(|l| *l == 0.0)
            && self.interfaces.iter().all(|i| i.coeffs.iter().all(|c| *c == 0.0));
        Ok(self.mesh.comm().max(if local { 0.0 } else { 1.0 })? == 0.0)
    }

    /// The values of `psi` on the far side of each interface. Processor
    /// interfaces exchange with their neighbour rank, so every rank must
    /// call this in the same order.
    ///
    pub fn interface_values(&self, psi: &[f64]) -> Result<Vec<Vec<f64>>> {
        let comm = self.mesh.comm();
        let tag = comm.next_tag();

        for iface in &self.interfaces {
            if let PatchKind::Processor { neighb_proc, .. } = self.mesh.patch(iface.patch).kind {
                let send: Vec<f64> = self.mesh.patch_face_cells(iface.patch).iter().map(|&c| psi[c]).collect();
                exchange::send_values(comm, neighb_proc, tag, &send)?;
            }
        }

        let mut values = Vec::with_capacity(self.interfaces.len());
        for iface in &self.interfaces {
            let poly = self.mesh.patch(iface.patch);
            values.push(match poly.kind {
                PatchKind::Cyclic { neighbour_patch, .. } => {
                    self.mesh.patch_face_cells(neighbour_patch).iter().map(|&c| psi[c]).collect()
                }
                PatchKind::Processor { neighb_proc, .. } => exchange::recv_values(comm, neighb_proc, tag, poly.size)?,
                _ => vec![0.0; poly.size],
            });
        }
        Ok(values)
    }

    fn subtract_interfaces(&self, psi: &[f64], result: &mut [f64]) -> Result<()> {
        let far = self.interface_values(psi)?;
        for (iface, pnf) in self.interfaces.iter().zip(far) {
            for ((&c, coeff), v) in self.mesh.patch_face_cells(iface.patch).iter().zip(&iface.coeffs).zip(pnf) {
                result[c] -= coeff * v
            }
        }
        Ok(())
    }

    /// `A psi`, including the interface contributions.
    ///
    pub fn amul(&self, psi: &[f64]) -> Result<Vec<f64>> {
        let owner = self.mesh.owner();
        let neighbour = self.mesh.neighbour();
        let lower = self.lower();

        let mut result: Vec<f64> = self.diag.iter().zip(psi).map(|(d, p)| d * p).collect();
        for face in 0..self.upper.len() {
            let (l, u) = (owner[face], neighbour[face]);
            result[u] += lower[face] * psi[l];
            result[l] += self.upper[face] * psi[u];
        }
        self.subtract_interfaces(psi, &mut result)?;
        Ok(result)
    }

    /// Row sums of the matrix, with interface coefficients counted as
    /// off-diagonals.
    ///
    pub fn sum_a(&self) -> Vec<f64> {
        let owner = self.mesh.owner();
        let neighbour = self.mesh.neighbour();
        let lower = self.lower();

        let mut sum = self.diag.clone();
        for face in 0..self.upper.len() {
            sum[owner[face]] += self.upper[face];
            sum[neighbour[face]] += lower[face];
        }
        for iface in &self.interfaces {
            for (&c, coeff) in self.mesh.patch_face_cells(iface.patch).iter().zip(&iface.coeffs) {
                sum[c] -= coeff
            }
        }
        sum
    }

    /// `b - A psi`.
    ///
    pub fn residual(&self, psi: &[f64], source: &[f64]) -> Result<Vec<f64>> {
        let a_psi = self.amul(psi)?;
        Ok(source.iter().zip(a_psi).map(|(b, a)| b - a).collect())
    }

    /// Scale for residuals, so that they are independent of the level of
    /// the solution: `sum |A psi - A xbar| + |b - A xbar|`, where `xbar` is
    /// the global mean of `psi`.
    ///
    pub fn norm_factor(&self, psi: &[f64], source: &[f64], a_psi: &[f64]) -> Result<f64> {
        let comm = self.mesh.comm();
        let n = comm.sum(psi.len() as f64)?;
        let average = if n > 0.0 { comm.sum(psi.iter().sum())? / n } else { 0.0 };
        let local: f64 = self
            .sum_a()
            .iter()
            .zip(a_psi)
            .zip(source)
            .map(|((s, a), b)| {
                let x = s * average;
                (a - x).abs() + (b - x).abs()
            })
            .sum();
        Ok(comm.sum(local)? + 1e-20)
    }

    pub fn sum_mag(&self, x: &[f64]) -> Result<f64> {
        self.mesh.comm().sum(x.iter().map(|v| v.abs()).sum())
    }

    pub fn sum_prod(&self, a: &[f64], b: &[f64]) -> Result<f64> {
        self.mesh.comm().sum(a.iter().zip(b).map(|(x, y)| x * y).sum())
    }
}
