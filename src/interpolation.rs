//! Cell-to-face interpolation. A scheme is reduced to one owner-side weight
//! per face, `phi_f = w phi_P + (1 - w) phi_N`, so the implicit convection
//! operator and the explicit interpolation share the same coefficients.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::field::{FieldValue, Gradable, SurfaceField, VolField};
use crate::fvc;
use crate::mesh::Mesh;
use crate::num_vec::Vector3;

const SMALL: f64 = 1e-15;

/// Interpolation schemes. Upwind and the limited schemes need the face
/// flux to decide the upwind direction.
///
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "scheme", rename_all = "camelCase")]
pub enum Scheme {
    Linear,
    Upwind,
    /// TVD blend of linear and upwind; `k` in (0, 1], smaller is closer to
    /// linear.
    LimitedLinear { k: f64 },
    VanLeer,
}

impl Default for Scheme {
    fn default() -> Self {
        Scheme::Linear
    }
}

impl Scheme {
    pub fn needs_flux(&self) -> bool {
        !matches!(self, Scheme::Linear)
    }

    fn limiter(&self, r: f64) -> f64 {
        match *self {
            Scheme::Linear => 1.0,
            Scheme::Upwind => 0.0,
            Scheme::LimitedLinear { k } => (2.0 / k.max(SMALL) * r).min(1.0).max(0.0),
            Scheme::VanLeer => (r + r.abs()) / (1.0 + r.abs()),
        }
    }
}

fn pos0(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        0.0
    }
}

fn sign(x: f64) -> f64 {
    if x >= 0.0 {
        1.0
    } else {
        -1.0
    }
}

/// Gradient ratio for a TVD limiter, based on the upwind cell gradient
/// projected on the centre-to-centre vector. Vector fields are projected
/// on the direction of the face difference.
///
fn gradient_ratio<T: Gradable>(flux: f64, phi_p: T, phi_n: T, grad_p: &T::Grad, grad_n: &T::Grad, d: &Vector3) -> f64 {
    let gradf = phi_n - phi_p;
    let gradcf = if flux > 0.0 {
        T::directional(d, grad_p)
    } else {
        T::directional(d, grad_n)
    };
    if gradcf.mag() >= 1000.0 * gradf.mag() {
        2.0 * 1000.0 * sign(gradcf.inner(&gradf)) - 1.0
    } else {
        2.0 * gradcf.inner(&gradf) / gradf.inner(&gradf) - 1.0
    }
}

/// Owner-side weights of every face, in mesh face numbering. Non-coupled
/// boundary faces always have weight 1.
///
pub fn weights<T: Gradable>(
    mesh: &Mesh,
    scheme: Scheme,
    phi: Option<&SurfaceField<f64>>,
    vf: &VolField<T>,
) -> Result<Vec<f64>> {
    let base = mesh.weights();
    if scheme == Scheme::Linear {
        return Ok(base.to_vec());
    }
    let phi = phi.ok_or_else(|| Error::Config(format!("{:?} interpolation of {} needs a face flux", scheme, vf.name())))?;
    phi.check(mesh)?;
    let mut w = vec![1.0; mesh.n_faces()];

    let grad = match scheme {
        Scheme::Upwind => None,
        _ => Some(fvc::grad(mesh, vf)?),
    };
    let blend = |face: usize, flux: f64, r: Option<f64>| match r {
        Some(r) => {
            let limiter = scheme.limiter(r);
            limiter * base[face] + (1.0 - limiter) * pos0(flux)
        }
        None => pos0(flux),
    };

    let centres = mesh.cell_centres();
    for face in 0..mesh.n_internal_faces() {
        let flux = phi.internal[face];
        let (p, n) = (mesh.owner()[face], mesh.neighbour()[face]);
        let r = grad.as_ref().map(|g| {
            gradient_ratio::<T>(
                flux,
                vf.value(p),
                vf.value(n),
                &g.value(p),
                &g.value(n),
                &(centres[n] - centres[p]),
            )
        });
        w[face] = blend(face, flux, r);
    }

    for (patch, poly) in mesh.patches().iter().enumerate() {
        let pf = vf.patch(patch);
        let pnf = match pf.condition().patch_neighbour_field() {
            Some(pnf) => pnf,
            None => continue,
        };
        let nbr_centres = mesh
            .geometry()
            .coupled_neighbour_centres(mesh.description(), patch)?
            .unwrap_or_default();
        let grad_pnf = grad.as_ref().and_then(|g| g.patch(patch).condition().patch_neighbour_field());

        for (i, face) in poly.range().enumerate() {
            let flux = phi.boundary[patch][i];
            let p = mesh.owner()[face];
            let r = match (&grad, grad_pnf) {
                (Some(g), Some(gn)) => Some(gradient_ratio::<T>(
                    flux,
                    vf.value(p),
                    pnf[i],
                    &g.value(p),
                    &gn[i],
                    &(nbr_centres[i] - centres[p]),
                )),
                _ => None,
            };
            w[face] = blend(face, flux, r);
        }
    }
    Ok(w)
}

/// Interpolate a volume field to the faces with the given weights. Coupled
/// patches use the neighbour values from the field's last boundary
/// evaluation; other patches take the boundary values.
///
pub fn interpolate<T: FieldValue>(mesh: &Mesh, vf: &VolField<T>, weights: &[f64]) -> SurfaceField<T> {
    let owner = mesh.owner();
    let neighbour = mesh.neighbour();
    let internal = (0..mesh.n_internal_faces())
        .map(|f| vf.value(owner[f]) * weights[f] + vf.value(neighbour[f]) * (1.0 - weights[f]))
        .collect();

    let boundary = mesh
        .patches()
        .iter()
        .enumerate()
        .map(|(patch, poly)| {
            let pf = vf.patch(patch);
            match pf.condition().patch_neighbour_field() {
                Some(pnf) => poly
                    .range()
                    .enumerate()
                    .map(|(i, f)| vf.value(owner[f]) * weights[f] + pnf[i] * (1.0 - weights[f]))
                    .collect(),
                None => pf.values().to_vec(),
            }
        })
        .collect();

    SurfaceField {
        name: format!("interpolate({})", vf.name()),
        dimensions: vf.dimensions(),
        oriented: false,
        internal,
        boundary,
    }
}

/// Linear interpolation with the mesh weights.
pub fn linear<T: FieldValue>(mesh: &Mesh, vf: &VolField<T>) -> SurfaceField<T> {
    interpolate(mesh, vf, mesh.weights())
}

// ============================================================================
#[cfg(test)]
mod test {

    use super::*;
    use crate::dimension::DIMLESS;
    use crate::field::BoundarySpec;
    use crate::meshing::BlockMesh;
    use approx::assert_relative_eq;

    fn setup(values: Vec<f64>) -> (Mesh, VolField<f64>) {
        let mesh = BlockMesh::line(values.len(), values.len() as f64).build().unwrap();
        let specs = BoundarySpec::for_patches(mesh.patches(), |_| BoundarySpec::ZeroGradient);
        let vf = VolField::new("psi", &mesh, DIMLESS, values, specs).unwrap();
        (mesh, vf)
    }

    #[test]
    fn linear_interpolation_averages_on_uniform_mesh() {
        let (mesh, vf) = setup(vec![1.0, 3.0, 7.0]);
        let sf = linear(&mesh, &vf);
        assert_relative_eq!(sf.internal[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(sf.internal[1], 5.0, epsilon = 1e-12);
    }

    #[test]
    fn upwind_follows_the_flux_sign() {
        let (mesh, vf) = setup(vec![1.0, 3.0, 7.0]);
        let mut phi = SurfaceField::uniform("phi", &mesh, DIMLESS, 1.0);
        phi.internal[1] = -1.0;
        let w = weights(&mesh, Scheme::Upwind, Some(&phi), &vf).unwrap();
        let sf = interpolate(&mesh, &vf, &w);
        assert_eq!(sf.internal[0], 1.0);
        assert_eq!(sf.internal[1], 7.0);
    }

    #[test]
    fn upwind_without_flux_is_a_configuration_error() {
        let (mesh, vf) = setup(vec![1.0, 2.0]);
        assert!(matches!(weights(&mesh, Scheme::Upwind, None, &vf), Err(Error::Config(_))));
    }

    #[test]
    fn limited_weights_are_bounded() {
        let (mesh, vf) = setup(vec![0.0, 0.0, 1.0, 5.0, 5.0, 2.0]);
        let phi = SurfaceField::uniform("phi", &mesh, DIMLESS, 1.0);

        let w = weights(&mesh, Scheme::LimitedLinear { k: 1.0 }, Some(&phi), &vf).unwrap();
        for face in 0..mesh.n_internal_faces() {
            assert!(w[face] >= 0.5 - 1e-12 && w[face] <= 1.0 + 1e-12);
        }
        let w = weights(&mesh, Scheme::VanLeer, Some(&phi), &vf).unwrap();
        for face in 0..mesh.n_internal_faces() {
            assert!(w[face] >= -1e-12 && w[face] <= 1.0 + 1e-12);
        }
        // flat on the upwind side, so the limiter falls back to upwind
        assert_eq!(w[4], 1.0);
    }

    #[test]
    fn van_leer_is_linear_on_smooth_data() {
        let (mesh, vf) = setup(vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        let phi = SurfaceField::uniform("phi", &mesh, DIMLESS, 1.0);
        let w = weights(&mesh, Scheme::VanLeer, Some(&phi), &vf).unwrap();
        assert_relative_eq!(w[1], 0.5, epsilon = 1e-12);
        assert_relative_eq!(w[2], 0.5, epsilon = 1e-12);
    }
}
